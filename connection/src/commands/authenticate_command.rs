use std::io::{self, Cursor, Write};

use byteorder::{LittleEndian, WriteBytesExt};

use crate::bytes::{encrypt_password, write_null_term_string};
use crate::packet::HandshakePacket;

pub mod capability_flags {
    pub const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 0x0000_0008;
    pub const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
    pub const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;
    pub const CLIENT_PLUGIN_AUTH: u32 = 0x0008_0000;
}

/// Handshake response (protocol 4.1) authenticating with
/// mysql_native_password.
pub struct AuthenticateCommand {
    pub client_capabilities: u32,
    pub max_packet_size: u32,
    pub client_collation: u8,
    pub username: String,
    pub password: String,
    pub database: Option<String>,
    pub scramble: Vec<u8>,
    pub auth_plugin_name: String,
}

impl AuthenticateCommand {
    pub fn new(username: &str, password: &str, database: Option<&str>, handshake: &HandshakePacket) -> Self {
        let mut client_capabilities = capability_flags::CLIENT_LONG_FLAG
            | capability_flags::CLIENT_PROTOCOL_41
            | capability_flags::CLIENT_SECURE_CONNECTION
            | capability_flags::CLIENT_PLUGIN_AUTH;

        if database.is_some() {
            client_capabilities |= capability_flags::CLIENT_CONNECT_WITH_DB;
        }

        Self {
            client_capabilities,
            max_packet_size: 0,
            client_collation: 45, // utf8mb4_general_ci
            username: username.to_string(),
            password: password.to_string(),
            database: database.map(|d| d.to_string()),
            scramble: handshake.scramble.clone(),
            auth_plugin_name: "mysql_native_password".to_string(),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, io::Error> {
        let mut vec = Vec::new();
        let mut cursor = Cursor::new(&mut vec);

        cursor.write_u32::<LittleEndian>(self.client_capabilities)?;
        cursor.write_u32::<LittleEndian>(self.max_packet_size)?;
        cursor.write_u8(self.client_collation)?;

        // Reserved bytes.
        for _ in 0..23 {
            cursor.write_u8(0)?;
        }

        write_null_term_string(&mut cursor, &self.username)?;

        let encrypted_password = encrypt_password(&self.password, &self.scramble);
        cursor.write_u8(encrypted_password.len() as u8)?;
        cursor.write_all(&encrypted_password)?;

        if let Some(database) = &self.database {
            write_null_term_string(&mut cursor, database)?;
        }

        write_null_term_string(&mut cursor, &self.auth_plugin_name)?;
        Ok(vec)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn handshake() -> HandshakePacket {
        HandshakePacket {
            protocol_version: 10,
            server_version: "8.4.0".to_string(),
            connection_id: 1,
            scramble: (1..=20).collect(),
            capabilities: 0xFFFF_FFFF,
            auth_plugin_name: "mysql_native_password".to_string(),
        }
    }

    #[test]
    fn serialized_layout() {
        let command = AuthenticateCommand::new("repl", "secret", Some("app"), &handshake());
        let bytes = command.serialize().unwrap();

        // capabilities + max packet + collation + 23 reserved
        assert_eq!(bytes.len() > 32, true);
        // username is NUL terminated right after the fixed part
        assert_eq!(&bytes[32..36], b"repl");
        assert_eq!(bytes[36], 0);
        // scrambled password is always 20 bytes for a non-empty password
        assert_eq!(bytes[37], 20);
        let tail = &bytes[38 + 20..];
        assert!(tail.starts_with(b"app\0"));
        assert!(tail.ends_with(b"mysql_native_password\0"));
    }

    #[test]
    fn no_database_flag() {
        let command = AuthenticateCommand::new("repl", "", None, &handshake());
        assert_eq!(command.client_capabilities & capability_flags::CLIENT_CONNECT_WITH_DB, 0);
        let bytes = command.serialize().unwrap();
        // Empty password encodes a zero-length token.
        assert_eq!(bytes[37], 0);
    }
}
