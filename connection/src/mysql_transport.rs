use std::time::Duration;

use tracing::{debug, info};

use common::config::MysqlConfig;
use common::err::{CResult, Error};

use crate::bytes::read_lenc_string;
use crate::commands::{AuthenticateCommand, DumpBinlogGtidCommand, QueryCommand};
use crate::packet::err_packet::{is_eof, is_ok};
use crate::packet::{ErrPacket, HandshakePacket, PacketChannel};
use crate::transport::BinlogTransport;

/// The concrete MySQL adapter behind `BinlogTransport`.
///
/// Speaks just enough of the client protocol for replication: handshake +
/// mysql_native_password (including the auth-switch path), COM_QUERY for
/// the setup statements, and COM_BINLOG_DUMP_GTID for the stream itself.
pub struct MysqlTransport {
    config: MysqlConfig,
    channel: Option<PacketChannel>,
    streaming: bool,
}

impl MysqlTransport {
    pub fn new(config: MysqlConfig) -> Self {
        MysqlTransport {
            config,
            channel: None,
            streaming: false,
        }
    }

    fn channel(&mut self) -> CResult<&mut PacketChannel> {
        self.channel
            .as_mut()
            .ok_or_else(|| Error::Unavailable("not connected".to_string()))
    }

    fn authenticate(&mut self, handshake: &HandshakePacket, seq: u8) -> CResult<()> {
        let command = AuthenticateCommand::new(
            &self.config.user,
            &self.config.password,
            (!self.config.database.is_empty()).then_some(self.config.database.as_str()),
            handshake,
        );
        let payload = command.serialize()?;
        let channel = self.channel()?;
        channel.write_packet(&payload, seq)?;

        let (response, response_seq) = channel.read_packet()?;
        if is_ok(&response) {
            return Ok(());
        }
        if ErrPacket::is_err(&response) {
            let err = ErrPacket::parse(&response)?;
            return Err(Error::PermissionDenied(format!(
                "authentication failed: ({}) {}",
                err.code, err.message
            )));
        }
        // Auth switch request: plugin name + fresh scramble, both
        // NUL-terminated.
        if response.first() == Some(&0xFE) {
            let rest = &response[1..];
            let split = rest
                .iter()
                .position(|b| *b == 0)
                .ok_or_else(|| Error::Corrupt("malformed auth switch packet".to_string()))?;
            let plugin = String::from_utf8_lossy(&rest[..split]).into_owned();
            if plugin != "mysql_native_password" {
                return Err(Error::Unsupported(format!(
                    "server requests auth plugin '{}', only mysql_native_password is supported",
                    plugin
                )));
            }
            let mut scramble = rest[split + 1..].to_vec();
            if scramble.last() == Some(&0) {
                scramble.pop();
            }
            let token = crate::bytes::encrypt_password(&self.config.password, &scramble);
            let channel = self.channel()?;
            channel.write_packet(&token, response_seq + 1)?;

            let (final_response, _) = channel.read_packet()?;
            if is_ok(&final_response) {
                return Ok(());
            }
            if ErrPacket::is_err(&final_response) {
                let err = ErrPacket::parse(&final_response)?;
                return Err(Error::PermissionDenied(format!(
                    "authentication failed: ({}) {}",
                    err.code, err.message
                )));
            }
            return Err(Error::Corrupt("unexpected packet after auth switch".to_string()));
        }
        Err(Error::Corrupt("unexpected packet during authentication".to_string()))
    }

    /// Runs a statement and returns the text-protocol rows (if any).
    fn query(&mut self, sql: &str) -> CResult<Vec<Vec<Option<String>>>> {
        debug!(event = "mysql_query", sql = %sql);
        let payload = QueryCommand::new(sql).serialize();
        let channel = self.channel()?;
        channel.write_packet(&payload, 0)?;

        let (first, _) = channel.read_packet()?;
        if is_ok(&first) {
            return Ok(Vec::new());
        }
        if ErrPacket::is_err(&first) {
            return Err(ErrPacket::parse(&first)?.into_error());
        }

        // Result set: column definitions up to EOF, then rows up to EOF.
        loop {
            let (packet, _) = channel.read_packet()?;
            if ErrPacket::is_err(&packet) {
                return Err(ErrPacket::parse(&packet)?.into_error());
            }
            if is_eof(&packet) {
                break;
            }
        }

        let mut rows = Vec::new();
        loop {
            let (packet, _) = channel.read_packet()?;
            if ErrPacket::is_err(&packet) {
                return Err(ErrPacket::parse(&packet)?.into_error());
            }
            if is_eof(&packet) {
                break;
            }
            let mut row = Vec::new();
            let mut rest = &packet[..];
            while !rest.is_empty() {
                let (value, consumed) = read_lenc_string(rest)
                    .ok_or_else(|| Error::Corrupt("malformed result set row".to_string()))?;
                row.push(value);
                rest = &rest[consumed..];
            }
            rows.push(row);
        }
        Ok(rows)
    }
}

impl BinlogTransport for MysqlTransport {
    fn connect(&mut self) -> CResult<()> {
        self.close();

        let mut channel = PacketChannel::connect(
            &self.config.host,
            self.config.port,
            Duration::from_secs(self.config.connect_timeout.max(1)),
            (self.config.read_timeout > 0).then(|| Duration::from_secs(self.config.read_timeout)),
            (self.config.write_timeout > 0).then(|| Duration::from_secs(self.config.write_timeout)),
        )?;

        let (packet, seq) = channel.read_packet()?;
        if ErrPacket::is_err(&packet) {
            return Err(ErrPacket::parse(&packet)?.into_error());
        }
        let handshake = HandshakePacket::parse(&packet)?;
        info!(
            event = "mysql_connect",
            server_version = %handshake.server_version,
            connection_id = handshake.connection_id,
            "connected to upstream"
        );

        self.channel = Some(channel);
        self.streaming = false;
        self.authenticate(&handshake, seq + 1)
    }

    fn verify_gtid_mode(&mut self) -> CResult<()> {
        let rows = self.query("SELECT @@gtid_mode")?;
        let mode = rows
            .first()
            .and_then(|row| row.first())
            .and_then(|cell| cell.clone())
            .unwrap_or_default();
        if mode != "ON" {
            return Err(Error::Unsupported(format!(
                "upstream gtid_mode is '{}', replication requires ON",
                mode
            )));
        }
        Ok(())
    }

    fn disable_checksum(&mut self) -> CResult<()> {
        self.query("SET @source_binlog_checksum = 'NONE'")?;
        Ok(())
    }

    fn subscribe(&mut self, server_id: u32, gtid_set: &str) -> CResult<()> {
        let payload = DumpBinlogGtidCommand::new(server_id, gtid_set).serialize()?;
        let channel = self.channel()?;
        channel.write_packet(&payload, 0)?;
        self.streaming = true;
        info!(event = "mysql_subscribe", server_id, gtid = %gtid_set, "binlog stream opened");
        Ok(())
    }

    fn fetch_event(&mut self) -> CResult<Option<Vec<u8>>> {
        if !self.streaming {
            return Err(Error::Internal("fetch_event before subscribe".to_string()));
        }
        let channel = self.channel()?;
        let (packet, _) = channel.read_packet()?;
        match packet.first() {
            Some(0x00) => Ok(Some(packet)),
            Some(0xFE) if packet.len() < 9 => Ok(None),
            Some(0xFF) => Err(ErrPacket::parse(&packet)?.into_error()),
            _ => Err(Error::Corrupt("unexpected packet in binlog stream".to_string())),
        }
    }

    fn close(&mut self) {
        if let Some(mut channel) = self.channel.take() {
            channel.shutdown();
        }
        self.streaming = false;
    }
}
