use common::err::{CResult, Error};

use crate::bytes::read_lenc_integer;

/// Server error packet: 0xFF marker, error code, optional SQL state, text.
#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub code: u16,
    pub message: String,
}

// Codes that mean the stream died rather than the request being wrong.
const ER_SERVER_SHUTDOWN: u16 = 1053;
const CR_SERVER_GONE_ERROR: u16 = 2006;
const CR_SERVER_LOST: u16 = 2013;

impl ErrPacket {
    pub fn is_err(packet: &[u8]) -> bool {
        packet.first() == Some(&0xFF)
    }

    pub fn parse(packet: &[u8]) -> CResult<ErrPacket> {
        if packet.len() < 3 || packet[0] != 0xFF {
            return Err(Error::Corrupt("not an ERR packet".to_string()));
        }
        let code = u16::from(packet[1]) | (u16::from(packet[2]) << 8);
        let mut rest = &packet[3..];
        // Protocol 4.1: '#' plus a five-byte SQL state precedes the message.
        if rest.first() == Some(&b'#') && rest.len() >= 6 {
            rest = &rest[6..];
        }
        Ok(ErrPacket {
            code,
            message: String::from_utf8_lossy(rest).into_owned(),
        })
    }

    /// Maps the error onto the pipeline's error kinds. Lost-connection codes
    /// are transient; everything else surfaces as-is.
    pub fn into_error(self) -> Error {
        match self.code {
            ER_SERVER_SHUTDOWN | CR_SERVER_GONE_ERROR | CR_SERVER_LOST => {
                Error::Unavailable(format!("({}) {}", self.code, self.message))
            }
            1044 | 1045 | 1142 | 1227 | 3879 => {
                Error::PermissionDenied(format!("({}) {}", self.code, self.message))
            }
            _ => Error::Internal(format!("server error ({}) {}", self.code, self.message)),
        }
    }
}

/// OK packet check (0x00 marker) for command responses.
pub fn is_ok(packet: &[u8]) -> bool {
    packet.first() == Some(&0x00)
}

/// EOF packet: 0xFE marker with a short body.
pub fn is_eof(packet: &[u8]) -> bool {
    packet.first() == Some(&0xFE) && packet.len() < 9
}

/// Affected-rows value of an OK packet, mostly for diagnostics.
pub fn ok_affected_rows(packet: &[u8]) -> Option<u64> {
    if !is_ok(packet) {
        return None;
    }
    read_lenc_integer(&packet[1..]).and_then(|(value, _)| value)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_err_with_sql_state() {
        let mut packet = vec![0xFF, 0x15, 0x04]; // 1045
        packet.extend_from_slice(b"#28000Access denied");
        let err = ErrPacket::parse(&packet).unwrap();
        assert_eq!(err.code, 1045);
        assert_eq!(err.message, "Access denied");
        assert_eq!(err.into_error().kind(), common::err::ErrorKind::PermissionDenied);
    }

    #[test]
    fn lost_connection_is_transient() {
        let mut packet = vec![0xFF, 0xDD, 0x07]; // 2013
        packet.extend_from_slice(b"Lost connection");
        let err = ErrPacket::parse(&packet).unwrap();
        assert!(err.into_error().is_transient());
    }

    #[test]
    fn markers() {
        assert!(is_ok(&[0x00, 0x00]));
        assert!(is_eof(&[0xFE, 0x00, 0x00, 0x02, 0x00]));
        assert!(!is_eof(&[0xFE; 20]));
        assert!(ErrPacket::is_err(&[0xFF, 0, 0]));
    }
}
