/// COM_QUERY: command byte 0x03 plus the statement text.
pub struct QueryCommand {
    pub sql: String,
}

const COM_QUERY: u8 = 0x03;

impl QueryCommand {
    pub fn new(sql: impl Into<String>) -> Self {
        QueryCommand { sql: sql.into() }
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut vec = Vec::with_capacity(1 + self.sql.len());
        vec.push(COM_QUERY);
        vec.extend_from_slice(self.sql.as_bytes());
        vec
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn layout() {
        let bytes = QueryCommand::new("SELECT @@gtid_mode").serialize();
        assert_eq!(bytes[0], 0x03);
        assert_eq!(&bytes[1..], b"SELECT @@gtid_mode");
    }
}
