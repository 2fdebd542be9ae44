use crate::query::DebugInfo;

/// Line-protocol response rendering. Multi-line responses are terminated by
/// `END`; every response ends with CRLF.
pub struct ResponseFormatter;

impl ResponseFormatter {
    pub fn error(message: impl AsRef<str>) -> String {
        format!("ERROR {}\r\n", message.as_ref())
    }

    pub fn ok() -> String {
        "+OK\r\n".to_string()
    }

    /// Single-value responses such as COUNT.
    pub fn ok_value(value: impl ToString) -> String {
        format!("+OK {}\r\n", value.to_string())
    }

    /// SEARCH: total count, one primary key per line, optional DEBUG block,
    /// END.
    pub fn search(total: usize, primary_keys: &[String], debug: Option<&DebugInfo>) -> String {
        let mut out = format!("+OK {}\r\n", total);
        for pk in primary_keys {
            out.push_str(pk);
            out.push_str("\r\n");
        }
        if let Some(debug) = debug {
            for line in debug.render() {
                out.push_str(&line);
                out.push_str("\r\n");
            }
        }
        out.push_str("END\r\n");
        out
    }

    pub fn count(total: usize, debug: Option<&DebugInfo>) -> String {
        match debug {
            None => Self::ok_value(total),
            Some(debug) => {
                let mut out = format!("+OK {}\r\n", total);
                for line in debug.render() {
                    out.push_str(&line);
                    out.push_str("\r\n");
                }
                out.push_str("END\r\n");
                out
            }
        }
    }

    /// Generic multi-line body.
    pub fn lines(lines: &[String]) -> String {
        let mut out = "+OK\r\n".to_string();
        for line in lines {
            out.push_str(line);
            out.push_str("\r\n");
        }
        out.push_str("END\r\n");
        out
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn formats() {
        assert_eq!(ResponseFormatter::error("nope"), "ERROR nope\r\n");
        assert_eq!(ResponseFormatter::ok_value(7), "+OK 7\r\n");

        let rendered = ResponseFormatter::search(2, &["100".to_string(), "99".to_string()], None);
        assert_eq!(rendered, "+OK 2\r\n100\r\n99\r\nEND\r\n");

        let rendered = ResponseFormatter::lines(&["a=1".to_string()]);
        assert!(rendered.starts_with("+OK\r\n"));
        assert!(rendered.ends_with("END\r\n"));
    }
}
