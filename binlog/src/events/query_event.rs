use common::err::{CResult, Error};

use crate::events::event_header::{EventHeader, COMMON_HEADER_LEN};
use crate::utils::{sanitize_utf8, uint2korr};

/// DDL statements the apply worker reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DdlOp {
    Truncate,
    Drop,
    Alter,
}

/// Extracts the SQL statement from a QUERY event.
///
/// Post-header: thread_id (4), exec_time (4), db_len (1), error_code (2),
/// status_vars_len (2), then the status vars, the NUL-terminated database
/// name and finally the statement itself.
pub fn extract_query(event: &[u8]) -> CResult<String> {
    let header = EventHeader::parse(event)?;
    let end = header.parseable_end();
    let mut pos = COMMON_HEADER_LEN;

    if pos + 13 > end {
        return Err(Error::Corrupt("QUERY event too short for post-header".to_string()));
    }
    pos += 4; // thread_id
    pos += 4; // exec_time
    let db_len = event[pos] as usize;
    pos += 1;
    pos += 2; // error_code
    let status_vars_len = uint2korr(&event[pos..]) as usize;
    pos += 2;

    if pos + status_vars_len > end {
        return Err(Error::Corrupt("QUERY event truncated at status vars".to_string()));
    }
    pos += status_vars_len;

    if pos + db_len + 1 > end {
        return Err(Error::Corrupt("QUERY event truncated at database name".to_string()));
    }
    pos += db_len + 1;

    if pos >= end {
        return Err(Error::Corrupt("QUERY event carries no statement".to_string()));
    }
    Ok(sanitize_utf8(&event[pos..end]))
}

/// Uppercases and matches the statement against TRUNCATE TABLE, DROP TABLE
/// [IF EXISTS] and ALTER TABLE for the given table. Backtick quoting and a
/// `db.table` qualifier are tolerated. A deliberate tokeniser rather than a
/// regex: the match set is tiny and fixed.
pub fn classify_ddl(query: &str, table_name: &str) -> Option<(DdlOp, String)> {
    let sql_upper = query.to_uppercase();
    let tokens: Vec<&str> = sql_upper.split_whitespace().collect();
    let table_upper = table_name.to_uppercase();

    let op = match tokens.as_slice() {
        ["TRUNCATE", "TABLE", target, ..] if target_matches(target, &table_upper) => DdlOp::Truncate,
        ["DROP", "TABLE", "IF", "EXISTS", target, ..] if target_matches(target, &table_upper) => DdlOp::Drop,
        ["DROP", "TABLE", target, ..] if target_matches(target, &table_upper) => DdlOp::Drop,
        ["ALTER", "TABLE", target, ..] if target_matches(target, &table_upper) => DdlOp::Alter,
        _ => return None,
    };
    Some((op, normalized_sql(&sql_upper)))
}

/// Collapses whitespace runs so the stored statement is stable.
fn normalized_sql(sql_upper: &str) -> String {
    sql_upper.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Strips statement punctuation, backticks and a database qualifier before
/// comparing with the (uppercased) table name.
fn target_matches(token: &str, table_upper: &str) -> bool {
    let stripped = token.trim_end_matches([';', ',', '(']);
    let stripped = stripped.trim_matches('`');
    let bare = match stripped.rsplit_once('.') {
        Some((_, name)) => name.trim_matches('`'),
        None => stripped,
    };
    bare == table_upper
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn truncate_detection() {
        let (op, sql) = classify_ddl("truncate table articles", "articles").unwrap();
        assert_eq!(op, DdlOp::Truncate);
        assert_eq!(sql, "TRUNCATE TABLE ARTICLES");
    }

    #[test]
    fn drop_with_if_exists_and_backticks() {
        let (op, _) = classify_ddl("DROP TABLE IF EXISTS `articles`", "articles").unwrap();
        assert_eq!(op, DdlOp::Drop);
        let (op, _) = classify_ddl("DROP TABLE `articles`;", "articles").unwrap();
        assert_eq!(op, DdlOp::Drop);
    }

    #[test]
    fn alter_with_qualifier_and_tail() {
        let (op, _) = classify_ddl("ALTER TABLE app.`articles` ADD COLUMN x INT", "articles").unwrap();
        assert_eq!(op, DdlOp::Alter);
    }

    #[test]
    fn other_tables_ignored() {
        assert!(classify_ddl("TRUNCATE TABLE comments", "articles").is_none());
        // No prefix matching: "articles_old" is a different table.
        assert!(classify_ddl("ALTER TABLE articles_old ADD x INT", "articles").is_none());
        assert!(classify_ddl("INSERT INTO articles VALUES (1)", "articles").is_none());
        assert!(classify_ddl("CREATE TABLE articles (id INT)", "articles").is_none());
    }

    #[test]
    fn whitespace_collapsed() {
        let (_, sql) = classify_ddl("ALTER   TABLE\n\tarticles ENGINE=InnoDB", "articles").unwrap();
        assert_eq!(sql, "ALTER TABLE ARTICLES ENGINE=INNODB");
    }

    #[test]
    fn query_extraction() {
        let statement = b"TRUNCATE TABLE articles";
        let db = b"app";
        let mut body = Vec::new();
        body.extend_from_slice(&1u32.to_le_bytes()); // thread_id
        body.extend_from_slice(&0u32.to_le_bytes()); // exec_time
        body.push(db.len() as u8);
        body.extend_from_slice(&0u16.to_le_bytes()); // error_code
        body.extend_from_slice(&0u16.to_le_bytes()); // status_vars_len
        body.extend_from_slice(db);
        body.push(0);
        body.extend_from_slice(statement);

        let event_size = (COMMON_HEADER_LEN + body.len() + 4) as u32;
        let mut event = Vec::new();
        event.extend_from_slice(&0u32.to_le_bytes());
        event.push(crate::events::EventType::Query as u8);
        event.extend_from_slice(&1u32.to_le_bytes());
        event.extend_from_slice(&event_size.to_le_bytes());
        event.extend_from_slice(&0u32.to_le_bytes());
        event.extend_from_slice(&0u16.to_le_bytes());
        event.extend_from_slice(&body);
        event.extend_from_slice(&[0u8; 4]);

        assert_eq!(extract_query(&event).unwrap(), "TRUNCATE TABLE articles");
    }
}
