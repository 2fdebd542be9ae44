use common::err::{CResult, Error};
use common::query::{FilterCondition, FilterOp, OrderByClause, Query, QueryType, SortOrder};

/// Parses one request line into a `Query`.
///
/// Stateless: every connection thread builds its own parser per request, so
/// nothing is shared. Double quotes group multi-word terms and literals.
#[derive(Debug, Default)]
pub struct QueryParser {
    max_query_length: usize,
}

impl QueryParser {
    pub fn new(max_query_length: usize) -> Self {
        QueryParser { max_query_length }
    }

    pub fn parse(&self, request: &str) -> CResult<Query> {
        if self.max_query_length > 0 && request.len() > self.max_query_length {
            return Err(Error::InvalidInput(format!(
                "request of {} bytes exceeds the {} byte cap",
                request.len(),
                self.max_query_length
            )));
        }

        let tokens = tokenize(request)?;
        if tokens.is_empty() {
            return Err(Error::InvalidInput("empty request".to_string()));
        }

        let command = tokens[0].to_uppercase();
        match command.as_str() {
            "SEARCH" => self.parse_search(&tokens, QueryType::Search),
            "COUNT" => self.parse_search(&tokens, QueryType::Count),
            "GET" => {
                expect_operands(&tokens, 2, "GET <table> <primary_key>")?;
                let mut query = Query::new(QueryType::Get);
                query.table = tokens[1].clone();
                query.primary_key = tokens[2].clone();
                Ok(query)
            }
            "INFO" => Ok(Query::new(QueryType::Info)),
            "CONFIG" => self.parse_config(&tokens),
            "DUMP" => self.parse_dump(&tokens),
            "CACHE" => self.parse_cache(&tokens),
            "DEBUG" => self.parse_debug(&tokens),
            other => Err(Error::InvalidInput(format!("unknown command: {}", other))),
        }
    }

    fn parse_search(&self, tokens: &[String], query_type: QueryType) -> CResult<Query> {
        let command = tokens[0].to_uppercase();
        if tokens.len() < 3 {
            return Err(Error::InvalidInput(format!("{} <table> <text> ...", command)));
        }
        let mut query = Query::new(query_type);
        query.table = tokens[1].clone();
        query.search_text = tokens[2].clone();

        let mut pos = 3;
        while pos < tokens.len() {
            let keyword = tokens[pos].to_uppercase();
            match keyword.as_str() {
                "AND" => {
                    let term = tokens
                        .get(pos + 1)
                        .ok_or_else(|| Error::InvalidInput("AND requires a term".to_string()))?;
                    query.and_terms.push(term.clone());
                    pos += 2;
                }
                "NOT" => {
                    let term = tokens
                        .get(pos + 1)
                        .ok_or_else(|| Error::InvalidInput("NOT requires a term".to_string()))?;
                    query.not_terms.push(term.clone());
                    pos += 2;
                }
                "FILTER" => {
                    let column = tokens
                        .get(pos + 1)
                        .ok_or_else(|| Error::InvalidInput("FILTER <column> <op> <literal>".to_string()))?;
                    let op_token = tokens
                        .get(pos + 2)
                        .ok_or_else(|| Error::InvalidInput("FILTER <column> <op> <literal>".to_string()))?;
                    let literal = tokens
                        .get(pos + 3)
                        .ok_or_else(|| Error::InvalidInput("FILTER <column> <op> <literal>".to_string()))?;
                    let op = FilterOp::parse(op_token)
                        .ok_or_else(|| Error::InvalidInput(format!("unknown filter operator: {}", op_token)))?;
                    query.filters.push(FilterCondition {
                        column: column.clone(),
                        op,
                        value: literal.clone(),
                    });
                    pos += 4;
                }
                "SORT" => {
                    if query_type == QueryType::Count {
                        return Err(Error::InvalidInput("COUNT does not take SORT".to_string()));
                    }
                    let column = tokens
                        .get(pos + 1)
                        .ok_or_else(|| Error::InvalidInput("SORT <column> (ASC|DESC)".to_string()))?;
                    let direction = tokens
                        .get(pos + 2)
                        .ok_or_else(|| Error::InvalidInput("SORT <column> (ASC|DESC)".to_string()))?;
                    let order = match direction.to_uppercase().as_str() {
                        "ASC" => SortOrder::Asc,
                        "DESC" => SortOrder::Desc,
                        other => {
                            return Err(Error::InvalidInput(format!("unknown sort direction: {}", other)));
                        }
                    };
                    query.order_by = Some(OrderByClause {
                        column: column.clone(),
                        order,
                    });
                    pos += 3;
                }
                "LIMIT" => {
                    if query_type == QueryType::Count {
                        return Err(Error::InvalidInput("COUNT does not take LIMIT".to_string()));
                    }
                    let value = tokens
                        .get(pos + 1)
                        .ok_or_else(|| Error::InvalidInput("LIMIT <n>".to_string()))?;
                    query.limit = value
                        .parse()
                        .map_err(|_| Error::InvalidInput(format!("invalid LIMIT: {}", value)))?;
                    query.limit_explicit = true;
                    pos += 2;
                }
                "OFFSET" => {
                    if query_type == QueryType::Count {
                        return Err(Error::InvalidInput("COUNT does not take OFFSET".to_string()));
                    }
                    let value = tokens
                        .get(pos + 1)
                        .ok_or_else(|| Error::InvalidInput("OFFSET <n>".to_string()))?;
                    query.offset = value
                        .parse()
                        .map_err(|_| Error::InvalidInput(format!("invalid OFFSET: {}", value)))?;
                    query.offset_explicit = true;
                    pos += 2;
                }
                other => {
                    return Err(Error::InvalidInput(format!("unexpected token: {}", other)));
                }
            }
        }
        Ok(query)
    }

    fn parse_config(&self, tokens: &[String]) -> CResult<Query> {
        let sub = tokens
            .get(1)
            .map(|t| t.to_uppercase())
            .ok_or_else(|| Error::InvalidInput("CONFIG (HELP [path] | SHOW [path] | VERIFY <file>)".to_string()))?;
        let mut query = match sub.as_str() {
            "HELP" => Query::new(QueryType::ConfigHelp),
            "SHOW" => Query::new(QueryType::ConfigShow),
            "VERIFY" => {
                expect_operands(tokens, 2, "CONFIG VERIFY <file>")?;
                Query::new(QueryType::ConfigVerify)
            }
            other => {
                return Err(Error::InvalidInput(format!("unknown CONFIG subcommand: {}", other)));
            }
        };
        if let Some(path) = tokens.get(2) {
            query.path = path.clone();
        }
        Ok(query)
    }

    fn parse_dump(&self, tokens: &[String]) -> CResult<Query> {
        let sub = tokens
            .get(1)
            .map(|t| t.to_uppercase())
            .ok_or_else(|| Error::InvalidInput("DUMP (SAVE [file] | LOAD <file> | VERIFY <file> | INFO <file>)".to_string()))?;
        let mut query = match sub.as_str() {
            "SAVE" => Query::new(QueryType::DumpSave),
            "LOAD" => {
                expect_operands(tokens, 2, "DUMP LOAD <file>")?;
                Query::new(QueryType::DumpLoad)
            }
            "VERIFY" => {
                expect_operands(tokens, 2, "DUMP VERIFY <file>")?;
                Query::new(QueryType::DumpVerify)
            }
            "INFO" => {
                expect_operands(tokens, 2, "DUMP INFO <file>")?;
                Query::new(QueryType::DumpInfo)
            }
            other => {
                return Err(Error::InvalidInput(format!("unknown DUMP subcommand: {}", other)));
            }
        };
        if let Some(path) = tokens.get(2) {
            query.path = path.clone();
        }
        Ok(query)
    }

    fn parse_cache(&self, tokens: &[String]) -> CResult<Query> {
        let sub = tokens
            .get(1)
            .map(|t| t.to_uppercase())
            .ok_or_else(|| Error::InvalidInput("CACHE (CLEAR [table] | STATS | ENABLE | DISABLE)".to_string()))?;
        match sub.as_str() {
            "CLEAR" => {
                let mut query = Query::new(QueryType::CacheClear);
                if let Some(table) = tokens.get(2) {
                    query.table = table.clone();
                }
                Ok(query)
            }
            "STATS" => Ok(Query::new(QueryType::CacheStats)),
            "ENABLE" => Ok(Query::new(QueryType::CacheEnable)),
            "DISABLE" => Ok(Query::new(QueryType::CacheDisable)),
            other => Err(Error::InvalidInput(format!("unknown CACHE subcommand: {}", other))),
        }
    }

    fn parse_debug(&self, tokens: &[String]) -> CResult<Query> {
        let sub = tokens
            .get(1)
            .map(|t| t.to_uppercase())
            .ok_or_else(|| Error::InvalidInput("DEBUG (ON | OFF)".to_string()))?;
        match sub.as_str() {
            "ON" => Ok(Query::new(QueryType::DebugOn)),
            "OFF" => Ok(Query::new(QueryType::DebugOff)),
            other => Err(Error::InvalidInput(format!("unknown DEBUG subcommand: {}", other))),
        }
    }
}

fn expect_operands(tokens: &[String], count: usize, usage: &str) -> CResult<()> {
    if tokens.len() < count + 1 {
        return Err(Error::InvalidInput(usage.to_string()));
    }
    Ok(())
}

/// Whitespace-separated tokens; double quotes group and are stripped.
fn tokenize(request: &str) -> CResult<Vec<String>> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in request.chars() {
        match c {
            '"' => {
                if in_quotes {
                    tokens.push(std::mem::take(&mut current));
                    in_quotes = false;
                } else {
                    in_quotes = true;
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if in_quotes {
        return Err(Error::InvalidInput("unterminated quote".to_string()));
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    Ok(tokens)
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(request: &str) -> CResult<Query> {
        QueryParser::new(1024).parse(request)
    }

    #[test]
    fn full_search_grammar() {
        let query = parse(
            "SEARCH articles \"hello world\" AND rust NOT java FILTER status = 1 FILTER score >= 2.5 SORT id ASC LIMIT 20 OFFSET 40",
        )
        .unwrap();
        assert_eq!(query.query_type, QueryType::Search);
        assert_eq!(query.table, "articles");
        assert_eq!(query.search_text, "hello world");
        assert_eq!(query.and_terms, vec!["rust"]);
        assert_eq!(query.not_terms, vec!["java"]);
        assert_eq!(query.filters.len(), 2);
        assert_eq!(query.filters[0].op, FilterOp::Eq);
        assert_eq!(query.filters[1].op, FilterOp::Gte);
        let order = query.order_by.unwrap();
        assert_eq!(order.column, "id");
        assert_eq!(order.order, SortOrder::Asc);
        assert_eq!(query.limit, 20);
        assert!(query.limit_explicit);
        assert_eq!(query.offset, 40);
    }

    #[test]
    fn count_rejects_pagination() {
        assert!(parse("COUNT articles hello LIMIT 5").is_err());
        assert!(parse("COUNT articles hello SORT id ASC").is_err());
        let query = parse("COUNT articles hello AND rust").unwrap();
        assert_eq!(query.query_type, QueryType::Count);
    }

    #[test]
    fn get_and_info() {
        let query = parse("GET articles 100").unwrap();
        assert_eq!(query.query_type, QueryType::Get);
        assert_eq!(query.primary_key, "100");
        assert!(parse("GET articles").is_err());

        assert_eq!(parse("INFO").unwrap().query_type, QueryType::Info);
    }

    #[test]
    fn admin_subcommands() {
        assert_eq!(parse("CONFIG HELP").unwrap().query_type, QueryType::ConfigHelp);
        assert_eq!(parse("CONFIG SHOW cache").unwrap().path, "cache");
        assert!(parse("CONFIG VERIFY").is_err());
        assert_eq!(parse("DUMP SAVE").unwrap().query_type, QueryType::DumpSave);
        assert_eq!(parse("DUMP LOAD /tmp/x.dmp").unwrap().path, "/tmp/x.dmp");
        assert!(parse("DUMP LOAD").is_err());
        assert_eq!(parse("CACHE CLEAR articles").unwrap().table, "articles");
        assert_eq!(parse("CACHE STATS").unwrap().query_type, QueryType::CacheStats);
        assert_eq!(parse("DEBUG ON").unwrap().query_type, QueryType::DebugOn);
        assert!(parse("DEBUG MAYBE").is_err());
    }

    #[test]
    fn case_insensitive_keywords() {
        let query = parse("search articles hello and rust limit 5").unwrap();
        assert_eq!(query.and_terms, vec!["rust"]);
        assert_eq!(query.limit, 5);
    }

    #[test]
    fn errors() {
        assert!(parse("").is_err());
        assert!(parse("FROBNICATE x").is_err());
        assert!(parse("SEARCH articles").is_err());
        assert!(parse("SEARCH articles hello FILTER status").is_err());
        assert!(parse("SEARCH articles \"unterminated").is_err());
        assert!(parse("SEARCH articles hello LIMIT abc").is_err());

        let parser = QueryParser::new(10);
        assert!(parser.parse("SEARCH articles hello").is_err());
    }
}
