use common::query::{FilterCondition, OrderByClause, Query, QueryType, SortOrder};

/// Builds the canonical fingerprint of a cacheable query.
///
/// Two queries share a fingerprint iff they produce identical pre-pagination
/// result lists after sorting, so the cache can serve any OFFSET/LIMIT
/// window from one stored result. Defaulted limits canonicalise to one
/// token for exactly that reason.
pub struct QueryNormalizer;

/// The LIMIT token every defaulted limit canonicalises to.
const DEFAULT_LIMIT_TOKEN: u32 = 100;

impl QueryNormalizer {
    /// Empty string means the query is not cacheable.
    pub fn normalize(query: &Query) -> String {
        let command = match query.query_type {
            QueryType::Search => "SEARCH",
            QueryType::Count => "COUNT",
            _ => return String::new(),
        };

        let mut out = String::with_capacity(64);
        out.push_str(command);
        out.push(' ');
        out.push_str(&query.table);

        if !query.search_text.is_empty() {
            out.push(' ');
            out.push_str(&normalize_text(&query.search_text));
        }

        for term in &query.and_terms {
            out.push_str(" AND ");
            out.push_str(&normalize_text(term));
        }
        for term in &query.not_terms {
            out.push_str(" NOT ");
            out.push_str(&normalize_text(term));
        }

        if !query.filters.is_empty() {
            let mut sorted: Vec<&FilterCondition> = query.filters.iter().collect();
            sorted.sort_by(|a, b| a.column.cmp(&b.column));
            for filter in sorted {
                out.push_str(" FILTER ");
                out.push_str(&filter.column);
                out.push(' ');
                out.push_str(&filter.op.to_string());
                out.push(' ');
                out.push_str(&filter.value);
            }
        }

        out.push(' ');
        out.push_str(&sort_clause(&query.order_by));

        out.push_str(" LIMIT ");
        if query.limit_explicit {
            out.push_str(&query.limit.to_string());
        } else {
            out.push_str(&DEFAULT_LIMIT_TOKEN.to_string());
        }

        out.push_str(" OFFSET ");
        out.push_str(&query.offset.to_string());

        out
    }
}

/// Collapses whitespace runs to single spaces and trims the edges.
fn normalize_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<&str>>().join(" ")
}

fn sort_clause(order_by: &Option<OrderByClause>) -> String {
    match order_by {
        Some(clause) => {
            let column = if clause.column.is_empty() { "id" } else { &clause.column };
            let direction = match clause.order {
                SortOrder::Asc => "ASC",
                SortOrder::Desc => "DESC",
            };
            format!("SORT {} {}", column, direction)
        }
        // Default sort: primary key descending.
        None => "SORT id DESC".to_string(),
    }
}

#[cfg(test)]
mod test {
    use common::query::FilterOp;

    use super::*;

    fn search(table: &str, text: &str) -> Query {
        let mut query = Query::new(QueryType::Search);
        query.table = table.to_string();
        query.search_text = text.to_string();
        query
    }

    #[test]
    fn whitespace_collapses_to_same_fingerprint() {
        let a = QueryNormalizer::normalize(&search("articles", "hello   world"));
        let b = QueryNormalizer::normalize(&search("articles", " hello world "));
        assert_eq!(a, b);
    }

    #[test]
    fn defaulted_limits_share_fingerprint() {
        let mut a = search("articles", "hello");
        a.limit = 50; // dispatcher-applied default
        let mut b = search("articles", "hello");
        b.limit = 100;
        assert_eq!(QueryNormalizer::normalize(&a), QueryNormalizer::normalize(&b));

        let mut c = search("articles", "hello");
        c.limit = 50;
        c.limit_explicit = true;
        assert_ne!(QueryNormalizer::normalize(&a), QueryNormalizer::normalize(&c));
    }

    #[test]
    fn filters_sorted_by_column() {
        let mut a = search("articles", "hello");
        a.filters = vec![
            FilterCondition {
                column: "b".into(),
                op: FilterOp::Eq,
                value: "2".into(),
            },
            FilterCondition {
                column: "a".into(),
                op: FilterOp::Eq,
                value: "1".into(),
            },
        ];
        let mut b = search("articles", "hello");
        b.filters = vec![a.filters[1].clone(), a.filters[0].clone()];
        assert_eq!(QueryNormalizer::normalize(&a), QueryNormalizer::normalize(&b));
    }

    #[test]
    fn and_terms_keep_order() {
        let mut a = search("articles", "hello");
        a.and_terms = vec!["x".into(), "y".into()];
        let mut b = search("articles", "hello");
        b.and_terms = vec!["y".into(), "x".into()];
        assert_ne!(QueryNormalizer::normalize(&a), QueryNormalizer::normalize(&b));
    }

    #[test]
    fn default_sort_is_pk_desc() {
        let fingerprint = QueryNormalizer::normalize(&search("articles", "hello"));
        assert!(fingerprint.contains("SORT id DESC"));
    }

    #[test]
    fn only_search_and_count_are_cacheable() {
        let query = Query::new(QueryType::Info);
        assert!(QueryNormalizer::normalize(&query).is_empty());

        let mut count = Query::new(QueryType::Count);
        count.table = "articles".into();
        count.search_text = "hello".into();
        assert!(QueryNormalizer::normalize(&count).starts_with("COUNT articles"));
    }
}
