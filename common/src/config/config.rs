use std::fmt::{self, Display, Formatter};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::err::{CResult, Error};

/// Upstream MySQL connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MysqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
    /// Zone applied when converting DATETIME/DATE filter columns to epoch
    /// seconds, e.g. "+09:00".
    pub datetime_timezone: String,
    pub connect_timeout: u64,
    pub read_timeout: u64,
    pub write_timeout: u64,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        MysqlConfig {
            host: "127.0.0.1".to_string(),
            port: 3306,
            user: String::new(),
            password: String::new(),
            database: String::new(),
            datetime_timezone: "+00:00".to_string(),
            connect_timeout: 10,
            read_timeout: 30,
            write_timeout: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub enable: bool,
    /// Must be non-zero and unique among replicas of the upstream.
    pub server_id: u32,
    /// GTID set to start from when no state file exists.
    pub start_gtid: String,
    pub state_file_path: String,
    /// Applied-GTID persistence interval, in events.
    pub state_write_interval_events: u64,
    pub queue_size: usize,
    pub reconnect_delay_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            enable: false,
            server_id: 0,
            start_gtid: String::new(),
            state_file_path: "mygram.gtid".to_string(),
            state_write_interval_events: 1000,
            queue_size: 10_000,
            reconnect_delay_ms: 1000,
        }
    }
}

/// Where the indexed text of a table comes from: a single column, or the
/// concatenation of several columns joined by `delimiter`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TextSourceConfig {
    pub column: String,
    pub concat: Vec<String>,
    pub delimiter: String,
}

impl TextSourceConfig {
    /// Columns the decoder must capture for text extraction.
    pub fn columns(&self) -> Vec<&str> {
        if !self.column.is_empty() {
            vec![self.column.as_str()]
        } else {
            self.concat.iter().map(|c| c.as_str()).collect()
        }
    }
}

/// Target type a filter column is parsed into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterType {
    Tinyint,
    TinyintUnsigned,
    Smallint,
    SmallintUnsigned,
    Mediumint,
    MediumintUnsigned,
    Int,
    IntUnsigned,
    Bigint,
    Float,
    Double,
    Boolean,
    String,
    Varchar,
    Text,
    Datetime,
    Date,
    Timestamp,
    Time,
}

impl FilterType {
    pub fn parse(name: &str) -> Option<FilterType> {
        match name {
            "tinyint" => Some(FilterType::Tinyint),
            "tinyint_unsigned" => Some(FilterType::TinyintUnsigned),
            "smallint" => Some(FilterType::Smallint),
            "smallint_unsigned" => Some(FilterType::SmallintUnsigned),
            "mediumint" => Some(FilterType::Mediumint),
            "mediumint_unsigned" => Some(FilterType::MediumintUnsigned),
            "int" => Some(FilterType::Int),
            "int_unsigned" => Some(FilterType::IntUnsigned),
            "bigint" => Some(FilterType::Bigint),
            "float" => Some(FilterType::Float),
            "double" => Some(FilterType::Double),
            "boolean" | "bool" => Some(FilterType::Boolean),
            "string" => Some(FilterType::String),
            "varchar" => Some(FilterType::Varchar),
            "text" => Some(FilterType::Text),
            "datetime" => Some(FilterType::Datetime),
            "date" => Some(FilterType::Date),
            "timestamp" => Some(FilterType::Timestamp),
            "time" => Some(FilterType::Time),
            _ => None,
        }
    }
}

/// Predicate every replicated row must satisfy to be accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredFilterConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub op: String,
    pub value: String,
}

/// Optional filter column bound to documents for FILTER clauses.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub dict_compress: bool,
    pub bitmap_index: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            name: String::new(),
            filter_type: FilterType::String,
            dict_compress: false,
            bitmap_index: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    pub name: String,
    pub primary_key: String,
    pub text_source: TextSourceConfig,
    /// N-gram width for non-CJK runs. 0 selects the tokenizer default.
    pub ngram_size: usize,
    /// N-gram width for CJK runs. 0 disables the separate CJK width.
    pub kanji_ngram_size: usize,
    pub required_filters: Vec<RequiredFilterConfig>,
    pub filters: Vec<FilterConfig>,
}

impl Default for TableConfig {
    fn default() -> Self {
        TableConfig {
            name: String::new(),
            primary_key: "id".to_string(),
            text_source: TextSourceConfig::default(),
            ngram_size: 2,
            kanji_ngram_size: 0,
            required_filters: Vec::new(),
            filters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_memory_bytes: usize,
    /// Queries cheaper than this are not admitted.
    pub min_query_cost_ms: f64,
    /// 0 disables TTL expiry.
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: false,
            max_memory_bytes: 64 * 1024 * 1024,
            min_query_cost_ms: 10.0,
            ttl_seconds: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    pub worker_threads: usize,
    pub recv_buffer_size: usize,
    pub send_buffer_size: usize,
    pub default_limit: u32,
    pub max_query_length: usize,
    /// Empty list admits every client.
    pub allow_cidrs: Vec<String>,
    /// Client socket timeouts in seconds; 0 disables.
    pub recv_timeout: u64,
    pub send_timeout: u64,
    /// Destination of DUMP SAVE when no path operand is given.
    pub dump_path: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 11211,
            max_connections: 1024,
            worker_threads: 8,
            recv_buffer_size: 64 * 1024,
            send_buffer_size: 64 * 1024,
            default_limit: 100,
            max_query_length: 64 * 1024,
            allow_cidrs: Vec::new(),
            recv_timeout: 300,
            send_timeout: 30,
            dump_path: "mygram.dmp".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mysql: MysqlConfig,
    pub replication: ReplicationConfig,
    pub tables: Vec<TableConfig>,
    pub cache: CacheConfig,
    pub server: ServerConfig,
}

pub const DEFAULT_LIMIT_MIN: u32 = 5;
pub const DEFAULT_LIMIT_MAX: u32 = 1000;

impl Config {
    pub fn load(path: &Path) -> CResult<Config> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let config: Config =
            toml::from_str(&raw).map_err(|e| Error::Config(format!("cannot parse {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CResult<()> {
        if self.tables.is_empty() {
            return Err(Error::Config("at least one [[tables]] entry is required".to_string()));
        }
        for table in &self.tables {
            if table.name.is_empty() {
                return Err(Error::Config("tables[].name must not be empty".to_string()));
            }
            if table.primary_key.is_empty() {
                return Err(Error::Config(format!("tables[{}].primary_key must not be empty", table.name)));
            }
            if table.text_source.column.is_empty() && table.text_source.concat.is_empty() {
                return Err(Error::Config(format!(
                    "tables[{}].text_source needs a column or a concat list",
                    table.name
                )));
            }
            for required in &table.required_filters {
                if !matches!(required.op.as_str(), "=" | "!=" | ">" | ">=" | "<" | "<=" | "IS NULL" | "IS NOT NULL")
                {
                    return Err(Error::Config(format!(
                        "tables[{}].required_filters[{}] has unknown op '{}'",
                        table.name, required.name, required.op
                    )));
                }
            }
        }
        if self.replication.enable && self.replication.server_id == 0 {
            return Err(Error::Config("replication.server_id must be non-zero".to_string()));
        }
        if self.replication.queue_size == 0 {
            return Err(Error::Config("replication.queue_size must be positive".to_string()));
        }
        if self.server.default_limit < DEFAULT_LIMIT_MIN || self.server.default_limit > DEFAULT_LIMIT_MAX {
            return Err(Error::Config(format!(
                "server.default_limit must be in [{}, {}]",
                DEFAULT_LIMIT_MIN, DEFAULT_LIMIT_MAX
            )));
        }
        Ok(())
    }

    pub fn table(&self, name: &str) -> Option<&TableConfig> {
        self.tables.iter().find(|t| t.name == name)
    }

    /// TOML rendering with sensitive fields replaced by `***`, for
    /// CONFIG SHOW.
    pub fn to_masked_toml(&self) -> String {
        let mut masked = self.clone();
        if !masked.mysql.password.is_empty() {
            masked.mysql.password = "***".to_string();
        }
        toml::to_string_pretty(&masked).unwrap_or_else(|e| format!("# serialization failed: {}", e))
    }

    /// One line per recognised option, for CONFIG HELP. An optional prefix
    /// narrows the listing to a section, e.g. "cache".
    pub fn describe_schema(prefix: &str) -> Vec<SchemaEntry> {
        let all = [
            SchemaEntry::new("mysql.host", "string", "upstream MySQL host"),
            SchemaEntry::new("mysql.port", "u16", "upstream MySQL port"),
            SchemaEntry::new("mysql.user", "string", "replication user"),
            SchemaEntry::new("mysql.password", "string", "replication password (masked in SHOW)"),
            SchemaEntry::new("mysql.database", "string", "schema holding the mirrored tables"),
            SchemaEntry::new("mysql.datetime_timezone", "string", "zone for DATETIME/DATE filters, default +00:00"),
            SchemaEntry::new("mysql.connect_timeout", "u64", "connect timeout in seconds"),
            SchemaEntry::new("mysql.read_timeout", "u64", "socket read timeout in seconds"),
            SchemaEntry::new("mysql.write_timeout", "u64", "socket write timeout in seconds"),
            SchemaEntry::new("replication.enable", "bool", "consume the upstream binlog"),
            SchemaEntry::new("replication.server_id", "u32", "replica server id, non-zero"),
            SchemaEntry::new("replication.start_gtid", "string", "GTID set to start from"),
            SchemaEntry::new("replication.state_file_path", "string", "applied-GTID state file"),
            SchemaEntry::new("replication.state_write_interval_events", "u64", "events between state writes"),
            SchemaEntry::new("replication.queue_size", "usize", "bounded event queue capacity"),
            SchemaEntry::new("replication.reconnect_delay_ms", "u64", "base reconnect backoff"),
            SchemaEntry::new("tables[].name", "string", "mirrored table name"),
            SchemaEntry::new("tables[].primary_key", "string", "primary key column"),
            SchemaEntry::new("tables[].text_source.column", "string", "single text column"),
            SchemaEntry::new("tables[].text_source.concat", "string[]", "columns concatenated into text"),
            SchemaEntry::new("tables[].text_source.delimiter", "string", "join delimiter for concat"),
            SchemaEntry::new("tables[].ngram_size", "usize", "n-gram width for non-CJK text"),
            SchemaEntry::new("tables[].kanji_ngram_size", "usize", "n-gram width for CJK text"),
            SchemaEntry::new("tables[].required_filters", "list", "predicates gating row acceptance"),
            SchemaEntry::new("tables[].filters", "list", "filter columns bound to documents"),
            SchemaEntry::new("cache.enabled", "bool", "enable the query cache"),
            SchemaEntry::new("cache.max_memory_bytes", "usize", "query cache memory budget"),
            SchemaEntry::new("cache.min_query_cost_ms", "f64", "admission threshold"),
            SchemaEntry::new("cache.ttl_seconds", "u64", "entry TTL, 0 disables"),
            SchemaEntry::new("server.host", "string", "listen address"),
            SchemaEntry::new("server.port", "u16", "listen port"),
            SchemaEntry::new("server.max_connections", "usize", "concurrent client cap"),
            SchemaEntry::new("server.worker_threads", "usize", "connection worker pool size"),
            SchemaEntry::new("server.recv_buffer_size", "usize", "socket receive buffer"),
            SchemaEntry::new("server.send_buffer_size", "usize", "socket send buffer"),
            SchemaEntry::new("server.default_limit", "u32", "LIMIT applied when unspecified, 5..1000"),
            SchemaEntry::new("server.max_query_length", "usize", "request line cap in bytes"),
            SchemaEntry::new("server.allow_cidrs", "string[]", "client allow-list, empty admits all"),
            SchemaEntry::new("server.recv_timeout", "u64", "client receive timeout in seconds, 0 disables"),
            SchemaEntry::new("server.send_timeout", "u64", "client send timeout in seconds, 0 disables"),
            SchemaEntry::new("server.dump_path", "string", "default DUMP SAVE destination"),
        ];
        all.into_iter().filter(|e| prefix.is_empty() || e.path.starts_with(prefix)).collect()
    }
}

#[derive(Debug, Clone)]
pub struct SchemaEntry {
    pub path: &'static str,
    pub value_type: &'static str,
    pub doc: &'static str,
}

impl SchemaEntry {
    fn new(path: &'static str, value_type: &'static str, doc: &'static str) -> Self {
        SchemaEntry { path, value_type, doc }
    }
}

impl Display for SchemaEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) - {}", self.path, self.value_type, self.doc)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn one_table() -> TableConfig {
        TableConfig {
            name: "articles".to_string(),
            primary_key: "id".to_string(),
            text_source: TextSourceConfig {
                column: "content".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[test]
    fn validate_requires_tables() {
        let config = Config::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_server_id() {
        let mut config = Config::default();
        config.tables.push(one_table());
        assert!(config.validate().is_ok());

        config.replication.enable = true;
        assert!(config.validate().is_err());
        config.replication.server_id = 42;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parse_toml() {
        let raw = r#"
[mysql]
host = "db.local"
port = 3306
user = "repl"
password = "secret"
database = "app"

[replication]
enable = true
server_id = 99

[[tables]]
name = "articles"
primary_key = "id"
ngram_size = 2

[tables.text_source]
column = "content"

[[tables.required_filters]]
name = "status"
type = "int"
op = "="
value = "1"

[cache]
enabled = true
max_memory_bytes = 1048576
"#;
        let config: Config = toml::from_str(raw).unwrap();
        config.validate().unwrap();
        assert_eq!(config.mysql.host, "db.local");
        assert_eq!(config.tables[0].required_filters[0].filter_type, FilterType::Int);
        assert!(config.cache.enabled);
        assert_eq!(config.mysql.datetime_timezone, "+00:00");
    }

    #[test]
    fn masked_toml_hides_password() {
        let mut config = Config::default();
        config.tables.push(one_table());
        config.mysql.password = "hunter2".to_string();
        let rendered = config.to_masked_toml();
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn schema_prefix_filter() {
        assert!(!Config::describe_schema("").is_empty());
        let cache_only = Config::describe_schema("cache");
        assert!(cache_only.iter().all(|e| e.path.starts_with("cache")));
        assert_eq!(cache_only.len(), 4);
    }
}
