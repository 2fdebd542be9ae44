pub mod column_type;
pub mod value_decoder;

pub use column_type::ColumnType;
