pub mod error;

pub use error::{Error, ErrorKind};

pub type CResult<T> = Result<T, Error>;
