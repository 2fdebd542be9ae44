pub mod codec;
pub mod gtid_set;
pub mod interval;
pub mod uuid_set;

pub use codec::GtidCodec;
pub use gtid_set::GtidSet;
pub use interval::Interval;
pub use uuid_set::UuidSet;
