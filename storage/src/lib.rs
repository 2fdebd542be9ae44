pub mod doc_store;
pub mod dump;
pub mod gtid_state;

pub use doc_store::{Document, DocumentStore};
pub use gtid_state::GtidStateFile;
