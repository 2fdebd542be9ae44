pub mod event_decoder;

pub use event_decoder::{DecodedEvent, EventDecoder};
