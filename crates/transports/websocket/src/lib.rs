//! Telephony (Twilio-style) websocket bridge over the stream handler
//! contract.

pub mod bridge;
pub mod error;
pub mod protocol;

pub use bridge::{run_session, EventSink, EventSource, TELEPHONY_SAMPLE_RATE};
pub use error::{Error, Result};
