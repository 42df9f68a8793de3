//! Session management and media pipelines for the WebRTC transport.

pub mod error;
pub mod media;
pub mod offer;
pub mod session;
pub mod watchdog;

pub use error::{Error, Result};
pub use offer::{handle_offer, OfferRequest, OfferResponse, WebRtcTransportConfig};
pub use session::{HandlerFactory, SessionHandle, SessionId, SessionManager};
