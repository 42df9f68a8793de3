//! axum router exposing the offer/input/output/telephony endpoints.

pub mod error;
pub mod router;
mod telephony;

pub use error::{ApiError, ErrorResponse};
pub use router::{build_router, AppState};
