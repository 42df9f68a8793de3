//! Data model, stream handler contract, and codecs shared by every
//! FastRTC transport crate.

pub mod codec;
pub mod error;
pub mod handler;
pub mod output_framer;
pub mod output_queue;
pub mod resample;
pub mod types;

pub use error::{Error, Result};
pub use handler::{BlockingStreamHandler, BlockingHandler, HandlerReadiness, StreamHandler};
pub use output_framer::OutputFramer;
pub use types::{
    AdditionalOutputs, AudioFrame, ControlMessage, ControlSink, EmitType, Layout, Samples, VideoFrame,
};
