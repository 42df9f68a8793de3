//! Pause- and stopword-gated conversational turn-taking engines.

pub mod algo;
pub mod pause;
pub mod stopwords;
pub mod vad;

pub use algo::AlgoOptions;
pub use pause::{PauseReply, ReplyOnPause};
pub use stopwords::{ReplyOnStopwords, Transcriber};
pub use vad::SpeechDetector;
