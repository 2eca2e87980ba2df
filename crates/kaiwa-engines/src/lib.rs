//! HTTP collaborators for the kaiwa pipeline.
//!
//! Concrete implementations of the `kaiwa-core` ports, each a thin client
//! over one upstream service:
//!
//! - [`HttpChatStream`] — OpenAI-style SSE chat streaming
//! - [`HttpSynthesizer`] — text → audio bytes
//! - [`HttpTranscriber`] — audio bytes → text
//! - [`HttpFrameGenerator`] — audio → lip-sync frame event stream
//!
//! Every call carries its own timeout (independent of the pipeline) and
//! observes the run's cancellation token at each suspension point; a
//! token-caused abort surfaces as `EngineError::Cancelled`, never as a
//! real failure.

pub mod chat;
pub mod config;
pub mod frames;
pub mod stt;
pub mod tts;

mod http;

pub use chat::HttpChatStream;
pub use config::EngineConfig;
pub use frames::HttpFrameGenerator;
pub use stt::HttpTranscriber;
pub use tts::HttpSynthesizer;
