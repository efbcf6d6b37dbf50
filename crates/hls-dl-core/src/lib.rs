//! Batch HLS episode acquisition engine.
//!
//! Resolves an episode reference to a direct media playlist, downloads and
//! decrypts its segments with bounded concurrency and resumable state, then
//! muxes the result into a single file via an external tool. [`scheduler`]
//! runs many episodes at once.

pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
mod js_eval;
pub mod logging;
pub mod model;
pub mod mux;
pub mod orchestrator;
pub mod pipeline;
pub mod playlist;
pub mod resolver;
pub mod retry;
pub mod sanitize;
pub mod scheduler;

pub use config::EngineConfig;
pub use error::DownloadError;
pub use http::HttpFetcher;
pub use model::{EpisodeRef, Quality, ShowRef, StreamChoice};
pub use scheduler::{JobRequest, ShutdownController};
