//! Ember: session and lifecycle coordination for an embedded LLM engine.
//!
//! This crate keeps a chat session responsive while an opaque inference
//! engine loads and answers prompts in a background worker:
//! Session → Worker → Engine Adapter → Engine
//!
//! # Architecture
//!
//! The pieces are connected by async channels:
//! - **Session coordinator**: Owns the transcript, status, and progress; turns user text into prompts
//! - **Worker runtime**: A tokio actor that serializes `init`, `prompt`, and `clearCache`
//! - **Engine adapter**: Probes the accelerator, loads the engine, and picks a completion call shape
//! - **Stdio host**: Runs a worker behind newline-delimited JSON on stdin/stdout
//! - **Storage**: Best-effort JSON key/value persistence for history and settings

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod session;
pub mod storage;
pub mod testing;
pub mod transcript;
pub mod worker;

pub use config::{ChunkPolicy, EmberConfig, NotReadyPolicy};
pub use engine::{EngineInstance, EngineLoader, EngineModule};
pub use error::{EmberError, ErrorKind, Result};
pub use session::{SessionCoordinator, SessionView};
pub use storage::JsonStore;
pub use transcript::{Message, Role, Transcript};
pub use worker::protocol::{InboundMessage, OutboundMessage};
pub use worker::{WorkerHandle, spawn_worker};
