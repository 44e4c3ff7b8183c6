//! Error types for the ember worker and session coordinator.
//!
//! Each error variant carries a stable error code (SCREAMING_SNAKE_CASE)
//! that is included in the Display output and accessible via [`EmberError::code()`].
//! The matching [`ErrorKind`] travels on the wire so hosts can tell failures
//! apart without parsing text.

use serde::{Deserialize, Serialize};

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Accelerated execution is not available. Never fatal.
    pub const CAPABILITY_UNAVAILABLE: &str = "CAPABILITY_UNAVAILABLE";

    /// The engine module could not be loaded.
    pub const MODULE_LOAD_FAILED: &str = "MODULE_LOAD_FAILED";

    /// The engine configuration lists no model.
    pub const NO_MODEL_CONFIGURED: &str = "NO_MODEL_CONFIGURED";

    /// Constructing the engine instance failed.
    pub const ENGINE_CONSTRUCTION_FAILED: &str = "ENGINE_CONSTRUCTION_FAILED";

    /// The engine exposes none of the known completion call shapes.
    pub const UNKNOWN_ENGINE_CAPABILITY: &str = "UNKNOWN_ENGINE_CAPABILITY";

    /// A completion call failed while running.
    pub const INFERENCE_FAILED: &str = "INFERENCE_FAILED";

    /// Reading or writing persisted data failed.
    pub const PERSISTENCE_FAILED: &str = "PERSISTENCE_FAILED";

    /// An engine operation exceeded its deadline.
    pub const TIMEOUT_ERROR: &str = "TIMEOUT_ERROR";

    /// A prompt arrived while no engine session exists.
    pub const ENGINE_NOT_READY: &str = "ENGINE_NOT_READY";

    /// Initialization was requested twice.
    pub const ALREADY_INITIALIZED: &str = "ALREADY_INITIALIZED";

    /// Invalid configuration or malformed protocol input.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";

    /// The message channel to or from the worker is closed or full.
    pub const CHANNEL_ERROR: &str = "CHANNEL_ERROR";

    /// I/O error.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Machine-readable failure category, carried on `log` and
/// `response_error` protocol messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CapabilityUnavailable,
    ModuleLoadFailure,
    NoModelConfigured,
    EngineConstructionFailure,
    UnknownEngineCapability,
    InferenceFailure,
    PersistenceFailure,
    Timeout,
    EngineNotReady,
    AlreadyInitialized,
    Config,
    Channel,
    Io,
}

impl ErrorKind {
    /// Stable code for this kind.
    #[must_use]
    pub fn code(self) -> &'static str {
        match self {
            Self::CapabilityUnavailable => error_codes::CAPABILITY_UNAVAILABLE,
            Self::ModuleLoadFailure => error_codes::MODULE_LOAD_FAILED,
            Self::NoModelConfigured => error_codes::NO_MODEL_CONFIGURED,
            Self::EngineConstructionFailure => error_codes::ENGINE_CONSTRUCTION_FAILED,
            Self::UnknownEngineCapability => error_codes::UNKNOWN_ENGINE_CAPABILITY,
            Self::InferenceFailure => error_codes::INFERENCE_FAILED,
            Self::PersistenceFailure => error_codes::PERSISTENCE_FAILED,
            Self::Timeout => error_codes::TIMEOUT_ERROR,
            Self::EngineNotReady => error_codes::ENGINE_NOT_READY,
            Self::AlreadyInitialized => error_codes::ALREADY_INITIALIZED,
            Self::Config => error_codes::CONFIG_INVALID,
            Self::Channel => error_codes::CHANNEL_ERROR,
            Self::Io => error_codes::IO_ERROR,
        }
    }
}

/// Top-level error type.
///
/// The Display impl formats as `[CODE] message`.
#[derive(Debug, thiserror::Error)]
pub enum EmberError {
    /// The engine module could not be loaded.
    #[error("[{}] {}", error_codes::MODULE_LOAD_FAILED, .0)]
    ModuleLoad(String),

    /// The engine configuration lists no model.
    #[error("[{}] {}", error_codes::NO_MODEL_CONFIGURED, .0)]
    NoModelConfigured(String),

    /// Constructing the engine instance failed.
    #[error("[{}] {}", error_codes::ENGINE_CONSTRUCTION_FAILED, .0)]
    EngineConstruction(String),

    /// No known completion call shape on the engine.
    #[error("[{}] {}", error_codes::UNKNOWN_ENGINE_CAPABILITY, .0)]
    UnknownCapability(String),

    /// A completion call failed while running.
    #[error("[{}] {}", error_codes::INFERENCE_FAILED, .0)]
    Inference(String),

    /// Reading or writing persisted data failed.
    #[error("[{}] {}", error_codes::PERSISTENCE_FAILED, .0)]
    Persistence(String),

    /// An engine operation exceeded its deadline.
    #[error("[{}] {}", error_codes::TIMEOUT_ERROR, .0)]
    Timeout(String),

    /// No engine session exists yet, or no worker is running.
    #[error("[{}] {}", error_codes::ENGINE_NOT_READY, .0)]
    NotReady(String),

    /// Initialization or start was requested twice.
    #[error("[{}] {}", error_codes::ALREADY_INITIALIZED, .0)]
    AlreadyInitialized(String),

    /// Invalid configuration or malformed protocol input.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Channel send/receive error.
    #[error("[{}] {}", error_codes::CHANNEL_ERROR, .0)]
    Channel(String),

    /// I/O error.
    #[error("[{}] {}", error_codes::IO_ERROR, .0)]
    Io(#[from] std::io::Error),
}

impl EmberError {
    /// The wire-level kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ModuleLoad(_) => ErrorKind::ModuleLoadFailure,
            Self::NoModelConfigured(_) => ErrorKind::NoModelConfigured,
            Self::EngineConstruction(_) => ErrorKind::EngineConstructionFailure,
            Self::UnknownCapability(_) => ErrorKind::UnknownEngineCapability,
            Self::Inference(_) => ErrorKind::InferenceFailure,
            Self::Persistence(_) => ErrorKind::PersistenceFailure,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::NotReady(_) => ErrorKind::EngineNotReady,
            Self::AlreadyInitialized(_) => ErrorKind::AlreadyInitialized,
            Self::Config(_) => ErrorKind::Config,
            Self::Channel(_) => ErrorKind::Channel,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Returns the stable error code for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        self.kind().code()
    }

    /// Returns the inner message without the code prefix.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::ModuleLoad(m)
            | Self::NoModelConfigured(m)
            | Self::EngineConstruction(m)
            | Self::UnknownCapability(m)
            | Self::Inference(m)
            | Self::Persistence(m)
            | Self::Timeout(m)
            | Self::NotReady(m)
            | Self::AlreadyInitialized(m)
            | Self::Config(m)
            | Self::Channel(m) => m.clone(),
            Self::Io(e) => e.to_string(),
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, EmberError>;

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn display_includes_code_prefix() {
        let err = EmberError::ModuleLoad("network unreachable".into());
        assert_eq!(err.to_string(), "[MODULE_LOAD_FAILED] network unreachable");
        assert_eq!(err.message(), "network unreachable");
    }

    #[test]
    fn every_variant_maps_to_matching_kind_code() {
        let errors = [
            EmberError::ModuleLoad(String::new()),
            EmberError::NoModelConfigured(String::new()),
            EmberError::EngineConstruction(String::new()),
            EmberError::UnknownCapability(String::new()),
            EmberError::Inference(String::new()),
            EmberError::Persistence(String::new()),
            EmberError::Timeout(String::new()),
            EmberError::NotReady(String::new()),
            EmberError::AlreadyInitialized(String::new()),
            EmberError::Config(String::new()),
            EmberError::Channel(String::new()),
        ];
        for err in errors {
            assert!(err.to_string().starts_with(&format!("[{}]", err.code())));
            assert_eq!(err.code(), err.kind().code());
        }
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: EmberError = io.into();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.message(), "gone");
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::NoModelConfigured).unwrap();
        assert_eq!(json, "\"no_model_configured\"");
        let back: ErrorKind = serde_json::from_str("\"unknown_engine_capability\"").unwrap();
        assert_eq!(back, ErrorKind::UnknownEngineCapability);
    }
}
