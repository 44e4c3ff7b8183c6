//! Message protocol between the session coordinator and a worker runtime.
//!
//! Messages are internally tagged JSON objects (`{"type": "..."}`), one
//! variant per message.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::{EmberError, ErrorKind};

/// Coordinator -> worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// Begin initialization.
    #[serde(rename = "init")]
    Init,
    /// Run one completion.
    #[serde(rename = "prompt")]
    Prompt { prompt: String },
    /// Best-effort engine cache clear.
    #[serde(rename = "clearCache")]
    ClearCache,
}

impl InboundMessage {
    pub fn prompt(text: impl Into<String>) -> Self {
        Self::Prompt {
            prompt: text.into(),
        }
    }

    /// Wire tag of this message.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Prompt { .. } => "prompt",
            Self::ClearCache => "clearCache",
        }
    }
}

/// Worker -> coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Human-readable diagnostic, optionally tagged with a failure kind.
    Log {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<ErrorKind>,
    },
    /// Initialization progress in [0, 1].
    Progress {
        #[serde(default)]
        progress: f64,
    },
    /// Accelerator probe result.
    #[serde(rename = "webgpu")]
    AcceleratorStatus { status: String },
    /// The initialization attempt concluded (successfully or not).
    Ready,
    /// Incremental reply text.
    ResponseChunk { chunk: String },
    /// Complete reply text.
    ResponseFinal { text: String },
    /// The prompt produced no reply.
    ResponseError { kind: ErrorKind, message: String },
}

impl OutboundMessage {
    pub fn log(text: impl Into<String>) -> Self {
        Self::Log {
            text: text.into(),
            kind: None,
        }
    }

    /// Wire tag of this message.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Progress { .. } => "progress",
            Self::AcceleratorStatus { .. } => "webgpu",
            Self::Ready => "ready",
            Self::ResponseChunk { .. } => "response_chunk",
            Self::ResponseFinal { .. } => "response_final",
            Self::ResponseError { .. } => "response_error",
        }
    }
}

/// Sending half of the outbound channel, with one helper per message type.
///
/// Sends never fail observably: once the coordinator side is gone the
/// messages are discarded, which is how results of abandoned work vanish
/// after termination.
#[derive(Debug, Clone)]
pub struct Outbound {
    tx: mpsc::UnboundedSender<OutboundMessage>,
}

impl Outbound {
    pub fn new(tx: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self { tx }
    }

    pub fn emit(&self, message: OutboundMessage) {
        if self.tx.send(message).is_err() {
            tracing::trace!("outbound channel closed; message discarded");
        }
    }

    pub fn log(&self, text: impl Into<String>) {
        let text = text.into();
        tracing::debug!(%text, "worker log");
        self.emit(OutboundMessage::Log { text, kind: None });
    }

    pub fn log_kind(&self, kind: ErrorKind, text: impl Into<String>) {
        let text = text.into();
        tracing::warn!(code = kind.code(), %text, "worker log");
        self.emit(OutboundMessage::Log {
            text,
            kind: Some(kind),
        });
    }

    /// Progress is clamped to [0, 1]; non-finite values become 0.
    pub fn progress(&self, value: f64) {
        let progress = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.emit(OutboundMessage::Progress { progress });
    }

    pub fn accelerator_status(&self, status: impl Into<String>) {
        self.emit(OutboundMessage::AcceleratorStatus {
            status: status.into(),
        });
    }

    pub fn ready(&self) {
        self.emit(OutboundMessage::Ready);
    }

    pub fn chunk(&self, chunk: impl Into<String>) {
        self.emit(OutboundMessage::ResponseChunk {
            chunk: chunk.into(),
        });
    }

    pub fn final_text(&self, text: impl Into<String>) {
        self.emit(OutboundMessage::ResponseFinal { text: text.into() });
    }

    pub fn response_error(&self, error: &EmberError) {
        self.emit(OutboundMessage::ResponseError {
            kind: error.kind(),
            message: error.message(),
        });
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
