//! External inference engine surface.
//!
//! The engine is an opaque third-party library. It is reached through three
//! layers of traits that mirror its lifecycle:
//!
//! - [`EngineLoader`] probes for accelerated execution and loads the module,
//! - [`EngineModule`] exposes the prebuilt configuration and constructs
//!   an engine for a model id,
//! - [`EngineInstance`] advertises optional call shapes, each an
//!   `Option<Arc<dyn ...>>`, which [`capability::detect`] resolves once.
//!
//! Engine calls return [`anyhow::Result`]; the [`adapter::EngineAdapter`]
//! maps failures onto [`crate::error::EmberError`] kinds.

pub mod adapter;
pub mod capability;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};

use crate::transcript::Message;

/// Result of the accelerated-execution probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcceleratorProbe {
    /// An accelerator backend is present (e.g. `"WebGPU"`, `"Metal"`).
    Available { backend: String },
    /// No accelerator; the engine will run on its fallback path.
    Unavailable,
    /// The probe itself failed.
    Error(String),
}

impl AcceleratorProbe {
    /// Human-readable status text forwarded to the foreground.
    #[must_use]
    pub fn status_text(&self) -> String {
        match self {
            Self::Available { backend } => format!("{backend} available"),
            Self::Unavailable => {
                "Accelerator not available, will fall back to CPU execution".to_owned()
            }
            Self::Error(e) => format!("Accelerator check error: {e}"),
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }
}

/// One entry of the engine's prebuilt model list.
///
/// Engines name the identifier either `model_id` or `model`; any other
/// fields are kept opaque.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ModelRecord {
    pub fn with_id(model_id: impl Into<String>) -> Self {
        Self {
            model_id: Some(model_id.into()),
            ..Self::default()
        }
    }

    /// The usable identifier: `model_id`, else `model`, ignoring blanks.
    pub fn id(&self) -> Option<&str> {
        self.model_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .or_else(|| self.model.as_deref().filter(|id| !id.trim().is_empty()))
    }
}

/// Prebuilt configuration object shipped with the engine module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub model_list: Vec<ModelRecord>,
    /// Keep model artifacts in the engine's persistent on-device cache.
    #[serde(default)]
    pub use_persistent_cache: bool,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl AppConfig {
    pub fn with_models<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            model_list: ids.into_iter().map(ModelRecord::with_id).collect(),
            ..Self::default()
        }
    }

    /// First usable model id. The list order is the selection order.
    pub fn first_model_id(&self) -> Option<&str> {
        self.model_list.first().and_then(ModelRecord::id)
    }
}

/// Progress report emitted by the engine while it constructs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitReport {
    pub progress: Option<f64>,
    pub text: Option<String>,
}

/// Callback receiving [`InitReport`]s during engine construction.
pub type InitProgressCallback = Arc<dyn Fn(InitReport) + Send + Sync>;

/// Chat-completion request handed to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

impl ChatRequest {
    /// A request carrying a single user turn.
    pub fn from_prompt(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(prompt)],
        }
    }
}

/// Reply of the chat-completion call shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    #[serde(default)]
    pub text: Option<String>,
}

/// Stream of text deltas from the streaming call shape.
pub type TextDeltaStream = Pin<Box<dyn Stream<Item = anyhow::Result<String>> + Send>>;

/// Loads the engine library.
#[async_trait]
pub trait EngineLoader: Send + Sync {
    /// Check for accelerated execution. Advisory only.
    async fn probe_accelerator(&self) -> AcceleratorProbe;

    /// Load the engine module.
    async fn load_module(&self) -> anyhow::Result<Arc<dyn EngineModule>>;
}

/// A loaded engine module.
#[async_trait]
pub trait EngineModule: Send + Sync {
    /// Library version string, when the module exposes one.
    fn version(&self) -> Option<String> {
        None
    }

    /// The prebuilt configuration object, if the module ships one.
    fn prebuilt_app_config(&self) -> Option<AppConfig>;

    /// Construct an engine for `model_id`, reporting progress through `on_progress`.
    async fn create_engine(
        &self,
        model_id: &str,
        config: &AppConfig,
        on_progress: InitProgressCallback,
    ) -> anyhow::Result<Arc<dyn EngineInstance>>;
}

/// A constructed engine. Every call shape is optional.
pub trait EngineInstance: Send + Sync {
    /// Names of everything the engine exposes, for diagnostics.
    fn capability_names(&self) -> Vec<String>;

    fn chat_stream(&self) -> Option<Arc<dyn ChatStream>> {
        None
    }

    fn chat_completions(&self) -> Option<Arc<dyn ChatCompletions>> {
        None
    }

    fn raw_request(&self) -> Option<Arc<dyn RawRequest>> {
        None
    }

    fn cache_control(&self) -> Option<Arc<dyn CacheControl>> {
        None
    }
}

/// Incremental chat call shape.
#[async_trait]
pub trait ChatStream: Send + Sync {
    async fn stream(&self, request: ChatRequest) -> anyhow::Result<TextDeltaStream>;
}

/// Chat-completion call shape.
#[async_trait]
pub trait ChatCompletions: Send + Sync {
    async fn create(&self, request: ChatRequest) -> anyhow::Result<ChatReply>;
}

/// Generic request call shape returning an arbitrary JSON value.
#[async_trait]
pub trait RawRequest: Send + Sync {
    async fn request(&self, request: ChatRequest) -> anyhow::Result<serde_json::Value>;
}

/// Optional cache management.
#[async_trait]
pub trait CacheControl: Send + Sync {
    async fn clear_cache(&self) -> anyhow::Result<()>;
}
