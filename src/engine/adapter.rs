//! Engine adapter: a uniform `initialize` / `complete` surface over the
//! external engine.
//!
//! Every step reports what it is doing through the [`Outbound`] emitter.
//! Those messages are advisory; the return values carry the outcome.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::capability::{self, CompletionHandle, EngineCapabilities};
use super::{ChatRequest, EngineLoader, InitProgressCallback, InitReport};
use crate::config::{EmberConfig, EngineConfig};
use crate::error::{EmberError, ErrorKind, Result};
use crate::worker::protocol::Outbound;

/// Progress reported once the worker has started initializing.
pub const PROGRESS_STARTED: f64 = 0.02;
/// Progress reported once the engine module is loaded.
pub const PROGRESS_MODULE_LOADED: f64 = 0.05;
/// Progress reported when the initialization attempt concludes.
pub const PROGRESS_DONE: f64 = 1.0;

/// Per-worker engine state created by a successful initialization.
pub struct EngineSession {
    model_id: String,
    capabilities: EngineCapabilities,
}

impl EngineSession {
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn capabilities(&self) -> &EngineCapabilities {
        &self.capabilities
    }
}

impl std::fmt::Debug for EngineSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineSession")
            .field("model_id", &self.model_id)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

/// How an initialization attempt ended.
#[derive(Debug)]
pub enum InitOutcome {
    Ready(EngineSession),
    Failed(EmberError),
    /// The worker was terminated mid-initialization.
    Cancelled,
}

/// Adapter over an [`EngineLoader`].
#[derive(Clone)]
pub struct EngineAdapter {
    loader: Arc<dyn EngineLoader>,
    engine: EngineConfig,
    init_timeout: Option<Duration>,
    prompt_timeout: Option<Duration>,
}

impl EngineAdapter {
    pub fn new(loader: Arc<dyn EngineLoader>, config: &EmberConfig) -> Self {
        Self {
            loader,
            engine: config.engine.clone(),
            init_timeout: config.worker.init_timeout(),
            prompt_timeout: config.worker.prompt_timeout(),
        }
    }

    /// Run the full initialization sequence.
    ///
    /// Always ends with a progress of 1.0 unless cancelled. Emitting
    /// `ready` is left to the caller.
    pub async fn initialize(&self, out: &Outbound, cancel: &CancellationToken) -> InitOutcome {
        out.log("Worker init started");
        out.progress(PROGRESS_STARTED);
        let started = Instant::now();

        let attempt = with_deadline(self.init_timeout, "engine initialization", async {
            self.probe(out).await;
            self.load_and_construct(out).await
        });

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("initialization abandoned: worker terminated");
                return InitOutcome::Cancelled;
            }
            result = attempt => result,
        };

        match result {
            Ok(session) => {
                info!(
                    model_id = %session.model_id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "engine initialized"
                );
                out.progress(PROGRESS_DONE);
                InitOutcome::Ready(session)
            }
            Err(err) => {
                out.log_kind(err.kind(), err.message());
                out.progress(PROGRESS_DONE);
                InitOutcome::Failed(err)
            }
        }
    }

    async fn probe(&self, out: &Outbound) {
        let probe = self.loader.probe_accelerator().await;
        if !probe.is_available() {
            info!(
                code = ErrorKind::CapabilityUnavailable.code(),
                status = %probe.status_text(),
                "accelerated execution unavailable"
            );
        }
        out.accelerator_status(probe.status_text());
    }

    async fn load_and_construct(&self, out: &Outbound) -> Result<EngineSession> {
        let module = self
            .loader
            .load_module()
            .await
            .map_err(|e| EmberError::ModuleLoad(format!("Failed to load engine module: {e:#}")))?;
        out.log("Engine module loaded");
        out.progress(PROGRESS_MODULE_LOADED);
        out.log(format!(
            "Engine version: {}",
            module.version().unwrap_or_else(|| "unknown".to_owned())
        ));

        let mut app_config = module.prebuilt_app_config().unwrap_or_default();
        app_config.use_persistent_cache = self.engine.use_persistent_cache;

        let Some(model_id) = app_config.first_model_id().map(str::to_owned) else {
            return Err(EmberError::NoModelConfigured(
                "No prebuilt model found in the engine configuration. \
                 Register a model in the app config."
                    .to_owned(),
            ));
        };
        out.log(format!("Selected model: {model_id}"));

        let progress_out = out.clone();
        let on_progress: InitProgressCallback = Arc::new(move |report: InitReport| {
            progress_out.progress(report.progress.unwrap_or(0.0));
            if let Some(text) = report.text.filter(|t| !t.is_empty()) {
                progress_out.log(format!("init: {text}"));
            }
        });

        let engine = module
            .create_engine(&model_id, &app_config, on_progress)
            .await
            .map_err(|e| {
                EmberError::EngineConstruction(format!("Failed to construct engine: {e:#}"))
            })?;
        out.log("Engine initialized");

        let capabilities = capability::detect(engine.as_ref(), self.engine.prefer_streaming);
        match capabilities.completion.as_supported() {
            Some(handle) => out.log(format!("Completion capability: {}", handle.shape())),
            None => out.log_kind(
                ErrorKind::UnknownEngineCapability,
                format!(
                    "No known completion capability. Engine exposes: {}",
                    capabilities.advertised.join(", ")
                ),
            ),
        }

        Ok(EngineSession {
            model_id,
            capabilities,
        })
    }

    /// Run one completion through the session's resolved call shape.
    ///
    /// Streaming engines emit `response_chunk` messages as deltas arrive;
    /// the returned string is always the full reply.
    pub async fn complete(
        &self,
        session: &EngineSession,
        prompt: &str,
        out: &Outbound,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let Some(handle) = session.capabilities.completion.as_supported().cloned() else {
            return Err(EmberError::UnknownCapability(format!(
                "Unknown engine API. Capabilities: {}",
                session.capabilities.advertised.join(", ")
            )));
        };

        let request = ChatRequest::from_prompt(prompt);
        let attempt = with_deadline(
            self.prompt_timeout,
            "completion",
            run_completion(handle, request, out),
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(EmberError::Channel("completion abandoned: worker terminated".to_owned())),
            result = attempt => result,
        }
    }

    /// Best-effort engine cache clear. Never fails; the outcome is logged.
    pub async fn clear_cache(
        &self,
        session: Option<&EngineSession>,
        out: &Outbound,
        cancel: &CancellationToken,
    ) {
        let Some(cache) = session.and_then(|s| s.capabilities.cache.as_supported().cloned())
        else {
            out.log("Engine cache clear not supported");
            return;
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = cache.clear_cache() => result,
        };
        match result {
            Ok(()) => out.log("Cleared engine cache"),
            Err(e) => {
                warn!(error = %e, "engine cache clear failed");
                out.log(format!("Engine cache clear failed: {e:#}"));
            }
        }
    }
}

async fn run_completion(
    handle: CompletionHandle,
    request: ChatRequest,
    out: &Outbound,
) -> Result<String> {
    match handle {
        CompletionHandle::Streaming(chat) => {
            let mut stream = chat.stream(request).await.map_err(inference_error)?;
            let mut text = String::new();
            while let Some(delta) = stream.next().await {
                let delta = delta.map_err(inference_error)?;
                if delta.is_empty() {
                    continue;
                }
                text.push_str(&delta);
                out.chunk(delta);
            }
            Ok(text)
        }
        CompletionHandle::ChatCompletion(chat) => {
            let reply = chat.create(request).await.map_err(inference_error)?;
            reply.text.ok_or_else(|| {
                EmberError::Inference("Inference error: engine reply carried no text".to_owned())
            })
        }
        CompletionHandle::Request(raw) => {
            let value = raw.request(request).await.map_err(inference_error)?;
            Ok(reply_text(&value))
        }
    }
}

/// Text of a raw request reply: its `text` field, else the whole value as JSON.
fn reply_text(value: &serde_json::Value) -> String {
    match value.get("text").and_then(serde_json::Value::as_str) {
        Some(text) if !text.is_empty() => text.to_owned(),
        _ => value.to_string(),
    }
}

fn inference_error(e: anyhow::Error) -> EmberError {
    EmberError::Inference(format!("Inference error: {e:#}"))
}

async fn with_deadline<T, F>(limit: Option<Duration>, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            EmberError::Timeout(format!("{what} timed out after {} ms", limit.as_millis()))
        })?,
        None => fut.await,
    }
}
