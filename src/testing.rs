//! Scripted engine double and channel helpers for tests.
//!
//! [`ScriptedLoader`] implements the whole engine surface from a small
//! script: which step fails, what the model list contains, which call shape
//! the engine exposes and what it replies. Every call is recorded so tests
//! can assert on side effects.
//!
//! ```
//! use ember::engine::AppConfig;
//! use ember::testing::ScriptedLoader;
//!
//! let loader = ScriptedLoader::new()
//!     .with_app_config(AppConfig::with_models(["m1"]))
//!     .with_chat_reply("hi");
//! assert_eq!(loader.load_count(), 0);
//! ```

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::engine::{
    AcceleratorProbe, AppConfig, CacheControl, ChatCompletions, ChatReply, ChatRequest,
    ChatStream, EngineInstance, EngineLoader, EngineModule, InitProgressCallback, InitReport,
    RawRequest, TextDeltaStream,
};
use crate::worker::protocol::OutboundMessage;

/// What the scripted engine answers to a prompt.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Chat-completion shape replying `echo: <prompt>`.
    Echo,
    /// Chat-completion shape with a fixed reply (`None` = reply without text).
    Chat(Option<String>),
    /// Raw request shape returning this value.
    Raw(serde_json::Value),
    /// Streaming shape yielding these deltas.
    Stream(Vec<String>),
    /// Chat-completion shape that fails with this message.
    Fail(String),
    /// No completion shape at all.
    Nothing,
}

#[derive(Debug, Clone)]
enum ScriptedCache {
    Absent,
    Succeeds,
    Fails(String),
}

#[derive(Debug, Default)]
struct Recorder {
    loads: AtomicUsize,
    cache_clears: AtomicUsize,
    created_models: Arc<Mutex<Vec<String>>>,
    app_configs: Arc<Mutex<Vec<AppConfig>>>,
    prompts: Arc<Mutex<Vec<String>>>,
}

/// Scripted [`EngineLoader`].
#[derive(Debug, Clone)]
pub struct ScriptedLoader {
    accelerator: AcceleratorProbe,
    module_error: Option<String>,
    app_config: Option<AppConfig>,
    version: Option<String>,
    construction_error: Option<String>,
    construction_delay: Option<Duration>,
    progress_steps: Vec<f64>,
    reply: ScriptedReply,
    completion_delay: Option<Duration>,
    cache: ScriptedCache,
    advertised: Vec<String>,
    recorder: Arc<Recorder>,
}

impl Default for ScriptedLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLoader {
    /// A healthy engine with one model (`scripted-model`) that echoes prompts.
    pub fn new() -> Self {
        Self {
            accelerator: AcceleratorProbe::Available {
                backend: "WebGPU".to_owned(),
            },
            module_error: None,
            app_config: Some(AppConfig::with_models(["scripted-model"])),
            version: Some("0.0.0-scripted".to_owned()),
            construction_error: None,
            construction_delay: None,
            progress_steps: vec![0.5],
            reply: ScriptedReply::Echo,
            completion_delay: None,
            cache: ScriptedCache::Absent,
            advertised: vec!["engine".to_owned(), "reload".to_owned()],
            recorder: Arc::new(Recorder::default()),
        }
    }

    pub fn with_accelerator(mut self, probe: AcceleratorProbe) -> Self {
        self.accelerator = probe;
        self
    }

    pub fn failing_module(mut self, message: impl Into<String>) -> Self {
        self.module_error = Some(message.into());
        self
    }

    pub fn with_app_config(mut self, config: AppConfig) -> Self {
        self.app_config = Some(config);
        self
    }

    /// The module ships no prebuilt configuration at all.
    pub fn without_app_config(mut self) -> Self {
        self.app_config = None;
        self
    }

    pub fn failing_construction(mut self, message: impl Into<String>) -> Self {
        self.construction_error = Some(message.into());
        self
    }

    pub fn with_construction_delay(mut self, delay: Duration) -> Self {
        self.construction_delay = Some(delay);
        self
    }

    pub fn with_progress_steps(mut self, steps: impl IntoIterator<Item = f64>) -> Self {
        self.progress_steps = steps.into_iter().collect();
        self
    }

    pub fn with_reply(mut self, reply: ScriptedReply) -> Self {
        self.reply = reply;
        self
    }

    pub fn with_chat_reply(self, text: impl Into<String>) -> Self {
        self.with_reply(ScriptedReply::Chat(Some(text.into())))
    }

    pub fn with_stream<I, S>(self, deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_reply(ScriptedReply::Stream(
            deltas.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn with_completion_delay(mut self, delay: Duration) -> Self {
        self.completion_delay = Some(delay);
        self
    }

    pub fn with_cache(mut self) -> Self {
        self.cache = ScriptedCache::Succeeds;
        self
    }

    pub fn failing_cache(mut self, message: impl Into<String>) -> Self {
        self.cache = ScriptedCache::Fails(message.into());
        self
    }

    pub fn with_advertised<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.advertised = names.into_iter().map(Into::into).collect();
        self
    }

    /// Number of `load_module` calls so far.
    pub fn load_count(&self) -> usize {
        self.recorder.loads.load(Ordering::SeqCst)
    }

    /// Number of successful or failed cache clear calls so far.
    pub fn cache_clear_count(&self) -> usize {
        self.recorder.cache_clears.load(Ordering::SeqCst)
    }

    /// Model ids passed to `create_engine`, shared with the running engine.
    pub fn created_models(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.recorder.created_models)
    }

    /// App configs passed to `create_engine`.
    pub fn seen_app_configs(&self) -> Arc<Mutex<Vec<AppConfig>>> {
        Arc::clone(&self.recorder.app_configs)
    }

    /// Prompts that reached a completion call.
    pub fn prompts(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.recorder.prompts)
    }
}

#[async_trait]
impl EngineLoader for ScriptedLoader {
    async fn probe_accelerator(&self) -> AcceleratorProbe {
        self.accelerator.clone()
    }

    async fn load_module(&self) -> anyhow::Result<Arc<dyn EngineModule>> {
        self.recorder.loads.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.module_error {
            anyhow::bail!("{message}");
        }
        Ok(Arc::new(ScriptedModule {
            script: self.clone(),
        }))
    }
}

struct ScriptedModule {
    script: ScriptedLoader,
}

#[async_trait]
impl EngineModule for ScriptedModule {
    fn version(&self) -> Option<String> {
        self.script.version.clone()
    }

    fn prebuilt_app_config(&self) -> Option<AppConfig> {
        self.script.app_config.clone()
    }

    async fn create_engine(
        &self,
        model_id: &str,
        config: &AppConfig,
        on_progress: InitProgressCallback,
    ) -> anyhow::Result<Arc<dyn EngineInstance>> {
        let script = &self.script;
        push(&script.recorder.created_models, model_id.to_owned());
        push(&script.recorder.app_configs, config.clone());

        for step in &script.progress_steps {
            on_progress(InitReport {
                progress: Some(*step),
                text: Some(format!("Fetching param cache [{:.0}%]", step * 100.0)),
            });
        }
        if let Some(delay) = script.construction_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = &script.construction_error {
            anyhow::bail!("{message}");
        }
        Ok(Arc::new(ScriptedInstance {
            calls: Arc::new(ScriptedCalls {
                reply: script.reply.clone(),
                completion_delay: script.completion_delay,
                cache: script.cache.clone(),
                recorder: Arc::clone(&script.recorder),
            }),
            advertised: script.advertised.clone(),
        }))
    }
}

struct ScriptedInstance {
    calls: Arc<ScriptedCalls>,
    advertised: Vec<String>,
}

impl EngineInstance for ScriptedInstance {
    fn capability_names(&self) -> Vec<String> {
        self.advertised.clone()
    }

    fn chat_stream(&self) -> Option<Arc<dyn ChatStream>> {
        matches!(self.calls.reply, ScriptedReply::Stream(_))
            .then(|| Arc::clone(&self.calls) as Arc<dyn ChatStream>)
    }

    fn chat_completions(&self) -> Option<Arc<dyn ChatCompletions>> {
        matches!(
            self.calls.reply,
            ScriptedReply::Echo | ScriptedReply::Chat(_) | ScriptedReply::Fail(_)
        )
        .then(|| Arc::clone(&self.calls) as Arc<dyn ChatCompletions>)
    }

    fn raw_request(&self) -> Option<Arc<dyn RawRequest>> {
        matches!(self.calls.reply, ScriptedReply::Raw(_))
            .then(|| Arc::clone(&self.calls) as Arc<dyn RawRequest>)
    }

    fn cache_control(&self) -> Option<Arc<dyn CacheControl>> {
        (!matches!(self.calls.cache, ScriptedCache::Absent))
            .then(|| Arc::clone(&self.calls) as Arc<dyn CacheControl>)
    }
}

struct ScriptedCalls {
    reply: ScriptedReply,
    completion_delay: Option<Duration>,
    cache: ScriptedCache,
    recorder: Arc<Recorder>,
}

impl ScriptedCalls {
    async fn begin(&self, request: &ChatRequest) -> String {
        let prompt = request
            .messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        push(&self.recorder.prompts, prompt.clone());
        if let Some(delay) = self.completion_delay {
            tokio::time::sleep(delay).await;
        }
        prompt
    }
}

#[async_trait]
impl ChatStream for ScriptedCalls {
    async fn stream(&self, request: ChatRequest) -> anyhow::Result<TextDeltaStream> {
        self.begin(&request).await;
        let ScriptedReply::Stream(deltas) = &self.reply else {
            anyhow::bail!("streaming not scripted");
        };
        let items: Vec<anyhow::Result<String>> = deltas.iter().cloned().map(Ok).collect();
        Ok(Box::pin(futures_util::stream::iter(items)))
    }
}

#[async_trait]
impl ChatCompletions for ScriptedCalls {
    async fn create(&self, request: ChatRequest) -> anyhow::Result<ChatReply> {
        let prompt = self.begin(&request).await;
        match &self.reply {
            ScriptedReply::Echo => Ok(ChatReply {
                text: Some(format!("echo: {prompt}")),
            }),
            ScriptedReply::Chat(text) => Ok(ChatReply { text: text.clone() }),
            ScriptedReply::Fail(message) => anyhow::bail!("{message}"),
            _ => anyhow::bail!("chat completion not scripted"),
        }
    }
}

#[async_trait]
impl RawRequest for ScriptedCalls {
    async fn request(&self, request: ChatRequest) -> anyhow::Result<serde_json::Value> {
        self.begin(&request).await;
        match &self.reply {
            ScriptedReply::Raw(value) => Ok(value.clone()),
            _ => anyhow::bail!("raw request not scripted"),
        }
    }
}

#[async_trait]
impl CacheControl for ScriptedCalls {
    async fn clear_cache(&self) -> anyhow::Result<()> {
        self.recorder.cache_clears.fetch_add(1, Ordering::SeqCst);
        match &self.cache {
            ScriptedCache::Fails(message) => anyhow::bail!("{message}"),
            _ => Ok(()),
        }
    }
}

fn push<T>(records: &Mutex<Vec<T>>, value: T) {
    let mut guard = records.lock().unwrap_or_else(|e| e.into_inner());
    guard.push(value);
}

/// Drain every message currently queued on `rx` without waiting.
pub fn collect_outbound(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> Vec<OutboundMessage> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
}

/// Receive messages until one satisfies `done` (inclusive), the channel
/// closes, or five seconds pass.
pub async fn collect_until<F>(
    rx: &mut mpsc::UnboundedReceiver<OutboundMessage>,
    mut done: F,
) -> Vec<OutboundMessage>
where
    F: FnMut(&OutboundMessage) -> bool,
{
    let mut collected = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while let Ok(Some(message)) = tokio::time::timeout_at(deadline, rx.recv()).await {
        let finished = done(&message);
        collected.push(message);
        if finished {
            break;
        }
    }
    collected
}
