//! Session coordinator: the foreground owner of a chat session.
//!
//! Holds the transcript, status text, and progress, owns the worker, and
//! turns outbound worker messages into transcript entries. All methods
//! take `&mut self`; there is exactly one owner.
//!
//! ```text
//! send(text) ──► transcript += user ──► worker.post(prompt)
//!                                          │
//! next_event() ◄── outbound channel ◄──────┘
//!     └─► apply(message) ──► transcript / status / progress
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::{ChunkPolicy, EmberConfig};
use crate::engine::EngineLoader;
use crate::error::{EmberError, Result};
use crate::storage::JsonStore;
use crate::transcript::{Message, Transcript};
use crate::worker::protocol::{InboundMessage, OutboundMessage};
use crate::worker::{WorkerHandle, spawn_worker};

/// Snapshot of everything a presentation layer renders.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionView {
    pub status: String,
    pub progress: f64,
    pub ready: bool,
    pub messages: Vec<Message>,
    /// Assistant text received so far for the reply in progress.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub draft: Option<String>,
}

pub struct SessionCoordinator {
    config: EmberConfig,
    loader: Arc<dyn EngineLoader>,
    transcript: Transcript,
    status: String,
    progress: f64,
    ready: bool,
    draft: Option<String>,
    started: bool,
    worker: Option<WorkerHandle>,
    events: Option<mpsc::UnboundedReceiver<OutboundMessage>>,
    store: Option<JsonStore>,
}

impl SessionCoordinator {
    /// Create a coordinator whose transcript starts with the configured greeting.
    pub fn new(config: EmberConfig, loader: Arc<dyn EngineLoader>) -> Self {
        let mut transcript = Transcript::new();
        transcript.push(Message::system(config.session.greeting.clone()));
        let status = config.session.initial_status.clone();
        Self {
            config,
            loader,
            transcript,
            status,
            progress: 0.0,
            ready: false,
            draft: None,
            started: false,
            worker: None,
            events: None,
            store: None,
        }
    }

    /// Attach a store. With history persistence enabled, a previously saved
    /// transcript replaces the greeting-only one.
    #[must_use]
    pub fn with_store(mut self, store: JsonStore) -> Self {
        if self.config.session.persist_history {
            let key = &self.config.session.history_key;
            if let Some(messages) = store.load_as::<Vec<Message>>(key) {
                info!(count = messages.len(), key, "restored transcript");
                self.transcript = Transcript::from_messages(messages);
            }
        }
        self.store = Some(store);
        self
    }

    /// Spawn the worker and request initialization.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`EmberError::AlreadyInitialized`] on a second call, or
    /// [`EmberError::Channel`] if the init message cannot be posted.
    pub fn start(&mut self) -> Result<()> {
        if self.started {
            return Err(EmberError::AlreadyInitialized("session already started".into()));
        }
        self.started = true;

        let (handle, events) = spawn_worker(Arc::clone(&self.loader), &self.config);
        info!(worker_id = %handle.id(), "session started");
        handle.post(InboundMessage::Init)?;
        self.worker = Some(handle);
        self.events = Some(events);
        Ok(())
    }

    /// Append the user's text to the transcript, then hand it to the worker.
    ///
    /// The transcript entry is recorded even when posting fails.
    ///
    /// # Errors
    ///
    /// Returns [`EmberError::NotReady`] without a running worker, or
    /// [`EmberError::Channel`] if the worker queue rejects the prompt.
    pub fn send(&mut self, text: impl Into<String>) -> Result<()> {
        let text = text.into();
        self.transcript.push(Message::user(text.clone()));
        let Some(worker) = self.worker.as_ref() else {
            return Err(EmberError::NotReady("no worker is running; call start() first".into()));
        };
        worker.post(InboundMessage::prompt(text))
    }

    /// Ask the worker to clear the engine cache. The outcome arrives as a log line.
    ///
    /// # Errors
    ///
    /// Same as [`send`](Self::send), without touching the transcript.
    pub fn clear_cache(&mut self) -> Result<()> {
        let Some(worker) = self.worker.as_ref() else {
            return Err(EmberError::NotReady("no worker is running; call start() first".into()));
        };
        worker.post(InboundMessage::ClearCache)
    }

    /// Fold one outbound message into the session state.
    pub fn apply(&mut self, message: OutboundMessage) {
        debug!(tag = message.tag(), "applying worker message");
        match message {
            OutboundMessage::Log { text, .. } => {
                self.transcript.push(Message::system(text));
            }
            OutboundMessage::Progress { progress } => {
                self.progress = if progress.is_finite() {
                    progress.clamp(0.0, 1.0)
                } else {
                    0.0
                };
            }
            OutboundMessage::AcceleratorStatus { status } => {
                self.status = status;
            }
            OutboundMessage::Ready => {
                self.ready = true;
                self.status = self.config.session.ready_status.clone();
                self.transcript
                    .push(Message::system(self.config.session.ready_status.clone()));
            }
            OutboundMessage::ResponseChunk { chunk } => match self.config.session.chunk_policy {
                ChunkPolicy::Accumulate => {
                    self.draft.get_or_insert_with(String::new).push_str(&chunk);
                }
                ChunkPolicy::PerChunk => {
                    self.transcript.push(Message::assistant(chunk));
                }
            },
            OutboundMessage::ResponseFinal { text } => {
                self.draft = None;
                self.transcript.push(Message::assistant(text));
                self.persist_history();
            }
            OutboundMessage::ResponseError { message, .. } => {
                self.draft = None;
                self.transcript.push(Message::system(message));
            }
        }
    }

    /// Wait for the next worker message and apply it.
    ///
    /// Returns `None` once the worker has stopped and every message has
    /// been consumed, or if the session was never started.
    pub async fn next_event(&mut self) -> Option<OutboundMessage> {
        let message = self.events.as_mut()?.recv().await?;
        self.apply(message.clone());
        Some(message)
    }

    /// Apply every message already waiting, without blocking.
    ///
    /// Returns how many were applied.
    pub fn drain_events(&mut self) -> usize {
        let mut applied = 0;
        loop {
            let Some(events) = self.events.as_mut() else {
                return applied;
            };
            match events.try_recv() {
                Ok(message) => {
                    self.apply(message);
                    applied += 1;
                }
                Err(_) => return applied,
            }
        }
    }

    /// Pump messages until the worker reports `ready`.
    ///
    /// # Errors
    ///
    /// Returns [`EmberError::NotReady`] if the session was never started, or
    /// [`EmberError::Channel`] if the worker stops before reporting `ready`.
    pub async fn wait_until_ready(&mut self) -> Result<()> {
        if self.events.is_none() {
            return Err(EmberError::NotReady("no worker is running; call start() first".into()));
        }
        while !self.ready {
            if self.next_event().await.is_none() {
                return Err(EmberError::Channel(
                    "worker stopped before reporting ready".into(),
                ));
            }
        }
        Ok(())
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            status: self.status.clone(),
            progress: self.progress,
            ready: self.ready,
            messages: self.transcript.messages().to_vec(),
            draft: self.draft.clone(),
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn progress(&self) -> f64 {
        self.progress
    }

    /// Whether the worker has reported `ready`. This does not imply the
    /// engine came up: a failed initialization also ends in `ready`.
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Terminate the worker and persist the transcript.
    ///
    /// Results of in-flight work are discarded. Calling this more than once
    /// is harmless. Also runs on drop.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.terminate();
        }
        self.events = None;
        self.persist_history();
    }

    fn persist_history(&self) {
        if !self.config.session.persist_history {
            return;
        }
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if !store.save(&self.config.session.history_key, self.transcript.messages()) {
            warn!("transcript was not persisted");
        }
    }
}

impl Drop for SessionCoordinator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for SessionCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCoordinator")
            .field("status", &self.status)
            .field("progress", &self.progress)
            .field("ready", &self.ready)
            .field("messages", &self.transcript.len())
            .field("worker", &self.worker.as_ref().map(WorkerHandle::id))
            .finish_non_exhaustive()
    }
}
