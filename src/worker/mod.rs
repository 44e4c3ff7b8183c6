//! Worker runtime: hosts the engine adapter in its own tokio task.
//!
//! The runtime is a single-concurrency actor. Inbound messages are handled
//! one at a time, each to completion (including awaited engine calls),
//! while later messages wait in the inbound queue. Outbound messages are
//! delivered FIFO on an unbounded channel.
//!
//! ```text
//! Idle --init--> Initializing --ok-----> Ready
//!                             \--fail---> Degraded
//! ```
//!
//! Both outcomes emit `ready`: it means the attempt concluded, not that
//! prompts will be answered.

pub mod protocol;
pub mod stdio;

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::config::{EmberConfig, NotReadyPolicy};
use crate::engine::EngineLoader;
use crate::engine::adapter::{EngineAdapter, EngineSession, InitOutcome};
use crate::error::{EmberError, ErrorKind, Result};
use protocol::{InboundMessage, Outbound, OutboundMessage};

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Initializing,
    Ready,
    /// Initialization failed; prompts are accepted but not answered.
    Degraded,
}

/// Foreground handle to a running worker.
///
/// Dropping the handle without calling [`terminate`](Self::terminate) or
/// [`close`](Self::close) closes the inbound queue; the worker finishes
/// whatever is already queued and exits.
#[derive(Debug)]
pub struct WorkerHandle {
    id: Uuid,
    inbound_tx: mpsc::Sender<InboundMessage>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Queue a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EmberError::Channel`] if the queue is full or the worker is gone.
    pub fn post(&self, message: InboundMessage) -> Result<()> {
        let tag = message.tag();
        self.inbound_tx.try_send(message).map_err(|e| {
            EmberError::Channel(format!("failed to post {tag} to worker {}: {e}", self.id))
        })
    }

    /// Queue a message, waiting for capacity.
    ///
    /// # Errors
    ///
    /// Returns [`EmberError::Channel`] if the worker is gone.
    pub async fn send(&self, message: InboundMessage) -> Result<()> {
        let tag = message.tag();
        self.inbound_tx.send(message).await.map_err(|e| {
            EmberError::Channel(format!("failed to send {tag} to worker {}: {e}", self.id))
        })
    }

    /// Stop the worker immediately.
    ///
    /// In-flight engine calls are abandoned; nothing is drained.
    pub fn terminate(self) {
        info!(worker_id = %self.id, "terminating worker");
        self.cancel.cancel();
        self.task.abort();
    }

    /// Stop accepting input, let the worker finish its queue, and wait for it.
    pub async fn close(self) {
        let Self {
            id, inbound_tx, task, ..
        } = self;
        drop(inbound_tx);
        match task.await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!(worker_id = %id, error = %e, "worker task ended abnormally"),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Spawn a worker on the current tokio runtime.
///
/// Returns the handle and the receiving end of the outbound channel.
pub fn spawn_worker(
    loader: Arc<dyn EngineLoader>,
    config: &EmberConfig,
) -> (WorkerHandle, mpsc::UnboundedReceiver<OutboundMessage>) {
    let id = Uuid::new_v4();
    let (inbound_tx, inbound_rx) = mpsc::channel(config.worker.inbound_capacity.max(1));
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();

    let runtime = WorkerRuntime {
        inbound_rx,
        out: Outbound::new(outbound_tx),
        adapter: EngineAdapter::new(loader, config),
        policy: config.worker.not_ready_policy,
        cancel: cancel.clone(),
        state: WorkerState::Idle,
        session: None,
        pending: VecDeque::new(),
        pending_capacity: config.worker.inbound_capacity.max(1),
    };
    let task = tokio::spawn(
        runtime
            .run()
            .instrument(info_span!("worker", worker_id = %id)),
    );

    (
        WorkerHandle {
            id,
            inbound_tx,
            cancel,
            task,
        },
        outbound_rx,
    )
}

/// The actor behind a [`WorkerHandle`].
pub struct WorkerRuntime {
    inbound_rx: mpsc::Receiver<InboundMessage>,
    out: Outbound,
    adapter: EngineAdapter,
    policy: NotReadyPolicy,
    cancel: CancellationToken,
    state: WorkerState,
    session: Option<EngineSession>,
    pending: VecDeque<String>,
    pending_capacity: usize,
}

impl WorkerRuntime {
    /// Process inbound messages until the queue closes or the worker is cancelled.
    pub async fn run(mut self) {
        info!("worker started");
        loop {
            let message = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                message = self.inbound_rx.recv() => message,
            };
            let Some(message) = message else {
                break;
            };
            debug!(tag = message.tag(), state = ?self.state, "handling inbound message");
            self.handle(message).await;
            if self.cancel.is_cancelled() {
                break;
            }
        }
        info!(state = ?self.state, "worker stopped");
    }

    async fn handle(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Init => self.handle_init().await,
            InboundMessage::Prompt { prompt } => self.handle_prompt(prompt).await,
            InboundMessage::ClearCache => {
                self.adapter
                    .clear_cache(self.session.as_ref(), &self.out, &self.cancel)
                    .await;
            }
        }
    }

    async fn handle_init(&mut self) {
        if self.state != WorkerState::Idle {
            self.out.log_kind(
                ErrorKind::AlreadyInitialized,
                "Engine initialization already ran; ignoring init",
            );
            return;
        }

        self.state = WorkerState::Initializing;
        match self.adapter.initialize(&self.out, &self.cancel).await {
            InitOutcome::Ready(session) => {
                info!(model_id = session.model_id(), "worker ready");
                self.session = Some(session);
                self.state = WorkerState::Ready;
            }
            InitOutcome::Failed(err) => {
                warn!(code = err.code(), error = %err, "worker degraded");
                self.state = WorkerState::Degraded;
                self.out.log_kind(
                    err.kind(),
                    "Initialization did not complete; prompts will not be answered",
                );
            }
            InitOutcome::Cancelled => return,
        }
        self.out.ready();

        let queued: Vec<String> = self.pending.drain(..).collect();
        for prompt in queued {
            if self.cancel.is_cancelled() {
                return;
            }
            if self.session.is_some() {
                self.handle_prompt(prompt).await;
            } else {
                self.out
                    .log_kind(ErrorKind::EngineNotReady, "Engine not ready; prompt dropped");
            }
        }
    }

    async fn handle_prompt(&mut self, prompt: String) {
        let length = prompt.chars().count();
        let Some(session) = self.session.as_ref() else {
            self.out.log(format!("Received prompt (length {length})"));
            self.reject_or_queue(prompt);
            return;
        };
        debug!(length, "received prompt");

        match self
            .adapter
            .complete(session, &prompt, &self.out, &self.cancel)
            .await
        {
            Ok(text) => self.out.final_text(text),
            Err(_) if self.cancel.is_cancelled() => {}
            Err(err) => {
                warn!(code = err.code(), error = %err, "completion failed");
                self.out.response_error(&err);
            }
        }
    }

    fn reject_or_queue(&mut self, prompt: String) {
        let queueing = self.state == WorkerState::Idle && self.policy == NotReadyPolicy::Queue;
        if !queueing {
            self.out
                .log_kind(ErrorKind::EngineNotReady, "Engine not ready; prompt dropped");
        } else if self.pending.len() >= self.pending_capacity {
            self.out.log_kind(
                ErrorKind::EngineNotReady,
                format!(
                    "Engine not ready; prompt dropped ({} already pending)",
                    self.pending.len()
                ),
            );
        } else {
            self.pending.push_back(prompt);
            self.out.log(format!(
                "Engine not ready; prompt queued ({} pending)",
                self.pending.len()
            ));
        }
    }
}
