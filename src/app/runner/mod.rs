//! Hosts a worker backend on a tokio task and speaks the command/event
//! protocol to it over channels.
//!
//! Per job the runner guarantees the ordering the session relies on:
//! `start` precedes every delta of a generation and exactly one `complete`
//! (or one `error`) ends it.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::api::types::{GenerationId, Message, ParaphraseStyle, WorkerCommand, WorkerEvent};
use crate::app::session::{Session, WorkerPort};
use crate::core::SessionError;

/// Worker-side half: where a backend posts its events.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl EventSink {
    pub fn emit(&self, event: WorkerEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow!("event receiver dropped"))
    }
}

/// Handed to a backend for one generate or paraphrase job.
pub struct GenerationContext {
    pub sink: EventSink,
    pub generation: Option<GenerationId>,
    job: u64,
    interrupted_upto: Arc<AtomicU64>,
}

impl GenerationContext {
    pub fn is_interrupted(&self) -> bool {
        self.interrupted_upto.load(Ordering::SeqCst) >= self.job
    }
}

/// The inference runtime behind a worker.
#[async_trait]
pub trait WorkerBackend: Send {
    /// Capability probe. The error text is shown to the user verbatim.
    async fn check(&mut self) -> Result<()>;

    /// Fetches and initializes model assets, reporting per-file progress.
    async fn load(&mut self, sink: &EventSink) -> Result<()>;

    async fn generate(&mut self, messages: Vec<Message>, ctx: &GenerationContext) -> Result<()>;

    async fn paraphrase(&mut self, text: String, style: ParaphraseStyle, ctx: &GenerationContext) -> Result<()>;
}

pub type WorkerEvents = mpsc::UnboundedReceiver<WorkerEvent>;

/// Session-side handle to a spawned worker task.
pub struct ChannelWorker {
    commands: Option<mpsc::UnboundedSender<WorkerCommand>>,
    jobs_sent: u64,
    interrupted_upto: Arc<AtomicU64>,
    task: Option<JoinHandle<()>>,
}

impl WorkerPort for ChannelWorker {
    fn post(&mut self, command: WorkerCommand) -> crate::core::Result<()> {
        let tx = self.commands.as_ref().ok_or(SessionError::WorkerClosed)?;
        match &command {
            WorkerCommand::Generate { .. } | WorkerCommand::Paraphrase { .. } => self.jobs_sent += 1,
            WorkerCommand::Interrupt => {
                // Takes effect immediately; the queued command is only for logging.
                self.interrupted_upto.store(self.jobs_sent, Ordering::SeqCst);
            }
            _ => {}
        }
        tx.send(command).map_err(|_| SessionError::WorkerClosed)
    }

    fn terminate(&mut self) {
        self.commands = None;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ChannelWorker {
    fn drop(&mut self) {
        self.terminate();
    }
}

/// Spawns `backend` on the current tokio runtime.
pub fn spawn_worker<B: WorkerBackend + 'static>(backend: B) -> (ChannelWorker, WorkerEvents) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    let interrupted_upto = Arc::new(AtomicU64::new(0));

    let runner = WorkerRunner {
        backend,
        loaded: false,
        jobs: 0,
        sink: EventSink { tx: event_tx },
        interrupted_upto: interrupted_upto.clone(),
    };
    let task = tokio::spawn(runner.run(cmd_rx));

    let worker = ChannelWorker {
        commands: Some(cmd_tx),
        jobs_sent: 0,
        interrupted_upto,
        task: Some(task),
    };
    (worker, event_rx)
}

struct WorkerRunner<B> {
    backend: B,
    loaded: bool,
    jobs: u64,
    sink: EventSink,
    interrupted_upto: Arc<AtomicU64>,
}

impl<B: WorkerBackend> WorkerRunner<B> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<WorkerCommand>) {
        while let Some(command) = commands.recv().await {
            tracing::debug!(command = command.name(), "worker received command");
            if let Err(e) = self.handle(command).await {
                tracing::debug!(error = %e, "worker stopping");
                break;
            }
        }
    }

    /// Errors returned here mean the event channel is gone.
    async fn handle(&mut self, command: WorkerCommand) -> Result<()> {
        match command {
            WorkerCommand::Check => match self.backend.check().await {
                Ok(()) => self.sink.emit(WorkerEvent::Success),
                Err(e) => self.fail(e),
            },
            WorkerCommand::Load => {
                if self.loaded {
                    return self.sink.emit(WorkerEvent::Ready);
                }
                match self.backend.load(&self.sink).await {
                    Ok(()) => {
                        self.loaded = true;
                        self.sink.emit(WorkerEvent::Ready)
                    }
                    Err(e) => self.fail(e),
                }
            }
            WorkerCommand::Generate { data, generation } => {
                let ctx = self.next_job(generation);
                if !self.loaded {
                    return self.fail(anyhow!("model is not loaded"));
                }
                self.sink.emit(WorkerEvent::Start { generation })?;
                match self.backend.generate(data, &ctx).await {
                    Ok(()) => self.sink.emit(WorkerEvent::Complete { generation }),
                    Err(e) => self.fail(e),
                }
            }
            WorkerCommand::Paraphrase { text, style, generation } => {
                let ctx = self.next_job(generation);
                if !self.loaded {
                    return self.fail(anyhow!("model is not loaded"));
                }
                match self.backend.paraphrase(text, style, &ctx).await {
                    Ok(()) => self.sink.emit(WorkerEvent::Complete { generation }),
                    Err(e) => self.fail(e),
                }
            }
            WorkerCommand::Interrupt => Ok(()),
        }
    }

    fn next_job(&mut self, generation: Option<GenerationId>) -> GenerationContext {
        self.jobs += 1;
        GenerationContext {
            sink: self.sink.clone(),
            generation,
            job: self.jobs,
            interrupted_upto: self.interrupted_upto.clone(),
        }
    }

    fn fail(&self, error: anyhow::Error) -> Result<()> {
        tracing::warn!(error = %error, "worker job failed");
        self.sink.emit(WorkerEvent::Error {
            data: error.to_string(),
        })
    }
}

/// Feeds worker events into the session until `done` holds or the worker
/// goes away.
pub async fn pump_until<F>(
    session: &mut Session<ChannelWorker>,
    events: &mut WorkerEvents,
    mut done: F,
) -> crate::core::Result<()>
where
    F: FnMut(&Session<ChannelWorker>) -> bool,
{
    while !done(session) {
        let Some(event) = events.recv().await else {
            return Err(SessionError::WorkerClosed);
        };
        session.handle_event(event)?;
    }
    Ok(())
}
