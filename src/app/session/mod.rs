//! Session: the single owner of a worker handle and of every piece of state
//! the UI renders from it.
//!
//! All methods run on one thread (the UI side); the worker is only ever seen
//! through [`WorkerPort::post`] and the events fed back into
//! [`Session::handle_event`].

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;

use crate::api::types::{GenerationId, ImageBlob, Message, ParaphraseStyle, WorkerCommand, WorkerEvent};
use crate::app::events::{EventBus, SessionEvent};
use crate::core::{
    Applied, DispatchGuard, GenerationMetrics, GenerationStatus, ProgressItem, ProgressTracker,
    ProgressUpdate, Result, SessionError, Transcript,
};
use crate::envconfig::Config;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Uninitialized,
    Checking,
    Idle,
    Loading,
    Ready,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunState::Uninitialized => "uninitialized",
            RunState::Checking => "checking",
            RunState::Idle => "idle",
            RunState::Loading => "loading",
            RunState::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Outbound half of a worker connection.
pub trait WorkerPort {
    fn post(&mut self, command: WorkerCommand) -> Result<()>;
    fn terminate(&mut self);
}

/// Port that queues commands for someone else to deliver, e.g. JS glue that
/// forwards them with `worker.postMessage`.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: VecDeque<WorkerCommand>,
    terminated: bool,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self) -> Vec<WorkerCommand> {
        self.queue.drain(..).collect()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl WorkerPort for Outbox {
    fn post(&mut self, command: WorkerCommand) -> Result<()> {
        if self.terminated {
            return Err(SessionError::WorkerClosed);
        }
        self.queue.push_back(command);
        Ok(())
    }

    fn terminate(&mut self) {
        self.terminated = true;
        self.queue.clear();
    }
}

/// Turns a binary image result into something displayable.
pub trait ImageUrlFactory: Send {
    fn create_url(&mut self, blob: &ImageBlob) -> String;
}

#[derive(Debug, Default)]
pub struct DataUrlFactory;

impl ImageUrlFactory for DataUrlFactory {
    fn create_url(&mut self, blob: &ImageBlob) -> String {
        blob.to_data_url()
    }
}

/// Input the user is composing, cleared on submit.
#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct Draft {
    pub text: String,
    pub image: Option<String>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq)]
pub struct ParaphraseOutput {
    pub text: String,
    pub running: bool,
}

/// Everything a renderer needs, in one serializable value.
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub state: RunState,
    pub error: Option<String>,
    pub loading_message: String,
    pub progress_items: Vec<ProgressItem>,
    pub messages: Vec<Message>,
    pub is_running: bool,
    pub metrics: GenerationMetrics,
    pub status: String,
    pub paraphrase: ParaphraseOutput,
}

pub struct Session<W: WorkerPort> {
    worker: Option<W>,
    state: RunState,
    error: Option<String>,
    probe_failed: bool,
    loading_message: String,
    progress: ProgressTracker,
    transcript: Transcript,
    guard: DispatchGuard,
    draft: Draft,
    paraphrase: ParaphraseOutput,
    paraphrase_generation: Option<GenerationId>,
    /// Interrupted paraphrase jobs whose `complete` has not arrived yet.
    interrupted_paraphrases: VecDeque<GenerationId>,
    images: Box<dyn ImageUrlFactory>,
    events: EventBus,
    strict: bool,
}

impl<W: WorkerPort> Session<W> {
    pub fn new(config: &Config) -> Self {
        Self {
            worker: None,
            state: RunState::Uninitialized,
            error: None,
            probe_failed: false,
            loading_message: String::new(),
            progress: ProgressTracker::new(),
            transcript: Transcript::new(),
            guard: DispatchGuard::new(),
            draft: Draft::default(),
            paraphrase: ParaphraseOutput::default(),
            paraphrase_generation: None,
            interrupted_paraphrases: VecDeque::new(),
            images: Box::new(DataUrlFactory),
            events: EventBus::new(),
            strict: config.strict,
        }
    }

    pub fn with_image_urls(mut self, images: Box<dyn ImageUrlFactory>) -> Self {
        self.images = images;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn loading_message(&self) -> &str {
        &self.loading_message
    }

    pub fn progress(&self) -> &ProgressTracker {
        &self.progress
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn messages(&self) -> &[Message] {
        self.transcript.messages()
    }

    pub fn is_running(&self) -> bool {
        self.transcript.is_generating()
    }

    pub fn draft(&self) -> &Draft {
        &self.draft
    }

    pub fn paraphrase(&self) -> &ParaphraseOutput {
        &self.paraphrase
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn worker(&self) -> Option<&W> {
        self.worker.as_ref()
    }

    pub fn worker_mut(&mut self) -> Option<&mut W> {
        self.worker.as_mut()
    }

    pub fn status(&self) -> GenerationStatus {
        GenerationStatus::aggregate(
            self.transcript.metrics(),
            self.transcript.is_generating(),
            self.transcript.len(),
        )
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            error: self.error.clone(),
            loading_message: self.loading_message.clone(),
            progress_items: self.progress.items().to_vec(),
            messages: self.transcript.messages().to_vec(),
            is_running: self.transcript.is_generating(),
            metrics: *self.transcript.metrics(),
            status: self.status().to_string(),
            paraphrase: self.paraphrase.clone(),
        }
    }

    /// Takes ownership of the worker and starts the capability probe. Only one
    /// worker may be attached at a time.
    pub fn attach(&mut self, worker: W) -> Result<()> {
        if self.worker.is_some() {
            return Err(SessionError::WorkerAlreadyAttached);
        }
        self.worker = Some(worker);
        self.error = None;
        self.probe_failed = false;
        self.post(WorkerCommand::Check)?;
        self.set_state(RunState::Checking);
        Ok(())
    }

    /// Terminates the worker and forgets in-flight work. Finished turns stay
    /// in the transcript.
    pub fn dispose(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        worker.terminate();
        tracing::info!("worker terminated");
        self.transcript.abort();
        self.paraphrase.running = false;
        self.paraphrase_generation = None;
        self.interrupted_paraphrases.clear();
        self.progress.clear();
        self.set_state(RunState::Uninitialized);
    }

    pub fn load(&mut self) -> Result<()> {
        if self.probe_failed {
            return Err(SessionError::ProbeFailed(self.error.clone().unwrap_or_default()));
        }
        let retry = self.state == RunState::Loading && self.error.is_some();
        if self.state != RunState::Idle && !retry {
            return Err(self.invalid("load"));
        }
        self.post(WorkerCommand::Load)?;
        self.error = None;
        self.set_state(RunState::Loading);
        Ok(())
    }

    pub fn set_input(&mut self, text: impl Into<String>) {
        self.draft.text = text.into();
    }

    pub fn set_image(&mut self, image: Option<String>) {
        self.draft.image = image;
    }

    /// Submits the current draft.
    pub fn submit(&mut self) -> Result<()> {
        let draft = self.draft.clone();
        self.submit_message(draft.text, draft.image)
    }

    pub fn submit_message(&mut self, content: impl Into<String>, image: Option<String>) -> Result<()> {
        if self.state != RunState::Ready {
            return Err(self.invalid("submit"));
        }
        if self.paraphrase.running {
            return Err(SessionError::GenerationInProgress);
        }
        self.transcript.submit_user_turn(content, image)?;
        self.draft = Draft::default();
        self.events.publish(SessionEvent::TranscriptChanged {
            len: self.transcript.len(),
        });
        self.dispatch_transcript()
    }

    /// Runs the dispatch guard over the current transcript and forwards it as
    /// a `generate` request when allowed.
    fn dispatch_transcript(&mut self) -> Result<()> {
        let Some((generation, command)) = self.guard.evaluate(self.transcript.messages()) else {
            return Ok(());
        };
        self.transcript.assign_generation(generation);
        tracing::debug!(%generation, turns = self.transcript.len(), "dispatching generate");
        if let Err(e) = self.post(command) {
            self.transcript.abort();
            return Err(e);
        }
        Ok(())
    }

    pub fn paraphrase_text(&mut self, text: impl Into<String>, style: ParaphraseStyle) -> Result<()> {
        if self.state != RunState::Ready {
            return Err(self.invalid("paraphrase"));
        }
        if self.paraphrase.running || self.transcript.is_generating() {
            return Err(SessionError::GenerationInProgress);
        }
        let generation = self.guard.issue();
        self.post(WorkerCommand::Paraphrase {
            text: text.into(),
            style,
            generation: Some(generation),
        })?;
        self.paraphrase = ParaphraseOutput {
            text: String::new(),
            running: true,
        };
        self.paraphrase_generation = Some(generation);
        Ok(())
    }

    /// Asks the worker to stop and closes the open turn right away. Anything
    /// the worker still sends for that generation is discarded.
    pub fn interrupt(&mut self) -> Result<bool> {
        if !self.transcript.is_generating() && !self.paraphrase.running {
            return Ok(false);
        }
        self.post(WorkerCommand::Interrupt)?;
        let generation = if self.paraphrase.running {
            self.paraphrase.running = false;
            let generation = self.paraphrase_generation.take();
            self.interrupted_paraphrases.extend(generation);
            generation
        } else {
            let generation = self.transcript.current_generation();
            self.transcript.abort();
            generation
        };
        self.events.publish(SessionEvent::GenerationFinished { generation });
        Ok(true)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.transcript.clear()?;
        self.guard.reset();
        self.events.publish(SessionEvent::TranscriptChanged { len: 0 });
        Ok(())
    }

    /// Decodes a raw worker message. Malformed messages are logged and
    /// dropped.
    pub fn handle_json(&mut self, json: &str) -> Result<()> {
        match WorkerEvent::from_json(json) {
            Ok(event) => self.handle_event(event),
            Err(e) if e.is_protocol_violation() => {
                tracing::warn!(error = %e, "dropping malformed worker message");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub fn handle_event(&mut self, event: WorkerEvent) -> Result<()> {
        tracing::debug!(status = event.status(), "worker event");

        match event {
            WorkerEvent::Success => {
                if self.state == RunState::Checking {
                    self.set_state(RunState::Idle);
                } else {
                    tracing::warn!(state = %self.state, "probe success outside of checking");
                }
            }
            WorkerEvent::Error { data } => self.on_worker_error(data),
            WorkerEvent::Loading { data } => {
                if matches!(self.state, RunState::Idle | RunState::Loading) {
                    self.set_state(RunState::Loading);
                }
                self.loading_message = data.clone();
                self.events.publish(SessionEvent::LoadingMessage { message: data });
            }
            WorkerEvent::Initiate {
                file,
                progress,
                name,
                loaded,
                total,
            } => {
                let item = ProgressItem {
                    file,
                    progress,
                    name,
                    loaded,
                    total,
                };
                if self.progress.on_file_initiated(item) {
                    self.publish_progress();
                }
            }
            WorkerEvent::Progress {
                file,
                progress,
                loaded,
                total,
            } => {
                if self.progress.on_file_progress(&file, progress, ProgressUpdate { loaded, total }) {
                    self.publish_progress();
                }
            }
            WorkerEvent::Done { file } => {
                if self.progress.on_file_done(&file) {
                    self.publish_progress();
                }
            }
            WorkerEvent::Ready => {
                if matches!(self.state, RunState::Loading | RunState::Idle) {
                    self.error = None;
                    self.set_state(RunState::Ready);
                } else {
                    tracing::warn!(state = %self.state, "ready outside of loading");
                }
            }
            WorkerEvent::Start { generation } => {
                let result = self.transcript.on_generation_start(generation);
                if self.apply(result)? == Applied::Changed {
                    self.events.publish(SessionEvent::TranscriptChanged {
                        len: self.transcript.len(),
                    });
                }
            }
            WorkerEvent::TextUpdate {
                output,
                tps,
                num_tokens,
                generation,
            } => {
                let result = self.transcript.on_text_delta(&output, tps, num_tokens, generation);
                if self.apply(result)? == Applied::Changed {
                    self.events.publish(SessionEvent::TextDelta { delta: output });
                    self.publish_status();
                }
            }
            WorkerEvent::ImageUpdate {
                blob: Some(blob),
                generation,
                ..
            } => {
                let url = self.images.create_url(&blob);
                let result = self.transcript.on_image_ready(url, generation);
                if self.apply(result)? == Applied::Changed {
                    self.events.publish(SessionEvent::TranscriptChanged {
                        len: self.transcript.len(),
                    });
                }
            }
            WorkerEvent::ImageUpdate {
                blob: None,
                progress,
                time,
                generation,
            } => {
                let result = self.transcript.on_image_progress(progress, time, generation);
                if self.apply(result)? == Applied::Changed {
                    self.publish_status();
                }
            }
            WorkerEvent::Update { output, generation } => {
                if self.owns_paraphrase(generation) {
                    self.paraphrase.text.push_str(&output);
                    self.events.publish(SessionEvent::ParaphraseDelta { delta: output });
                } else {
                    tracing::warn!(?generation, "discarding paraphrase output");
                }
            }
            WorkerEvent::Complete { generation } => {
                if self.owns_paraphrase(generation) {
                    self.paraphrase.running = false;
                    let generation = self.paraphrase_generation.take().or(generation);
                    self.events.publish(SessionEvent::GenerationFinished { generation });
                } else if self.retire_interrupted_paraphrase(generation) {
                    tracing::debug!(?generation, "interrupted paraphrase finished");
                } else {
                    let result = self.transcript.on_generation_complete(generation);
                    if self.apply(result)? == Applied::Changed {
                        self.events.publish(SessionEvent::GenerationFinished { generation });
                        self.publish_status();
                    }
                }
            }
        }
        Ok(())
    }

    /// Whether an `update`/`complete` belongs to the running paraphrase. An
    /// event without an id is only trusted once every interrupted job has
    /// reported its `complete`.
    fn owns_paraphrase(&self, generation: Option<GenerationId>) -> bool {
        if !self.paraphrase.running {
            return false;
        }
        match generation {
            Some(id) => self.paraphrase_generation == Some(id),
            None => self.interrupted_paraphrases.is_empty() && !self.transcript.is_generating(),
        }
    }

    /// Consumes the `complete` of an interrupted paraphrase job. Jobs finish
    /// in the order they were sent, so an untagged one retires the oldest.
    fn retire_interrupted_paraphrase(&mut self, generation: Option<GenerationId>) -> bool {
        match generation {
            Some(id) => match self.interrupted_paraphrases.iter().position(|g| *g == id) {
                Some(index) => {
                    self.interrupted_paraphrases.remove(index);
                    true
                }
                None => false,
            },
            None => self.interrupted_paraphrases.pop_front().is_some(),
        }
    }

    /// Strict sessions surface invariant violations; lenient ones log them and
    /// keep going.
    fn apply(&self, result: Result<Applied>) -> Result<Applied> {
        match result {
            Err(SessionError::InvariantViolation(reason)) if !self.strict => {
                tracing::error!(%reason, "invariant violation ignored");
                Ok(Applied::Ignored)
            }
            other => other,
        }
    }

    fn on_worker_error(&mut self, message: String) {
        tracing::error!(state = %self.state, %message, "worker reported an error");
        if self.state == RunState::Checking {
            self.probe_failed = true;
        }
        if self.transcript.abort() || self.paraphrase.running {
            self.paraphrase.running = false;
            self.paraphrase_generation = None;
            self.events.publish(SessionEvent::GenerationFinished { generation: None });
        }
        self.error = Some(message.clone());
        self.events.publish(SessionEvent::Error { message });
    }

    fn post(&mut self, command: WorkerCommand) -> Result<()> {
        let worker = self.worker.as_mut().ok_or(SessionError::NoWorker)?;
        let event = SessionEvent::command(&command);
        worker.post(command)?;
        self.events.publish(event);
        Ok(())
    }

    fn set_state(&mut self, to: RunState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.events.publish(SessionEvent::StateChanged { from, to });
    }

    fn publish_progress(&self) {
        self.events.publish(SessionEvent::ProgressChanged {
            files: self.progress.len(),
            overall: self.progress.overall(),
        });
    }

    fn publish_status(&self) {
        self.events.publish(SessionEvent::StatusChanged { status: self.status() });
    }

    fn invalid(&self, operation: &'static str) -> SessionError {
        SessionError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }
}

impl<W: WorkerPort> Drop for Session<W> {
    fn drop(&mut self) {
        self.dispose();
    }
}
