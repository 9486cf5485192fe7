//! Streaming transcript reducer.
//!
//! Turns move through `Idle -> Pending -> Open -> Idle`. A user submission
//! leaves the transcript `Pending` until the worker's `start` opens an
//! assistant turn; deltas are addressed to that turn by index and generation
//! id rather than to whatever happens to be last.

use crate::api::types::{GenerationId, Message, Role};
use crate::core::error::SessionError;
use crate::core::status::GenerationMetrics;
use crate::core::Result;

/// Outcome of feeding one event into the reducer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    /// Dropped: stale generation, duplicate signal or nothing to act on.
    Ignored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Idle,
    Pending { generation: Option<GenerationId> },
    Open { generation: Option<GenerationId>, index: usize },
}

#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
    state: TurnState,
    last_closed: Option<GenerationId>,
    metrics: GenerationMetrics,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl Transcript {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            state: TurnState::Idle,
            last_closed: None,
            metrics: GenerationMetrics::default(),
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn metrics(&self) -> &GenerationMetrics {
        &self.metrics
    }

    pub fn is_generating(&self) -> bool {
        self.state != TurnState::Idle
    }

    pub fn has_open_turn(&self) -> bool {
        matches!(self.state, TurnState::Open { .. })
    }

    /// Generation the reducer is currently accepting events for.
    pub fn current_generation(&self) -> Option<GenerationId> {
        match self.state {
            TurnState::Idle => None,
            TurnState::Pending { generation } | TurnState::Open { generation, .. } => generation,
        }
    }

    /// Appends a user turn and marks a generation as in progress.
    ///
    /// Must not be called while a generation is in progress.
    pub fn submit_user_turn(&mut self, content: impl Into<String>, image: Option<String>) -> Result<()> {
        if self.is_generating() {
            return Err(SessionError::GenerationInProgress);
        }
        self.messages.push(Message {
            role: Role::User,
            content: content.into(),
            image,
        });
        self.metrics.reset();
        self.state = TurnState::Pending { generation: None };
        Ok(())
    }

    /// Tags the pending submission with the id sent to the worker.
    pub fn assign_generation(&mut self, id: GenerationId) {
        match &mut self.state {
            TurnState::Pending { generation } | TurnState::Open { generation, .. } => {
                *generation = Some(id);
            }
            TurnState::Idle => {}
        }
    }

    pub fn on_generation_start(&mut self, generation: Option<GenerationId>) -> Result<Applied> {
        let pending = match self.state {
            TurnState::Pending { generation } => generation,
            TurnState::Open { .. } => {
                tracing::warn!("duplicate start for an already open turn");
                return Ok(Applied::Ignored);
            }
            TurnState::Idle => {
                tracing::warn!(?generation, "start received with no pending submission");
                return Ok(Applied::Ignored);
            }
        };
        if let (Some(expected), Some(got)) = (pending, generation) {
            if expected != got {
                tracing::warn!(%expected, %got, "start for a stale generation");
                return Ok(Applied::Ignored);
            }
        }

        self.messages.push(Message::assistant(""));
        self.state = TurnState::Open {
            generation: pending.or(generation),
            index: self.messages.len() - 1,
        };
        Ok(Applied::Changed)
    }

    pub fn on_text_delta(
        &mut self,
        delta: &str,
        tps: f64,
        token_count: u64,
        generation: Option<GenerationId>,
    ) -> Result<Applied> {
        if self.is_stale(generation) {
            return Ok(Applied::Ignored);
        }
        let turn = self.open_turn_mut("text delta")?;
        turn.content.push_str(delta);
        self.metrics.record_text(tps, token_count);
        Ok(Applied::Changed)
    }

    pub fn on_image_ready(&mut self, url: String, generation: Option<GenerationId>) -> Result<Applied> {
        if self.is_stale(generation) {
            return Ok(Applied::Ignored);
        }
        let turn = self.open_turn_mut("image result")?;
        turn.image = Some(url);
        Ok(Applied::Changed)
    }

    /// Image progress only touches the metrics, never the transcript.
    pub fn on_image_progress(
        &mut self,
        fraction: Option<f64>,
        elapsed_ms: Option<f64>,
        generation: Option<GenerationId>,
    ) -> Result<Applied> {
        if self.is_stale(generation) {
            return Ok(Applied::Ignored);
        }
        if !self.has_open_turn() {
            return Err(SessionError::InvariantViolation(
                "image progress with no open assistant turn".to_string(),
            ));
        }
        self.metrics.record_image(fraction, elapsed_ms);
        Ok(Applied::Changed)
    }

    pub fn on_generation_complete(&mut self, generation: Option<GenerationId>) -> Result<Applied> {
        if self.is_stale(generation) {
            return Ok(Applied::Ignored);
        }
        if !self.is_generating() {
            tracing::debug!("complete received while idle");
            return Ok(Applied::Ignored);
        }
        self.close();
        Ok(Applied::Changed)
    }

    /// Ends the current generation early (worker error or interrupt). Events
    /// still in flight for it are discarded afterwards.
    pub fn abort(&mut self) -> bool {
        if !self.is_generating() {
            return false;
        }
        self.close();
        true
    }

    pub fn clear(&mut self) -> Result<()> {
        if self.is_generating() {
            return Err(SessionError::GenerationInProgress);
        }
        self.messages.clear();
        self.metrics.reset();
        Ok(())
    }

    fn close(&mut self) {
        if let Some(id) = self.current_generation() {
            self.last_closed = Some(id);
        }
        self.state = TurnState::Idle;
    }

    fn is_stale(&self, generation: Option<GenerationId>) -> bool {
        let Some(got) = generation else {
            return false;
        };
        let stale = match self.current_generation() {
            Some(current) => current != got,
            None => self.last_closed.is_some_and(|closed| got <= closed),
        };
        if stale {
            tracing::warn!(%got, "discarding event from a stale generation");
        }
        stale
    }

    fn open_turn_mut(&mut self, what: &str) -> Result<&mut Message> {
        let TurnState::Open { index, .. } = self.state else {
            return Err(SessionError::InvariantViolation(format!(
                "{} with no open assistant turn",
                what
            )));
        };
        match self.messages.get_mut(index) {
            Some(turn) if turn.role == Role::Assistant => Ok(turn),
            _ => Err(SessionError::InvariantViolation(format!(
                "{} addressed to a turn that is not an assistant turn",
                what
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> Transcript {
        let mut t = Transcript::new();
        t.submit_user_turn("Hello", None).unwrap();
        t.on_generation_start(None).unwrap();
        t
    }

    #[test]
    fn test_hello_scenario() {
        let mut t = started();
        t.on_text_delta("Hi", 12.5, 1, None).unwrap();
        t.on_text_delta(" there", 12.5, 2, None).unwrap();
        assert!(t.is_generating());
        assert_eq!(t.on_generation_complete(None).unwrap(), Applied::Changed);

        assert!(!t.is_generating());
        assert_eq!(t.messages(), &[Message::user("Hello"), Message::assistant("Hi there")]);
        assert_eq!(t.metrics().tokens_per_second, Some(12.5));
        assert_eq!(t.metrics().token_count, Some(2));
    }

    #[test]
    fn test_deltas_concatenate_and_only_last_changes() {
        let mut t = Transcript::new();
        t.submit_user_turn("first", None).unwrap();
        t.on_generation_start(None).unwrap();
        t.on_text_delta("done", 1.0, 1, None).unwrap();
        t.on_generation_complete(None).unwrap();

        t.submit_user_turn("second", None).unwrap();
        t.on_generation_start(None).unwrap();
        let before: Vec<Message> = t.messages()[..3].to_vec();
        let deltas = ["a", "bc", "", " d", "é"];
        for (i, d) in deltas.iter().enumerate() {
            t.on_text_delta(d, 2.0, i as u64 + 1, None).unwrap();
        }
        assert_eq!(&t.messages()[..3], before.as_slice());
        assert_eq!(t.last().unwrap().content, deltas.concat());
    }

    #[test]
    fn test_delta_without_open_turn_is_invariant_violation() {
        let mut t = Transcript::new();
        let err = t.on_text_delta("x", 1.0, 1, None).unwrap_err();
        assert!(matches!(err, SessionError::InvariantViolation(_)));

        t.submit_user_turn("Hello", None).unwrap();
        let err = t.on_text_delta("x", 1.0, 1, None).unwrap_err();
        assert!(matches!(err, SessionError::InvariantViolation(_)));
        assert_eq!(t.messages(), &[Message::user("Hello")]);
    }

    #[test]
    fn test_image_ready_keeps_text() {
        let mut t = started();
        t.on_text_delta("Here you go", 3.0, 3, None).unwrap();
        t.on_image_ready("data:image/png;base64,AA==".to_string(), None).unwrap();
        let last = t.last().unwrap();
        assert_eq!(last.content, "Here you go");
        assert_eq!(last.image.as_deref(), Some("data:image/png;base64,AA=="));
    }

    #[test]
    fn test_image_progress_does_not_touch_transcript() {
        let mut t = started();
        let before = t.messages().to_vec();
        t.on_image_progress(Some(0.5), Some(1200.0), None).unwrap();
        assert_eq!(t.messages(), before.as_slice());
        assert_eq!(t.metrics().image_progress_fraction, Some(0.5));
        assert_eq!(t.metrics().image_generation_elapsed_ms, Some(1200.0));
    }

    #[test]
    fn test_submit_while_generating_rejected() {
        let mut t = started();
        assert!(matches!(
            t.submit_user_turn("again", None),
            Err(SessionError::GenerationInProgress)
        ));
        assert!(matches!(t.clear(), Err(SessionError::GenerationInProgress)));
    }

    #[test]
    fn test_submit_resets_metrics() {
        let mut t = started();
        t.on_text_delta("x", 5.0, 1, None).unwrap();
        t.on_generation_complete(None).unwrap();
        t.submit_user_turn("next", None).unwrap();
        assert_eq!(*t.metrics(), GenerationMetrics::default());
    }

    #[test]
    fn test_stale_generation_events_discarded() {
        let mut t = Transcript::new();
        t.submit_user_turn("one", None).unwrap();
        t.assign_generation(GenerationId(1));
        t.on_generation_start(Some(GenerationId(1))).unwrap();
        t.abort();

        t.submit_user_turn("two", None).unwrap();
        t.assign_generation(GenerationId(2));
        assert_eq!(
            t.on_generation_start(Some(GenerationId(1))).unwrap(),
            Applied::Ignored
        );
        t.on_generation_start(Some(GenerationId(2))).unwrap();
        assert_eq!(
            t.on_text_delta("late", 1.0, 1, Some(GenerationId(1))).unwrap(),
            Applied::Ignored
        );
        t.on_text_delta("fresh", 1.0, 1, Some(GenerationId(2))).unwrap();
        assert_eq!(t.last().unwrap().content, "fresh");
        assert_eq!(t.messages()[1].content, "");
    }

    #[test]
    fn test_late_events_after_complete_are_ignored() {
        let mut t = Transcript::new();
        t.submit_user_turn("one", None).unwrap();
        t.assign_generation(GenerationId(4));
        t.on_generation_start(None).unwrap();
        t.on_generation_complete(Some(GenerationId(4))).unwrap();
        assert_eq!(
            t.on_text_delta("late", 1.0, 1, Some(GenerationId(4))).unwrap(),
            Applied::Ignored
        );
        assert_eq!(t.on_generation_complete(None).unwrap(), Applied::Ignored);
    }

    #[test]
    fn test_start_without_submission_ignored() {
        let mut t = Transcript::new();
        assert_eq!(t.on_generation_start(None).unwrap(), Applied::Ignored);
        assert!(t.is_empty());
    }

    #[test]
    fn test_clear_when_idle() {
        let mut t = started();
        t.on_text_delta("x", 5.0, 1, None).unwrap();
        t.on_generation_complete(None).unwrap();
        t.clear().unwrap();
        assert!(t.is_empty());
        assert_eq!(*t.metrics(), GenerationMetrics::default());
    }
}
