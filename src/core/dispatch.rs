use crate::api::types::{GenerationId, Message, Role, WorkerCommand};

/// Decides whether a transcript change should be forwarded to the worker as a
/// `generate` request.
///
/// A request goes out only when the transcript holds at least one user turn
/// and does not end with an assistant turn. The guard also remembers the
/// transcript length it last forwarded so the same transcript is never sent
/// twice.
#[derive(Debug, Clone, Default)]
pub struct DispatchGuard {
    last_dispatched_len: Option<usize>,
    next_generation: GenerationId,
}

impl DispatchGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_generate(messages: &[Message]) -> bool {
        if !messages.iter().any(|m| m.role == Role::User) {
            return false;
        }
        !matches!(messages.last(), Some(last) if last.role == Role::Assistant)
    }

    /// Builds the `generate` command for this transcript, or `None` when the
    /// guard holds it back.
    pub fn evaluate(&mut self, messages: &[Message]) -> Option<(GenerationId, WorkerCommand)> {
        if !Self::should_generate(messages) {
            return None;
        }
        if self.last_dispatched_len == Some(messages.len()) {
            tracing::debug!(len = messages.len(), "transcript already dispatched");
            return None;
        }
        self.last_dispatched_len = Some(messages.len());
        let id = self.issue();
        Some((
            id,
            WorkerCommand::Generate {
                data: messages.to_vec(),
                generation: Some(id),
            },
        ))
    }

    /// Hands out the next id. Paraphrase jobs draw from the same sequence so
    /// no two jobs of either kind share an id.
    pub fn issue(&mut self) -> GenerationId {
        self.next_generation = self.next_generation.next();
        self.next_generation
    }

    /// Forgets the last dispatched transcript, e.g. after the transcript was
    /// cleared.
    pub fn reset(&mut self) {
        self.last_dispatched_len = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_transcript_never_dispatches() {
        let mut guard = DispatchGuard::new();
        assert!(!DispatchGuard::should_generate(&[]));
        assert!(guard.evaluate(&[]).is_none());
    }

    #[test]
    fn test_assistant_last_never_dispatches() {
        let mut guard = DispatchGuard::new();
        let messages = vec![Message::user("Hello"), Message::assistant("Hi")];
        assert!(guard.evaluate(&messages).is_none());
        assert!(guard.evaluate(&[Message::assistant("")]).is_none());
    }

    #[test]
    fn test_forwards_full_transcript() {
        let mut guard = DispatchGuard::new();
        let messages = vec![
            Message::user("Hello"),
            Message::assistant("Hi"),
            Message::user("How are you?"),
        ];
        let (id, cmd) = guard.evaluate(&messages).unwrap();
        assert_eq!(id, GenerationId(1));
        assert_eq!(
            cmd,
            WorkerCommand::Generate {
                data: messages.clone(),
                generation: Some(GenerationId(1)),
            }
        );
        assert!(guard.evaluate(&messages).is_none());
    }

    #[test]
    fn test_generation_ids_increase() {
        let mut guard = DispatchGuard::new();
        let mut messages = vec![Message::user("a")];
        let (first, _) = guard.evaluate(&messages).unwrap();
        messages.push(Message::assistant("b"));
        messages.push(Message::user("c"));
        let (second, _) = guard.evaluate(&messages).unwrap();
        assert!(second > first);
    }

    #[test]
    fn test_issued_ids_are_never_reused_by_generate() {
        let mut guard = DispatchGuard::new();
        let paraphrase = guard.issue();
        let (generate, _) = guard.evaluate(&[Message::user("a")]).unwrap();
        assert_eq!(paraphrase, GenerationId(1));
        assert_eq!(generate, GenerationId(2));
    }

    #[test]
    fn test_reset_allows_same_length_again() {
        let mut guard = DispatchGuard::new();
        let messages = vec![Message::user("a")];
        assert!(guard.evaluate(&messages).is_some());
        guard.reset();
        assert!(guard.evaluate(&[Message::user("b")]).is_some());
    }
}
