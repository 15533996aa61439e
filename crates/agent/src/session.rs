//! Per-call session state (spec §3 "Session state").
//!
//! A `SessionState` lives only for the duration of one `AgenticLoop::execute`
//! call. The pending-questions map, abort flag, and tool-call counters share
//! a single mutex (spec §5 "Shared resources") — none of them are ever held
//! across an `.await`.

use crate::ask_user::QuestionAnswer;
use parking_lot::Mutex;
use pulse_agent_core::Message;
use std::collections::HashMap;
use tokio::sync::oneshot;

struct Inner {
    messages: Vec<Message>,
    tool_calls_count: usize,
    turn: usize,
    aborted: bool,
    wrap_up_nudge_fired: bool,
    escalation_nudge_fired: bool,
    pending_questions: HashMap<String, oneshot::Sender<QuestionAnswer>>,
}

pub struct SessionState {
    pub session_id: String,
    pub autonomous_mode: bool,
    inner: Mutex<Inner>,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, messages: Vec<Message>, autonomous_mode: bool) -> Self {
        Self {
            session_id: session_id.into(),
            autonomous_mode,
            inner: Mutex::new(Inner {
                messages,
                tool_calls_count: 0,
                turn: 0,
                aborted: false,
                wrap_up_nudge_fired: false,
                escalation_nudge_fired: false,
                pending_questions: HashMap::new(),
            }),
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.inner.lock().messages.clone()
    }

    pub fn push_message(&self, message: Message) {
        self.inner.lock().messages.push(message);
    }

    /// Messages appended since `start_len` — what `Execute` returns.
    pub fn messages_since(&self, start_len: usize) -> Vec<Message> {
        self.inner.lock().messages[start_len..].to_vec()
    }

    pub fn message_count(&self) -> usize {
        self.inner.lock().messages.len()
    }

    pub fn replace_messages(&self, messages: Vec<Message>) {
        self.inner.lock().messages = messages;
    }

    pub fn tool_calls_count(&self) -> usize {
        self.inner.lock().tool_calls_count
    }

    pub fn record_tool_call(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.tool_calls_count += 1;
        inner.tool_calls_count
    }

    pub fn turn(&self) -> usize {
        self.inner.lock().turn
    }

    pub fn begin_turn(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.turn += 1;
        inner.turn
    }

    pub fn abort(&self) {
        let mut inner = self.inner.lock();
        inner.aborted = true;
        // Drop every pending-question sender so any dispatcher still polling
        // observes the abort rather than waiting out the full poll interval.
        inner.pending_questions.clear();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.lock().aborted
    }

    pub fn wrap_up_nudge_fired(&self) -> bool {
        self.inner.lock().wrap_up_nudge_fired
    }

    /// Returns `true` the first time this is called for the session (i.e.
    /// the nudge should actually fire now).
    pub fn mark_wrap_up_nudge_fired(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.wrap_up_nudge_fired {
            false
        } else {
            inner.wrap_up_nudge_fired = true;
            true
        }
    }

    pub fn mark_escalation_nudge_fired(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.escalation_nudge_fired {
            false
        } else {
            inner.escalation_nudge_fired = true;
            true
        }
    }

    /// Register a pending question, returning the receiver the dispatcher
    /// polls for an answer. Must be called before the `question` UI event
    /// is emitted (spec §9 "scoped resources").
    pub fn register_question(&self, question_id: impl Into<String>) -> oneshot::Receiver<QuestionAnswer> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().pending_questions.insert(question_id.into(), tx);
        rx
    }

    /// Unregister a pending question on any exit path (answered, timed out,
    /// aborted) so the map never accumulates stale entries.
    pub fn unregister_question(&self, question_id: &str) {
        self.inner.lock().pending_questions.remove(question_id);
    }

    /// Resolve a pending question with a client-provided answer. Returns
    /// `false` if no such question is pending (already answered, expired,
    /// or the session was aborted).
    pub fn resolve_question(&self, answer: QuestionAnswer) -> bool {
        let sender = self.inner.lock().pending_questions.remove(&answer.question_id);
        match sender {
            Some(tx) => tx.send(answer).is_ok(),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_counter_increments() {
        let session = SessionState::new("s1", Vec::new(), false);
        assert_eq!(session.record_tool_call(), 1);
        assert_eq!(session.record_tool_call(), 2);
        assert_eq!(session.tool_calls_count(), 2);
    }

    #[test]
    fn wrap_up_nudge_fires_once() {
        let session = SessionState::new("s1", Vec::new(), false);
        assert!(session.mark_wrap_up_nudge_fired());
        assert!(!session.mark_wrap_up_nudge_fired());
        assert!(session.wrap_up_nudge_fired());
    }

    #[test]
    fn escalation_nudge_is_independent_of_wrap_up_nudge() {
        let session = SessionState::new("s1", Vec::new(), false);
        assert!(session.mark_wrap_up_nudge_fired());
        assert!(session.mark_escalation_nudge_fired());
        assert!(!session.mark_escalation_nudge_fired());
    }

    #[tokio::test]
    async fn registered_question_resolves_with_matching_answer() {
        let session = SessionState::new("s1", Vec::new(), false);
        let rx = session.register_question("q1");

        let answer = QuestionAnswer {
            question_id: "q1".into(),
            answers: vec![crate::ask_user::AnswerItem {
                id: "a".into(),
                value: "yes".into(),
            }],
        };
        assert!(session.resolve_question(answer));

        let received = rx.await.expect("answer delivered");
        assert_eq!(received.question_id, "q1");
    }

    #[test]
    fn abort_drops_pending_questions() {
        let session = SessionState::new("s1", Vec::new(), false);
        let _rx = session.register_question("q1");
        session.abort();
        assert!(session.is_aborted());

        let answer = QuestionAnswer {
            question_id: "q1".into(),
            answers: Vec::new(),
        };
        assert!(!session.resolve_question(answer));
    }
}
