//! Session state, observer fan-out, and the steer/follow-up queues.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use phi_llm::Message;

use crate::types::{AgentEvent, AgentEventType, AgentState, SessionMessage};

pub type ObserverHandler = Arc<dyn Fn(&AgentEvent) + Send + Sync>;

struct AgentInner {
    state: AgentState,
    observers: Vec<Option<ObserverHandler>>,
    steer_queue: VecDeque<Message>,
    follow_up_queue: VecDeque<Message>,
}

/// One conversation: message log, model, tools, observers, and the two
/// FIFO queues for messages submitted mid-stream. All fields share a
/// single mutex; it is never held across I/O or observer callbacks.
#[derive(Clone)]
pub struct Agent {
    inner: Arc<Mutex<AgentInner>>,
}

/// Handle returned by [`Agent::subscribe`]. Unsubscribing nulls the
/// observer's slot; the list is never compacted, and nulled slots are
/// skipped on emit.
pub struct Subscription {
    inner: Arc<Mutex<AgentInner>>,
    index: usize,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let mut inner = self.inner.lock().expect("agent state mutex poisoned");
        if let Some(slot) = inner.observers.get_mut(self.index) {
            *slot = None;
        }
    }
}

impl Agent {
    pub fn new(initial: AgentState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(AgentInner {
                state: initial,
                observers: Vec::new(),
                steer_queue: VecDeque::new(),
                follow_up_queue: VecDeque::new(),
            })),
        }
    }

    /// Read-only snapshot of the session state.
    pub fn state(&self) -> AgentState {
        self.inner
            .lock()
            .expect("agent state mutex poisoned")
            .state
            .clone()
    }

    pub fn subscribe(&self, handler: ObserverHandler) -> Subscription {
        let mut inner = self.inner.lock().expect("agent state mutex poisoned");
        inner.observers.push(Some(handler));
        Subscription {
            inner: self.inner.clone(),
            index: inner.observers.len() - 1,
        }
    }

    /// Deliver an event to every live observer in registration order. The
    /// handler list is copied under the lock and invoked outside it.
    pub(crate) fn emit(&self, event: &AgentEvent) {
        let handlers: Vec<ObserverHandler> = {
            let inner = self.inner.lock().expect("agent state mutex poisoned");
            inner.observers.iter().flatten().cloned().collect()
        };
        for handler in handlers {
            handler(event);
        }
    }

    /// Append a user message and notify observers. Returns the stored
    /// message (timestamped at append when absent).
    pub fn prompt(&self, message: Message) -> SessionMessage {
        let appended = self.append(SessionMessage::Plain(message));
        self.emit(&AgentEvent::message_appended(
            AgentEventType::MessageStart,
            appended.clone(),
        ));
        self.emit(&AgentEvent::message_appended(
            AgentEventType::MessageEnd,
            appended.clone(),
        ));
        appended
    }

    pub(crate) fn append(&self, mut message: SessionMessage) -> SessionMessage {
        if message.timestamp() == 0 {
            message.set_timestamp(now_millis());
        }
        let mut inner = self.inner.lock().expect("agent state mutex poisoned");
        inner.state.messages.push(message.clone());
        message
    }

    pub fn steer(&self, message: Message) {
        let mut inner = self.inner.lock().expect("agent state mutex poisoned");
        inner.steer_queue.push_back(message);
    }

    pub fn follow_up(&self, message: Message) {
        let mut inner = self.inner.lock().expect("agent state mutex poisoned");
        inner.follow_up_queue.push_back(message);
    }

    pub fn pending_steer(&self) -> Vec<Message> {
        let inner = self.inner.lock().expect("agent state mutex poisoned");
        inner.steer_queue.iter().cloned().collect()
    }

    pub fn pending_follow_up(&self) -> Vec<Message> {
        let inner = self.inner.lock().expect("agent state mutex poisoned");
        inner.follow_up_queue.iter().cloned().collect()
    }

    pub fn pop_steer(&self) -> Option<Message> {
        let mut inner = self.inner.lock().expect("agent state mutex poisoned");
        inner.steer_queue.pop_front()
    }

    pub fn pop_follow_up(&self) -> Option<Message> {
        let mut inner = self.inner.lock().expect("agent state mutex poisoned");
        inner.follow_up_queue.pop_front()
    }

    pub(crate) fn set_streaming(&self, value: bool) {
        let mut inner = self.inner.lock().expect("agent state mutex poisoned");
        inner.state.is_streaming = value;
    }

    pub(crate) fn message_count(&self) -> usize {
        let inner = self.inner.lock().expect("agent state mutex poisoned");
        inner.state.messages.len()
    }

    /// Messages appended at or after `start`, in order.
    pub fn messages_from(&self, start: usize) -> Vec<SessionMessage> {
        let inner = self.inner.lock().expect("agent state mutex poisoned");
        inner.state.messages.iter().skip(start).cloned().collect()
    }
}

pub(crate) fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use phi_llm::ContentPart;
    use std::sync::Mutex as StdMutex;

    fn user(text: &str) -> Message {
        Message::user(vec![ContentPart::text(text)])
    }

    #[test]
    fn prompt_appends_and_emits_start_end_pair() {
        let agent = Agent::new(AgentState::default());
        let seen: Arc<StdMutex<Vec<AgentEventType>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let _subscription = agent.subscribe(Arc::new(move |event| {
            sink.lock().expect("event sink").push(event.event_type);
        }));

        agent.prompt(user("hi"));

        assert_eq!(agent.state().messages.len(), 1);
        assert_eq!(
            *seen.lock().expect("event sink"),
            vec![AgentEventType::MessageStart, AgentEventType::MessageEnd]
        );
    }

    #[test]
    fn append_stamps_missing_timestamps_only() {
        let agent = Agent::new(AgentState::default());
        let stamped = agent.append(SessionMessage::Plain(user("a")));
        assert!(stamped.timestamp() > 0);

        let mut preset = user("b");
        preset.timestamp = 123;
        let kept = agent.append(SessionMessage::Plain(preset));
        assert_eq!(kept.timestamp(), 123);
    }

    #[test]
    fn unsubscribe_nulls_the_slot_without_shifting_others() {
        let agent = Agent::new(AgentState::default());
        let seen: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

        let first_sink = seen.clone();
        let first = agent.subscribe(Arc::new(move |_event| {
            first_sink.lock().expect("event sink").push("first");
        }));
        let second_sink = seen.clone();
        let _second = agent.subscribe(Arc::new(move |_event| {
            second_sink.lock().expect("event sink").push("second");
        }));

        first.unsubscribe();
        agent.emit(&AgentEvent::turn_start());

        assert_eq!(*seen.lock().expect("event sink"), vec!["second"]);
    }

    #[test]
    fn steer_and_follow_up_queues_are_fifo() {
        let agent = Agent::new(AgentState::default());
        agent.steer(user("first"));
        agent.steer(user("second"));
        agent.follow_up(user("later"));

        assert_eq!(agent.pending_steer().len(), 2);
        assert_eq!(agent.pending_follow_up().len(), 1);

        let popped = agent.pop_steer().expect("queued steer message");
        assert_eq!(popped.text(), "first");
        assert_eq!(agent.pending_steer().len(), 1);
        // the log is untouched by queueing
        assert!(agent.state().messages.is_empty());
    }

    #[test]
    fn observers_can_read_state_from_inside_a_callback() {
        let agent = Agent::new(AgentState::default());
        let observed = Arc::new(StdMutex::new(0usize));
        let sink = observed.clone();
        let inner_agent = agent.clone();
        let _subscription = agent.subscribe(Arc::new(move |_event| {
            *sink.lock().expect("sink") = inner_agent.state().messages.len();
        }));

        agent.prompt(user("hello"));
        assert_eq!(*observed.lock().expect("sink"), 1);
    }
}
