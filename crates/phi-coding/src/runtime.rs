//! Runtime: routes inbound messages to sessions over the worker queue.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use phi_agent::{InboundHandler, InboundMessage, Queue, QueueError, QueueOptions};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::errors::SdkError;
use crate::session::{AgentSession, PromptOptions};

/// Builds a session for an unseen session id.
pub type SessionFactory = Arc<dyn Fn(&str) -> Result<AgentSession, SdkError> + Send + Sync>;

pub struct Runtime {
    queue: Queue,
    factory: SessionFactory,
    sessions: RwLock<HashMap<String, Arc<AgentSession>>>,
}

impl Runtime {
    pub fn new(factory: SessionFactory, queue_options: QueueOptions) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Runtime>| {
            let handler_runtime = weak.clone();
            let handler: InboundHandler = Arc::new(move |cancel, message| {
                let runtime = handler_runtime.clone();
                Box::pin(async move {
                    let Some(runtime) = runtime.upgrade() else {
                        return Ok(());
                    };
                    runtime
                        .handle_inbound(cancel, message)
                        .await
                        .map_err(anyhow::Error::from)
                })
            });
            Runtime {
                queue: Queue::new(handler, queue_options),
                factory,
                sessions: RwLock::new(HashMap::new()),
            }
        })
    }

    pub fn start(&self, cancel: CancellationToken) -> Result<(), QueueError> {
        self.queue.start(cancel)
    }

    pub async fn stop(&self) {
        self.queue.stop().await;
    }

    pub fn enqueue(&self, message: InboundMessage) -> Result<(), QueueError> {
        self.queue.enqueue(message)
    }

    pub fn get_session(&self, session_id: &str) -> Option<Arc<AgentSession>> {
        self.sessions
            .read()
            .expect("session table lock poisoned")
            .get(session_id)
            .cloned()
    }

    /// Validation order is fixed: session id, text, session
    /// lookup/creation, cancellation, dispatch.
    pub async fn handle_inbound(
        &self,
        cancel: CancellationToken,
        inbound: InboundMessage,
    ) -> Result<(), SdkError> {
        if inbound.session_id.is_empty() {
            return Err(SdkError::MissingSessionId);
        }
        if inbound.text.trim().is_empty() {
            return Err(SdkError::EmptyInboundText);
        }

        let session = self.get_or_create_session(&inbound.session_id)?;
        if cancel.is_cancelled() {
            return Err(SdkError::Cancelled);
        }
        session.prompt(&inbound.text, PromptOptions::default()).await
    }

    fn get_or_create_session(&self, session_id: &str) -> Result<Arc<AgentSession>, SdkError> {
        if session_id.is_empty() {
            return Err(SdkError::MissingSessionId);
        }
        if let Some(existing) = self
            .sessions
            .read()
            .expect("session table lock poisoned")
            .get(session_id)
        {
            return Ok(existing.clone());
        }

        let created = (self.factory)(session_id)?;
        let mut sessions = self.sessions.write().expect("session table lock poisoned");
        // a concurrent writer may have beaten us to the insert
        if let Some(existing) = sessions.get(session_id) {
            return Ok(existing.clone());
        }
        debug!(session_id, "created session");
        let created = Arc::new(created);
        sessions.insert(session_id.to_string(), created.clone());
        Ok(created)
    }
}
