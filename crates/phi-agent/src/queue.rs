//! Bounded multi-worker queue over inbound messages.
//!
//! Enqueue never blocks: a saturated buffer is reported back to the
//! caller, which decides how to shed load. Delivery is best-effort; a
//! handler that still fails after the configured retries drops the
//! message.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::errors::QueueError;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    pub id: String,
    pub session_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
    /// Unix milliseconds at receipt.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub received_at: i64,
}

fn is_zero(value: &i64) -> bool {
    *value == 0
}

pub type InboundHandler = Arc<
    dyn Fn(CancellationToken, InboundMessage) -> BoxFuture<'static, anyhow::Result<()>>
        + Send
        + Sync,
>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueOptions {
    pub workers: usize,
    pub buffer_size: usize,
    pub max_retries: usize,
    pub retry_delay: Duration,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            buffer_size: 256,
            max_retries: 0,
            retry_delay: Duration::from_millis(200),
        }
    }
}

impl QueueOptions {
    fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.workers == 0 {
            self.workers = defaults.workers;
        }
        if self.buffer_size == 0 {
            self.buffer_size = defaults.buffer_size;
        }
        if self.retry_delay.is_zero() {
            self.retry_delay = defaults.retry_delay;
        }
        self
    }
}

struct QueueRuntime {
    running: bool,
    cancel: Option<CancellationToken>,
    workers: Vec<JoinHandle<()>>,
}

pub struct Queue {
    handler: InboundHandler,
    options: QueueOptions,
    input: mpsc::Sender<InboundMessage>,
    output: Arc<tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>>,
    runtime: Mutex<QueueRuntime>,
}

impl Queue {
    pub fn new(handler: InboundHandler, options: QueueOptions) -> Self {
        let options = options.normalized();
        let (input, output) = mpsc::channel(options.buffer_size);
        Self {
            handler,
            options,
            input,
            output: Arc::new(tokio::sync::Mutex::new(output)),
            runtime: Mutex::new(QueueRuntime {
                running: false,
                cancel: None,
                workers: Vec::new(),
            }),
        }
    }

    pub fn options(&self) -> QueueOptions {
        self.options
    }

    /// Spawn the workers under a child of `parent`. Fails when already
    /// running.
    pub fn start(&self, parent: CancellationToken) -> Result<(), QueueError> {
        let mut runtime = self.runtime.lock().expect("queue runtime mutex poisoned");
        if runtime.running {
            return Err(QueueError::AlreadyRunning);
        }
        let cancel = parent.child_token();
        for _ in 0..self.options.workers {
            runtime.workers.push(tokio::spawn(run_worker(
                self.handler.clone(),
                self.options,
                self.output.clone(),
                cancel.clone(),
            )));
        }
        runtime.cancel = Some(cancel);
        runtime.running = true;
        Ok(())
    }

    /// Cancel the workers and wait for them to exit. Idempotent.
    pub async fn stop(&self) {
        let (cancel, workers) = {
            let mut runtime = self.runtime.lock().expect("queue runtime mutex poisoned");
            if !runtime.running {
                return;
            }
            runtime.running = false;
            (runtime.cancel.take(), std::mem::take(&mut runtime.workers))
        };
        if let Some(cancel) = cancel {
            cancel.cancel();
        }
        for worker in workers {
            let _ = worker.await;
        }
    }

    /// Non-blocking send.
    pub fn enqueue(&self, message: InboundMessage) -> Result<(), QueueError> {
        {
            let runtime = self.runtime.lock().expect("queue runtime mutex poisoned");
            if !runtime.running {
                return Err(QueueError::NotRunning);
            }
        }
        match self.input.try_send(message) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(QueueError::Full),
            Err(TrySendError::Closed(_)) => Err(QueueError::NotRunning),
        }
    }
}

async fn run_worker(
    handler: InboundHandler,
    options: QueueOptions,
    input: Arc<tokio::sync::Mutex<mpsc::Receiver<InboundMessage>>>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return,
            received = async { input.lock().await.recv().await } => {
                match received {
                    Some(message) => message,
                    None => return,
                }
            }
        };
        handle_with_retry(&handler, options, message, &cancel).await;
    }
}

async fn handle_with_retry(
    handler: &InboundHandler,
    options: QueueOptions,
    message: InboundMessage,
    cancel: &CancellationToken,
) {
    for attempt in 0..=options.max_retries {
        match handler(cancel.clone(), message.clone()).await {
            Ok(()) => return,
            Err(error) => {
                if attempt == options.max_retries {
                    warn!(
                        id = %message.id,
                        attempts = attempt + 1,
                        error = %error,
                        "dropping inbound message after final attempt"
                    );
                    return;
                }
                warn!(
                    id = %message.id,
                    attempt = attempt + 1,
                    error = %error,
                    "inbound handler failed, retrying"
                );
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(options.retry_delay) => {}
        }
    }
}
