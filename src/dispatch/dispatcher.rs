use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use super::policy::ContentPolicy;
use super::sink::DeliverySink;
use crate::extract::OutboundMessage;
use crate::utils::formatting::truncate_string;

const SUPPRESSED_PREVIEW_CHARS: usize = 40;

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Webhook answered with HTTP {0}")]
    Status(u16),

    #[error("Dispatcher is closed")]
    Closed,

    #[error("Dispatch queue is full")]
    Full,
}

/// Renders a message as Discord markdown.
///
/// The channel line is left out when the packet carried no channel.
pub fn format_content(message: &OutboundMessage) -> String {
    let mut content = format!("**{}#{}**\n", message.nickname, message.profile_code);
    if let Some(channel) = &message.channel {
        content.push_str(&format!("> 頻道: {}\n", channel));
    }
    content.push_str(&format!("> {}\n", message.text));
    content
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Running,
    Closing,
    Stopped,
}

/// What the worker did with the messages it dequeued.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub delivered: u64,
    pub suppressed: u64,
    pub failed: u64,
}

impl WorkerStats {
    pub fn handled(&self) -> u64 {
        self.delivered + self.suppressed + self.failed
    }
}

/// Producer handle onto the dispatch queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct MessageSender {
    tx: mpsc::Sender<OutboundMessage>,
}

impl MessageSender {
    /// Waits for room in the queue.
    pub async fn enqueue(&self, message: OutboundMessage) -> Result<(), DispatchError> {
        self.tx.send(message).await.map_err(|_| DispatchError::Closed)
    }

    /// Blocks the calling thread until there is room. Must not be called from
    /// inside the async runtime.
    pub fn blocking_enqueue(&self, message: OutboundMessage) -> Result<(), DispatchError> {
        self.tx.blocking_send(message).map_err(|_| DispatchError::Closed)
    }

    pub fn try_enqueue(&self, message: OutboundMessage) -> Result<(), DispatchError> {
        self.tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => DispatchError::Full,
            TrySendError::Closed(_) => DispatchError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Bounded FIFO queue drained by a single delivery task.
pub struct Dispatcher {
    sender: MessageSender,
    lifecycle: watch::Sender<Lifecycle>,
    worker: JoinHandle<WorkerStats>,
}

impl Dispatcher {
    /// Starts the worker on the current tokio runtime.
    pub fn spawn<S, P>(sink: S, policy: P, capacity: usize) -> Self
    where
        S: DeliverySink,
        P: ContentPolicy + Send + Sync + 'static,
    {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let (lifecycle, watcher) = watch::channel(Lifecycle::Running);

        info!("Dispatcher started (queue capacity {})", capacity);
        let worker = tokio::spawn(run_worker(rx, watcher, sink, policy));

        Self {
            sender: MessageSender { tx },
            lifecycle,
            worker,
        }
    }

    pub fn sender(&self) -> MessageSender {
        self.sender.clone()
    }

    /// Tells the worker to exit after the delivery in progress. Queued
    /// messages are discarded.
    pub fn stop(&self) {
        self.lifecycle.send_replace(Lifecycle::Stopped);
    }

    /// Stops accepting messages, delivers what is already queued and waits
    /// for the worker. A prior [`stop`](Self::stop) still wins.
    pub async fn close(self) -> WorkerStats {
        let Dispatcher {
            sender,
            lifecycle,
            worker,
        } = self;

        lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Running {
                *state = Lifecycle::Closing;
                true
            } else {
                false
            }
        });
        drop(sender);

        let stats = worker.await.unwrap_or_else(|e| {
            warn!("Dispatch worker ended abnormally: {}", e);
            WorkerStats::default()
        });
        drop(lifecycle);
        stats
    }
}

async fn run_worker<S, P>(
    mut rx: mpsc::Receiver<OutboundMessage>,
    mut lifecycle: watch::Receiver<Lifecycle>,
    sink: S,
    policy: P,
) -> WorkerStats
where
    S: DeliverySink,
    P: ContentPolicy,
{
    let mut stats = WorkerStats::default();
    let mut watching = true;

    loop {
        tokio::select! {
            biased;

            changed = lifecycle.changed(), if watching => {
                if changed.is_err() {
                    // handle dropped without close(): drain and exit
                    watching = false;
                    rx.close();
                    continue;
                }
                let state = *lifecycle.borrow_and_update();
                match state {
                    Lifecycle::Running => {}
                    Lifecycle::Closing => {
                        debug!("Dispatcher closing, draining queued messages");
                        rx.close();
                    }
                    Lifecycle::Stopped => {
                        info!("Dispatcher stopped");
                        break;
                    }
                }
            }

            next = rx.recv() => match next {
                Some(message) => deliver_one(&sink, &policy, message, &mut stats).await,
                None => break,
            },
        }
    }

    info!(
        "Dispatcher finished: {} delivered, {} suppressed, {} failed",
        stats.delivered, stats.suppressed, stats.failed
    );
    stats
}

async fn deliver_one<S, P>(sink: &S, policy: &P, message: OutboundMessage, stats: &mut WorkerStats)
where
    S: DeliverySink,
    P: ContentPolicy,
{
    let content = format_content(&message);
    if !policy.allows(&content) {
        debug!(
            "Suppressed message from {}: {}",
            message.nickname,
            truncate_string(&message.text, SUPPRESSED_PREVIEW_CHARS)
        );
        stats.suppressed += 1;
        return;
    }

    match sink.deliver(content).await {
        Ok(()) => {
            debug!("Delivered message from {}#{}", message.nickname, message.profile_code);
            stats.delivered += 1;
        }
        Err(e) => {
            warn!("Failed to deliver message from {}: {}", message.nickname, e);
            stats.failed += 1;
        }
    }
}
