//! [`ConversationHandler`]: the engine as a chain [`Handler`].
//!
//! In queued mode each user's events go through a per-user FIFO queue consumed by one worker
//! task, so a user's events are applied and answered in arrival order while different users
//! proceed in parallel. A worker that sees no event for the idle timeout removes its queue and
//! exits; the next event starts a fresh one. Inline mode runs the engine in the caller and hands
//! the intents back as [`HandlerResponse::Reply`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use classbot_core::{Bot, Handler, HandlerResponse, InboundEvent, Result, UserId};
use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument};

use crate::engine::ConversationEngine;

/// Default time a user's worker waits for the next event before exiting.
pub const DEFAULT_QUEUE_IDLE: Duration = Duration::from_secs(600);

/// Sender to a user's processing queue, tagged with the worker that owns it.
#[derive(Clone)]
struct QueueEntry {
    worker: u64,
    tx: mpsc::UnboundedSender<InboundEvent>,
}

type Queues = Arc<DashMap<UserId, QueueEntry>>;

struct Worker {
    id: u64,
    user_id: UserId,
    engine: Arc<ConversationEngine>,
    bot: Arc<dyn Bot>,
    queues: Queues,
    idle_timeout: Duration,
}

enum Delivery {
    Queued {
        bot: Arc<dyn Bot>,
        queues: Queues,
        idle_timeout: Duration,
        next_worker: AtomicU64,
    },
    Inline,
}

pub struct ConversationHandler {
    engine: Arc<ConversationEngine>,
    delivery: Delivery,
}

impl ConversationHandler {
    /// Events are queued per user; intents are delivered through `bot` by the user's worker.
    pub fn queued(engine: Arc<ConversationEngine>, bot: Arc<dyn Bot>) -> Self {
        Self {
            engine,
            delivery: Delivery::Queued {
                bot,
                queues: Arc::new(DashMap::new()),
                idle_timeout: DEFAULT_QUEUE_IDLE,
                next_worker: AtomicU64::new(0),
            },
        }
    }

    /// Events are handled in the caller; intents come back as `Reply`.
    pub fn inline(engine: Arc<ConversationEngine>) -> Self {
        Self {
            engine,
            delivery: Delivery::Inline,
        }
    }

    /// Sets how long an idle user's worker lingers (queued mode only).
    pub fn with_queue_idle_timeout(mut self, idle: Duration) -> Self {
        if let Delivery::Queued { idle_timeout, .. } = &mut self.delivery {
            *idle_timeout = idle;
        }
        self
    }

    /// Number of users that currently have a queue worker.
    pub fn active_queues(&self) -> usize {
        match &self.delivery {
            Delivery::Queued { queues, .. } => queues.len(),
            Delivery::Inline => 0,
        }
    }

    fn spawn_worker(
        &self,
        bot: &Arc<dyn Bot>,
        queues: &Queues,
        idle_timeout: Duration,
        id: u64,
        user_id: UserId,
    ) -> QueueEntry {
        let (tx, rx) = mpsc::unbounded_channel::<InboundEvent>();
        let worker = Worker {
            id,
            user_id,
            engine: self.engine.clone(),
            bot: bot.clone(),
            queues: queues.clone(),
            idle_timeout,
        };
        tokio::spawn(worker.run(rx));
        QueueEntry { worker: id, tx }
    }

    /// Hands the event to the user's worker, starting one if needed. A worker that retired
    /// between the lookup and the send is replaced once.
    fn enqueue(
        &self,
        bot: &Arc<dyn Bot>,
        queues: &Queues,
        idle_timeout: Duration,
        next_worker: &AtomicU64,
        event: &InboundEvent,
    ) {
        let user_id = event.user_id();
        let mut event = event.clone();
        for _ in 0..2 {
            let entry = queues
                .entry(user_id)
                .or_insert_with(|| {
                    let id = next_worker.fetch_add(1, Ordering::Relaxed);
                    self.spawn_worker(bot, queues, idle_timeout, id, user_id)
                })
                .clone();
            match entry.tx.send(event) {
                Ok(()) => return,
                Err(mpsc::error::SendError(returned)) => {
                    queues.remove_if(&user_id, |_, current| current.worker == entry.worker);
                    event = returned;
                }
            }
        }
        error!(user_id, "Failed to send event to queue (receiver dropped)");
    }
}

impl Worker {
    /// Consumes one user's queue: one transition at a time, then delivery of its intents.
    async fn run(self, mut rx: mpsc::UnboundedReceiver<InboundEvent>) {
        loop {
            match tokio::time::timeout(self.idle_timeout, rx.recv()).await {
                Ok(Some(event)) => self.process(event).await,
                Ok(None) => break,
                Err(_) => {
                    self.queues
                        .remove_if(&self.user_id, |_, entry| entry.worker == self.id);
                    rx.close();
                    // Events that slipped in before the close are still ours.
                    while let Some(event) = rx.recv().await {
                        self.process(event).await;
                    }
                    debug!(user_id = self.user_id, "Queue worker idle, exiting");
                    break;
                }
            }
        }
    }

    async fn process(&self, event: InboundEvent) {
        let user_id = self.user_id;
        info!(user_id, event_id = %event.id, "Processing queued event");
        let intents = self.engine.handle_event(&event).await;
        for intent in &intents {
            let failed = self.bot.deliver_each(intent).await;
            if failed > 0 {
                error!(
                    user_id,
                    failed,
                    targets = intent.targets.len(),
                    "Failed to deliver intent"
                );
            }
        }
    }
}

#[async_trait]
impl Handler for ConversationHandler {
    #[instrument(skip(self, event), fields(user_id = event.user_id()))]
    async fn handle(&self, event: &InboundEvent) -> Result<HandlerResponse> {
        match &self.delivery {
            Delivery::Inline => {
                let intents = self.engine.handle_event(event).await;
                Ok(HandlerResponse::Reply(intents))
            }
            Delivery::Queued {
                bot,
                queues,
                idle_timeout,
                next_worker,
            } => {
                self.enqueue(bot, queues, *idle_timeout, next_worker, event);
                Ok(HandlerResponse::Stop)
            }
        }
    }
}
