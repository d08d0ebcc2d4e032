//! Generic actor runtime
//!
//! Every actor is one tokio task owning its behaviour and the receiving end
//! of a bounded mailbox. A shared semaphore acts as the worker pool: a task
//! must hold a permit while it drains a batch of messages, so at most
//! `workers` actors are processing at any instant, without an OS thread per
//! actor.
//!
//! ```text
//!  tell(id, msg) ──→ registry ──→ Mailbox (bounded mpsc) ──→ actor task
//!                                                               │
//!                                            acquire permit ◄───┘
//!                                            process ≤ batch_size msgs
//!                                            release permit, yield
//! ```
//!
//! ## Guarantees
//!
//! - Messages to one actor are processed in the order their `tell` calls
//!   completed, and never concurrently with each other.
//! - An error or panic while processing one message is logged with the actor
//!   id and message id; the actor moves on to the next message.
//! - No ordering across actors.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex as StdMutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, trace, warn};

use super::mailbox::{Envelope, Mailbox};
use crate::config::ActorSystemConfig;
use crate::error::{EngineError, EngineResult};

/// Something that can travel through a mailbox
pub trait ActorMessage: Send + 'static {
    /// Short name for logs
    fn kind(&self) -> &'static str;

    /// Identity of the carried work item, if it has one
    fn message_id(&self) -> Option<String> {
        None
    }

    /// Called for messages discarded because their actor stopped
    fn on_actor_stopped(self, actor_id: &str)
    where
        Self: Sized,
    {
        warn!("actor {actor_id} stopped, discarding {} message", self.kind());
    }
}

/// Behaviour bound to an actor id
#[async_trait]
pub trait Actor<M: ActorMessage>: Send + 'static {
    /// Runs once inside the actor task, before the first message
    async fn init(&mut self, _ctx: &ActorContext<M>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn process(&mut self, msg: M, ctx: &ActorContext<M>) -> anyhow::Result<()>;

    /// Runs once after the last message
    async fn destroy(&mut self, _ctx: &ActorContext<M>) {}
}

struct ActorRef<M> {
    mailbox: Mailbox<M>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

struct SystemInner<M> {
    actors: RwLock<HashMap<String, ActorRef<M>>>,
    workers: Arc<Semaphore>,
    config: ActorSystemConfig,
    stopped: AtomicBool,
}

/// Registry of running actors plus the shared worker pool
pub struct ActorSystem<M> {
    inner: Arc<SystemInner<M>>,
}

impl<M> Clone for ActorSystem<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: ActorMessage> ActorSystem<M> {
    pub fn new(config: ActorSystemConfig) -> Self {
        info!(
            "starting actor system ({} workers, mailbox capacity {}, {:?} on overflow)",
            config.workers, config.mailbox_capacity, config.overflow
        );
        Self {
            inner: Arc::new(SystemInner {
                actors: RwLock::new(HashMap::new()),
                workers: Arc::new(Semaphore::new(config.workers.max(1))),
                config,
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &ActorSystemConfig {
        &self.inner.config
    }

    /// Register `behaviour` under `id` and start its task
    pub async fn create_actor<A>(&self, id: impl Into<String>, behaviour: A) -> EngineResult<()>
    where
        A: Actor<M>,
    {
        let id = id.into();
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(EngineError::SystemStopped);
        }

        let mut actors = self.inner.actors.write().await;
        if actors.contains_key(&id) {
            return Err(EngineError::DuplicateActor(id));
        }

        let config = &self.inner.config;
        let (mailbox, receiver) = Mailbox::channel(&id, config.mailbox_capacity, config.overflow);
        let (stop_tx, stop_rx) = watch::channel(false);

        let ctx = ActorContext {
            actor_id: id.clone(),
            system: self.clone(),
            mailbox: mailbox.clone(),
            stop_rx,
            worker: StdMutex::new(None),
        };

        let task = tokio::spawn(run_actor(behaviour, receiver, ctx, config.batch_size.max(1)));

        actors.insert(
            id.clone(),
            ActorRef {
                mailbox,
                stop_tx,
                task,
            },
        );
        debug!("created actor {id}");

        Ok(())
    }

    /// Enqueue `msg` for actor `id`
    pub async fn tell(&self, id: &str, msg: M) -> EngineResult<()> {
        self.mailbox(id).await?.push(msg).await
    }

    async fn mailbox(&self, id: &str) -> EngineResult<Mailbox<M>> {
        let actors = self.inner.actors.read().await;
        actors
            .get(id)
            .map(|actor| actor.mailbox.clone())
            .ok_or_else(|| EngineError::ActorNotFound(id.to_string()))
    }

    /// Stop actor `id` and wait until it is gone.
    ///
    /// Messages queued before this call are processed to completion; later
    /// ones are discarded and logged. Pending delayed messages are
    /// cancelled. Must not be awaited from inside the actor being destroyed.
    #[instrument(skip(self))]
    pub async fn destroy(&self, id: &str) -> EngineResult<()> {
        let actor = self
            .inner
            .actors
            .write()
            .await
            .remove(id)
            .ok_or_else(|| EngineError::ActorNotFound(id.to_string()))?;

        let _ = actor.stop_tx.send(true);
        if !actor.mailbox.push_stop().await {
            trace!("actor {id} already finished");
        }

        if let Err(e) = actor.task.await {
            error!("actor {id} task ended abnormally: {e}");
        }

        debug!("destroyed actor {id}");
        Ok(())
    }

    /// Destroy every actor; no new actors can be created afterwards
    pub async fn shutdown(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);

        let ids = self.actor_ids().await;
        info!("shutting down actor system ({} actors)", ids.len());

        let results = join_all(ids.iter().map(|id| self.destroy(id))).await;
        for (id, result) in ids.iter().zip(results) {
            if let Err(e) = result {
                debug!("actor {id} went away during shutdown: {e}");
            }
        }
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.inner.actors.read().await.contains_key(id)
    }

    pub async fn actor_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.actors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.inner.actors.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.actors.read().await.is_empty()
    }
}

/// What an actor sees of the system while processing
pub struct ActorContext<M> {
    actor_id: String,
    system: ActorSystem<M>,
    mailbox: Mailbox<M>,
    stop_rx: watch::Receiver<bool>,

    /// Worker permit held while a batch is being processed
    worker: StdMutex<Option<OwnedSemaphorePermit>>,
}

impl<M: ActorMessage> ActorContext<M> {
    pub fn self_id(&self) -> &str {
        &self.actor_id
    }

    pub fn system(&self) -> &ActorSystem<M> {
        &self.system
    }

    /// Enqueue `msg` for actor `id`.
    ///
    /// If the target mailbox is full and the policy is to block, the worker
    /// permit is given back while waiting, so other actors (including the
    /// target) can keep draining.
    pub async fn tell(&self, id: &str, msg: M) -> EngineResult<()> {
        let mailbox = self.system.mailbox(id).await?;

        let Some(msg) = mailbox.offer(msg)? else {
            return Ok(());
        };

        trace!("{} blocked on full mailbox of {id}", self.actor_id);
        let released = self.release_worker();
        let result = mailbox.push(msg).await;
        if released {
            self.acquire_worker().await;
        }
        result
    }

    /// Enqueue a message into this actor's own mailbox.
    ///
    /// Never waits: an actor cannot make room in its own full mailbox, so
    /// this fails with [`EngineError::MailboxFull`] instead.
    pub async fn tell_self(&self, msg: M) -> EngineResult<()> {
        match self.mailbox.offer(msg)? {
            None => Ok(()),
            Some(_) => Err(EngineError::MailboxFull(self.actor_id.clone())),
        }
    }

    /// Deliver `msg` to this actor after `delay`.
    ///
    /// Returns immediately. The delivery is dropped if the actor is stopped
    /// before the delay elapses.
    pub fn schedule_self(&self, msg: M, delay: Duration) -> JoinHandle<()> {
        let mailbox = self.mailbox.clone();
        let mut stop_rx = self.stop_rx.clone();

        tokio::spawn(async move {
            if *stop_rx.borrow() {
                msg.on_actor_stopped(mailbox.actor_id());
                return;
            }

            tokio::select! {
                biased;

                _ = stop_rx.changed() => {
                    trace!("delayed {} for {} cancelled", msg.kind(), mailbox.actor_id());
                }

                _ = tokio::time::sleep(delay) => {
                    if let Err(e) = mailbox.push(msg).await {
                        warn!("failed to redeliver to {}: {e}", mailbox.actor_id());
                    }
                }
            }
        })
    }

    fn hold_worker(&self, permit: OwnedSemaphorePermit) {
        if let Ok(mut slot) = self.worker.lock() {
            *slot = Some(permit);
        }
    }

    /// Give the worker permit back; returns whether one was held
    fn release_worker(&self) -> bool {
        self.worker
            .lock()
            .map(|mut slot| slot.take().is_some())
            .unwrap_or(false)
    }

    async fn acquire_worker(&self) {
        match Arc::clone(&self.system.inner.workers).acquire_owned().await {
            Ok(permit) => self.hold_worker(permit),
            Err(_) => warn!("worker pool closed while {} was waiting", self.actor_id),
        }
    }
}

async fn run_actor<M, A>(
    mut behaviour: A,
    mut receiver: mpsc::Receiver<Envelope<M>>,
    ctx: ActorContext<M>,
    batch_size: usize,
) where
    M: ActorMessage,
    A: Actor<M>,
{
    let actor_id = ctx.self_id().to_string();

    if let Err(e) = behaviour.init(&ctx).await {
        error!("actor {actor_id} failed to initialise: {e:#}");
    }

    'mailbox: while let Some(first) = receiver.recv().await {
        ctx.acquire_worker().await;

        let mut next = Some(first);
        let mut processed = 0;

        while let Some(envelope) = next.take() {
            match envelope {
                Envelope::Stop => {
                    ctx.release_worker();
                    break 'mailbox;
                }
                Envelope::Msg(msg) => dispatch(&actor_id, &mut behaviour, msg, &ctx).await,
            }

            processed += 1;
            if processed < batch_size {
                next = receiver.try_recv().ok();
            }
        }

        ctx.release_worker();
        tokio::task::yield_now().await;
    }

    receiver.close();
    let mut discarded = 0;
    while let Ok(envelope) = receiver.try_recv() {
        if let Envelope::Msg(msg) = envelope {
            msg.on_actor_stopped(&actor_id);
            discarded += 1;
        }
    }
    if discarded > 0 {
        warn!("actor {actor_id} discarded {discarded} messages on stop");
    }

    behaviour.destroy(&ctx).await;
    trace!("actor {actor_id} stopped");
}

async fn dispatch<M, A>(actor_id: &str, behaviour: &mut A, msg: M, ctx: &ActorContext<M>)
where
    M: ActorMessage,
    A: Actor<M>,
{
    let kind = msg.kind();
    let msg_id = msg.message_id().unwrap_or_else(|| "-".to_string());

    match AssertUnwindSafe(behaviour.process(msg, ctx)).catch_unwind().await {
        Ok(Ok(())) => trace!("actor {actor_id} processed {kind} {msg_id}"),
        Ok(Err(e)) => error!("actor {actor_id} failed to process {kind} {msg_id}: {e:#}"),
        Err(_) => error!("actor {actor_id} panicked while processing {kind} {msg_id}"),
    }
}
