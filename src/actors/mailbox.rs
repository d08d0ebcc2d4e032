//! Bounded per-actor mailbox
//!
//! Each actor owns the receiving half of a bounded `mpsc` channel. Anyone
//! holding a [`Mailbox`] can enqueue into it; what happens on a full queue is
//! decided by the [`OverflowPolicy`].

use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{EngineError, EngineResult};

/// What `tell` does when the target mailbox is full
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Wait until the actor makes room
    #[default]
    Block,

    /// Reject the new message with [`EngineError::MailboxFull`]
    DropNewest,
}

/// What travels through a mailbox
#[derive(Debug)]
pub(crate) enum Envelope<M> {
    Msg(M),

    /// Everything enqueued before this is still processed
    Stop,
}

/// Sending half of an actor's mailbox
pub struct Mailbox<M> {
    actor_id: String,
    sender: mpsc::Sender<Envelope<M>>,
    policy: OverflowPolicy,
}

impl<M> Clone for Mailbox<M> {
    fn clone(&self) -> Self {
        Self {
            actor_id: self.actor_id.clone(),
            sender: self.sender.clone(),
            policy: self.policy,
        }
    }
}

impl<M: Send + 'static> Mailbox<M> {
    pub(crate) fn channel(
        actor_id: &str,
        capacity: usize,
        policy: OverflowPolicy,
    ) -> (Self, mpsc::Receiver<Envelope<M>>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let mailbox = Self {
            actor_id: actor_id.to_string(),
            sender,
            policy,
        };
        (mailbox, receiver)
    }

    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Enqueue a message according to the overflow policy
    pub async fn push(&self, msg: M) -> EngineResult<()> {
        match self.policy {
            OverflowPolicy::Block => self
                .sender
                .send(Envelope::Msg(msg))
                .await
                .map_err(|_| EngineError::ActorNotFound(self.actor_id.clone())),

            OverflowPolicy::DropNewest => match self.sender.try_send(Envelope::Msg(msg)) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!("mailbox of {} is full, dropping message", self.actor_id);
                    Err(EngineError::MailboxFull(self.actor_id.clone()))
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    Err(EngineError::ActorNotFound(self.actor_id.clone()))
                }
            },
        }
    }

    /// Enqueue without waiting.
    ///
    /// Under [`OverflowPolicy::Block`] a full mailbox hands the message back
    /// so the caller can decide how to wait for room.
    pub(crate) fn offer(&self, msg: M) -> EngineResult<Option<M>> {
        match self.sender.try_send(Envelope::Msg(msg)) {
            Ok(()) => Ok(None),
            Err(mpsc::error::TrySendError::Full(Envelope::Msg(msg))) => match self.policy {
                OverflowPolicy::Block => Ok(Some(msg)),
                OverflowPolicy::DropNewest => {
                    warn!("mailbox of {} is full, dropping message", self.actor_id);
                    Err(EngineError::MailboxFull(self.actor_id.clone()))
                }
            },
            Err(mpsc::error::TrySendError::Full(Envelope::Stop)) => Ok(None),
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(EngineError::ActorNotFound(self.actor_id.clone()))
            }
        }
    }

    /// Ask the actor to stop after what is already queued.
    ///
    /// Always waits for room, regardless of the policy.
    pub(crate) async fn push_stop(&self) -> bool {
        self.sender.send(Envelope::Stop).await.is_ok()
    }

    /// Number of free slots left
    pub fn remaining_capacity(&self) -> usize {
        self.sender.capacity()
    }
}
