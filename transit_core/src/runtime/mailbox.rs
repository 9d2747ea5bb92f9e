//! Mailboxes, envelopes and in-flight accounting.

use super::slot::{Downlink, SlotEvent};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Notify};
use transit_env::{Address, EnvError, LinkId};

/// Everything an entity's mailbox can carry.
#[derive(Debug)]
pub enum Envelope {
    /// A named command with its payload, stamped with the ingestion time
    Command {
        name: String,
        payload: Value,
        received_ms: i64,
    },

    /// A delivery on a subscription this entity opened
    Link { link: LinkId, event: SlotEvent },

    /// Attach a downlink to one of this entity's slots
    Subscribe { slot: String, downlink: Downlink },

    /// Detach a downlink from one of this entity's slots
    Unsubscribe { slot: String, link: LinkId },

    /// Answer the current value of a slot
    Read {
        slot: String,
        reply: oneshot::Sender<Option<Value>>,
    },

    /// Stop the entity task
    Stop,
}

/// Counts envelopes that have been delivered but not yet processed.
///
/// Increments happen before the send, decrements after the receiving entity
/// has flushed its outbox, so the count reaches zero only when the whole
/// tree is quiet.
#[derive(Debug, Default)]
pub struct Inflight {
    pending: AtomicUsize,
    idle: Notify,
}

impl Inflight {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    pub(crate) fn begin(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    /// Resolves once no envelope is in flight.
    pub async fn settled(&self) {
        loop {
            // Registered before the check so a concurrent finish() is not missed
            let notified = self.idle.notified();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Sending half of an entity's mailbox.
#[derive(Debug, Clone)]
pub struct Mailbox {
    address: Address,
    tx: mpsc::UnboundedSender<Envelope>,
    inflight: Arc<Inflight>,
}

impl Mailbox {
    pub(crate) fn new(
        address: Address,
        tx: mpsc::UnboundedSender<Envelope>,
        inflight: Arc<Inflight>,
    ) -> Self {
        Self {
            address,
            tx,
            inflight,
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Queues an envelope, counting it as in flight until processed.
    pub fn deliver(&self, envelope: Envelope) -> Result<(), EnvError> {
        self.inflight.begin();
        if self.tx.send(envelope).is_err() {
            self.inflight.finish();
            return Err(EnvError::closed(&self.address));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
