//! Entity Actor Runtime.
//!
//! # Architecture
//!
//! ```text
//!  Router ──Command──►┌──────────── Entity task ────────────┐
//!                     │ mailbox (mpsc, FIFO)                │
//!  Slot  ───Link────► │   └─► process() one envelope        │
//!                     │        ├─ command table lookup      │
//!  Router ─Subscribe─►│        ├─ slot table lookup         │
//!                     │        └─ outbox: commands, links   │
//!                     └──────────────┬──────────────────────┘
//!                                    └─► Router::flush()
//! ```
//!
//! Every entity kind declares two static tables: commands (name → handler)
//! and slots (name → accessor). The runtime serves `Subscribe`/`Read`
//! generically from the slot table, so entity code only deals with its own
//! typed fields. Handlers never touch another entity; anything addressed
//! outward is queued in the [`EntityContext`] outbox and flushed by the
//! router after the handler returns.

mod mailbox;
mod slot;

pub use mailbox::{Envelope, Inflight, Mailbox};
pub use slot::{Downlink, LinkSink, MapSlot, SlotEvent, SlotHandle, ValueSlot};

use crate::config::RuntimeConfig;
use crate::error::EntityError;
use serde::Serialize;
use serde_json::Value;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, error, warn};
use transit_env::{Address, EntityKind, LinkId};

/// Signature of a command handler in an entity's command table.
pub type CommandHandler<E> = fn(&mut E, &mut EntityContext<'_>, Value) -> Result<(), EntityError>;

/// Signature of a slot accessor in an entity's slot table.
pub type SlotAccessor<E> = fn(&mut E) -> &mut dyn SlotHandle;

/// One row of a command table.
pub struct CommandEntry<E> {
    pub name: &'static str,
    pub handler: CommandHandler<E>,
}

/// One row of a slot table.
pub struct SlotEntry<E> {
    pub name: &'static str,
    pub access: SlotAccessor<E>,
}

/// An addressable, single-threaded unit of state and behavior.
pub trait Entity: Sized + Send + 'static {
    const KIND: EntityKind;

    /// Static command table. Names not listed here are no-ops.
    fn commands() -> &'static [CommandEntry<Self>];

    /// Static slot table (slot name → accessor).
    fn slots() -> &'static [SlotEntry<Self>];

    /// Handles a delivery on a link this entity opened.
    fn on_link(
        &mut self,
        _ctx: &mut EntityContext<'_>,
        link: LinkId,
        _event: SlotEvent,
    ) -> Result<(), EntityError> {
        debug!(%link, kind = %Self::KIND, "link event for entity without lanes");
        Ok(())
    }
}

/// Side effect requested by a handler, applied after it returns.
#[derive(Debug, Clone, PartialEq)]
pub enum Outgoing {
    /// Fire-and-forget command to another entity
    Command {
        target: Address,
        name: String,
        payload: Value,
    },

    /// Open a link from `target`'s slot to this entity
    Open {
        target: Address,
        slot: String,
        link: LinkId,
    },

    /// Close a previously opened link
    Close {
        target: Address,
        slot: String,
        link: LinkId,
    },
}

/// Per-envelope view of the world handed to entity code.
pub struct EntityContext<'a> {
    address: &'a Address,
    now_ms: i64,
    config: &'a RuntimeConfig,
    outbox: Vec<Outgoing>,
}

impl<'a> EntityContext<'a> {
    pub fn new(address: &'a Address, now_ms: i64, config: &'a RuntimeConfig) -> Self {
        Self {
            address,
            now_ms,
            config,
            outbox: Vec::new(),
        }
    }

    pub fn address(&self) -> &Address {
        self.address
    }

    /// Ingestion time of the current command (or processing time for links).
    pub fn now_ms(&self) -> i64 {
        self.now_ms
    }

    pub fn config(&self) -> &RuntimeConfig {
        self.config
    }

    /// Queues a command to another entity.
    pub fn command<P: Serialize>(
        &mut self,
        target: Address,
        name: &str,
        payload: &P,
    ) -> Result<(), EntityError> {
        let payload = serde_json::to_value(payload)?;
        self.outbox.push(Outgoing::Command {
            target,
            name: name.to_string(),
            payload,
        });
        Ok(())
    }

    /// Queues a link from `target`'s `slot` to this entity.
    pub fn open_link(&mut self, target: Address, slot: &str, link: LinkId) {
        self.outbox.push(Outgoing::Open {
            target,
            slot: slot.to_string(),
            link,
        });
    }

    /// Queues closing of a link previously opened with [`Self::open_link`].
    pub fn close_link(&mut self, target: Address, slot: &str, link: LinkId) {
        self.outbox.push(Outgoing::Close {
            target,
            slot: slot.to_string(),
            link,
        });
    }

    pub fn outbox(&self) -> &[Outgoing] {
        &self.outbox
    }

    pub fn into_outbox(self) -> Vec<Outgoing> {
        self.outbox
    }
}

fn find_slot<E: Entity>(name: &str) -> Option<&'static SlotEntry<E>> {
    E::slots().iter().find(|entry| entry.name == name)
}

/// Runs entity code, turning both errors and panics into log lines.
fn guarded(address: &Address, what: &str, f: impl FnOnce() -> Result<(), EntityError>) {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(%address, what, error = %err, "dropped"),
        Err(_) => error!(%address, what, "handler panicked; dropped"),
    }
}

/// Processes a single envelope against an entity.
///
/// `Stop` is handled by the caller; here it is a no-op.
pub fn process<E: Entity>(entity: &mut E, ctx: &mut EntityContext<'_>, envelope: Envelope) {
    let address = ctx.address().clone();
    match envelope {
        Envelope::Command { name, payload, .. } => {
            match E::commands().iter().find(|entry| entry.name == name) {
                Some(entry) => guarded(&address, &name, || (entry.handler)(entity, ctx, payload)),
                None => debug!(%address, command = %name, "unknown command; ignored"),
            }
        }
        Envelope::Link { link, event } => {
            guarded(&address, "link", || entity.on_link(ctx, link, event));
        }
        Envelope::Subscribe { slot, downlink } => match find_slot::<E>(&slot) {
            Some(entry) => (entry.access)(entity).attach(downlink),
            None => {
                let err = EntityError::UnknownSlot { address, slot };
                warn!(error = %err, "subscribe ignored");
            }
        },
        Envelope::Unsubscribe { slot, link } => {
            if let Some(entry) = find_slot::<E>(&slot) {
                (entry.access)(entity).detach(link);
            }
        }
        Envelope::Read { slot, reply } => {
            let value = find_slot::<E>(&slot).and_then(|entry| (entry.access)(entity).snapshot());
            // A dropped reader is fine
            let _ = reply.send(value);
        }
        Envelope::Stop => {}
    }
}
