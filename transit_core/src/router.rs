//! Command router and the public runtime surface.
//!
//! The router owns the only shared structure in the system: the address
//! table mapping each [`Address`] to its entity's [`Mailbox`]. Everything
//! else is per-entity state reached through message passing.

use crate::config::RuntimeConfig;
use crate::entities::{AgencyEntity, CountryEntity, StateEntity, VehicleEntity};
use crate::error::EntityError;
use crate::model::AgencyInfo;
use crate::runtime::{
    process, Downlink, Entity, EntityContext, Envelope, Inflight, LinkSink, Mailbox, Outgoing,
    SlotEvent,
};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use transit_env::{Address, EntityKind, EnvError, LinkId, TransitContext};

struct Router<C: TransitContext> {
    context: Arc<C>,
    config: Arc<RuntimeConfig>,
    inflight: Arc<Inflight>,
    entities: Mutex<HashMap<Address, Mailbox>>,
    stopped: AtomicBool,
}

impl<C: TransitContext> Router<C> {
    fn table(&self) -> MutexGuard<'_, HashMap<Address, Mailbox>> {
        self.entities.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_running(&self) -> Result<(), EntityError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(EnvError::ContextError("runtime is shut down".into()).into());
        }
        Ok(())
    }

    /// Mailbox of an existing entity, never creating one.
    fn lookup(&self, address: &Address) -> Result<Mailbox, EntityError> {
        self.ensure_running()?;
        self.table()
            .get(address)
            .cloned()
            .ok_or_else(|| EntityError::UnknownAddress(address.clone()))
    }

    /// Mailbox of an existing entity. Vehicles are created on first reference.
    fn resolve(self: &Arc<Self>, address: &Address) -> Result<Mailbox, EntityError> {
        self.ensure_running()?;
        let mut table = self.table();
        if let Some(mailbox) = table.get(address) {
            return Ok(mailbox.clone());
        }
        if !address.kind().is_upsert() {
            return Err(EntityError::UnknownAddress(address.clone()));
        }
        Ok(self.instantiate(&mut table, address))
    }

    /// Mailbox for `address`, creating the entity of any kind if absent.
    fn get_or_create(self: &Arc<Self>, address: &Address) -> Result<Mailbox, EntityError> {
        self.ensure_running()?;
        let mut table = self.table();
        if let Some(mailbox) = table.get(address) {
            return Ok(mailbox.clone());
        }
        Ok(self.instantiate(&mut table, address))
    }

    fn instantiate(
        self: &Arc<Self>,
        table: &mut HashMap<Address, Mailbox>,
        address: &Address,
    ) -> Mailbox {
        let mailbox = match address.kind() {
            EntityKind::Vehicle => self.start(address, VehicleEntity::new(address.clone(), &self.config)),
            EntityKind::Agency => self.start(address, AgencyEntity::new(address.clone())),
            EntityKind::State => self.start(address, StateEntity::new(address.clone())),
            EntityKind::Country => self.start(address, CountryEntity::new(address.clone())),
        };
        table.insert(address.clone(), mailbox.clone());
        debug!(%address, entities = table.len(), "entity started");
        mailbox
    }

    fn start<E: Entity>(self: &Arc<Self>, address: &Address, entity: E) -> Mailbox {
        let (tx, rx) = mpsc::unbounded_channel();
        let mailbox = Mailbox::new(address.clone(), tx, self.inflight.clone());
        let task = EntityTask {
            entity,
            address: address.clone(),
            mailbox: mailbox.clone(),
            rx,
            router: Arc::downgrade(self),
            context: self.context.clone(),
            config: self.config.clone(),
            inflight: self.inflight.clone(),
        };
        self.context.spawn(&address.to_string(), task.run());
        mailbox
    }

    fn command(self: &Arc<Self>, target: &Address, name: &str, payload: Value) -> Result<(), EntityError> {
        let mailbox = self.resolve(target)?;
        mailbox.deliver(Envelope::Command {
            name: name.to_string(),
            payload,
            received_ms: self.context.epoch_millis(),
        })?;
        Ok(())
    }

    /// Applies the side effects an entity queued while handling one envelope.
    fn flush(self: &Arc<Self>, from: &Mailbox, outbox: Vec<Outgoing>) {
        for outgoing in outbox {
            let result = match outgoing {
                Outgoing::Command { target, name, payload } => {
                    trace!(from = %from.address(), to = %target, command = %name, "forward");
                    self.command(&target, &name, payload)
                }
                Outgoing::Open { target, slot, link } => self.resolve(&target).and_then(|mailbox| {
                    let downlink = Downlink::new(link, LinkSink::Entity(from.clone()));
                    Ok(mailbox.deliver(Envelope::Subscribe { slot, downlink })?)
                }),
                Outgoing::Close { target, slot, link } => self.resolve(&target).and_then(|mailbox| {
                    Ok(mailbox.deliver(Envelope::Unsubscribe { slot, link })?)
                }),
            };
            if let Err(err) = result {
                warn!(from = %from.address(), error = %err, "outgoing message dropped");
            }
        }
    }

    fn stop_all(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let mailboxes: Vec<Mailbox> = self.table().drain().map(|(_, mailbox)| mailbox).collect();
        info!(entities = mailboxes.len(), "stopping entities");
        for mailbox in mailboxes {
            // Already-finished tasks have nothing to stop
            let _ = mailbox.deliver(Envelope::Stop);
        }
    }
}

/// One entity's task: drains its mailbox one envelope at a time.
struct EntityTask<E, C: TransitContext> {
    entity: E,
    address: Address,
    mailbox: Mailbox,
    rx: mpsc::UnboundedReceiver<Envelope>,
    router: Weak<Router<C>>,
    context: Arc<C>,
    config: Arc<RuntimeConfig>,
    inflight: Arc<Inflight>,
}

impl<E: Entity, C: TransitContext> EntityTask<E, C> {
    async fn run(mut self) {
        while let Some(envelope) = self.rx.recv().await {
            if let Envelope::Stop = envelope {
                self.inflight.finish();
                break;
            }

            let now_ms = match &envelope {
                Envelope::Command { received_ms, .. } => *received_ms,
                _ => self.context.epoch_millis(),
            };
            let mut ctx = EntityContext::new(&self.address, now_ms, &self.config);
            process(&mut self.entity, &mut ctx, envelope);
            let outbox = ctx.into_outbox();

            // Flushed before finish() so settle() never observes a gap
            if !outbox.is_empty() {
                if let Some(router) = self.router.upgrade() {
                    router.flush(&self.mailbox, outbox);
                }
            }
            self.inflight.finish();
        }

        self.rx.close();
        while let Some(_dropped) = self.rx.recv().await {
            self.inflight.finish();
        }
        debug!(address = %self.address, "entity stopped");
    }
}

/// Handle to a running entity tree.
///
/// Generic over the environment so the same runtime runs against tokio
/// or against a virtual clock.
pub struct Runtime<C: TransitContext> {
    router: Arc<Router<C>>,
}

impl<C: TransitContext> Runtime<C> {
    pub fn new(context: Arc<C>, config: RuntimeConfig) -> Self {
        info!(
            seed = context.seed(),
            window = config.window_capacity,
            max_children = config.max_children,
            "runtime starting"
        );
        Self {
            router: Arc::new(Router {
                context,
                config: Arc::new(config),
                inflight: Arc::new(Inflight::new()),
                entities: Mutex::new(HashMap::new()),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.router.config
    }

    /// Fire-and-forget command. Failures are logged and the command dropped.
    pub fn dispatch(&self, address: &str, command: &str, payload: Value) {
        let target: Address = match address.parse() {
            Ok(target) => target,
            Err(err) => {
                warn!(address, command, error = %err, "unroutable address; dropped");
                return;
            }
        };
        if let Err(err) = self.dispatch_to(&target, command, payload) {
            warn!(address = %target, command, error = %err, "command dropped");
        }
    }

    /// Sends a command to an already-parsed address.
    pub fn dispatch_to(&self, address: &Address, command: &str, payload: Value) -> Result<(), EntityError> {
        self.router.command(address, command, payload)
    }

    /// Instantiates an agency (and its state and country if absent) and
    /// hands it its identity.
    pub fn seed_agency(&self, agency: AgencyInfo) -> Result<(), EntityError> {
        let address = agency.address();
        let state = Address::state(&agency.country, &agency.state);
        let country = Address::country(&agency.country);
        for entity in [&country, &state, &address] {
            self.router.get_or_create(entity)?;
        }
        let payload = serde_json::to_value(&agency)?;
        self.dispatch_to(&address, "setInfo", payload)
    }

    /// Current value of one slot, or `None` if the entity or slot is unknown
    /// or the slot is unset.
    pub async fn read(&self, address: &Address, slot: &str) -> Option<Value> {
        let mailbox = self.router.table().get(address).cloned()?;
        let (reply, rx) = oneshot::channel();
        mailbox
            .deliver(Envelope::Read {
                slot: slot.to_string(),
                reply,
            })
            .ok()?;
        rx.await.ok().flatten()
    }

    /// Streams every change of one slot, starting with its current value.
    ///
    /// The stream ends when the entity stops or does not declare `slot`.
    /// Observing an address with no entity fails with `UnknownAddress`.
    pub fn observe(
        &self,
        address: &Address,
        slot: &str,
    ) -> Result<mpsc::UnboundedReceiver<SlotEvent>, EntityError> {
        let mailbox = self.router.lookup(address)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let downlink = Downlink::new(LinkId::new(), LinkSink::Observer(tx));
        mailbox.deliver(Envelope::Subscribe {
            slot: slot.to_string(),
            downlink,
        })?;
        Ok(rx)
    }

    /// Resolves once every delivered envelope, and everything it caused,
    /// has been processed.
    pub async fn settle(&self) {
        self.router.inflight.settled().await;
    }

    pub fn entity_count(&self) -> usize {
        self.router.table().len()
    }

    /// Stops every entity and waits for their mailboxes to drain.
    pub async fn shutdown(&self) {
        self.router.stop_all();
        self.settle().await;
    }
}

impl<C: TransitContext> Drop for Runtime<C> {
    fn drop(&mut self) {
        self.router.stop_all();
    }
}
