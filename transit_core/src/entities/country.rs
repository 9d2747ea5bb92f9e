//! Country entity: root of the tree, joins its states.

use crate::error::EntityError;
use crate::model::StateInfo;
use crate::runtime::{CommandEntry, Entity, EntityContext, MapSlot, SlotEntry, SlotEvent, SlotHandle};
use crate::topology::{ensure_child_of, register, ChildAggregates};
use serde_json::Value;
use tracing::{debug, info};
use transit_env::{Address, EntityKind, LinkId};

pub struct CountryEntity {
    address: Address,
    states: MapSlot<Address, StateInfo>,
    aggregates: ChildAggregates,
}

impl CountryEntity {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            states: MapSlot::new(),
            aggregates: ChildAggregates::new(),
        }
    }

    pub fn aggregates(&self) -> &ChildAggregates {
        &self.aggregates
    }

    /// `addState`: wires the state in. The country has no parent to notify.
    fn on_add_state(&mut self, ctx: &mut EntityContext<'_>, payload: Value) -> Result<(), EntityError> {
        let state: StateInfo = serde_json::from_value(payload)?;
        let child = state.address();
        ensure_child_of(&child, &self.address)?;

        let limit = ctx.config().max_children;
        if register(&mut self.states, child.clone(), state, &self.address, limit)? {
            info!(country = %self.address, state = %child, "state registered");
        }
        self.aggregates.join(&child, ctx);
        Ok(())
    }
}

fn states_slot(entity: &mut CountryEntity) -> &mut dyn SlotHandle {
    &mut entity.states
}

fn count_slot(entity: &mut CountryEntity) -> &mut dyn SlotHandle {
    &mut entity.aggregates.count
}

fn speed_slot(entity: &mut CountryEntity) -> &mut dyn SlotHandle {
    &mut entity.aggregates.speed
}

fn vehicles_slot(entity: &mut CountryEntity) -> &mut dyn SlotHandle {
    &mut entity.aggregates.vehicles
}

const COUNTRY_COMMANDS: &[CommandEntry<CountryEntity>] = &[CommandEntry {
    name: "addState",
    handler: CountryEntity::on_add_state,
}];

const COUNTRY_SLOTS: &[SlotEntry<CountryEntity>] = &[
    SlotEntry { name: "states", access: states_slot },
    SlotEntry { name: "count", access: count_slot },
    SlotEntry { name: "speed", access: speed_slot },
    SlotEntry { name: "vehicles", access: vehicles_slot },
];

impl Entity for CountryEntity {
    const KIND: EntityKind = EntityKind::Country;

    fn commands() -> &'static [CommandEntry<Self>] {
        COUNTRY_COMMANDS
    }

    fn slots() -> &'static [SlotEntry<Self>] {
        COUNTRY_SLOTS
    }

    fn on_link(
        &mut self,
        _ctx: &mut EntityContext<'_>,
        link: LinkId,
        event: SlotEvent,
    ) -> Result<(), EntityError> {
        if !self.aggregates.on_link(link, event)? {
            debug!(country = %self.address, %link, "event on unknown link");
        }
        Ok(())
    }
}
