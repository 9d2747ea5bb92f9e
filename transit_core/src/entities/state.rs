//! State entity: joins its agencies.

use crate::error::EntityError;
use crate::model::{AgencyInfo, StateInfo};
use crate::runtime::{
    CommandEntry, Entity, EntityContext, MapSlot, SlotEntry, SlotEvent, SlotHandle, ValueSlot,
};
use crate::topology::{ensure_child_of, register, ChildAggregates};
use serde_json::Value;
use tracing::{debug, info};
use transit_env::{Address, EntityKind, LinkId};

pub struct StateEntity {
    address: Address,
    info: ValueSlot<StateInfo>,
    agencies: MapSlot<Address, AgencyInfo>,
    aggregates: ChildAggregates,
}

impl StateEntity {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            info: ValueSlot::new(),
            agencies: MapSlot::new(),
            aggregates: ChildAggregates::new(),
        }
    }

    pub fn aggregates(&self) -> &ChildAggregates {
        &self.aggregates
    }

    /// `addAgency`: wires the agency in and, the first time, announces this
    /// state to its country.
    fn on_add_agency(&mut self, ctx: &mut EntityContext<'_>, payload: Value) -> Result<(), EntityError> {
        let agency: AgencyInfo = serde_json::from_value(payload)?;
        let child = agency.address();
        ensure_child_of(&child, &self.address)?;

        let limit = ctx.config().max_children;
        if register(&mut self.agencies, child.clone(), agency, &self.address, limit)? {
            info!(state = %self.address, agency = %child, "agency registered");
        }
        if self.aggregates.join(&child, ctx) {
            debug!(state = %self.address, agency = %child, "agency links opened");
        }

        if self.info.get().is_none() {
            if let Address::State { country, id } = &self.address {
                let own = StateInfo::new(id, country);
                self.info.set(own.clone());
                ctx.command(Address::country(country), "addState", &own)?;
            }
        }
        Ok(())
    }
}

fn info_slot(entity: &mut StateEntity) -> &mut dyn SlotHandle {
    &mut entity.info
}

fn agencies_slot(entity: &mut StateEntity) -> &mut dyn SlotHandle {
    &mut entity.agencies
}

fn count_slot(entity: &mut StateEntity) -> &mut dyn SlotHandle {
    &mut entity.aggregates.count
}

fn speed_slot(entity: &mut StateEntity) -> &mut dyn SlotHandle {
    &mut entity.aggregates.speed
}

fn vehicles_slot(entity: &mut StateEntity) -> &mut dyn SlotHandle {
    &mut entity.aggregates.vehicles
}

const STATE_COMMANDS: &[CommandEntry<StateEntity>] = &[CommandEntry {
    name: "addAgency",
    handler: StateEntity::on_add_agency,
}];

const STATE_SLOTS: &[SlotEntry<StateEntity>] = &[
    SlotEntry { name: "info", access: info_slot },
    SlotEntry { name: "agencies", access: agencies_slot },
    SlotEntry { name: "count", access: count_slot },
    SlotEntry { name: "speed", access: speed_slot },
    SlotEntry { name: "vehicles", access: vehicles_slot },
];

impl Entity for StateEntity {
    const KIND: EntityKind = EntityKind::State;

    fn commands() -> &'static [CommandEntry<Self>] {
        STATE_COMMANDS
    }

    fn slots() -> &'static [SlotEntry<Self>] {
        STATE_SLOTS
    }

    fn on_link(
        &mut self,
        _ctx: &mut EntityContext<'_>,
        link: LinkId,
        event: SlotEvent,
    ) -> Result<(), EntityError> {
        if !self.aggregates.on_link(link, event)? {
            debug!(state = %self.address, %link, "event on unknown link");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::{process, Envelope, Outgoing};
    use serde_json::json;

    fn add_agency(entity: &mut StateEntity, config: &RuntimeConfig, id: &str) -> Vec<Outgoing> {
        let address = entity.address.clone();
        let mut ctx = EntityContext::new(&address, 0, config);
        let payload = json!({
            "id": id, "state": "CA", "country": "US", "index": 0,
            "stateUri": "/state/US/CA", "countryUri": "/country/US"
        });
        process(
            entity,
            &mut ctx,
            Envelope::Command { name: "addAgency".into(), payload, received_ms: 0 },
        );
        ctx.into_outbox()
    }

    fn opens(outbox: &[Outgoing]) -> usize {
        outbox.iter().filter(|o| matches!(o, Outgoing::Open { .. })).count()
    }

    #[test]
    fn test_first_agency_wires_links_and_announces_state() {
        let config = RuntimeConfig::default();
        let mut entity = StateEntity::new(Address::state("US", "CA"));

        let outbox = add_agency(&mut entity, &config, "sf-muni");
        assert_eq!(opens(&outbox), 3);
        let announce = outbox
            .iter()
            .find_map(|o| match o {
                Outgoing::Command { target, name, payload } if name == "addState" => Some((target, payload)),
                _ => None,
            })
            .expect("state should announce itself");
        assert_eq!(announce.0, &Address::country("US"));
        assert_eq!(announce.1, &json!({ "id": "CA", "country": "US", "countryUri": "/country/US" }));

        // Second agency: links only, no second announcement
        let outbox = add_agency(&mut entity, &config, "bart");
        assert_eq!(opens(&outbox), 3);
        assert_eq!(outbox.len(), 3);
        assert_eq!(entity.agencies.len(), 2);
    }

    #[test]
    fn test_reannounced_agency_is_not_duplicated() {
        let config = RuntimeConfig::default();
        let mut entity = StateEntity::new(Address::state("US", "CA"));

        add_agency(&mut entity, &config, "sf-muni");
        let outbox = add_agency(&mut entity, &config, "sf-muni");

        assert!(outbox.is_empty());
        assert_eq!(entity.agencies.len(), 1);
        assert_eq!(entity.aggregates().joined(), 1);
    }

    #[test]
    fn test_agency_from_other_state_rejected() {
        let config = RuntimeConfig::default();
        let mut entity = StateEntity::new(Address::state("US", "NY"));

        let outbox = add_agency(&mut entity, &config, "sf-muni");
        assert!(outbox.is_empty());
        assert!(entity.info.get().is_none());
    }
}
