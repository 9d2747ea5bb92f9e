//! Agency entity: joins its vehicles and publishes count, mean speed and the
//! vehicle map that states and countries union over.

use crate::error::EntityError;
use crate::join::JoinValueLane;
use crate::model::{AgencyInfo, Count, Vehicle, VehicleRef};
use crate::runtime::{
    CommandEntry, Entity, EntityContext, MapSlot, SlotEntry, SlotEvent, SlotHandle, ValueSlot,
};
use crate::topology::{ensure_child_of, mean, set_if_changed, VEHICLE_SLOT};
use serde_json::Value;
use tracing::{debug, info};
use transit_env::{Address, EntityKind, LinkId};

pub struct AgencyEntity {
    address: Address,
    info: ValueSlot<AgencyInfo>,
    vehicles: MapSlot<Address, Vehicle>,
    count: ValueSlot<Count>,
    speed: ValueSlot<f64>,
    joined: JoinValueLane<Address, Vehicle>,
}

impl AgencyEntity {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            info: ValueSlot::new(),
            vehicles: MapSlot::new(),
            count: ValueSlot::new(),
            speed: ValueSlot::new(),
            joined: JoinValueLane::new(VEHICLE_SLOT),
        }
    }

    pub fn count(&self) -> Option<&Count> {
        self.count.get()
    }

    pub fn speed(&self) -> Option<f64> {
        self.speed.get().copied()
    }

    /// `setInfo`: identity from the bootstrap roster; announces to the state.
    fn on_set_info(&mut self, ctx: &mut EntityContext<'_>, payload: Value) -> Result<(), EntityError> {
        let info: AgencyInfo = serde_json::from_value(payload)?;
        if info.address() != self.address {
            return Err(EntityError::malformed(format!(
                "identity for {} delivered to {}",
                info.address(),
                self.address
            )));
        }

        let wired = info.wired();
        if self.info.get() == Some(&wired) {
            return Ok(());
        }
        self.info.set(wired.clone());

        if let Some(state) = self.address.parent() {
            info!(agency = %self.address, %state, "announcing agency");
            ctx.command(state, "addAgency", &wired)?;
        }
        Ok(())
    }

    /// `addVehicle`: first contact from one of this agency's vehicles.
    fn on_add_vehicle(&mut self, ctx: &mut EntityContext<'_>, payload: Value) -> Result<(), EntityError> {
        let VehicleRef { uri } = serde_json::from_value(payload)?;
        ensure_child_of(&uri, &self.address)?;

        let limit = ctx.config().max_children;
        if !self.joined.is_linked(&uri) && self.joined.link_count() >= limit {
            return Err(EntityError::CapacityExceeded {
                address: self.address.clone(),
                limit,
            });
        }
        if self.joined.open(uri.clone(), uri.clone(), ctx) {
            debug!(agency = %self.address, vehicle = %uri, "vehicle joined");
        }
        Ok(())
    }

    /// `removeVehicle`: the vehicle left service; its entry is removed everywhere.
    fn on_remove_vehicle(&mut self, ctx: &mut EntityContext<'_>, payload: Value) -> Result<(), EntityError> {
        let VehicleRef { uri } = serde_json::from_value(payload)?;
        self.joined.close(&uri, ctx);
        if self.vehicles.remove(&uri).is_some() {
            debug!(agency = %self.address, vehicle = %uri, "vehicle removed");
            self.recompute();
        }
        Ok(())
    }

    fn recompute(&mut self) {
        let next = Count::next(self.count.get(), self.joined.len() as i64);
        set_if_changed(&mut self.count, next);

        if let Some(avg) = mean(self.joined.values().map(|v| v.speed as f64)) {
            set_if_changed(&mut self.speed, avg);
        }
    }
}

fn info_slot(entity: &mut AgencyEntity) -> &mut dyn SlotHandle {
    &mut entity.info
}

fn vehicles_slot(entity: &mut AgencyEntity) -> &mut dyn SlotHandle {
    &mut entity.vehicles
}

fn count_slot(entity: &mut AgencyEntity) -> &mut dyn SlotHandle {
    &mut entity.count
}

fn speed_slot(entity: &mut AgencyEntity) -> &mut dyn SlotHandle {
    &mut entity.speed
}

const AGENCY_COMMANDS: &[CommandEntry<AgencyEntity>] = &[
    CommandEntry { name: "setInfo", handler: AgencyEntity::on_set_info },
    CommandEntry { name: "addVehicle", handler: AgencyEntity::on_add_vehicle },
    CommandEntry { name: "removeVehicle", handler: AgencyEntity::on_remove_vehicle },
];

const AGENCY_SLOTS: &[SlotEntry<AgencyEntity>] = &[
    SlotEntry { name: "info", access: info_slot },
    SlotEntry { name: "vehicles", access: vehicles_slot },
    SlotEntry { name: "count", access: count_slot },
    SlotEntry { name: "speed", access: speed_slot },
];

impl Entity for AgencyEntity {
    const KIND: EntityKind = EntityKind::Agency;

    fn commands() -> &'static [CommandEntry<Self>] {
        AGENCY_COMMANDS
    }

    fn slots() -> &'static [SlotEntry<Self>] {
        AGENCY_SLOTS
    }

    fn on_link(
        &mut self,
        _ctx: &mut EntityContext<'_>,
        link: LinkId,
        event: SlotEvent,
    ) -> Result<(), EntityError> {
        if let Some(update) = self.joined.on_event(link, event)? {
            self.vehicles.put(update.key, update.new);
            self.recompute();
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

    fn agency() -> AgencyEntity {
        AgencyEntity::new(Address::agency("US", "CA", "sf-muni"))
    }

    fn command(
        entity: &mut AgencyEntity,
        config: &RuntimeConfig,
        name: &str,
        payload: Value,
    ) -> Vec<Outgoing> {
        let address = entity.address.clone();
        let mut ctx = EntityContext::new(&address, 0, config);
        process(
            entity,
            &mut ctx,
            Envelope::Command { name: name.into(), payload, received_ms: 0 },
        );
        ctx.into_outbox()
    }

    fn link(entity: &mut AgencyEntity, config: &RuntimeConfig, link: LinkId, event: SlotEvent) {
        let address = entity.address.clone();
        let mut ctx = EntityContext::new(&address, 0, config);
        process(entity, &mut ctx, Envelope::Link { link, event });
    }

    fn vehicle_json(id: &str, speed: i64) -> Value {
        json!({
            "id": id, "uri": format!("/vehicle/US/CA/sf-muni/{}", id), "agency": "sf-muni",
            "agencyIndex": 0, "routeTag": "N", "direction": "inbound", "latitude": 0.0,
            "longitude": 0.0, "speed": speed, "heading": "N", "timestamp": 0
        })
    }

    fn opened(outbox: &[Outgoing]) -> LinkId {
        match outbox {
            [Outgoing::Open { link, slot, .. }] if slot == VEHICLE_SLOT => *link,
            other => panic!("expected one open, got {:?}", other),
        }
    }

    #[test]
    fn test_set_info_announces_wired_identity_once() {
        let config = RuntimeConfig::default();
        let mut entity = agency();
        let info = json!({ "id": "sf-muni", "state": "CA", "country": "US", "index": 4 });

        let outbox = command(&mut entity, &config, "setInfo", info.clone());
        match &outbox[..] {
            [Outgoing::Command { target, name, payload }] => {
                assert_eq!(target, &Address::state("US", "CA"));
                assert_eq!(name, "addAgency");
                assert_eq!(payload["stateUri"], json!("/state/US/CA"));
                assert_eq!(payload["countryUri"], json!("/country/US"));
            }
            other => panic!("unexpected outbox {:?}", other),
        }

        assert!(command(&mut entity, &config, "setInfo", info).is_empty());
    }

    #[test]
    fn test_set_info_for_other_agency_rejected() {
        let config = RuntimeConfig::default();
        let mut entity = agency();
        let info = json!({ "id": "ac-transit", "state": "CA", "country": "US", "index": 1 });
        assert!(command(&mut entity, &config, "setInfo", info).is_empty());
        assert!(entity.info.get().is_none());
    }

    #[test]
    fn test_vehicles_drive_count_speed_and_map() {
        let config = RuntimeConfig::default();
        let mut entity = agency();

        let l1 = opened(&command(&mut entity, &config, "addVehicle", json!({ "uri": "/vehicle/US/CA/sf-muni/1" })));
        let l2 = opened(&command(&mut entity, &config, "addVehicle", json!({ "uri": "/vehicle/US/CA/sf-muni/2" })));

        link(&mut entity, &config, l1, SlotEvent::Set { new: vehicle_json("1", 10), old: None });
        link(&mut entity, &config, l2, SlotEvent::Set { new: vehicle_json("2", 30), old: None });

        assert_eq!(entity.count(), Some(&Count { current: 2, max: 2 }));
        assert_eq!(entity.speed(), Some(20.0));
        assert_eq!(entity.vehicles.len(), 2);

        link(&mut entity, &config, l1, SlotEvent::Set { new: vehicle_json("1", 20), old: None });
        assert_eq!(entity.speed(), Some(25.0));
        assert_eq!(entity.count(), Some(&Count { current: 2, max: 2 }));
    }

    #[test]
    fn test_readding_vehicle_opens_no_second_link() {
        let config = RuntimeConfig::default();
        let mut entity = agency();
        let payload = json!({ "uri": "/vehicle/US/CA/sf-muni/1" });

        assert_eq!(command(&mut entity, &config, "addVehicle", payload.clone()).len(), 1);
        assert!(command(&mut entity, &config, "addVehicle", payload).is_empty());
    }

    #[test]
    fn test_vehicle_of_other_agency_rejected() {
        let config = RuntimeConfig::default();
        let mut entity = agency();
        let outbox = command(&mut entity, &config, "addVehicle", json!({ "uri": "/vehicle/US/CA/bart/1" }));
        assert!(outbox.is_empty());
    }

    #[test]
    fn test_remove_vehicle_closes_link_and_keeps_max() {
        let config = RuntimeConfig::default();
        let mut entity = agency();
        let uri = json!({ "uri": "/vehicle/US/CA/sf-muni/1" });

        let l1 = opened(&command(&mut entity, &config, "addVehicle", uri.clone()));
        link(&mut entity, &config, l1, SlotEvent::Set { new: vehicle_json("1", 10), old: None });
        assert_eq!(entity.count(), Some(&Count { current: 1, max: 1 }));

        let outbox = command(&mut entity, &config, "removeVehicle", uri);
        assert!(matches!(&outbox[..], [Outgoing::Close { .. }]));
        assert_eq!(entity.count(), Some(&Count { current: 0, max: 1 }));
        assert!(entity.vehicles.is_empty());
        // No vehicles left: the mean keeps its last value
        assert_eq!(entity.speed(), Some(10.0));

        // A late delivery on the closed link is ignored
        link(&mut entity, &config, l1, SlotEvent::Set { new: vehicle_json("1", 50), old: None });
        assert_eq!(entity.count(), Some(&Count { current: 0, max: 1 }));
    }

    #[test]
    fn test_vehicle_capacity_is_bounded() {
        let config = RuntimeConfig { max_children: 1, ..RuntimeConfig::default() };
        let mut entity = agency();

        assert_eq!(command(&mut entity, &config, "addVehicle", json!({ "uri": "/vehicle/US/CA/sf-muni/1" })).len(), 1);
        assert!(command(&mut entity, &config, "addVehicle", json!({ "uri": "/vehicle/US/CA/sf-muni/2" })).is_empty());
    }
}
