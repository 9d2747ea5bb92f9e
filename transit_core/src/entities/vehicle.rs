//! Vehicle entity: latest telemetry plus speed/acceleration windows.

use crate::config::RuntimeConfig;
use crate::error::EntityError;
use crate::model::{Vehicle, VehicleRef, VehicleTelemetry};
use crate::runtime::{CommandEntry, Entity, EntityContext, SlotEntry, SlotHandle, ValueSlot};
use crate::topology::VEHICLE_SLOT;
use crate::window::{Acceleration, KinematicsTracker, Sample};
use serde_json::Value;
use tracing::{debug, trace};
use transit_env::{Address, EntityKind};

pub struct VehicleEntity {
    address: Address,
    vehicle: ValueSlot<Vehicle>,
    speeds: ValueSlot<Vec<Sample>>,
    accelerations: ValueSlot<Vec<Sample>>,
    tracker: KinematicsTracker,
}

impl VehicleEntity {
    pub fn new(address: Address, config: &RuntimeConfig) -> Self {
        Self {
            address,
            vehicle: ValueSlot::new(),
            speeds: ValueSlot::new(),
            accelerations: ValueSlot::new(),
            tracker: KinematicsTracker::new(config.window_capacity, config.acceleration_scale),
        }
    }

    pub fn vehicle(&self) -> Option<&Vehicle> {
        self.vehicle.get()
    }

    pub fn tracker(&self) -> &KinematicsTracker {
        &self.tracker
    }

    /// `update`: one telemetry report for this vehicle.
    fn on_update(&mut self, ctx: &mut EntityContext<'_>, payload: Value) -> Result<(), EntityError> {
        let telemetry: VehicleTelemetry = serde_json::from_value(payload)?;
        let uri: Address = telemetry.uri.parse()?;
        if uri != self.address {
            return Err(EntityError::malformed(format!(
                "telemetry for {} delivered to {}",
                uri, self.address
            )));
        }

        let time = telemetry
            .secs_since_report
            .checked_mul(1000)
            .and_then(|age_ms| ctx.now_ms().checked_sub(age_ms))
            .ok_or_else(|| {
                EntityError::malformed(format!("report age {}s out of range", telemetry.secs_since_report))
            })?;
        let previous_speed = self.vehicle.get().map(|v| v.speed);

        match self.tracker.record(time, telemetry.speed, previous_speed) {
            Acceleration::Recorded(acceleration) => {
                trace!(vehicle = %self.address, acceleration, "acceleration sample");
                self.accelerations.set(self.tracker.accelerations().to_vec());
            }
            Acceleration::ZeroElapsed => {
                debug!(vehicle = %self.address, time, "zero elapsed since last report; no acceleration");
            }
            Acceleration::FirstReport => {}
        }
        self.speeds.set(self.tracker.speeds().to_vec());
        self.vehicle
            .set(Vehicle::from_telemetry(&telemetry, self.address.clone(), time));

        // Not (or no longer) joined by the agency: announce
        if self.vehicle.entity_link_count() == 0 {
            if let Some(agency) = self.address.parent() {
                let announce = VehicleRef {
                    uri: self.address.clone(),
                };
                ctx.command(agency, "addVehicle", &announce)?;
            }
        }
        Ok(())
    }
}

fn vehicle_slot(entity: &mut VehicleEntity) -> &mut dyn SlotHandle {
    &mut entity.vehicle
}

fn speeds_slot(entity: &mut VehicleEntity) -> &mut dyn SlotHandle {
    &mut entity.speeds
}

fn accelerations_slot(entity: &mut VehicleEntity) -> &mut dyn SlotHandle {
    &mut entity.accelerations
}

const VEHICLE_COMMANDS: &[CommandEntry<VehicleEntity>] = &[CommandEntry {
    name: "update",
    handler: VehicleEntity::on_update,
}];

const VEHICLE_SLOTS: &[SlotEntry<VehicleEntity>] = &[
    SlotEntry { name: VEHICLE_SLOT, access: vehicle_slot },
    SlotEntry { name: "speeds", access: speeds_slot },
    SlotEntry { name: "accelerations", access: accelerations_slot },
];

impl Entity for VehicleEntity {
    const KIND: EntityKind = EntityKind::Vehicle;

    fn commands() -> &'static [CommandEntry<Self>] {
        VEHICLE_COMMANDS
    }

    fn slots() -> &'static [SlotEntry<Self>] {
        VEHICLE_SLOTS
    }
}
