//! Topology Builder - wiring children into their parent's join lanes.
//!
//! # Protocol
//!
//! ```text
//! Vehicle ──addVehicle──► Agency            (first telemetry)
//! bootstrap ──setInfo──► Agency ──addAgency──► State ──addState──► Country
//!
//! on addX(child):
//!   1. join-value links to child.count and child.speed
//!   2. join-map link to child.vehicles
//!   3. registry put (idempotent, bounded)
//!   4. first time only: announce self one level up
//! ```
//!
//! No entity needs global knowledge of the tree; each one only knows its
//! own address and derives the parent address from the shared prefix.

use crate::error::EntityError;
use crate::join::{JoinMapLane, JoinMapUpdate, JoinValueLane};
use crate::model::{Count, Vehicle};
use crate::runtime::{EntityContext, MapSlot, SlotEvent, ValueSlot};
use serde::Serialize;
use tracing::debug;
use transit_env::{Address, LinkId};

pub const COUNT_SLOT: &str = "count";
pub const SPEED_SLOT: &str = "speed";
pub const VEHICLES_SLOT: &str = "vehicles";
pub const VEHICLE_SLOT: &str = "vehicle";

/// Fails unless `child` sits directly below `parent`.
pub fn ensure_child_of(child: &Address, parent: &Address) -> Result<(), EntityError> {
    if child.parent().as_ref() == Some(parent) {
        Ok(())
    } else {
        Err(EntityError::malformed(format!(
            "{} is not a child of {}",
            child, parent
        )))
    }
}

/// Records `child` in a bounded registry slot.
///
/// Returns `true` only for a child not seen before. Re-announcing with the
/// same identity publishes nothing; a changed identity is replaced in place.
pub fn register<I>(
    registry: &mut MapSlot<Address, I>,
    child: Address,
    info: I,
    owner: &Address,
    limit: usize,
) -> Result<bool, EntityError>
where
    I: PartialEq + Serialize,
{
    match registry.get(&child) {
        Some(existing) if *existing == info => Ok(false),
        Some(_) => {
            registry.put(child, info);
            Ok(false)
        }
        None if registry.len() >= limit => Err(EntityError::CapacityExceeded {
            address: owner.clone(),
            limit,
        }),
        None => {
            registry.put(child, info);
            Ok(true)
        }
    }
}

/// Sets `slot` only when the value actually changes.
pub(crate) fn set_if_changed<T: PartialEq + Serialize>(slot: &mut ValueSlot<T>, value: T) {
    if slot.get() != Some(&value) {
        slot.set(value);
    }
}

/// Arithmetic mean, or `None` for no inputs.
pub(crate) fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

/// The three joined aggregates a State or Country keeps over its children.
#[derive(Debug)]
pub struct ChildAggregates {
    /// Sum of children's current counts, with running max
    pub count: ValueSlot<Count>,
    /// Mean of children's speeds; unset until a child reports one
    pub speed: ValueSlot<f64>,
    /// Union of every descendant vehicle
    pub vehicles: MapSlot<Address, Vehicle>,

    counts: JoinValueLane<Address, Count>,
    speeds: JoinValueLane<Address, f64>,
    union: JoinMapLane<Address, Address, Vehicle>,
}

impl Default for ChildAggregates {
    fn default() -> Self {
        Self::new()
    }
}

impl ChildAggregates {
    pub fn new() -> Self {
        Self {
            count: ValueSlot::new(),
            speed: ValueSlot::new(),
            vehicles: MapSlot::new(),
            counts: JoinValueLane::new(COUNT_SLOT),
            speeds: JoinValueLane::new(SPEED_SLOT),
            union: JoinMapLane::new(VEHICLES_SLOT),
        }
    }

    /// Opens whichever of the three links to `child` are not open yet.
    /// Returns `true` if anything new was opened.
    pub fn join(&mut self, child: &Address, ctx: &mut EntityContext<'_>) -> bool {
        let counts = self.counts.open(child.clone(), child.clone(), ctx);
        let speeds = self.speeds.open(child.clone(), child.clone(), ctx);
        let union = self.union.open(child.clone(), child.clone(), ctx);
        counts || speeds || union
    }

    /// Number of children with open count links.
    pub fn joined(&self) -> usize {
        self.counts.link_count()
    }

    /// Applies a delivery if it belongs to one of the lanes.
    /// Returns `Ok(false)` for a link this bundle never opened.
    pub fn on_link(&mut self, link: LinkId, event: SlotEvent) -> Result<bool, EntityError> {
        if self.counts.owns(&link) {
            if let Some(update) = self.counts.on_event(link, event)? {
                debug!(child = %update.key, current = update.new.current, "child count");
                self.recompute_count();
            }
            return Ok(true);
        }
        if self.speeds.owns(&link) {
            if self.speeds.on_event(link, event)?.is_some() {
                self.recompute_speed();
            }
            return Ok(true);
        }
        if self.union.owns(&link) {
            match self.union.on_event(link, event)? {
                Some(JoinMapUpdate::Put { key, value, .. }) => {
                    self.vehicles.put(key, value);
                }
                Some(JoinMapUpdate::Remove { key, .. }) => {
                    self.vehicles.remove(&key);
                }
                None => {}
            }
            return Ok(true);
        }
        Ok(false)
    }

    // Full recomputation over every joined child on each update.
    fn recompute_count(&mut self) {
        let total = self.counts.values().map(|c| c.current).sum();
        let next = Count::next(self.count.get(), total);
        set_if_changed(&mut self.count, next);
    }

    fn recompute_speed(&mut self) {
        if let Some(avg) = mean(self.speeds.values().copied()) {
            set_if_changed(&mut self.speed, avg);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::Outgoing;
    use proptest::prelude::*;
    use serde_json::json;

    /// Link ids opened for `child`, in (count, speed, vehicles) order.
    fn links_for(ctx: &EntityContext<'_>, child: &Address) -> (LinkId, LinkId, LinkId) {
        let opened: Vec<(String, LinkId)> = ctx
            .outbox()
            .iter()
            .filter_map(|out| match out {
                Outgoing::Open { target, slot, link } if target == child => Some((slot.clone(), *link)),
                _ => None,
            })
            .collect();
        let find = |name: &str| opened.iter().find(|(s, _)| s == name).map(|(_, l)| *l).unwrap();
        (find(COUNT_SLOT), find(SPEED_SLOT), find(VEHICLES_SLOT))
    }

    fn count(current: i64, max: i64) -> serde_json::Value {
        json!({ "current": current, "max": max })
    }

    #[test]
    fn test_count_sum_and_running_max() {
        let owner = Address::state("US", "CA");
        let config = RuntimeConfig::default();
        let mut ctx = EntityContext::new(&owner, 0, &config);
        let mut aggregates = ChildAggregates::new();

        let a = Address::agency("US", "CA", "a");
        let b = Address::agency("US", "CA", "b");
        aggregates.join(&a, &mut ctx);
        aggregates.join(&b, &mut ctx);
        let (count_a, _, _) = links_for(&ctx, &a);
        let (count_b, _, _) = links_for(&ctx, &b);

        aggregates.on_link(count_a, SlotEvent::Set { new: count(3, 3), old: None }).unwrap();
        aggregates.on_link(count_b, SlotEvent::Set { new: count(5, 5), old: None }).unwrap();
        assert_eq!(aggregates.count.get(), Some(&Count { current: 8, max: 8 }));

        aggregates
            .on_link(count_a, SlotEvent::Set { new: count(1, 3), old: Some(count(3, 3)) })
            .unwrap();
        assert_eq!(aggregates.count.get(), Some(&Count { current: 6, max: 8 }));
    }

    #[test]
    fn test_speed_mean_and_idempotent_repeat() {
        let owner = Address::state("US", "CA");
        let config = RuntimeConfig::default();
        let mut ctx = EntityContext::new(&owner, 0, &config);
        let mut aggregates = ChildAggregates::new();

        let a = Address::agency("US", "CA", "a");
        let b = Address::agency("US", "CA", "b");
        aggregates.join(&a, &mut ctx);
        aggregates.join(&b, &mut ctx);
        let (_, speed_a, _) = links_for(&ctx, &a);
        let (_, speed_b, _) = links_for(&ctx, &b);

        aggregates.on_link(speed_a, SlotEvent::Set { new: json!(10.0), old: None }).unwrap();
        assert_eq!(aggregates.speed.get(), Some(&10.0));

        aggregates.on_link(speed_b, SlotEvent::Set { new: json!(20.0), old: None }).unwrap();
        assert_eq!(aggregates.speed.get(), Some(&15.0));

        aggregates.on_link(speed_b, SlotEvent::Set { new: json!(20.0), old: None }).unwrap();
        assert_eq!(aggregates.speed.get(), Some(&15.0));
    }

    #[test]
    fn test_speed_unset_with_no_children() {
        let aggregates = ChildAggregates::new();
        assert_eq!(aggregates.speed.get(), None);
        assert_eq!(mean(std::iter::empty::<f64>()), None);
    }

    #[test]
    fn test_rejoin_opens_nothing() {
        let owner = Address::country("US");
        let config = RuntimeConfig::default();
        let mut ctx = EntityContext::new(&owner, 0, &config);
        let mut aggregates = ChildAggregates::new();
        let child = Address::state("US", "CA");

        assert!(aggregates.join(&child, &mut ctx));
        assert!(!aggregates.join(&child, &mut ctx));
        assert_eq!(ctx.outbox().len(), 3);
        assert_eq!(aggregates.joined(), 1);
    }

    #[test]
    fn test_vehicle_union_follows_put_and_remove() {
        let owner = Address::state("US", "CA");
        let config = RuntimeConfig::default();
        let mut ctx = EntityContext::new(&owner, 0, &config);
        let mut aggregates = ChildAggregates::new();
        let a = Address::agency("US", "CA", "a");
        aggregates.join(&a, &mut ctx);
        let (_, _, vehicles_a) = links_for(&ctx, &a);

        let uri = "/vehicle/US/CA/a/7";
        let vehicle = json!({
            "id": "7", "uri": uri, "agency": "a", "agencyIndex": 0, "routeTag": "1",
            "direction": "inbound", "latitude": 0.0, "longitude": 0.0, "speed": 12,
            "heading": "N", "timestamp": 0
        });
        aggregates
            .on_link(vehicles_a, SlotEvent::Put { key: json!(uri), new: vehicle.clone(), old: None })
            .unwrap();
        assert_eq!(aggregates.vehicles.len(), 1);

        aggregates
            .on_link(vehicles_a, SlotEvent::Remove { key: json!(uri), old: vehicle })
            .unwrap();
        assert!(aggregates.vehicles.is_empty());
    }

    #[test]
    fn test_foreign_link_not_handled() {
        let mut aggregates = ChildAggregates::new();
        let handled = aggregates
            .on_link(LinkId::from_seed(3), SlotEvent::Set { new: json!(1), old: None })
            .unwrap();
        assert!(!handled);
    }

    #[test]
    fn test_register_is_idempotent_and_bounded() {
        let owner = Address::state("US", "CA");
        let mut registry: MapSlot<Address, String> = MapSlot::new();
        let a = Address::agency("US", "CA", "a");
        let b = Address::agency("US", "CA", "b");

        assert!(register(&mut registry, a.clone(), "A".to_string(), &owner, 1).unwrap());
        assert!(!register(&mut registry, a.clone(), "A".to_string(), &owner, 1).unwrap());
        assert!(matches!(
            register(&mut registry, b, "B".to_string(), &owner, 1),
            Err(EntityError::CapacityExceeded { limit: 1, .. })
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_ensure_child_of() {
        let state = Address::state("US", "CA");
        assert!(ensure_child_of(&Address::agency("US", "CA", "a"), &state).is_ok());
        assert!(ensure_child_of(&Address::agency("US", "NV", "a"), &state).is_err());
        assert!(ensure_child_of(&Address::country("US"), &state).is_err());
    }

    proptest! {
        #[test]
        fn prop_count_max_never_decreases(
            updates in proptest::collection::vec((0usize..3, 0i64..50), 1..64),
        ) {
            let owner = Address::state("US", "CA");
            let config = RuntimeConfig::default();
            let mut ctx = EntityContext::new(&owner, 0, &config);
            let mut aggregates = ChildAggregates::new();

            let children: Vec<Address> = ["a", "b", "c"]
                .iter()
                .map(|id| Address::agency("US", "CA", *id))
                .collect();
            for child in &children {
                aggregates.join(child, &mut ctx);
            }
            let links: Vec<LinkId> = children.iter().map(|c| links_for(&ctx, c).0).collect();

            let mut latest = [None::<i64>; 3];
            let mut previous_max = 0;
            for (child, current) in updates {
                let old = latest[child].map(|c| count(c, c));
                aggregates
                    .on_link(links[child], SlotEvent::Set { new: count(current, current), old })
                    .unwrap();
                latest[child] = Some(current);

                let total = aggregates.count.get().copied().unwrap_or_default();
                prop_assert_eq!(total.current, latest.iter().flatten().sum::<i64>());
                prop_assert!(total.max >= previous_max);
                prop_assert!(total.max >= total.current);
                previous_max = total.max;
            }
        }
    }
}
