//! Join lanes: local shadow copies of a dynamic set of remote slots.
//!
//! A lane owns the registry of links it opened, `key → LinkId` and
//! `LinkId → key`, plus the latest value each linked child pushed. It never
//! computes aggregates itself; the owning entity recomputes from
//! [`JoinValueLane::values`] after every update so that no running total can
//! drift.

use crate::error::EntityError;
use crate::runtime::{EntityContext, SlotEvent};
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use transit_env::{Address, LinkId};

/// Result of applying one delivery to a [`JoinValueLane`].
#[derive(Debug, Clone, PartialEq)]
pub struct JoinUpdate<K, V> {
    pub key: K,
    pub new: V,
    pub old: Option<V>,
}

/// Joins one value slot from each of many children.
#[derive(Debug)]
pub struct JoinValueLane<K, V> {
    slot: &'static str,
    links: HashMap<K, (Address, LinkId)>,
    keys: HashMap<LinkId, K>,
    /// Ordered so that recomputation folds values in a stable order
    values: BTreeMap<K, V>,
}

impl<K, V> JoinValueLane<K, V>
where
    K: Ord + Hash + Clone,
    V: DeserializeOwned + Clone,
{
    /// A lane that links to the slot named `slot` on each child.
    pub fn new(slot: &'static str) -> Self {
        Self {
            slot,
            links: HashMap::new(),
            keys: HashMap::new(),
            values: BTreeMap::new(),
        }
    }

    /// Opens a link to `child` under `key`. Returns `false` if `key` is
    /// already linked; no second link is opened.
    pub fn open(&mut self, key: K, child: Address, ctx: &mut EntityContext<'_>) -> bool {
        if self.links.contains_key(&key) {
            return false;
        }
        let link = LinkId::new();
        ctx.open_link(child.clone(), self.slot, link);
        self.keys.insert(link, key.clone());
        self.links.insert(key, (child, link));
        true
    }

    /// Closes the link for `key` and forgets its value.
    pub fn close(&mut self, key: &K, ctx: &mut EntityContext<'_>) -> Option<V> {
        let (child, link) = self.links.remove(key)?;
        self.keys.remove(&link);
        ctx.close_link(child, self.slot, link);
        self.values.remove(key)
    }

    pub fn owns(&self, link: &LinkId) -> bool {
        self.keys.contains_key(link)
    }

    /// Applies a delivery. `Ok(None)` if the link is not ours (or closed).
    pub fn on_event(
        &mut self,
        link: LinkId,
        event: SlotEvent,
    ) -> Result<Option<JoinUpdate<K, V>>, EntityError> {
        let Some(key) = self.keys.get(&link).cloned() else {
            return Ok(None);
        };
        match event {
            SlotEvent::Set { new, .. } => {
                let new: V = serde_json::from_value(new)?;
                let old = self.values.insert(key.clone(), new.clone());
                Ok(Some(JoinUpdate { key, new, old }))
            }
            SlotEvent::Put { .. } | SlotEvent::Remove { .. } => Err(EntityError::malformed(
                format!("map event on value lane '{}'", self.slot),
            )),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.values.get(key)
    }

    /// Latest value of every child that has pushed one.
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.values.values()
    }

    pub fn is_linked(&self, key: &K) -> bool {
        self.links.contains_key(key)
    }

    /// Number of open links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Number of children that have pushed a value.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Result of applying one delivery to a [`JoinMapLane`].
#[derive(Debug, Clone, PartialEq)]
pub enum JoinMapUpdate<K, S, V> {
    Put { child: K, key: S, value: V },
    Remove { child: K, key: S },
}

/// Joins one map slot from each of many children into their union.
#[derive(Debug)]
pub struct JoinMapLane<K, S, V> {
    slot: &'static str,
    links: HashMap<K, (Address, LinkId)>,
    keys: HashMap<LinkId, K>,
    entries: HashMap<K, BTreeMap<S, V>>,
}

impl<K, S, V> JoinMapLane<K, S, V>
where
    K: Eq + Hash + Clone,
    S: DeserializeOwned + Ord + Clone,
    V: DeserializeOwned + Clone,
{
    pub fn new(slot: &'static str) -> Self {
        Self {
            slot,
            links: HashMap::new(),
            keys: HashMap::new(),
            entries: HashMap::new(),
        }
    }

    /// Opens a link to `child`'s map slot. Idempotent per `key`.
    pub fn open(&mut self, key: K, child: Address, ctx: &mut EntityContext<'_>) -> bool {
        if self.links.contains_key(&key) {
            return false;
        }
        let link = LinkId::new();
        ctx.open_link(child.clone(), self.slot, link);
        self.keys.insert(link, key.clone());
        self.links.insert(key, (child, link));
        true
    }

    pub fn owns(&self, link: &LinkId) -> bool {
        self.keys.contains_key(link)
    }

    pub fn on_event(
        &mut self,
        link: LinkId,
        event: SlotEvent,
    ) -> Result<Option<JoinMapUpdate<K, S, V>>, EntityError> {
        let Some(child) = self.keys.get(&link).cloned() else {
            return Ok(None);
        };
        match event {
            SlotEvent::Put { key, new, .. } => {
                let key: S = serde_json::from_value(key)?;
                let value: V = serde_json::from_value(new)?;
                self.entries
                    .entry(child.clone())
                    .or_default()
                    .insert(key.clone(), value.clone());
                Ok(Some(JoinMapUpdate::Put { child, key, value }))
            }
            SlotEvent::Remove { key, .. } => {
                let key: S = serde_json::from_value(key)?;
                if let Some(entries) = self.entries.get_mut(&child) {
                    entries.remove(&key);
                }
                Ok(Some(JoinMapUpdate::Remove { child, key }))
            }
            SlotEvent::Set { .. } => Err(EntityError::malformed(format!(
                "value event on map lane '{}'",
                self.slot
            ))),
        }
    }

    /// Entries most recently pushed by one child.
    pub fn child_entries(&self, key: &K) -> Option<&BTreeMap<S, V>> {
        self.entries.get(key)
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Total number of entries across all children.
    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::runtime::Outgoing;
    use serde_json::json;

    fn opened_link(ctx: &EntityContext<'_>, index: usize) -> LinkId {
        match &ctx.outbox()[index] {
            Outgoing::Open { link, .. } => *link,
            other => panic!("expected open, got {:?}", other),
        }
    }

    #[test]
    fn test_value_lane_open_is_idempotent() {
        let owner = Address::state("US", "CA");
        let config = RuntimeConfig::default();
        let mut ctx = EntityContext::new(&owner, 0, &config);
        let mut lane: JoinValueLane<Address, i64> = JoinValueLane::new("count");

        let child = Address::agency("US", "CA", "a");
        assert!(lane.open(child.clone(), child.clone(), &mut ctx));
        assert!(!lane.open(child.clone(), child.clone(), &mut ctx));

        assert_eq!(lane.link_count(), 1);
        assert_eq!(ctx.outbox().len(), 1);
    }

    #[test]
    fn test_value_lane_tracks_latest_per_child() {
        let owner = Address::state("US", "CA");
        let config = RuntimeConfig::default();
        let mut ctx = EntityContext::new(&owner, 0, &config);
        let mut lane: JoinValueLane<String, i64> = JoinValueLane::new("count");

        lane.open("a".into(), Address::agency("US", "CA", "a"), &mut ctx);
        lane.open("b".into(), Address::agency("US", "CA", "b"), &mut ctx);
        let (link_a, link_b) = (opened_link(&ctx, 0), opened_link(&ctx, 1));

        lane.on_event(link_a, SlotEvent::Set { new: json!(3), old: None }).unwrap();
        lane.on_event(link_b, SlotEvent::Set { new: json!(5), old: None }).unwrap();
        let update = lane
            .on_event(link_a, SlotEvent::Set { new: json!(1), old: Some(json!(3)) })
            .unwrap()
            .unwrap();

        assert_eq!(update, JoinUpdate { key: "a".to_string(), new: 1, old: Some(3) });
        assert_eq!(lane.values().sum::<i64>(), 6);
    }

    #[test]
    fn test_value_lane_ignores_foreign_and_closed_links() {
        let owner = Address::state("US", "CA");
        let config = RuntimeConfig::default();
        let mut ctx = EntityContext::new(&owner, 0, &config);
        let mut lane: JoinValueLane<String, i64> = JoinValueLane::new("count");

        let foreign = LinkId::from_seed(1);
        let result = lane.on_event(foreign, SlotEvent::Set { new: json!(9), old: None }).unwrap();
        assert!(result.is_none());

        lane.open("a".into(), Address::agency("US", "CA", "a"), &mut ctx);
        let link = opened_link(&ctx, 0);
        lane.on_event(link, SlotEvent::Set { new: json!(4), old: None }).unwrap();
        assert_eq!(lane.close(&"a".to_string(), &mut ctx), Some(4));
        assert!(matches!(ctx.outbox()[1], Outgoing::Close { .. }));

        // Late delivery after close contributes nothing
        assert!(lane.on_event(link, SlotEvent::Set { new: json!(7), old: None }).unwrap().is_none());
        assert!(lane.is_empty());
    }

    #[test]
    fn test_value_lane_rejects_undecodable_value() {
        let owner = Address::state("US", "CA");
        let config = RuntimeConfig::default();
        let mut ctx = EntityContext::new(&owner, 0, &config);
        let mut lane: JoinValueLane<String, i64> = JoinValueLane::new("count");
        lane.open("a".into(), Address::agency("US", "CA", "a"), &mut ctx);
        let link = opened_link(&ctx, 0);

        assert!(lane.on_event(link, SlotEvent::Set { new: json!("x"), old: None }).is_err());
        assert!(lane.get(&"a".to_string()).is_none());
    }

    #[test]
    fn test_map_lane_union_put_and_remove() {
        let owner = Address::state("US", "CA");
        let config = RuntimeConfig::default();
        let mut ctx = EntityContext::new(&owner, 0, &config);
        let mut lane: JoinMapLane<String, String, i64> = JoinMapLane::new("vehicles");

        lane.open("a".into(), Address::agency("US", "CA", "a"), &mut ctx);
        lane.open("b".into(), Address::agency("US", "CA", "b"), &mut ctx);
        let (link_a, link_b) = (opened_link(&ctx, 0), opened_link(&ctx, 1));

        lane.on_event(link_a, SlotEvent::Put { key: json!("v1"), new: json!(10), old: None }).unwrap();
        lane.on_event(link_b, SlotEvent::Put { key: json!("v2"), new: json!(20), old: None }).unwrap();
        assert_eq!(lane.len(), 2);

        let update = lane
            .on_event(link_a, SlotEvent::Remove { key: json!("v1"), old: json!(10) })
            .unwrap()
            .unwrap();
        assert_eq!(update, JoinMapUpdate::Remove { child: "a".to_string(), key: "v1".to_string() });
        assert_eq!(lane.len(), 1);
        assert!(lane.child_entries(&"a".to_string()).unwrap().is_empty());
    }
}
