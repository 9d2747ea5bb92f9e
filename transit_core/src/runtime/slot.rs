//! Named state slots and the downlinks that observe them.
//!
//! A slot is the only way an entity exposes state. Every mutation is encoded
//! once with serde and pushed to each attached [`Downlink`] as a
//! [`SlotEvent`]. Newly attached downlinks are synced with the current state
//! before receiving changes.

use super::mailbox::{Envelope, Mailbox};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::warn;
use transit_env::LinkId;

/// One change notification on a slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SlotEvent {
    /// Value slot replaced its value
    Set { new: Value, old: Option<Value> },

    /// Map slot inserted or replaced one entry
    Put {
        key: Value,
        new: Value,
        old: Option<Value>,
    },

    /// Map slot dropped one entry
    Remove { key: Value, old: Value },
}

/// Where a downlink delivers its events.
#[derive(Debug, Clone)]
pub enum LinkSink {
    /// Another entity's mailbox; arrives as `Envelope::Link`
    Entity(Mailbox),

    /// An external observer outside the entity tree
    Observer(mpsc::UnboundedSender<SlotEvent>),
}

impl LinkSink {
    /// Delivers one event. Returns `false` once the receiving side is gone.
    fn deliver(&self, link: LinkId, event: SlotEvent) -> bool {
        match self {
            LinkSink::Entity(mailbox) => mailbox.deliver(Envelope::Link { link, event }).is_ok(),
            LinkSink::Observer(tx) => tx.send(event).is_ok(),
        }
    }
}

/// An open subscription from one slot to one sink.
#[derive(Debug, Clone)]
pub struct Downlink {
    pub link: LinkId,
    pub sink: LinkSink,
}

impl Downlink {
    pub fn new(link: LinkId, sink: LinkSink) -> Self {
        Self { link, sink }
    }

    fn is_entity(&self) -> bool {
        matches!(self.sink, LinkSink::Entity(_))
    }
}

/// Type-erased view of a slot, as used by the runtime's slot table.
pub trait SlotHandle {
    /// Current state as a structured value (`None` for an unset value slot).
    fn snapshot(&self) -> Option<Value>;

    /// Syncs the current state to `downlink`, then keeps it for future changes.
    fn attach(&mut self, downlink: Downlink);

    /// Stops delivering to the downlink with this id. Returns whether it existed.
    fn detach(&mut self, link: LinkId) -> bool;
}

fn encode<T: Serialize>(value: &T) -> Option<Value> {
    match serde_json::to_value(value) {
        Ok(encoded) => Some(encoded),
        Err(err) => {
            warn!(error = %err, "slot value failed to encode; not published");
            None
        }
    }
}

/// Pushes `event` to every downlink, pruning those whose receiver is gone.
fn publish(downlinks: &mut Vec<Downlink>, event: SlotEvent) {
    downlinks.retain(|downlink| downlink.sink.deliver(downlink.link, event.clone()));
}

/// A slot holding at most one value.
#[derive(Debug)]
pub struct ValueSlot<T> {
    value: Option<T>,
    /// Encoded form of `value`, reused as the `old` side of the next event
    encoded: Option<Value>,
    downlinks: Vec<Downlink>,
}

impl<T> Default for ValueSlot<T> {
    fn default() -> Self {
        Self {
            value: None,
            encoded: None,
            downlinks: Vec::new(),
        }
    }
}

impl<T: Serialize> ValueSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// Replaces the value and notifies subscribers with `(new, old)`.
    pub fn set(&mut self, value: T) -> Option<T> {
        let new = encode(&value);
        let old_encoded = std::mem::replace(&mut self.encoded, new.clone());
        if let Some(new) = new {
            publish(
                &mut self.downlinks,
                SlotEvent::Set {
                    new,
                    old: old_encoded,
                },
            );
        }
        self.value.replace(value)
    }

    /// Number of downlinks held by other entities (observers excluded).
    pub fn entity_link_count(&self) -> usize {
        self.downlinks.iter().filter(|d| d.is_entity()).count()
    }
}

impl<T: Serialize> SlotHandle for ValueSlot<T> {
    fn snapshot(&self) -> Option<Value> {
        self.encoded.clone()
    }

    fn attach(&mut self, downlink: Downlink) {
        let alive = match &self.encoded {
            Some(current) => downlink.sink.deliver(
                downlink.link,
                SlotEvent::Set {
                    new: current.clone(),
                    old: None,
                },
            ),
            None => true,
        };
        if alive {
            self.downlinks.push(downlink);
        }
    }

    fn detach(&mut self, link: LinkId) -> bool {
        let before = self.downlinks.len();
        self.downlinks.retain(|d| d.link != link);
        self.downlinks.len() != before
    }
}

/// A slot holding a key → value mapping.
#[derive(Debug)]
pub struct MapSlot<K, V> {
    entries: BTreeMap<K, V>,
    downlinks: Vec<Downlink>,
}

impl<K, V> Default for MapSlot<K, V> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
            downlinks: Vec::new(),
        }
    }
}

impl<K, V> MapSlot<K, V>
where
    K: Ord + Clone + Serialize,
    V: Serialize,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.entries.iter()
    }

    /// Inserts or replaces an entry and notifies subscribers for that key.
    pub fn put(&mut self, key: K, value: V) -> Option<V> {
        if let (Some(encoded_key), Some(new)) = (encode(&key), encode(&value)) {
            let old = self.entries.get(&key).and_then(encode);
            publish(
                &mut self.downlinks,
                SlotEvent::Put {
                    key: encoded_key,
                    new,
                    old,
                },
            );
        }
        self.entries.insert(key, value)
    }

    /// Removes an entry, notifying subscribers only if it was present.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.entries.remove(key)?;
        if let (Some(encoded_key), Some(old)) = (encode(key), encode(&removed)) {
            publish(
                &mut self.downlinks,
                SlotEvent::Remove {
                    key: encoded_key,
                    old,
                },
            );
        }
        Some(removed)
    }
}

/// Object keys for map snapshots: strings stay as-is, anything else is
/// rendered through its JSON text.
fn object_key(key: Value) -> String {
    match key {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

impl<K, V> SlotHandle for MapSlot<K, V>
where
    K: Ord + Clone + Serialize,
    V: Serialize,
{
    fn snapshot(&self) -> Option<Value> {
        let object = self
            .entries
            .iter()
            .filter_map(|(k, v)| Some((object_key(encode(k)?), encode(v)?)))
            .collect::<serde_json::Map<_, _>>();
        Some(Value::Object(object))
    }

    fn attach(&mut self, downlink: Downlink) {
        for (key, value) in &self.entries {
            let (Some(key), Some(new)) = (encode(key), encode(value)) else {
                continue;
            };
            let event = SlotEvent::Put {
                key,
                new,
                old: None,
            };
            if !downlink.sink.deliver(downlink.link, event) {
                return;
            }
        }
        self.downlinks.push(downlink);
    }

    fn detach(&mut self, link: LinkId) -> bool {
        let before = self.downlinks.len();
        self.downlinks.retain(|d| d.link != link);
        self.downlinks.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn observer() -> (Downlink, mpsc::UnboundedReceiver<SlotEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Downlink::new(LinkId::new(), LinkSink::Observer(tx)), rx)
    }

    #[test]
    fn test_value_slot_set_notifies_new_and_old() {
        let mut slot = ValueSlot::new();
        let (downlink, mut rx) = observer();
        slot.attach(downlink);

        assert_eq!(slot.set(3i64), None);
        assert_eq!(slot.set(5i64), Some(3));

        assert_eq!(
            rx.try_recv().unwrap(),
            SlotEvent::Set { new: json!(3), old: None }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SlotEvent::Set { new: json!(5), old: Some(json!(3)) }
        );
        assert_eq!(slot.snapshot(), Some(json!(5)));
    }

    #[test]
    fn test_value_slot_attach_syncs_current_value() {
        let mut slot = ValueSlot::new();
        slot.set("hello".to_string());

        let (downlink, mut rx) = observer();
        slot.attach(downlink);

        assert_eq!(
            rx.try_recv().unwrap(),
            SlotEvent::Set { new: json!("hello"), old: None }
        );
    }

    #[test]
    fn test_value_slot_prunes_dropped_observer() {
        let mut slot = ValueSlot::new();
        let (downlink, rx) = observer();
        slot.attach(downlink);
        drop(rx);

        slot.set(1u8);
        assert!(slot.downlinks.is_empty());
    }

    #[test]
    fn test_value_slot_detach_stops_delivery() {
        let mut slot = ValueSlot::new();
        let (downlink, mut rx) = observer();
        let link = downlink.link;
        slot.attach(downlink);

        assert!(slot.detach(link));
        assert!(!slot.detach(link));
        slot.set(9u8);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_map_slot_put_remove_events() {
        let mut slot: MapSlot<String, i64> = MapSlot::new();
        let (downlink, mut rx) = observer();
        slot.attach(downlink);

        slot.put("a".into(), 1);
        slot.put("a".into(), 2);
        assert_eq!(slot.remove(&"a".to_string()), Some(2));
        assert_eq!(slot.remove(&"a".to_string()), None);

        assert_eq!(
            rx.try_recv().unwrap(),
            SlotEvent::Put { key: json!("a"), new: json!(1), old: None }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SlotEvent::Put { key: json!("a"), new: json!(2), old: Some(json!(1)) }
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            SlotEvent::Remove { key: json!("a"), old: json!(2) }
        );
        // Removing an absent key is silent
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_map_slot_attach_syncs_entries_and_snapshot() {
        let mut slot: MapSlot<String, i64> = MapSlot::new();
        slot.put("x".into(), 10);
        slot.put("y".into(), 20);

        let (downlink, mut rx) = observer();
        slot.attach(downlink);

        let mut synced = 0;
        while let Ok(SlotEvent::Put { .. }) = rx.try_recv() {
            synced += 1;
        }
        assert_eq!(synced, 2);
        assert_eq!(slot.snapshot(), Some(json!({"x": 10, "y": 20})));
    }

    #[test]
    fn test_slot_event_wire_shape() {
        let event = SlotEvent::Remove { key: json!("k"), old: json!(1) };
        let wire = serde_json::to_value(&event).unwrap();
        assert_eq!(wire, json!({"event": "remove", "key": "k", "old": 1}));
    }
}
