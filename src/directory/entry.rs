use std::collections::{hash_map, HashMap, HashSet};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use tracing::info;

use super::descriptor::PeerDescriptor;
use crate::routing::tree::PeerSubscriptionTree;
use crate::routing::RoutingKey;
use crate::{BindingKey, MessageTypeId, Peer, PeerId, Subscription, SubscriptionsForType};

/// Per-message-type subscription trees.
///
/// The index owns the trees; peer entries only know which (type, key) pairs
/// they inserted and mutate the index by diff when their subscriptions
/// change.
#[derive(Default)]
pub(crate) struct SubscriptionIndex(HashMap<MessageTypeId, PeerSubscriptionTree>);

impl SubscriptionIndex {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn add<'a>(
        &mut self,
        message_type: &MessageTypeId,
        peer: &Peer,
        bindings: impl Iterator<Item = &'a BindingKey>,
    ) {
        let tree = self
            .0
            .entry(message_type.clone())
            .or_insert_with(PeerSubscriptionTree::new);
        for key in bindings {
            tree.add(peer.clone(), key);
        }
    }

    fn remove<'a>(
        &mut self,
        message_type: &MessageTypeId,
        peer_id: &PeerId,
        bindings: impl Iterator<Item = &'a BindingKey>,
    ) {
        if let Some(tree) = self.0.get_mut(message_type) {
            for key in bindings {
                tree.remove(peer_id, key);
            }
            if tree.is_empty() {
                self.0.remove(message_type);
            }
        }
    }

    /// Peers subscribed to `message_type` with a binding matching
    /// `routing_key`, each at most once
    pub(crate) fn get_peers(
        &self,
        message_type: &MessageTypeId,
        routing_key: &RoutingKey,
    ) -> Vec<Peer> {
        self.0
            .get(message_type)
            .map(|tree| tree.get_peers(routing_key))
            .unwrap_or_default()
    }
}

/// Subscriptions of a peer for one message type, gated by the timestamp of
/// the last applied update. Kept (empty) after removal so out-of-order
/// older updates stay rejected.
#[derive(Debug)]
struct SubscriptionEntry {
    binding_keys: HashSet<BindingKey>,
    timestamp_utc: Option<DateTime<Utc>>,
}

/// Authoritative in-memory record of one peer, owned by the directory
/// client
pub(crate) struct PeerEntry {
    peer: Peer,
    is_persistent: bool,
    timestamp_utc: Option<DateTime<Utc>>,
    has_debugger_attached: bool,
    subscriptions: HashMap<MessageTypeId, SubscriptionEntry>,

    /// Timestamp of the newest applied full replace. A full replace removes
    /// every binding of the types it omits, so a partial update stamped
    /// older than this floor is stale even for a type the peer never
    /// declared.
    replace_timestamp_utc: Option<DateTime<Utc>>,
}

impl PeerEntry {
    pub(crate) fn new(descriptor: &PeerDescriptor) -> Self {
        Self {
            peer: descriptor.peer.clone(),
            is_persistent: descriptor.is_persistent,
            timestamp_utc: descriptor.timestamp_utc,
            has_debugger_attached: descriptor.has_debugger_attached,
            subscriptions: HashMap::new(),
            replace_timestamp_utc: None,
        }
    }

    /// Refresh the live peer state from a descriptor. Subscriptions are
    /// applied separately through [`Self::set_subscriptions`].
    pub(crate) fn update(&mut self, descriptor: &PeerDescriptor) {
        self.peer.endpoint = descriptor.peer.endpoint.clone();
        self.peer.is_up = descriptor.peer.is_up;
        self.peer.is_responding = descriptor.peer.is_responding;
        self.is_persistent = descriptor.is_persistent;
        self.timestamp_utc = descriptor.timestamp_utc;
        self.has_debugger_attached = descriptor.has_debugger_attached;
    }

    pub(crate) fn peer(&self) -> &Peer {
        &self.peer
    }

    pub(crate) fn peer_mut(&mut self) -> &mut Peer {
        &mut self.peer
    }

    pub(crate) fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        self.timestamp_utc
    }

    pub(crate) fn set_timestamp_utc(&mut self, timestamp: Option<DateTime<Utc>>) {
        if timestamp.is_some() {
            self.timestamp_utc = timestamp;
        }
    }

    /// Whether an update stamped `timestamp` may be applied to this entry.
    /// Unstamped updates always apply; ties apply in arrival order.
    pub(crate) fn accepts(&self, timestamp: Option<DateTime<Utc>>) -> bool {
        match (self.timestamp_utc, timestamp) {
            (Some(current), Some(incoming)) => incoming >= current,
            _ => true,
        }
    }

    /// Replace the entire subscription set. Message types absent from the
    /// new set lose every binding. Each per-type slice is gated by the
    /// timestamp of its last applied update.
    pub(crate) fn set_subscriptions(
        &mut self,
        index: &mut SubscriptionIndex,
        subscriptions: Vec<Subscription>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        self.replace_timestamp_utc = self.replace_timestamp_utc.max(timestamp);

        let groups = subscriptions
            .into_iter()
            .map(Subscription::into_parts)
            .into_group_map();

        let removed_types = self
            .subscriptions
            .keys()
            .filter(|message_type| !groups.contains_key(message_type))
            .cloned()
            .collect::<Vec<_>>();

        for message_type in removed_types {
            self.set_type_subscriptions(index, message_type, HashSet::new(), timestamp);
        }

        for (message_type, binding_keys) in groups {
            self.set_type_subscriptions(
                index,
                message_type,
                binding_keys.into_iter().collect(),
                timestamp,
            );
        }
    }

    /// Partial update: replace the binding keys of the listed message types
    /// only. An empty slice removes every binding of that type.
    pub(crate) fn set_subscriptions_for_types(
        &mut self,
        index: &mut SubscriptionIndex,
        updates: Vec<SubscriptionsForType>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        for update in updates {
            let (message_type, binding_keys) = update.into_parts();
            self.set_type_subscriptions(
                index,
                message_type,
                binding_keys.into_iter().collect(),
                timestamp,
            );
        }
    }

    fn set_type_subscriptions(
        &mut self,
        index: &mut SubscriptionIndex,
        message_type: MessageTypeId,
        binding_keys: HashSet<BindingKey>,
        timestamp: Option<DateTime<Utc>>,
    ) {
        match self.subscriptions.entry(message_type) {
            hash_map::Entry::Occupied(mut e) => {
                let entry = e.get_mut();

                if let (Some(current), Some(incoming)) = (entry.timestamp_utc, timestamp) {
                    if incoming < current {
                        info!(
                            "dropping outdated subscription update for {} of {}",
                            e.key(),
                            self.peer.id
                        );
                        return;
                    }
                }

                let to_remove = entry
                    .binding_keys
                    .difference(&binding_keys)
                    .cloned()
                    .collect::<Vec<_>>();
                let to_add = binding_keys
                    .difference(&entry.binding_keys)
                    .cloned()
                    .collect::<Vec<_>>();

                let message_type = e.key().clone();
                index.add(&message_type, &self.peer, to_add.iter());
                index.remove(&message_type, &self.peer.id, to_remove.iter());

                let entry = e.into_mut();
                entry.timestamp_utc = timestamp;
                entry.binding_keys = binding_keys;
            }
            hash_map::Entry::Vacant(e) => {
                if let (Some(floor), Some(incoming)) = (self.replace_timestamp_utc, timestamp) {
                    if incoming < floor {
                        info!(
                            "dropping outdated subscription update for {} of {}",
                            e.key(),
                            self.peer.id
                        );
                        return;
                    }
                }

                if !binding_keys.is_empty() {
                    index.add(e.key(), &self.peer, binding_keys.iter());
                }
                e.insert(SubscriptionEntry {
                    binding_keys,
                    timestamp_utc: timestamp,
                });
            }
        }
    }

    /// Remove every binding of this peer from every tree, on decommission
    pub(crate) fn remove_subscriptions(&mut self, index: &mut SubscriptionIndex) {
        for (message_type, entry) in self.subscriptions.drain() {
            index.remove(&message_type, &self.peer.id, entry.binding_keys.iter());
        }
    }

    /// Snapshot of the entry
    pub(crate) fn to_descriptor(&self) -> PeerDescriptor {
        let subscriptions = self
            .subscriptions
            .iter()
            .flat_map(|(message_type, entry)| {
                entry
                    .binding_keys
                    .iter()
                    .map(|key| Subscription::new(message_type.clone(), key.clone()))
            })
            .collect();

        PeerDescriptor {
            peer: self.peer.clone(),
            is_persistent: self.is_persistent,
            timestamp_utc: self.timestamp_utc,
            subscriptions,
            has_debugger_attached: self.has_debugger_attached,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::binding_key;

    fn ts(seconds: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(seconds, 0).single().unwrap())
    }

    fn subscription(name: &str, key: BindingKey) -> Subscription {
        Subscription::new(MessageTypeId::from_name(name), key)
    }

    fn entry_for(peer: &Peer) -> PeerEntry {
        PeerEntry::new(&PeerDescriptor::new(peer.clone(), Vec::new()))
    }

    fn peers_of(index: &SubscriptionIndex, name: &str, tokens: Vec<&str>) -> Vec<Peer> {
        index.get_peers(&MessageTypeId::from_name(name), &RoutingKey::from(tokens))
    }

    #[test]
    fn set_subscriptions_populates_the_index() {
        let peer = Peer::test();
        let mut index = SubscriptionIndex::new();
        let mut entry = entry_for(&peer);

        entry.set_subscriptions(
            &mut index,
            vec![
                subscription("Test.OrderPlaced", binding_key!["eu", *]),
                subscription("Test.OrderCancelled", BindingKey::empty()),
            ],
            ts(1),
        );

        assert_eq!(peers_of(&index, "Test.OrderPlaced", vec!["eu", "1"]), vec![peer.clone()]);
        assert_eq!(peers_of(&index, "Test.OrderCancelled", vec!["x"]), vec![peer]);
        assert!(peers_of(&index, "Test.OrderPlaced", vec!["us", "1"]).is_empty());
    }

    #[test]
    fn replacing_subscriptions_removes_absent_types() {
        let peer = Peer::test();
        let mut index = SubscriptionIndex::new();
        let mut entry = entry_for(&peer);

        entry.set_subscriptions(
            &mut index,
            vec![subscription("Test.OrderPlaced", binding_key!["eu"])],
            ts(1),
        );
        entry.set_subscriptions(
            &mut index,
            vec![subscription("Test.OrderCancelled", binding_key!["eu"])],
            ts(2),
        );

        assert!(peers_of(&index, "Test.OrderPlaced", vec!["eu"]).is_empty());
        assert_eq!(peers_of(&index, "Test.OrderCancelled", vec!["eu"]), vec![peer]);
    }

    #[test]
    fn outdated_slice_updates_are_dropped() {
        let peer = Peer::test();
        let mut index = SubscriptionIndex::new();
        let mut entry = entry_for(&peer);

        entry.set_subscriptions(
            &mut index,
            vec![subscription("Test.OrderPlaced", binding_key!["eu"])],
            ts(10),
        );

        // An older full replacement must not win
        entry.set_subscriptions(
            &mut index,
            vec![subscription("Test.OrderPlaced", binding_key!["us"])],
            ts(5),
        );

        assert_eq!(peers_of(&index, "Test.OrderPlaced", vec!["eu"]), vec![peer]);
        assert!(peers_of(&index, "Test.OrderPlaced", vec!["us"]).is_empty());
    }

    #[test]
    fn ties_apply_in_arrival_order() {
        let peer = Peer::test();
        let mut index = SubscriptionIndex::new();
        let mut entry = entry_for(&peer);

        entry.set_subscriptions(
            &mut index,
            vec![subscription("Test.OrderPlaced", binding_key!["eu"])],
            ts(10),
        );
        entry.set_subscriptions(
            &mut index,
            vec![subscription("Test.OrderPlaced", binding_key!["us"])],
            ts(10),
        );

        assert_eq!(peers_of(&index, "Test.OrderPlaced", vec!["us"]), vec![peer]);
        assert!(peers_of(&index, "Test.OrderPlaced", vec!["eu"]).is_empty());
    }

    #[test]
    fn empty_slice_removes_the_bindings_of_the_type() {
        let peer = Peer::test();
        let mut index = SubscriptionIndex::new();
        let mut entry = entry_for(&peer);

        entry.set_subscriptions(
            &mut index,
            vec![subscription("Test.OrderPlaced", binding_key!["eu"])],
            ts(1),
        );
        entry.set_subscriptions_for_types(
            &mut index,
            vec![SubscriptionsForType::new(
                MessageTypeId::from_name("Test.OrderPlaced"),
                Vec::new(),
            )],
            ts(2),
        );

        assert!(peers_of(&index, "Test.OrderPlaced", vec!["eu"]).is_empty());
    }

    #[test]
    fn removal_is_remembered_against_older_updates() {
        let peer = Peer::test();
        let mut index = SubscriptionIndex::new();
        let mut entry = entry_for(&peer);

        // Removal at t=10 arrives before the (older) addition at t=5
        entry.set_subscriptions_for_types(
            &mut index,
            vec![SubscriptionsForType::new(
                MessageTypeId::from_name("Test.OrderPlaced"),
                Vec::new(),
            )],
            ts(10),
        );
        entry.set_subscriptions_for_types(
            &mut index,
            vec![SubscriptionsForType::new(
                MessageTypeId::from_name("Test.OrderPlaced"),
                vec![binding_key!["eu"]],
            )],
            ts(5),
        );

        assert!(peers_of(&index, "Test.OrderPlaced", vec!["eu"]).is_empty());
    }

    #[test]
    fn out_of_order_updates_converge_to_increasing_order_state() {
        let reference = {
            let peer = Peer::test();
            let mut index = SubscriptionIndex::new();
            let mut entry = entry_for(&peer);
            entry.set_subscriptions(
                &mut index,
                vec![subscription("Test.OrderPlaced", binding_key!["a"])],
                ts(1),
            );
            entry.set_subscriptions_for_types(
                &mut index,
                vec![SubscriptionsForType::new(
                    MessageTypeId::from_name("Test.OrderPlaced"),
                    vec![binding_key!["b"]],
                )],
                ts(2),
            );
            entry.to_descriptor().subscriptions
        };

        let shuffled = {
            let peer = Peer::test();
            let mut index = SubscriptionIndex::new();
            let mut entry = entry_for(&peer);
            entry.set_subscriptions_for_types(
                &mut index,
                vec![SubscriptionsForType::new(
                    MessageTypeId::from_name("Test.OrderPlaced"),
                    vec![binding_key!["b"]],
                )],
                ts(2),
            );
            entry.set_subscriptions(
                &mut index,
                vec![subscription("Test.OrderPlaced", binding_key!["a"])],
                ts(1),
            );
            entry.to_descriptor().subscriptions
        };

        let keys = |subscriptions: Vec<Subscription>| {
            subscriptions
                .into_iter()
                .map(|s| s.binding_key().to_string())
                .collect::<Vec<_>>()
        };

        assert_eq!(keys(reference), keys(shuffled));
    }

    #[test]
    fn out_of_order_update_for_an_undeclared_type_converges() {
        // In ascending order, the partial update declares B first and the
        // full replace then removes it by omission
        let reference = {
            let peer = Peer::test();
            let mut index = SubscriptionIndex::new();
            let mut entry = entry_for(&peer);
            entry.set_subscriptions_for_types(
                &mut index,
                vec![SubscriptionsForType::new(
                    MessageTypeId::from_name("Test.OrderCancelled"),
                    vec![binding_key!["b"]],
                )],
                ts(3),
            );
            entry.set_subscriptions(
                &mut index,
                vec![subscription("Test.OrderPlaced", binding_key!["a"])],
                ts(5),
            );
            (entry.to_descriptor().subscriptions, index)
        };

        // Out of order, B is still vacant when its older update arrives;
        // the full replace at t=5 must keep the floor
        let shuffled = {
            let peer = Peer::test();
            let mut index = SubscriptionIndex::new();
            let mut entry = entry_for(&peer);
            entry.set_subscriptions(
                &mut index,
                vec![subscription("Test.OrderPlaced", binding_key!["a"])],
                ts(5),
            );
            entry.set_subscriptions_for_types(
                &mut index,
                vec![SubscriptionsForType::new(
                    MessageTypeId::from_name("Test.OrderCancelled"),
                    vec![binding_key!["b"]],
                )],
                ts(3),
            );
            (entry.to_descriptor().subscriptions, index)
        };

        let keys = |subscriptions: &[Subscription]| {
            let mut keys = subscriptions
                .iter()
                .map(|s| format!("{}:{}", s.full_name(), s.binding_key()))
                .collect::<Vec<_>>();
            keys.sort();
            keys
        };

        assert_eq!(keys(&reference.0), keys(&shuffled.0));
        assert_eq!(keys(&reference.0), vec!["Test.OrderPlaced:a"]);

        for index in [&reference.1, &shuffled.1] {
            assert!(peers_of(index, "Test.OrderCancelled", vec!["b"]).is_empty());
            assert_eq!(peers_of(index, "Test.OrderPlaced", vec!["a"]).len(), 1);
        }
    }

    #[test]
    fn remove_subscriptions_purges_every_tree() {
        let peer = Peer::test();
        let mut index = SubscriptionIndex::new();
        let mut entry = entry_for(&peer);

        entry.set_subscriptions(
            &mut index,
            vec![
                subscription("Test.OrderPlaced", binding_key!["eu"]),
                subscription("Test.OrderCancelled", BindingKey::empty()),
            ],
            ts(1),
        );

        entry.remove_subscriptions(&mut index);

        assert!(peers_of(&index, "Test.OrderPlaced", vec!["eu"]).is_empty());
        assert!(peers_of(&index, "Test.OrderCancelled", vec![]).is_empty());
    }

    #[test]
    fn to_descriptor_flattens_subscriptions() {
        let peer = Peer::test();
        let mut index = SubscriptionIndex::new();
        let mut entry = entry_for(&peer);

        entry.set_subscriptions(
            &mut index,
            vec![
                subscription("Test.OrderPlaced", binding_key!["eu"]),
                subscription("Test.OrderPlaced", binding_key!["us"]),
            ],
            ts(1),
        );

        let descriptor = entry.to_descriptor();
        assert_eq!(descriptor.peer, peer);
        assert_eq!(descriptor.subscriptions.len(), 2);
    }
}
