//! Prefix tree of peers indexed by their [`BindingKey`] bindings
//!
//! Peers are organized as a trie of binding key fragments, with dedicated
//! branches for the `*` and `#` wildcards. For example the bindings
//!
//! | Peer           | Binding key            |
//! |----------------|------------------------|
//! | Peer.0         | france                 |
//! | Peer.1         | france.october.*       |
//! | Peer.2         | *.june.21              |
//! | Peer.3         | belgium.#              |
//!
//! are organized as such in the tree:
//!
//! ```text
//!    * (0) []
//!        june (1) []
//!            21 (2) [Peer(Peer.2, tcp://*:*)]
//!    france (0) [Peer(Peer.0, tcp://*:*)]
//!        october (1) []
//!            * (2) [Peer(Peer.1, tcp://*:*)]
//!    belgium (0) []
//!        # (1) [Peer(Peer.3, tcp://*:*)]
//! ```
//!
//! Lookup walks the tree with the literal tokens of a [`RoutingKey`] and
//! returns each matching peer exactly once.
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::{BindingKey, Peer, PeerId};

use super::binding_key::BindingKeyFragment;
use super::RoutingKey;

/// Collects peers during tree walking, deduplicating by [`PeerId`]
struct PeerCollector {
    peers: Vec<Peer>,
    seen: HashSet<PeerId>,
}

impl PeerCollector {
    fn new() -> Self {
        Self {
            peers: Vec::new(),
            seen: HashSet::new(),
        }
    }

    fn offer(&mut self, peers: &[Peer]) {
        for peer in peers {
            if self.seen.insert(peer.id.clone()) {
                self.peers.push(peer.clone());
            }
        }
    }

    fn into_peers(self) -> Vec<Peer> {
        self.peers
    }
}

fn add_or_update_peer(peers: &mut Vec<Peer>, peer: Peer) {
    match peers.iter_mut().find(|p| p.id == peer.id) {
        Some(p) => *p = peer,
        None => peers.push(peer),
    }
}

fn remove_peer(peers: &mut Vec<Peer>, peer_id: &PeerId) {
    peers.retain(|p| &p.id != peer_id);
}

#[derive(Debug, Default)]
struct Node {
    /// Branch for the `*` fragment
    star: Option<Box<Node>>,

    /// Branch for the `#` fragment. Always terminal, a `#` is only valid as
    /// the last fragment of a binding key.
    sharp: Option<Box<Node>>,

    /// Branches for literal fragments
    children: HashMap<String, Box<Node>>,

    /// Peers whose binding key terminates on this node
    peers: Vec<Peer>,
}

impl Node {
    /// Walk down the binding key, creating missing nodes, and return the
    /// terminal node for the key
    fn entry(&mut self, key: &BindingKey, index: usize) -> &mut Node {
        let Some(fragment) = key.fragment(index) else {
            return self;
        };

        let child = match fragment {
            BindingKeyFragment::Star => self.star.get_or_insert_with(Default::default),
            BindingKeyFragment::Sharp => self.sharp.get_or_insert_with(Default::default),
            BindingKeyFragment::Value(value) => self
                .children
                .entry(value.clone())
                .or_insert_with(Default::default),
        };

        child.entry(key, index + 1)
    }

    /// Walk down the binding key without creating nodes, remove the peer from
    /// the terminal node and prune empty branches on unwind.
    /// Returns `true` if this node has become empty.
    fn remove(&mut self, key: &BindingKey, index: usize, peer_id: &PeerId) -> bool {
        match key.fragment(index) {
            None => remove_peer(&mut self.peers, peer_id),
            Some(BindingKeyFragment::Star) => {
                Self::remove_branch(&mut self.star, key, index, peer_id)
            }
            Some(BindingKeyFragment::Sharp) => {
                Self::remove_branch(&mut self.sharp, key, index, peer_id)
            }
            Some(BindingKeyFragment::Value(value)) => {
                if let Some(child) = self.children.get_mut(value) {
                    if child.remove(key, index + 1, peer_id) {
                        self.children.remove(value);
                    }
                }
            }
        }

        self.is_empty()
    }

    fn remove_branch(
        branch: &mut Option<Box<Node>>,
        key: &BindingKey,
        index: usize,
        peer_id: &PeerId,
    ) {
        if let Some(node) = branch {
            if node.remove(key, index + 1, peer_id) {
                *branch = None;
            }
        }
    }

    fn is_empty(&self) -> bool {
        self.peers.is_empty()
            && self.star.is_none()
            && self.sharp.is_none()
            && self.children.is_empty()
    }

    /// Collect the peers matching the routing key starting at `index`
    fn accept(&self, key: &RoutingKey, index: usize, collector: &mut PeerCollector) {
        // A trailing `#` matches zero or more remaining tokens
        if let Some(ref sharp) = self.sharp {
            collector.offer(&sharp.peers);
        }

        let Some(token) = key.token(index) else {
            collector.offer(&self.peers);
            return;
        };

        if let Some(ref star) = self.star {
            star.accept(key, index + 1, collector);
        }

        if let Some(child) = self.children.get(token) {
            child.accept(key, index + 1, collector);
        }
    }

    /// Collect every peer of this node and its children
    fn offer_all(&self, collector: &mut PeerCollector) {
        collector.offer(&self.peers);

        if let Some(ref star) = self.star {
            star.offer_all(collector);
        }
        if let Some(ref sharp) = self.sharp {
            sharp.offer_all(collector);
        }
        for child in self.children.values() {
            child.offer_all(collector);
        }
    }
}

/// Indentation level to use when printing the tree
const INDENT_LEVEL: usize = 4;

struct PeersDisplay<'a>(&'a [Peer]);

impl fmt::Display for PeersDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (idx, peer) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{peer}")?;
        }
        write!(f, "]")
    }
}

impl Node {
    fn fmt_at(&self, f: &mut fmt::Formatter<'_>, label: &str, depth: usize) -> fmt::Result {
        if depth > 0 {
            let indent = (depth - 1) * INDENT_LEVEL;
            let peers = PeersDisplay(&self.peers);
            writeln!(f, "{:indent$}{label} ({}) {peers}", "", depth - 1)?;
        }

        if let Some(ref star) = self.star {
            star.fmt_at(f, "*", depth + 1)?;
        }
        if let Some(ref sharp) = self.sharp {
            sharp.fmt_at(f, "#", depth + 1)?;
        }
        for (label, child) in &self.children {
            child.fmt_at(f, label, depth + 1)?;
        }

        Ok(())
    }
}

/// Prefix tree of peers based on their [`BindingKey`] bindings
#[derive(Debug, Default)]
pub(crate) struct PeerSubscriptionTree {
    root: Node,

    /// Peers subscribed with the empty binding key, matching every routing
    /// key
    match_all_peers: Vec<Peer>,
}

impl PeerSubscriptionTree {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add a `peer` binding with `key` to the tree. Idempotent.
    pub(crate) fn add(&mut self, peer: Peer, key: &BindingKey) {
        if key.is_empty() {
            add_or_update_peer(&mut self.match_all_peers, peer);
        } else {
            add_or_update_peer(&mut self.root.entry(key, 0).peers, peer);
        }
    }

    /// Remove the `peer` binding with `key` from the tree. Idempotent.
    pub(crate) fn remove(&mut self, peer_id: &PeerId, key: &BindingKey) {
        if key.is_empty() {
            remove_peer(&mut self.match_all_peers, peer_id);
        } else {
            self.root.remove(key, 0, peer_id);
        }
    }

    /// Get the list of peers whose bindings match the routing `key`, each
    /// peer at most once
    pub(crate) fn get_peers(&self, key: &RoutingKey) -> Vec<Peer> {
        let mut collector = PeerCollector::new();
        collector.offer(&self.match_all_peers);

        if key.is_empty() {
            self.root.offer_all(&mut collector);
        } else {
            self.root.accept(key, 0, &mut collector);
        }

        collector.into_peers()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.match_all_peers.is_empty() && self.root.is_empty()
    }
}

impl fmt::Display for PeerSubscriptionTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.fmt_at(f, "", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding_key;

    fn routing(tokens: Vec<&str>) -> RoutingKey {
        RoutingKey::from(tokens)
    }

    #[test]
    fn doc() {
        let mut tree = PeerSubscriptionTree::new();
        tree.add(Peer::test(), &binding_key!["france"]);
        tree.add(Peer::test(), &binding_key!["france", "october", *]);
        tree.add(Peer::test(), &binding_key![*, "june", "21"]);
        tree.add(Peer::test(), &binding_key!["belgium", #]);

        println!("{tree}");
    }

    #[test]
    fn empty_binding_matches_everything() {
        let peer = Peer::test();
        let mut tree = PeerSubscriptionTree::new();
        tree.add(peer.clone(), &BindingKey::empty());

        for key in [routing(vec![]), routing(vec!["a"]), routing(vec!["a", "b"])] {
            assert_eq!(tree.get_peers(&key), vec![peer.clone()]);
        }
    }

    #[test]
    fn match_literal() {
        let peer = Peer::test();
        let mut tree = PeerSubscriptionTree::new();
        tree.add(peer.clone(), &binding_key!["my_routing"]);

        assert_eq!(tree.get_peers(&routing(vec!["my_routing"])), vec![peer]);
        assert!(tree.get_peers(&routing(vec!["other"])).is_empty());
    }

    #[test]
    fn star_matches_any_single_token() {
        let peer = Peer::test();
        let mut tree = PeerSubscriptionTree::new();
        tree.add(peer.clone(), &binding_key![*, *, *]);

        for key in [vec!["a", "b", "c"], vec!["d", "e", "f"]] {
            assert_eq!(tree.get_peers(&routing(key)), vec![peer.clone()]);
        }

        // Token counts must line up
        assert!(tree.get_peers(&routing(vec!["a", "b"])).is_empty());
        assert!(tree.get_peers(&routing(vec!["a", "b", "c", "d"])).is_empty());
    }

    #[test]
    fn star_matches_in_any_position() {
        for binding in [
            binding_key!["a", "b", *],
            binding_key!["a", *, *],
            binding_key!["a", *, "c"],
            binding_key![*, "b", "c"],
        ] {
            let peer = Peer::test();
            let mut tree = PeerSubscriptionTree::new();
            tree.add(peer.clone(), &binding);

            assert_eq!(tree.get_peers(&routing(vec!["a", "b", "c"])), vec![peer]);
        }
    }

    #[test]
    fn sharp_matches_zero_or_more_trailing_tokens() {
        let peer = Peer::test();
        let mut tree = PeerSubscriptionTree::new();
        tree.add(peer.clone(), &binding_key!["a", #]);

        for key in [vec!["a"], vec!["a", "b"], vec!["a", "b", "c"]] {
            assert_eq!(tree.get_peers(&routing(key)), vec![peer.clone()]);
        }

        assert!(tree.get_peers(&routing(vec!["b"])).is_empty());
    }

    #[test]
    fn star_vs_sharp() {
        let (star_peer, sharp_peer) = (Peer::test(), Peer::test());
        let mut tree = PeerSubscriptionTree::new();
        tree.add(star_peer.clone(), &binding_key!["x", *]);
        tree.add(sharp_peer.clone(), &binding_key!["x", #]);

        let peers = tree.get_peers(&routing(vec!["x", "y"]));
        assert_eq!(peers.len(), 2);
        assert!(peers.contains(&star_peer));
        assert!(peers.contains(&sharp_peer));

        assert_eq!(tree.get_peers(&routing(vec!["x", "y", "z"])), vec![sharp_peer]);
        assert!(tree.get_peers(&routing(vec!["w"])).is_empty());
    }

    #[test]
    fn peer_is_returned_once_on_multiple_matching_bindings() {
        let peer = Peer::test();
        let mut tree = PeerSubscriptionTree::new();
        tree.add(peer.clone(), &binding_key!["a", "b"]);
        tree.add(peer.clone(), &binding_key!["a", *]);
        tree.add(peer.clone(), &binding_key!["a", #]);

        assert_eq!(tree.get_peers(&routing(vec!["a", "b"])), vec![peer]);
    }

    #[test]
    fn empty_routing_key_returns_all() {
        let (peer1, peer2, peer3) = (Peer::test(), Peer::test(), Peer::test());

        let mut tree = PeerSubscriptionTree::new();
        tree.add(peer1, &binding_key!["my_routing"]);
        tree.add(peer2, &binding_key!["my_routing", *, "456"]);
        tree.add(peer3, &binding_key!["my_other_routing", "september", *]);

        assert_eq!(tree.get_peers(&RoutingKey::default()).len(), 3);
    }

    #[test]
    fn add_is_idempotent() {
        let peer = Peer::test();
        let mut tree = PeerSubscriptionTree::new();
        tree.add(peer.clone(), &binding_key!["a", *]);
        tree.add(peer.clone(), &binding_key!["a", *]);

        assert_eq!(tree.get_peers(&routing(vec!["a", "b"])), vec![peer]);
    }

    #[test]
    fn remove_prunes_the_tree() {
        let peer = Peer::test();
        let mut tree = PeerSubscriptionTree::new();

        let binding = binding_key!["my_routing", *, "test"];
        tree.add(peer.clone(), &binding);
        tree.remove(&peer.id, &binding);

        assert!(tree.get_peers(&routing(vec!["my_routing", "x", "test"])).is_empty());
        assert!(tree.is_empty());

        // Removing again is a no-op
        tree.remove(&peer.id, &binding);
        assert!(tree.is_empty());
    }

    #[test]
    fn remove_keeps_other_bindings() {
        let (peer1, peer2) = (Peer::test(), Peer::test());
        let mut tree = PeerSubscriptionTree::new();
        tree.add(peer1.clone(), &binding_key!["a", "b"]);
        tree.add(peer2.clone(), &binding_key!["a", "b"]);

        tree.remove(&peer1.id, &binding_key!["a", "b"]);

        assert_eq!(tree.get_peers(&routing(vec!["a", "b"])), vec![peer2]);
    }
}
