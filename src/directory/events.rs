use super::descriptor::proto;
use crate::core::impl_message;
use crate::proto::bcl;
use crate::PeerId;

/// Event raised when a new peer has been started
#[derive(Clone, prost::Message)]
pub struct PeerStarted {
    /// Descriptor of the peer that started
    #[prost(message, required, tag = "1")]
    pub descriptor: proto::PeerDescriptor,
}

impl_message!(PeerStarted, "Peerbus.Directory.PeerStarted", Event);

/// Event raised when a peer has been stopped.
///
/// The peer keeps its directory entry; only its liveness flags flip.
#[derive(Clone, prost::Message)]
pub struct PeerStopped {
    /// Id of the stopped peer
    #[prost(message, required, tag = "1")]
    pub id: PeerId,

    /// Endpoint of the stopped peer
    #[prost(string, optional, tag = "2")]
    pub endpoint: Option<String>,

    /// UTC timestamp when the peer was stopped
    #[prost(message, optional, tag = "3")]
    pub timestamp_utc: Option<bcl::DateTime>,
}

impl_message!(PeerStopped, "Peerbus.Directory.PeerStopped", Event);

/// Event raised when a peer has been decommissioned and its entry removed
#[derive(Clone, prost::Message)]
pub struct PeerDecommissioned {
    /// Id of the decommissioned peer
    #[prost(message, required, tag = "1")]
    pub id: PeerId,
}

impl_message!(
    PeerDecommissioned,
    "Peerbus.Directory.PeerDecommissioned",
    Event
);

/// Event raised when the full subscription set of a peer changed
#[derive(Clone, prost::Message)]
pub struct PeerSubscriptionsUpdated {
    /// Descriptor of the updated peer, carrying its new subscriptions
    #[prost(message, required, tag = "1")]
    pub descriptor: proto::PeerDescriptor,
}

impl_message!(
    PeerSubscriptionsUpdated,
    "Peerbus.Directory.PeerSubscriptionsUpdated",
    Event
);

/// Event raised when the subscriptions of a peer changed for a subset of
/// message types
#[derive(Clone, prost::Message)]
pub struct PeerSubscriptionsForTypesUpdated {
    /// Id of the updated peer
    #[prost(message, required, tag = "1")]
    pub peer_id: PeerId,

    /// Replacement binding keys, one slice per message type
    #[prost(message, repeated, tag = "2")]
    pub subscriptions_for_types: Vec<crate::proto::SubscriptionsForType>,

    /// Logical timestamp gating every slice of the update
    #[prost(message, optional, tag = "3")]
    pub timestamp_utc: Option<bcl::DateTime>,
}

impl_message!(
    PeerSubscriptionsForTypesUpdated,
    "Peerbus.Directory.PeerSubscriptionsForTypesUpdated",
    Event
);

/// Event raised when a peer stopped answering pings
#[derive(Clone, prost::Message)]
pub struct PeerNotResponding {
    /// Id of the peer that is not responding
    #[prost(message, required, tag = "1")]
    pub id: PeerId,
}

impl_message!(
    PeerNotResponding,
    "Peerbus.Directory.PeerNotResponding",
    Event
);

/// Event raised when a peer answers pings again
#[derive(Clone, prost::Message)]
pub struct PeerResponding {
    /// Id of the peer that is responding
    #[prost(message, required, tag = "1")]
    pub id: PeerId,
}

impl_message!(PeerResponding, "Peerbus.Directory.PeerResponding", Event);
