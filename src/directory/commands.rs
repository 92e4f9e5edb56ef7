use super::descriptor::proto;
use crate::core::impl_message;
use crate::proto::bcl;
use crate::{Peer, PeerId};

/// Command registering a peer with the directory
#[derive(Clone, prost::Message)]
pub struct RegisterPeerCommand {
    /// Description of the peer to register
    #[prost(message, required, tag = "1")]
    pub peer: proto::PeerDescriptor,
}

impl_message!(
    RegisterPeerCommand,
    "Peerbus.Directory.RegisterPeerCommand",
    Command
);

/// Response of the [`RegisterPeerCommand`] command
#[derive(Clone, prost::Message)]
pub struct RegisterPeerResponse {
    /// The peers currently registered to the directory
    #[prost(message, repeated, tag = "1")]
    pub peer_descriptors: Vec<proto::PeerDescriptor>,
}

impl_message!(
    RegisterPeerResponse,
    "Peerbus.Directory.RegisterPeerResponse",
    Command
);

/// Command replacing the subscriptions of a peer for the listed message
/// types only
#[derive(Clone, prost::Message)]
pub struct UpdatePeerSubscriptionsForTypesCommand {
    /// Id of the peer to update
    #[prost(message, required, tag = "1")]
    pub peer_id: PeerId,

    /// Logical timestamp gating the update
    #[prost(message, optional, tag = "2")]
    pub timestamp_utc: Option<bcl::DateTime>,

    /// Replacement binding keys, one slice per message type
    #[prost(message, repeated, tag = "3")]
    pub subscriptions_for_types: Vec<crate::proto::SubscriptionsForType>,
}

impl_message!(
    UpdatePeerSubscriptionsForTypesCommand,
    "Peerbus.Directory.UpdatePeerSubscriptionsForTypesCommand",
    Command
);

/// Command removing a peer from the directory
#[derive(Clone, prost::Message)]
pub struct UnregisterPeerCommand {
    /// The peer to unregister
    #[prost(message, required, tag = "1")]
    pub peer: Peer,

    /// Logical timestamp of the unregistration
    #[prost(message, optional, tag = "2")]
    pub timestamp_utc: Option<bcl::DateTime>,
}

impl_message!(
    UnregisterPeerCommand,
    "Peerbus.Directory.UnregisterPeerCommand",
    Command
);

/// Command sent by the directory to check that a peer is responding
#[derive(Clone, prost::Message)]
pub struct PingPeerCommand {}

impl_message!(PingPeerCommand, "Peerbus.Directory.PingPeerCommand", Command);
