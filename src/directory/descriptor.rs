use chrono::{DateTime, Utc};

use crate::proto::{FromProtobuf, IntoProtobuf};
use crate::{Peer, Subscription};

pub(crate) mod proto {
    /// Wire description of a [`Peer`](crate::Peer) and its subscriptions
    #[derive(Clone, prost::Message)]
    pub struct PeerDescriptor {
        #[prost(message, required, tag = "1")]
        pub peer: crate::Peer,

        #[prost(message, repeated, tag = "2")]
        pub subscriptions: Vec<crate::proto::Subscription>,

        #[prost(bool, required, tag = "3")]
        pub is_persistent: bool,

        #[prost(message, optional, tag = "4")]
        pub timestamp_utc: Option<crate::proto::bcl::DateTime>,

        #[prost(bool, optional, tag = "5")]
        pub has_debugger_attached: Option<bool>,
    }
}

/// Immutable snapshot of a peer, its persistence flag, logical timestamp and
/// subscriptions, as delivered in directory events and responses
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PeerDescriptor {
    pub peer: Peer,

    pub is_persistent: bool,

    pub timestamp_utc: Option<DateTime<Utc>>,

    pub subscriptions: Vec<Subscription>,

    pub has_debugger_attached: bool,
}

impl PeerDescriptor {
    pub fn new(peer: Peer, subscriptions: Vec<Subscription>) -> Self {
        Self {
            peer,
            is_persistent: false,
            timestamp_utc: None,
            subscriptions,
            has_debugger_attached: false,
        }
    }

    pub fn peer_id(&self) -> &crate::PeerId {
        &self.peer.id
    }
}

impl IntoProtobuf for PeerDescriptor {
    type Output = proto::PeerDescriptor;

    fn into_protobuf(self) -> Self::Output {
        proto::PeerDescriptor {
            peer: self.peer,
            subscriptions: self.subscriptions.into_protobuf(),
            is_persistent: self.is_persistent,
            timestamp_utc: self.timestamp_utc.map(Into::into),
            has_debugger_attached: Some(self.has_debugger_attached),
        }
    }
}

impl FromProtobuf for PeerDescriptor {
    type Input = proto::PeerDescriptor;

    fn from_protobuf(input: Self::Input) -> Self {
        Self {
            peer: input.peer,
            is_persistent: input.is_persistent,
            timestamp_utc: input.timestamp_utc.and_then(|t| t.try_into().ok()),
            subscriptions: Vec::from_protobuf(input.subscriptions),
            has_debugger_attached: input.has_debugger_attached.unwrap_or(false),
        }
    }
}
