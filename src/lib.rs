//! Core of a peer-to-peer service bus.
//!
//! Autonomous peers exchange typed commands and events discovered through a
//! shared directory. This crate provides the three subsystems at the heart
//! of a peer:
//!
//! - the [`dispatch`] engine, resolving the local handlers consuming an
//!   inbound message, serializing them onto named dispatch queues and
//!   reporting aggregate outcomes;
//! - the [`directory`] client, a consistent replica of the global peer
//!   directory maintained by a registration handshake and a stream of
//!   directory events ordered by logical timestamp;
//! - the [`routing`] subscription index, mapping wildcarded binding keys to
//!   the peers currently subscribed, consulted on every outbound message.
//!
//! The wire transport, serialization codec and the directory server itself
//! are external collaborators.
mod bcl;
mod bus_configuration;
pub mod core;
pub mod directory;
pub mod dispatch;
mod message_id;
mod message_type_id;
mod peer;
mod peer_id;
pub mod proto;
pub mod routing;
mod subscription;
mod sync;
mod timestamp;

pub use bus_configuration::{BusConfiguration, DEFAULT_REGISTRATION_TIMEOUT};
pub use message_id::MessageId;
pub use message_type_id::MessageTypeId;
pub use peer::Peer;
pub use peer_id::PeerId;
pub use subscription::{Subscription, SubscriptionsForType};
pub use timestamp::UniqueTimestampProvider;

pub use crate::core::{
    AsyncHandler, Command, Event, Handler, Message, MessageDescriptor, MultiEventHandler,
    SubscriptionMode,
};
pub use directory::{DirectoryBus, PeerDirectoryClient, PeerEvent};
pub use dispatch::{
    DispatchResult, LocalDispatch, MessageContext, MessageDispatch, MessageDispatcher,
};
pub use routing::{BindingKey, BindingKeyFragment, MessageBinding, RoutingKey};
