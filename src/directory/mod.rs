//! Peer-side replica of the global directory: a consistent view of all
//! peers, their endpoints, liveness and subscriptions, maintained by a
//! registration handshake and a stream of directory events ordered by
//! logical timestamp.
mod client;
mod commands;
pub(crate) mod descriptor;
mod entry;
mod event;
mod events;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{DirectoryError, DirectoryEvent, PeerDirectoryClient, RegistrationError,
    RegistrationExhausted};
pub use commands::{
    PingPeerCommand, RegisterPeerCommand, RegisterPeerResponse, UnregisterPeerCommand,
    UpdatePeerSubscriptionsForTypesCommand,
};
pub use descriptor::PeerDescriptor;
pub use event::PeerEvent;
pub use events::{
    PeerDecommissioned, PeerNotResponding, PeerResponding, PeerStarted, PeerStopped,
    PeerSubscriptionsForTypesUpdated, PeerSubscriptionsUpdated,
};

use crate::Peer;

/// Name of the dispatch queue serializing directory state changes
pub const DIRECTORY_DISPATCH_QUEUE: &str = "DirectoryQueue";

/// Error codes carried by directory responses
pub mod error_codes {
    /// The directory already holds a registration for the peer id
    pub const PEER_ALREADY_EXISTS: i32 = 2;
}

/// A command sent to a directory server
#[derive(Debug, Clone)]
pub enum DirectoryCommand {
    Register(RegisterPeerCommand),
    UpdateSubscriptionsForTypes(UpdatePeerSubscriptionsForTypesCommand),
    Unregister(UnregisterPeerCommand),
}

/// Response of a directory server to a [`DirectoryCommand`]
#[derive(Debug, Default, Clone)]
pub struct DirectoryResponse {
    /// Zero on success, one of [`error_codes`] otherwise
    pub error_code: i32,

    /// Payload of a successful [`DirectoryCommand::Register`]
    pub register_response: Option<RegisterPeerResponse>,
}

impl DirectoryResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn registered(response: RegisterPeerResponse) -> Self {
        Self {
            error_code: 0,
            register_response: Some(response),
        }
    }

    pub fn error(error_code: i32) -> Self {
        Self {
            error_code,
            register_response: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum DirectoryBusError {
    /// The underlying transport is closed
    #[error("the underlying transport has been closed")]
    Closed,

    /// Transport error
    #[error("an error occured during a transport operation: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),
}

/// Wire seam used by the directory client to reach directory servers.
///
/// One call sends one command to one directory peer and resolves with its
/// response; the client applies its own per-call timeout on top.
#[async_trait]
pub trait DirectoryBus: Send + Sync {
    async fn send(
        &self,
        command: DirectoryCommand,
        target: &Peer,
    ) -> Result<DirectoryResponse, DirectoryBusError>;
}
