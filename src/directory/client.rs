use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::commands::{
    PingPeerCommand, RegisterPeerCommand, UnregisterPeerCommand,
    UpdatePeerSubscriptionsForTypesCommand,
};
use super::descriptor::PeerDescriptor;
use super::entry::{PeerEntry, SubscriptionIndex};
use super::event::PeerEvent;
use super::events::{
    PeerDecommissioned, PeerNotResponding, PeerResponding, PeerStarted, PeerStopped,
    PeerSubscriptionsForTypesUpdated, PeerSubscriptionsUpdated,
};
use super::{
    error_codes, DirectoryBus, DirectoryBusError, DirectoryCommand, DIRECTORY_DISPATCH_QUEUE,
};
use crate::dispatch::{handler_of, HandlerModule, MessageContext, TypeMapContainer};
use crate::core::Handler;
use crate::proto::{AsProtobuf, FromProtobuf, IntoProtobuf};
use crate::routing::MessageBinding;
use crate::sync::stream::{BroadcastStream, EventStream};
use crate::timestamp::UniqueTimestampProvider;
use crate::{BusConfiguration, Peer, PeerId, Subscription, SubscriptionsForType};

/// Error of one registration attempt against one directory peer
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The directory did not answer within the registration timeout
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The directory already has a registered peer with this id
    #[error("a peer with the same id is already registered")]
    PeerAlreadyExists,

    /// The directory answered with an unexpected error code
    #[error("directory returned error code {0}")]
    ErrorCode(i32),

    /// The response carried no peer descriptors
    #[error("directory response is missing its peer descriptors")]
    InvalidResponse,

    /// The send itself failed
    #[error(transparent)]
    Bus(#[from] DirectoryBusError),
}

/// Fatal registration failure: every configured directory peer was tried
#[derive(Debug, Default)]
pub struct RegistrationExhausted {
    attempts: Vec<(Peer, RegistrationError)>,
}

impl RegistrationExhausted {
    fn add(&mut self, peer: Peer, error: RegistrationError) {
        self.attempts.push((peer, error));
    }

    pub fn attempts(&self) -> impl Iterator<Item = (&Peer, &RegistrationError)> {
        self.attempts.iter().map(|(peer, error)| (peer, error))
    }

    pub fn find(
        &self,
        predicate: impl Fn(&RegistrationError) -> bool,
    ) -> Option<&RegistrationError> {
        self.attempts
            .iter()
            .map(|(_, error)| error)
            .find(|error| predicate(error))
    }
}

impl fmt::Display for RegistrationExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to register on any directory peer:")?;
        for (peer, error) in &self.attempts {
            write!(f, " {} ({error});", peer.endpoint)?;
        }
        Ok(())
    }
}

impl std::error::Error for RegistrationExhausted {}

/// Errors returned by directory client operations after registration
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The operation requires a completed registration
    #[error("peer is not registered to a directory")]
    NotRegistered,

    /// Every directory peer rejected the operation
    #[error(transparent)]
    Exhausted(#[from] RegistrationExhausted),
}

/// Typed form of the wire events applied to the directory state
#[derive(Clone)]
pub enum DirectoryEvent {
    Started(PeerStarted),
    Stopped(PeerStopped),
    Decommissioned(PeerDecommissioned),
    SubscriptionsUpdated(PeerSubscriptionsUpdated),
    SubscriptionsForTypesUpdated(PeerSubscriptionsForTypesUpdated),
    NotResponding(PeerNotResponding),
    Responding(PeerResponding),
    Ping(PingPeerCommand),
}

/// Buffer for directory events arriving while a registration is in flight
enum Inbox {
    Closed,
    Open(VecDeque<DirectoryEvent>),
}

struct Inner {
    peers: HashMap<PeerId, PeerEntry>,
    subscriptions: SubscriptionIndex,
}

impl Inner {
    fn new() -> Self {
        Self {
            peers: HashMap::new(),
            subscriptions: SubscriptionIndex::new(),
        }
    }

    fn add_or_update(&mut self, descriptor: PeerDescriptor) {
        let peer_id = descriptor.peer.id.clone();
        let subscriptions = descriptor.subscriptions.clone();
        let timestamp_utc = descriptor.timestamp_utc;

        let entry = self
            .peers
            .entry(peer_id)
            .and_modify(|e| e.update(&descriptor))
            .or_insert_with(|| PeerEntry::new(&descriptor));

        entry.set_subscriptions(&mut self.subscriptions, subscriptions, timestamp_utc);
    }
}

/// State captured when the registration succeeded.
///
/// Unregistration reuses this directory peer list rather than a fresh
/// configuration lookup, which may have changed endpoints in the meantime.
struct RegistrationState {
    self_peer: Peer,
    directory_peers: Vec<Peer>,
}

/// Peer-side replica of the directory.
///
/// Registers the local peer with one of the configured directory servers,
/// applies the returned global snapshot, then keeps its peer map and
/// subscription trees consistent by applying the stream of directory
/// events, ordered per peer by logical timestamp.
pub struct PeerDirectoryClient {
    configuration: BusConfiguration,
    bus: Arc<dyn DirectoryBus>,
    timestamps: UniqueTimestampProvider,
    inner: RwLock<Inner>,
    inbox: Mutex<Inbox>,
    registration: Mutex<Option<RegistrationState>>,
    events: EventStream<PeerEvent>,
}

impl PeerDirectoryClient {
    pub fn new(configuration: BusConfiguration, bus: Arc<dyn DirectoryBus>) -> Arc<Self> {
        Arc::new(Self {
            configuration,
            bus,
            timestamps: UniqueTimestampProvider::new(),
            inner: RwLock::new(Inner::new()),
            inbox: Mutex::new(Inbox::Closed),
            registration: Mutex::new(None),
            events: EventStream::new(128),
        })
    }

    /// Stream of local notifications raised when the directory view changes
    pub fn subscribe(&self) -> BroadcastStream<PeerEvent> {
        self.events.stream()
    }

    /// Register `self_peer` with its startup `subscriptions` on the first
    /// directory peer that answers.
    ///
    /// Directory events arriving while the registration is in flight are
    /// buffered and applied, in arrival order, once the returned snapshot
    /// has been applied.
    pub async fn register(
        &self,
        self_peer: Peer,
        subscriptions: Vec<Subscription>,
    ) -> Result<(), RegistrationExhausted> {
        let timestamp = self.timestamps.next();
        let descriptor = PeerDescriptor {
            peer: self_peer.clone(),
            is_persistent: self.configuration.is_persistent,
            timestamp_utc: Some(timestamp),
            subscriptions,
            has_debugger_attached: false,
        };

        // The self entry is visible before any directory call returns
        self.inner.write().unwrap().add_or_update(descriptor.clone());

        self.open_inbox();

        let directory_peers = self.configuration.directory_peers();
        let mut exhausted = RegistrationExhausted::default();

        for directory_peer in &directory_peers {
            info!("registering on directory {directory_peer}");

            match self.try_register(&descriptor, directory_peer).await {
                Ok(descriptors) => {
                    {
                        let mut inner = self.inner.write().unwrap();
                        for descriptor in descriptors {
                            inner.add_or_update(descriptor);
                        }
                    }

                    *self.registration.lock().unwrap() = Some(RegistrationState {
                        self_peer,
                        directory_peers: directory_peers.clone(),
                    });

                    self.close_and_drain_inbox();
                    return Ok(());
                }
                Err(e) => {
                    error!("failed to register on directory {directory_peer}: {e}");
                    exhausted.add(directory_peer.clone(), e);
                }
            }
        }

        self.close_and_drain_inbox();
        Err(exhausted)
    }

    async fn try_register(
        &self,
        descriptor: &PeerDescriptor,
        directory_peer: &Peer,
    ) -> Result<Vec<PeerDescriptor>, RegistrationError> {
        let command = RegisterPeerCommand {
            peer: descriptor.as_protobuf(),
        };

        let timeout = self.configuration.registration_timeout;
        let response = tokio::time::timeout(
            timeout,
            self.bus
                .send(DirectoryCommand::Register(command), directory_peer),
        )
        .await
        .map_err(|_| RegistrationError::Timeout(timeout))??;

        match response.error_code {
            0 => {}
            error_codes::PEER_ALREADY_EXISTS => return Err(RegistrationError::PeerAlreadyExists),
            code => return Err(RegistrationError::ErrorCode(code)),
        }

        let register_response = response
            .register_response
            .ok_or(RegistrationError::InvalidResponse)?;

        Ok(register_response
            .peer_descriptors
            .into_iter()
            .map(PeerDescriptor::from_protobuf)
            .collect())
    }

    /// Replace the local peer's subscriptions for the listed message types,
    /// locally and on the first directory peer that answers
    pub async fn update_subscriptions_for_types(
        &self,
        updates: Vec<SubscriptionsForType>,
    ) -> Result<(), DirectoryError> {
        let (self_peer, directory_peers) = self.registered_state()?;
        let timestamp = self.timestamps.next();

        {
            let mut inner = self.inner.write().unwrap();
            let Inner {
                ref mut peers,
                ref mut subscriptions,
            } = *inner;
            if let Some(entry) = peers.get_mut(&self_peer.id) {
                entry.set_subscriptions_for_types(
                    subscriptions,
                    updates.clone(),
                    Some(timestamp),
                );
            }
        }

        let command = UpdatePeerSubscriptionsForTypesCommand {
            peer_id: self_peer.id.clone(),
            timestamp_utc: Some(timestamp.into()),
            subscriptions_for_types: updates.into_protobuf(),
        };

        self.send_to_first(
            DirectoryCommand::UpdateSubscriptionsForTypes(command),
            &directory_peers,
        )
        .await
        .map_err(DirectoryError::Exhausted)
    }

    /// Unregister from the directory peer list cached at registration time
    pub async fn unregister(&self) -> Result<(), DirectoryError> {
        let (self_peer, directory_peers) = self.registered_state()?;
        let timestamp = self.timestamps.next();

        let command = UnregisterPeerCommand {
            peer: self_peer,
            timestamp_utc: Some(timestamp.into()),
        };

        self.send_to_first(DirectoryCommand::Unregister(command), &directory_peers)
            .await
            .map_err(DirectoryError::Exhausted)
    }

    fn registered_state(&self) -> Result<(Peer, Vec<Peer>), DirectoryError> {
        let registration = self.registration.lock().unwrap();
        registration
            .as_ref()
            .map(|state| (state.self_peer.clone(), state.directory_peers.clone()))
            .ok_or(DirectoryError::NotRegistered)
    }

    async fn send_to_first(
        &self,
        command: DirectoryCommand,
        directory_peers: &[Peer],
    ) -> Result<(), RegistrationExhausted> {
        let timeout = self.configuration.registration_timeout;
        let mut exhausted = RegistrationExhausted::default();

        for directory_peer in directory_peers {
            let attempt =
                tokio::time::timeout(timeout, self.bus.send(command.clone(), directory_peer))
                    .await
                    .map_err(|_| RegistrationError::Timeout(timeout));

            match attempt {
                Ok(Ok(response)) if response.error_code == 0 => return Ok(()),
                Ok(Ok(response)) => {
                    let e = RegistrationError::ErrorCode(response.error_code);
                    error!("directory {directory_peer} rejected {command:?}: {e}");
                    exhausted.add(directory_peer.clone(), e);
                }
                Ok(Err(e)) => {
                    error!("failed to reach directory {directory_peer}: {e}");
                    exhausted.add(directory_peer.clone(), RegistrationError::Bus(e));
                }
                Err(e) => {
                    error!("directory {directory_peer} timed out");
                    exhausted.add(directory_peer.clone(), e);
                }
            }
        }

        Err(exhausted)
    }

    fn open_inbox(&self) {
        *self.inbox.lock().unwrap() = Inbox::Open(VecDeque::new());
    }

    /// Mark the inbox completed and apply the buffered events in arrival
    /// order. The inbox lock is held for the whole drain so events arriving
    /// concurrently apply after the buffered ones.
    fn close_and_drain_inbox(&self) {
        let mut inbox = self.inbox.lock().unwrap();
        if let Inbox::Open(buffered) = std::mem::replace(&mut *inbox, Inbox::Closed) {
            debug!("draining {} buffered directory events", buffered.len());
            for event in buffered {
                self.apply(event);
            }
        }
    }

    /// Entry point of directory events routed through the dispatcher.
    /// Events arriving while a registration is in flight are buffered.
    pub fn handle_event(&self, event: DirectoryEvent) {
        {
            let mut inbox = self.inbox.lock().unwrap();
            if let Inbox::Open(ref mut buffered) = *inbox {
                buffered.push_back(event);
                return;
            }
        }

        self.apply(event);
    }

    fn apply(&self, event: DirectoryEvent) {
        match event {
            DirectoryEvent::Started(e) => self.on_peer_started(e),
            DirectoryEvent::Stopped(e) => self.on_peer_stopped(e),
            DirectoryEvent::Decommissioned(e) => self.on_peer_decommissioned(e),
            DirectoryEvent::SubscriptionsUpdated(e) => self.on_peer_subscriptions_updated(e),
            DirectoryEvent::SubscriptionsForTypesUpdated(e) => {
                self.on_peer_subscriptions_for_types_updated(e)
            }
            DirectoryEvent::NotResponding(e) => self.on_peer_responding_changed(e.id, false),
            DirectoryEvent::Responding(e) => self.on_peer_responding_changed(e.id, true),
            DirectoryEvent::Ping(_) => debug!("pinged by the directory"),
        }
    }

    fn on_peer_started(&self, event: PeerStarted) {
        let descriptor = PeerDescriptor::from_protobuf(event.descriptor);
        let peer_id = descriptor.peer.id.clone();

        self.inner.write().unwrap().add_or_update(descriptor);
        self.events.send(PeerEvent::Started(peer_id));
    }

    fn on_peer_stopped(&self, event: PeerStopped) {
        let timestamp: Option<DateTime<Utc>> =
            event.timestamp_utc.and_then(|t| t.try_into().ok());

        let stopped = {
            let mut inner = self.inner.write().unwrap();
            match inner.peers.get_mut(&event.id) {
                Some(entry) if entry.accepts(timestamp) => {
                    let peer = entry.peer_mut();
                    peer.is_up = false;
                    peer.is_responding = false;
                    entry.set_timestamp_utc(timestamp);
                    true
                }
                Some(_) => {
                    info!("dropping outdated stop of peer {}", event.id);
                    false
                }
                None => {
                    debug!("stop received for unknown peer {}", event.id);
                    false
                }
            }
        };

        if stopped {
            self.events.send(PeerEvent::Stopped(event.id));
        }
    }

    fn on_peer_decommissioned(&self, event: PeerDecommissioned) {
        let removed = {
            let mut inner = self.inner.write().unwrap();
            let Inner {
                ref mut peers,
                ref mut subscriptions,
            } = *inner;

            peers.remove(&event.id).map(|mut entry| {
                entry.remove_subscriptions(subscriptions);
            })
        };

        if removed.is_some() {
            self.events.send(PeerEvent::Decommissioned(event.id));
        }
    }

    fn on_peer_subscriptions_updated(&self, event: PeerSubscriptionsUpdated) {
        let descriptor = PeerDescriptor::from_protobuf(event.descriptor);
        let peer_id = descriptor.peer.id.clone();
        let timestamp = descriptor.timestamp_utc;

        let updated = {
            let mut inner = self.inner.write().unwrap();
            let Inner {
                ref mut peers,
                ref mut subscriptions,
            } = *inner;

            match peers.get_mut(&peer_id) {
                Some(entry) if entry.accepts(timestamp) => {
                    entry.update(&descriptor);
                    entry.set_subscriptions(subscriptions, descriptor.subscriptions, timestamp);
                    true
                }
                Some(_) => {
                    info!("dropping outdated subscription update of peer {peer_id}");
                    false
                }
                None => {
                    warn!("subscription update received for unknown peer {peer_id}");
                    false
                }
            }
        };

        if updated {
            self.events.send(PeerEvent::Updated(peer_id));
        }
    }

    fn on_peer_subscriptions_for_types_updated(&self, event: PeerSubscriptionsForTypesUpdated) {
        let timestamp: Option<DateTime<Utc>> =
            event.timestamp_utc.and_then(|t| t.try_into().ok());
        let updates = Vec::from_protobuf(event.subscriptions_for_types);

        let updated = {
            let mut inner = self.inner.write().unwrap();
            let Inner {
                ref mut peers,
                ref mut subscriptions,
            } = *inner;

            match peers.get_mut(&event.peer_id) {
                Some(entry) => {
                    entry.set_subscriptions_for_types(subscriptions, updates, timestamp);
                    true
                }
                None => {
                    warn!(
                        "subscription update received for unknown peer {}",
                        event.peer_id
                    );
                    false
                }
            }
        };

        if updated {
            self.events.send(PeerEvent::Updated(event.peer_id));
        }
    }

    fn on_peer_responding_changed(&self, peer_id: PeerId, is_responding: bool) {
        let updated = {
            let mut inner = self.inner.write().unwrap();
            match inner.peers.get_mut(&peer_id) {
                Some(entry) => {
                    entry.peer_mut().is_responding = is_responding;
                    true
                }
                None => false,
            }
        };

        if updated {
            self.events.send(PeerEvent::Updated(peer_id));
        }
    }

    /// Live state of a peer
    pub fn get_peer(&self, peer_id: &PeerId) -> Option<Peer> {
        let inner = self.inner.read().unwrap();
        inner.peers.get(peer_id).map(|entry| entry.peer().clone())
    }

    /// Snapshot of a peer entry
    pub fn get_peer_descriptor(&self, peer_id: &PeerId) -> Option<PeerDescriptor> {
        let inner = self.inner.read().unwrap();
        inner.peers.get(peer_id).map(PeerEntry::to_descriptor)
    }

    /// Peers holding a subscription matching the message binding, each at
    /// most once. Consulted on every outbound message.
    pub fn get_peers_handling(&self, binding: &MessageBinding) -> Vec<Peer> {
        let inner = self.inner.read().unwrap();
        inner
            .subscriptions
            .get_peers(binding.message_type_id(), binding.routing_key())
    }

    /// Handler module routing directory events and pings into this client,
    /// serialized on the directory dispatch queue
    pub fn handler_module(self: &Arc<Self>, container: &mut TypeMapContainer) -> HandlerModule {
        let client = Arc::clone(self);
        container.register(move || DirectoryEventHandler {
            client: Arc::clone(&client),
        });

        HandlerModule::new("directory")
            .handles(
                handler_of::<PeerStarted, DirectoryEventHandler>()
                    .in_dispatch_queue(DIRECTORY_DISPATCH_QUEUE),
            )
            .handles(
                handler_of::<PeerStopped, DirectoryEventHandler>()
                    .in_dispatch_queue(DIRECTORY_DISPATCH_QUEUE),
            )
            .handles(
                handler_of::<PeerDecommissioned, DirectoryEventHandler>()
                    .in_dispatch_queue(DIRECTORY_DISPATCH_QUEUE),
            )
            .handles(
                handler_of::<PeerSubscriptionsUpdated, DirectoryEventHandler>()
                    .in_dispatch_queue(DIRECTORY_DISPATCH_QUEUE),
            )
            .handles(
                handler_of::<PeerSubscriptionsForTypesUpdated, DirectoryEventHandler>()
                    .in_dispatch_queue(DIRECTORY_DISPATCH_QUEUE),
            )
            .handles(
                handler_of::<PeerNotResponding, DirectoryEventHandler>()
                    .in_dispatch_queue(DIRECTORY_DISPATCH_QUEUE),
            )
            .handles(
                handler_of::<PeerResponding, DirectoryEventHandler>()
                    .in_dispatch_queue(DIRECTORY_DISPATCH_QUEUE),
            )
            .handles(
                handler_of::<PingPeerCommand, DirectoryEventHandler>()
                    .in_dispatch_queue(DIRECTORY_DISPATCH_QUEUE),
            )
    }
}

/// Forwards directory events routed through the dispatcher into the client
pub struct DirectoryEventHandler {
    client: Arc<PeerDirectoryClient>,
}

macro_rules! forward_event {
    ($message:ty, $variant:ident) => {
        impl Handler<$message> for DirectoryEventHandler {
            type Err = Infallible;

            fn handle(
                &mut self,
                message: $message,
                _context: &MessageContext,
            ) -> Result<(), Infallible> {
                self.client.handle_event(DirectoryEvent::$variant(message));
                Ok(())
            }
        }
    };
}

forward_event!(PeerStarted, Started);
forward_event!(PeerStopped, Stopped);
forward_event!(PeerDecommissioned, Decommissioned);
forward_event!(PeerSubscriptionsUpdated, SubscriptionsUpdated);
forward_event!(PeerSubscriptionsForTypesUpdated, SubscriptionsForTypesUpdated);
forward_event!(PeerNotResponding, NotResponding);
forward_event!(PeerResponding, Responding);
forward_event!(PingPeerCommand, Ping);
