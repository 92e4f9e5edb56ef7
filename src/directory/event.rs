use crate::PeerId;

/// Local notification raised by the directory client when its view of a
/// peer changed
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PeerEvent {
    /// A new peer has been started
    Started(PeerId),

    /// The peer has been stopped
    Stopped(PeerId),

    /// The peer entry has been updated
    Updated(PeerId),

    /// The peer has been decommissioned
    Decommissioned(PeerId),
}

impl PeerEvent {
    pub fn peer_id(&self) -> &PeerId {
        match self {
            PeerEvent::Started(peer_id)
            | PeerEvent::Stopped(peer_id)
            | PeerEvent::Updated(peer_id)
            | PeerEvent::Decommissioned(peer_id) => peer_id,
        }
    }
}
