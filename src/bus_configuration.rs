use std::time::Duration;

use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::{Peer, PeerId};

/// Default time to wait for when registering to a directory
pub const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration parameters for a peer of the bus
#[derive(Debug, Clone)]
pub struct BusConfiguration {
    /// The list of directory servers that can be used by the peer to
    /// register. The syntax is `tcp://hostname:port`
    pub directory_endpoints: Vec<String>,

    /// The time to wait for when registering to a directory; once this time
    /// is over, the next directory in the list is tried.
    pub registration_timeout: Duration,

    /// A peer marked as persistent keeps its subscriptions and message queue
    /// in the directory while it is down
    pub is_persistent: bool,

    /// Mainly a debugging setting, setting it to false will prevent the peer
    /// from connecting to a random directory when registering
    pub pick_random_directory: bool,
}

impl BusConfiguration {
    /// Update the configuration with the given directory `endpoints`
    pub fn with_directory_endpoints<T: Into<String>>(
        mut self,
        endpoints: impl IntoIterator<Item = T>,
    ) -> Self {
        self.directory_endpoints
            .extend(endpoints.into_iter().map(Into::into));
        self
    }

    /// Update the configuration with the given registration `timeout`
    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    /// Update the configuration to toggle random directory selection on
    /// registration
    pub fn with_random_directory(mut self, value: bool) -> Self {
        self.pick_random_directory = value;
        self
    }

    /// Update the configuration to toggle persistence
    pub fn with_persistence(mut self, value: bool) -> Self {
        self.is_persistent = value;
        self
    }

    /// Return the [`Peer`] peers for the configured directory endpoints, in
    /// registration order. The peers are shuffled when
    /// [`Self::pick_random_directory`] is true.
    pub(crate) fn directory_peers(&self) -> Vec<Peer> {
        let mut peers = self
            .directory_endpoints
            .iter()
            .enumerate()
            .map(|(idx, endpoint)| Peer::new(PeerId::directory(idx), endpoint))
            .collect::<Vec<_>>();

        if self.pick_random_directory {
            peers.shuffle(&mut thread_rng());
        }

        peers
    }
}

impl Default for BusConfiguration {
    fn default() -> Self {
        Self {
            directory_endpoints: Vec::new(),
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            is_persistent: false,
            pick_random_directory: true,
        }
    }
}
