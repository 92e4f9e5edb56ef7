use std::fmt;

pub(crate) mod proto {
    /// Wire representation of a [`super::MessageId`], split in two fixed64 halves
    #[derive(Clone, Copy, Eq, PartialEq, prost::Message)]
    pub struct MessageId {
        #[prost(fixed64, tag = "1")]
        pub lo: u64,

        #[prost(fixed64, tag = "2")]
        pub hi: u64,
    }
}

/// Unique identity of a message flowing through the bus
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct MessageId(uuid::Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn value(&self) -> uuid::Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<MessageId> for proto::MessageId {
    fn from(id: MessageId) -> Self {
        let (hi, lo) = id.0.as_u64_pair();
        Self { lo, hi }
    }
}

impl From<proto::MessageId> for MessageId {
    fn from(id: proto::MessageId) -> Self {
        Self(uuid::Uuid::from_u64_pair(id.hi, id.lo))
    }
}
