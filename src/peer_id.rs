use std::fmt;

/// Identifies a named peer throughout bus communication between peers
#[derive(Clone, Eq, PartialEq, Hash, prost::Message)]
pub struct PeerId {
    #[prost(string, tag = "1")]
    value: String,
}

impl PeerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    /// Synthesized id of the `instance_id`-th configured directory server
    pub(crate) fn directory(instance_id: usize) -> Self {
        let value = format!("Peerbus.Directory.{instance_id}");
        Self { value }
    }

    #[cfg(test)]
    pub(crate) fn test() -> Self {
        let uuid = uuid::Uuid::new_v4();
        Self {
            value: format!("Peerbus.Testing.{uuid}"),
        }
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}
