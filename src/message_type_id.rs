use std::fmt;

use crate::core::MessageDescriptor;
use crate::Message;

/// Stable string identity of a message type, shared between peers and the
/// directory. The full name is the identity; two ids compare equal when their
/// full names do.
#[derive(Clone, Eq, PartialEq, Hash, prost::Message)]
pub struct MessageTypeId {
    #[prost(string, tag = "1")]
    full_name: String,
}

impl MessageTypeId {
    pub fn of<M: MessageDescriptor>() -> Self {
        Self {
            full_name: M::name().to_string(),
        }
    }

    pub fn of_val(message: &dyn Message) -> Self {
        Self {
            full_name: message.name().to_string(),
        }
    }

    pub fn from_name(full_name: impl Into<String>) -> Self {
        Self {
            full_name: full_name.into(),
        }
    }

    /// Returns the fully qualified name of this message type
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn is<M: MessageDescriptor>(&self) -> bool {
        self.full_name == M::name()
    }
}

impl AsRef<str> for MessageTypeId {
    fn as_ref(&self) -> &str {
        &self.full_name
    }
}

impl fmt::Display for MessageTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.full_name)
    }
}
