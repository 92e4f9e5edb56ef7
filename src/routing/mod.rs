pub(crate) mod binding_key;
pub(crate) mod tree;

pub use binding_key::{BindingKey, BindingKeyFragment, RoutingKey};

use crate::{Message, MessageTypeId};

/// A message type together with the routing key of one of its instances,
/// the unit consulted against the directory on every outbound message
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MessageBinding {
    message_type_id: MessageTypeId,
    routing_key: RoutingKey,
}

impl MessageBinding {
    pub fn new(message_type_id: MessageTypeId, routing_key: RoutingKey) -> Self {
        Self {
            message_type_id,
            routing_key,
        }
    }

    /// Binding of a message instance, routed by its routable fields
    pub fn of_val(message: &dyn Message) -> Self {
        Self {
            message_type_id: MessageTypeId::of_val(message),
            routing_key: message.routing_key(),
        }
    }

    pub fn message_type_id(&self) -> &MessageTypeId {
        &self.message_type_id
    }

    pub fn routing_key(&self) -> &RoutingKey {
        &self.routing_key
    }
}
