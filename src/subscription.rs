use crate::core::MessageDescriptor;
use crate::proto::{FromProtobuf, IntoProtobuf};
use crate::{BindingKey, MessageTypeId};

pub(crate) mod proto {
    /// Wire representation of a [`super::Subscription`]
    #[derive(Clone, Eq, PartialEq, prost::Message)]
    pub struct Subscription {
        #[prost(message, required, tag = "1")]
        pub message_type_id: crate::MessageTypeId,

        #[prost(message, required, tag = "2")]
        pub binding_key: crate::proto::BindingKey,
    }

    /// Wire representation of a [`super::SubscriptionsForType`]
    #[derive(Clone, Eq, PartialEq, prost::Message)]
    pub struct SubscriptionsForType {
        #[prost(message, required, tag = "1")]
        pub message_type_id: crate::MessageTypeId,

        #[prost(message, repeated, tag = "2")]
        pub binding_keys: Vec<crate::proto::BindingKey>,
    }
}

/// Interest of a peer in one message type, scoped by a binding key
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct Subscription {
    message_type_id: MessageTypeId,
    binding_key: BindingKey,
}

impl Subscription {
    pub fn new(message_type_id: MessageTypeId, binding_key: BindingKey) -> Self {
        Self {
            message_type_id,
            binding_key,
        }
    }

    /// Subscription to every instance of `M`, regardless of routing
    pub fn any<M: MessageDescriptor>() -> Self {
        Self::with_binding::<M>(BindingKey::empty())
    }

    /// Subscription to instances of `M` matching `binding_key`
    pub fn with_binding<M: MessageDescriptor>(binding_key: impl Into<BindingKey>) -> Self {
        Self {
            message_type_id: MessageTypeId::of::<M>(),
            binding_key: binding_key.into(),
        }
    }

    pub fn message_type_id(&self) -> &MessageTypeId {
        &self.message_type_id
    }

    pub fn binding_key(&self) -> &BindingKey {
        &self.binding_key
    }

    pub fn full_name(&self) -> &str {
        self.message_type_id.full_name()
    }

    pub(crate) fn into_parts(self) -> (MessageTypeId, BindingKey) {
        (self.message_type_id, self.binding_key)
    }
}

impl IntoProtobuf for Subscription {
    type Output = proto::Subscription;

    fn into_protobuf(self) -> Self::Output {
        proto::Subscription {
            message_type_id: self.message_type_id,
            binding_key: self.binding_key.into_protobuf(),
        }
    }
}

impl FromProtobuf for Subscription {
    type Input = proto::Subscription;

    fn from_protobuf(input: Self::Input) -> Self {
        Self {
            message_type_id: input.message_type_id,
            binding_key: BindingKey::from_protobuf(input.binding_key),
        }
    }
}

/// A partial subscription update: the full set of binding keys for one
/// message type. An empty set of binding keys removes every binding of that
/// type.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SubscriptionsForType {
    message_type_id: MessageTypeId,
    binding_keys: Vec<BindingKey>,
}

impl SubscriptionsForType {
    pub fn new(message_type_id: MessageTypeId, binding_keys: Vec<BindingKey>) -> Self {
        Self {
            message_type_id,
            binding_keys,
        }
    }

    /// Update for `M` with the provided binding keys
    pub fn of<M: MessageDescriptor>(binding_keys: impl IntoIterator<Item = BindingKey>) -> Self {
        Self {
            message_type_id: MessageTypeId::of::<M>(),
            binding_keys: binding_keys.into_iter().collect(),
        }
    }

    /// Update removing every binding of `M`
    pub fn remove_all<M: MessageDescriptor>() -> Self {
        Self::of::<M>([])
    }

    pub fn message_type_id(&self) -> &MessageTypeId {
        &self.message_type_id
    }

    pub fn binding_keys(&self) -> &[BindingKey] {
        &self.binding_keys
    }

    pub(crate) fn into_parts(self) -> (MessageTypeId, Vec<BindingKey>) {
        (self.message_type_id, self.binding_keys)
    }
}

impl IntoProtobuf for SubscriptionsForType {
    type Output = proto::SubscriptionsForType;

    fn into_protobuf(self) -> Self::Output {
        proto::SubscriptionsForType {
            message_type_id: self.message_type_id,
            binding_keys: self.binding_keys.into_protobuf(),
        }
    }
}

impl FromProtobuf for SubscriptionsForType {
    type Input = proto::SubscriptionsForType;

    fn from_protobuf(input: Self::Input) -> Self {
        Self {
            message_type_id: input.message_type_id,
            binding_keys: Vec::from_protobuf(input.binding_keys),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding_key;
    use crate::core::MessageDescriptor;

    struct OrderPlaced;

    impl MessageDescriptor for OrderPlaced {
        const ROUTABLE: bool = true;

        fn name() -> &'static str {
            "Peerbus.Test.OrderPlaced"
        }
    }

    #[test]
    fn any_uses_the_empty_binding() {
        let subscription = Subscription::any::<OrderPlaced>();

        assert_eq!(subscription.full_name(), "Peerbus.Test.OrderPlaced");
        assert!(subscription.binding_key().is_empty());
    }

    #[test]
    fn with_binding_keeps_wildcards() {
        let subscription = Subscription::with_binding::<OrderPlaced>(binding_key!["eu", *]);

        assert_eq!(subscription.binding_key(), &binding_key!["eu", *]);
    }

    #[test]
    fn wire_roundtrip() {
        let subscription = Subscription::with_binding::<OrderPlaced>(binding_key!["eu", #]);
        let wire = subscription.clone().into_protobuf();

        assert_eq!(Subscription::from_protobuf(wire), subscription);
    }
}
