//! Core message and handler traits.
//!
//! Messages sent on the bus are either a [`Command`] or an [`Event`].
//! A [`Command`] is sent to a unique peer, asking for an action to be
//! performed. An [`Event`] can be published to multiple peers, notifying
//! that an action has been performed.
//!
//! Handlers are plain types registered through a
//! [`HandlerModule`](crate::dispatch::HandlerModule); discovery is explicit
//! rather than scanned.
use std::any::Any;
use std::error::Error as StdError;
use std::sync::Arc;

use futures::future::BoxFuture;

use crate::dispatch::MessageContext;
use crate::routing::RoutingKey;
use crate::MessageTypeId;

/// Static description of a message type
pub trait MessageDescriptor {
    /// Marker for routable messages. A routable message derives its routing
    /// key from its routable fields and is subscribed to explicitly by
    /// binding key rather than by the startup scan.
    const ROUTABLE: bool = false;

    /// Fully qualified name of the message type
    fn name() -> &'static str;
}

/// A message that can be sent on the bus
pub trait Message: Any + Send + Sync {
    /// Fully qualified name of this message's type
    fn name(&self) -> &'static str;

    /// Routing key derived from the routable fields of the message, in
    /// routing order. Non-routable messages yield the empty key.
    fn routing_key(&self) -> RoutingKey {
        RoutingKey::default()
    }
}

impl dyn Message {
    pub fn downcast_ref<M: Message>(&self) -> Option<&M> {
        (self as &dyn Any).downcast_ref::<M>()
    }

    pub fn is<M: Message>(&self) -> bool {
        self.downcast_ref::<M>().is_some()
    }
}

/// A message that can be sent to a peer, asking for an action to be performed
pub trait Command: Message {}

/// A message that can be published to multiple peers, notifying that an
/// action has been performed
pub trait Event: Message {}

/// Mode of subscription of a handler at startup
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum SubscriptionMode {
    /// Subscribe when registering to the directory
    #[default]
    Auto,

    /// Leave the subscription to an explicit
    /// `update_subscriptions_for_types` call
    Manual,
}

/// Handler of a `M` typed message, invoked synchronously on its dispatch
/// queue
pub trait Handler<M: Message>: Send {
    type Err: StdError + Send + 'static;

    /// Handle `message`
    fn handle(&mut self, message: M, context: &MessageContext) -> Result<(), Self::Err>;
}

/// Handler of a `M` typed message that starts an asynchronous task.
///
/// The returned future runs on the default executor; the dispatch completes
/// when it resolves. Returning `None` means the handler failed to start its
/// task and is reported as a dispatch error.
pub trait AsyncHandler<M: Message>: Send {
    type Err: StdError + Send + 'static;

    /// Handle `message`, returning the task driving the handling to
    /// completion
    fn handle(
        &mut self,
        message: M,
        context: Arc<MessageContext>,
    ) -> Option<BoxFuture<'static, Result<(), Self::Err>>>;
}

/// Implement [`MessageDescriptor`], [`Message`] and the given marker trait
/// for a message type with a fixed full name
macro_rules! impl_message {
    ($ty:ty, $name:literal, $marker:ident) => {
        impl $crate::core::MessageDescriptor for $ty {
            fn name() -> &'static str {
                $name
            }
        }

        impl $crate::core::Message for $ty {
            fn name(&self) -> &'static str {
                $name
            }
        }

        impl $crate::core::$marker for $ty {}
    };
}
pub(crate) use impl_message;

/// Handler consuming several event types declared at runtime.
///
/// One invoker is created per handled event type; they all share the same
/// handler instance.
pub trait MultiEventHandler: Send {
    type Err: StdError + Send + 'static;

    /// Event types consumed by this handler
    fn handled_event_types(&self) -> Vec<MessageTypeId>;

    /// Handle `event`
    fn handle(&mut self, event: &dyn Message, context: &MessageContext) -> Result<(), Self::Err>;
}
