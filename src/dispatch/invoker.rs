use std::error::Error as StdError;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::MessageContext;
use crate::core::{
    AsyncHandler, Handler, MessageDescriptor, MultiEventHandler, SubscriptionMode,
};
use crate::{Message, MessageTypeId};

/// Fixed error reported when an asynchronous handler returns no task
#[derive(Debug, Error)]
#[error("dispatch failed because handler did not start its task")]
pub struct AsyncHandlerNotStarted;

/// Error reported when an asynchronous handler's task is aborted or panics
#[derive(Debug, Error)]
#[error("handler task failed: {0}")]
pub struct HandlerTaskFailed(tokio::task::JoinError);

/// A descriptor for an invoker of a specific message type
#[derive(Debug, Clone)]
pub struct MessageInvokerDescriptor {
    /// Type name of the handler
    pub invoker_type: &'static str,

    /// Identity of the handled message type
    pub message_type_id: MessageTypeId,

    /// Name of the dispatch queue the handler opted into, if any
    pub dispatch_queue: Option<&'static str>,

    /// Mode of subscription for the message
    pub subscription_mode: SubscriptionMode,

    /// Whether the handled message type is routable
    pub routable: bool,
}

impl MessageInvokerDescriptor {
    /// Whether the startup scan subscribes to the handled message type.
    /// False for handlers opting out of the scan and for routable messages,
    /// which are subscribed explicitly by binding key.
    pub fn should_subscribe_on_startup(&self) -> bool {
        self.subscription_mode == SubscriptionMode::Auto && !self.routable
    }
}

type InvokeError = Box<dyn StdError + Send>;

/// Adapter invoking one concrete handler for one message type
pub trait MessageHandlerInvoker: Send + Sync {
    fn descriptor(&self) -> &MessageInvokerDescriptor;

    /// Invoke the handler for `message`. Asynchronous handlers are spawned
    /// on `runtime` and awaited; the invocation completes when their task
    /// does.
    fn invoke(
        &self,
        message: &Arc<dyn Message>,
        context: &Arc<MessageContext>,
        runtime: &tokio::runtime::Handle,
    ) -> Result<(), InvokeError>;
}

fn downcast<M: Message + Clone>(
    message: &Arc<dyn Message>,
    descriptor: &MessageInvokerDescriptor,
) -> Result<M, InvokeError> {
    message
        .as_ref()
        .downcast_ref::<M>()
        .cloned()
        .ok_or_else(|| {
            Box::new(WrongMessageType {
                expected: descriptor.message_type_id.clone(),
            }) as InvokeError
        })
}

#[derive(Debug, Error)]
#[error("message could not be downcast to {expected}")]
struct WrongMessageType {
    expected: MessageTypeId,
}

/// Invoker for a synchronous [`Handler`]; the invocation completes with the
/// handler call
pub(crate) struct SyncInvoker<H, M> {
    descriptor: MessageInvokerDescriptor,
    handler: Arc<Mutex<H>>,
    _message: PhantomData<fn(M)>,
}

impl<H, M> SyncInvoker<H, M> {
    pub(crate) fn new(descriptor: MessageInvokerDescriptor, handler: Arc<Mutex<H>>) -> Self {
        Self {
            descriptor,
            handler,
            _message: PhantomData,
        }
    }
}

impl<H, M> MessageHandlerInvoker for SyncInvoker<H, M>
where
    H: Handler<M> + 'static,
    M: Message + MessageDescriptor + Clone,
{
    fn descriptor(&self) -> &MessageInvokerDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        message: &Arc<dyn Message>,
        context: &Arc<MessageContext>,
        _runtime: &tokio::runtime::Handle,
    ) -> Result<(), InvokeError> {
        let message = downcast::<M>(message, &self.descriptor)?;

        let mut handler = self.handler.lock().unwrap();
        handler
            .handle(message, context)
            .map_err(|e| Box::new(e) as InvokeError)
    }
}

/// Invoker for an [`AsyncHandler`].
///
/// The handler body is asked for its task while the queue worker holds the
/// turn; the task itself runs on the runtime's default executor and the
/// worker only awaits its join handle, so handler continuations never
/// observe the queue thread as their scheduler.
pub(crate) struct AsyncInvoker<H, M> {
    descriptor: MessageInvokerDescriptor,
    handler: Arc<Mutex<H>>,
    _message: PhantomData<fn(M)>,
}

impl<H, M> AsyncInvoker<H, M> {
    pub(crate) fn new(descriptor: MessageInvokerDescriptor, handler: Arc<Mutex<H>>) -> Self {
        Self {
            descriptor,
            handler,
            _message: PhantomData,
        }
    }
}

impl<H, M> MessageHandlerInvoker for AsyncInvoker<H, M>
where
    H: AsyncHandler<M> + 'static,
    M: Message + MessageDescriptor + Clone,
{
    fn descriptor(&self) -> &MessageInvokerDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        message: &Arc<dyn Message>,
        context: &Arc<MessageContext>,
        runtime: &tokio::runtime::Handle,
    ) -> Result<(), InvokeError> {
        let message = downcast::<M>(message, &self.descriptor)?;

        let task = {
            let mut handler = self.handler.lock().unwrap();
            handler.handle(message, Arc::clone(context))
        };

        let Some(task) = task else {
            return Err(Box::new(AsyncHandlerNotStarted));
        };

        let join = runtime.spawn(task);
        match runtime.block_on(join) {
            Ok(result) => result.map_err(|e| Box::new(e) as InvokeError),
            Err(join_error) => Err(Box::new(HandlerTaskFailed(join_error))),
        }
    }
}

/// Invoker for one event type of a [`MultiEventHandler`]; all event types of
/// the handler share the same instance
pub(crate) struct MultiEventInvoker<H> {
    descriptor: MessageInvokerDescriptor,
    handler: Arc<Mutex<H>>,
}

impl<H> MultiEventInvoker<H> {
    pub(crate) fn new(descriptor: MessageInvokerDescriptor, handler: Arc<Mutex<H>>) -> Self {
        Self {
            descriptor,
            handler,
        }
    }
}

impl<H> MessageHandlerInvoker for MultiEventInvoker<H>
where
    H: MultiEventHandler + 'static,
{
    fn descriptor(&self) -> &MessageInvokerDescriptor {
        &self.descriptor
    }

    fn invoke(
        &self,
        message: &Arc<dyn Message>,
        context: &Arc<MessageContext>,
        _runtime: &tokio::runtime::Handle,
    ) -> Result<(), InvokeError> {
        let mut handler = self.handler.lock().unwrap();
        handler
            .handle(message.as_ref(), context)
            .map_err(|e| Box::new(e) as InvokeError)
    }
}
