//! Per-peer dispatch engine: resolves the local handlers consuming an
//! incoming message, serializes them onto named dispatch queues, wraps every
//! invocation in a pipe chain and reports the aggregate outcome through a
//! completion callback.
mod dispatcher;
mod invoker;
mod local;
pub mod pipe;
mod queue;
mod registry;

use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

pub use dispatcher::{Error, MessageDispatcher};
pub use invoker::{AsyncHandlerNotStarted, MessageHandlerInvoker, MessageInvokerDescriptor};
pub use local::{LocalDispatch, LocalDispatchGuard};
pub use queue::{Error as QueueError, DEFAULT_DISPATCH_QUEUE};
pub use registry::{
    async_handler_of, event_handler_of, handler_of, Container, Error as RegistryError,
    HandlerDeclaration, HandlerModule, TypeMapContainer,
};

use crate::{Message, MessageId, PeerId};

/// Context flowing with a dispatch, shared by every handler invocation of
/// the message
#[derive(Debug)]
pub struct MessageContext {
    sender_id: PeerId,
    message_id: MessageId,
    dispatch_queue_name: Option<String>,
    reply_code: AtomicI32,
}

impl MessageContext {
    pub fn new(sender_id: PeerId) -> Self {
        Self {
            sender_id,
            message_id: MessageId::new(),
            dispatch_queue_name: None,
            reply_code: AtomicI32::new(0),
        }
    }

    /// Route handlers without a queue of their own to `name` instead of the
    /// default queue
    pub fn with_dispatch_queue(mut self, name: impl Into<String>) -> Self {
        self.dispatch_queue_name = Some(name.into());
        self
    }

    pub fn sender_id(&self) -> &PeerId {
        &self.sender_id
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn dispatch_queue_name(&self) -> Option<&str> {
        self.dispatch_queue_name.as_deref()
    }

    /// Reply code to send back to the originator, mutated by handlers
    pub fn reply_code(&self) -> i32 {
        self.reply_code.load(Ordering::Acquire)
    }

    pub fn set_reply_code(&self, code: i32) {
        self.reply_code.store(code, Ordering::Release);
    }
}

type ErrorRepr = (&'static str, Box<dyn StdError + Send>);

/// Errors collected across the handler invocations of one dispatch
#[derive(Debug, Default)]
pub struct DispatchError(Vec<ErrorRepr>);

impl DispatchError {
    fn add(&mut self, handler_type: &'static str, error: Box<dyn StdError + Send>) {
        self.0.push((handler_type, error));
    }

    pub fn count(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &(dyn StdError + Send))> {
        self.0.iter().map(|(t, e)| (*t, e.as_ref()))
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, error) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, ", ")?;
            }

            write!(f, "{}: {}", error.0, error.1)?;
        }

        Ok(())
    }
}

/// Aggregate outcome of one message's dispatch across all local invokers
#[derive(Debug, Default)]
pub struct DispatchResult {
    was_handled: bool,
    errors: DispatchError,
}

impl DispatchResult {
    /// `true` once at least one invoker ran, successfully or not
    pub fn was_handled(&self) -> bool {
        self.was_handled
    }

    pub fn errors(&self) -> &DispatchError {
        &self.errors
    }

    pub fn is_error(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// Callback fired exactly once when every invocation of a dispatch has
/// completed
pub type CompletionCallback = Box<dyn FnOnce(DispatchResult) + Send>;

struct Outcome {
    /// Invocations still running; `None` until the dispatcher has resolved
    /// the invoker set
    remaining: Option<usize>,
    was_handled: bool,
    errors: DispatchError,
    completion: Option<CompletionCallback>,
}

/// One in-flight message across all its matching handlers
pub struct MessageDispatch {
    context: Arc<MessageContext>,
    message: Arc<dyn Message>,
    outcome: Arc<Mutex<Outcome>>,
}

impl Clone for MessageDispatch {
    fn clone(&self) -> Self {
        Self {
            context: Arc::clone(&self.context),
            message: Arc::clone(&self.message),
            outcome: Arc::clone(&self.outcome),
        }
    }
}

impl MessageDispatch {
    pub fn new(
        context: MessageContext,
        message: Arc<dyn Message>,
        completion: CompletionCallback,
    ) -> Self {
        Self {
            context: Arc::new(context),
            message,
            outcome: Arc::new(Mutex::new(Outcome {
                remaining: None,
                was_handled: false,
                errors: DispatchError::default(),
                completion: Some(completion),
            })),
        }
    }

    pub fn context(&self) -> &Arc<MessageContext> {
        &self.context
    }

    pub fn message(&self) -> &Arc<dyn Message> {
        &self.message
    }

    /// Arm the dispatch with the number of invocations about to run.
    /// A count of zero completes immediately with `was_handled == false`.
    pub(crate) fn set_invoker_count(&self, count: usize) {
        let completion = {
            let mut outcome = self.outcome.lock().unwrap();
            outcome.remaining = Some(count);

            if count == 0 {
                Self::take_completion(&mut outcome)
            } else {
                None
            }
        };

        if let Some((completion, result)) = completion {
            completion(result);
        }
    }

    /// Record the outcome of one invocation; fires the completion callback
    /// when it was the last one
    pub(crate) fn set_handled(
        &self,
        handler_type: &'static str,
        result: Result<(), Box<dyn StdError + Send>>,
    ) {
        let completion = {
            let mut outcome = self.outcome.lock().unwrap();
            outcome.was_handled = true;

            if let Err(error) = result {
                outcome.errors.add(handler_type, error);
            }

            let remaining = outcome
                .remaining
                .as_mut()
                .expect("set_handled called before set_invoker_count");
            *remaining = remaining.saturating_sub(1);

            if *remaining == 0 {
                Self::take_completion(&mut outcome)
            } else {
                None
            }
        };

        if let Some((completion, result)) = completion {
            completion(result);
        }
    }

    fn take_completion(outcome: &mut Outcome) -> Option<(CompletionCallback, DispatchResult)> {
        outcome.completion.take().map(|completion| {
            let result = DispatchResult {
                was_handled: outcome.was_handled,
                errors: std::mem::take(&mut outcome.errors),
            };
            (completion, result)
        })
    }
}
