//! Interceptor chain wrapping a handler invocation.
//!
//! Pipes see the invocation before the handler runs, after it completed and
//! when it failed. Each pipe may stash a per-invocation state in its before
//! hook and read it back from the matching after or error hook.
use std::any::Any;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::sync::Arc;

use super::invoker::MessageHandlerInvoker;
use super::MessageContext;
use crate::Message;

/// Error surfaced by a handler or a pipe hook
pub type PipeError = Box<dyn StdError + Send>;

/// An interceptor participating in handler invocations.
///
/// Hooks default to no-ops; a pipe implements the subset it needs.
pub trait Pipe: Send + Sync {
    /// Stable identity of the pipe, the key of its per-invocation state slot
    fn name(&self) -> &'static str;

    /// Runs before the handler, in pipe registration order
    fn before_invoke(&self, _context: &mut PipeContext<'_>) -> Result<(), PipeError> {
        Ok(())
    }

    /// Runs after the handler, in reverse registration order. When the
    /// invocation failed, the error is visible through
    /// [`PipeContext::error`].
    fn after_invoke(&self, _context: &mut PipeContext<'_>) {}

    /// Runs in reverse registration order when the handler or a hook failed,
    /// before the remaining after hooks
    fn on_error(&self, _context: &mut PipeContext<'_>) {}
}

type PipeStates = HashMap<&'static str, Box<dyn Any + Send>>;

/// View of one invocation handed to a pipe hook
pub struct PipeContext<'a> {
    message: &'a dyn Message,
    context: &'a MessageContext,
    current: &'static str,
    states: &'a mut PipeStates,
    error: Option<&'a (dyn StdError + Send)>,
}

impl<'a> PipeContext<'a> {
    pub fn message(&self) -> &dyn Message {
        self.message
    }

    pub fn context(&self) -> &MessageContext {
        self.context
    }

    /// Attach an opaque state readable by this pipe's after and error hooks
    pub fn set_state(&mut self, state: impl Any + Send) {
        self.states.insert(self.current, Box::new(state));
    }

    pub fn state<T: Any>(&self) -> Option<&T> {
        self.states
            .get(self.current)
            .and_then(|state| state.downcast_ref::<T>())
    }

    pub fn state_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.states
            .get_mut(self.current)
            .and_then(|state| state.downcast_mut::<T>())
    }

    /// The invocation error, available to after and error hooks once the
    /// handler or a hook has failed
    pub fn error(&self) -> Option<&(dyn StdError + Send)> {
        self.error
    }
}

/// One handler invocation bundled with its pipes, ready to run on a dispatch
/// queue
pub struct PipeInvocation {
    invoker: Arc<dyn MessageHandlerInvoker>,
    message: Arc<dyn Message>,
    context: Arc<MessageContext>,
    pipes: Vec<Arc<dyn Pipe>>,
}

impl PipeInvocation {
    pub fn new(
        invoker: Arc<dyn MessageHandlerInvoker>,
        message: Arc<dyn Message>,
        context: Arc<MessageContext>,
        pipes: Vec<Arc<dyn Pipe>>,
    ) -> Self {
        Self {
            invoker,
            message,
            context,
            pipes,
        }
    }

    pub(crate) fn handler_type(&self) -> &'static str {
        self.invoker.descriptor().invoker_type
    }

    pub(crate) fn dispatch_queue(&self) -> Option<&'static str> {
        self.invoker.descriptor().dispatch_queue
    }

    /// Run before hooks in order, the handler, then after hooks in reverse.
    /// On failure, error hooks run in reverse first; after hooks still run
    /// and observe the error. The final error is returned to the dispatcher.
    pub(crate) fn run(self, runtime: &tokio::runtime::Handle) -> Result<(), PipeError> {
        let mut states = PipeStates::new();
        let mut error: Option<PipeError> = None;

        // Pipes whose before hook completed; only they unwind
        let mut entered = 0;
        for pipe in &self.pipes {
            let mut context = self.context_for(pipe.name(), &mut states, None);
            match pipe.before_invoke(&mut context) {
                Ok(()) => entered += 1,
                Err(e) => {
                    error = Some(e);
                    break;
                }
            }
        }

        if error.is_none() {
            error = self
                .invoker
                .invoke(&self.message, &self.context, runtime)
                .err();
        }

        if error.is_some() {
            for pipe in self.pipes[..entered].iter().rev() {
                let mut context =
                    self.context_for(pipe.name(), &mut states, error.as_deref());
                pipe.on_error(&mut context);
            }
        }

        for pipe in self.pipes[..entered].iter().rev() {
            let mut context = self.context_for(pipe.name(), &mut states, error.as_deref());
            pipe.after_invoke(&mut context);
        }

        match error {
            None => Ok(()),
            Some(error) => Err(error),
        }
    }

    fn context_for<'a>(
        &'a self,
        current: &'static str,
        states: &'a mut PipeStates,
        error: Option<&'a (dyn StdError + Send)>,
    ) -> PipeContext<'a> {
        PipeContext {
            message: self.message.as_ref(),
            context: &self.context,
            current,
            states,
            error,
        }
    }
}

/// Builds the [`PipeInvocation`] wrapping each handler invocation
pub trait PipeManager: Send + Sync {
    fn build_pipe_invocation(
        &self,
        invoker: Arc<dyn MessageHandlerInvoker>,
        message: Arc<dyn Message>,
        context: Arc<MessageContext>,
    ) -> PipeInvocation;
}

/// [`PipeManager`] applying a fixed, ordered list of registered pipes to
/// every invocation
#[derive(Default)]
pub struct DefaultPipeManager {
    pipes: Vec<Arc<dyn Pipe>>,
}

impl DefaultPipeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `pipe` to the chain; pipes run in registration order
    pub fn register(mut self, pipe: Arc<dyn Pipe>) -> Self {
        self.pipes.push(pipe);
        self
    }
}

impl PipeManager for DefaultPipeManager {
    fn build_pipe_invocation(
        &self,
        invoker: Arc<dyn MessageHandlerInvoker>,
        message: Arc<dyn Message>,
        context: Arc<MessageContext>,
    ) -> PipeInvocation {
        PipeInvocation::new(invoker, message, context, self.pipes.clone())
    }
}
