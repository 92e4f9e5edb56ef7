//! Explicit handler registry.
//!
//! Handlers are declared in named [`HandlerModule`]s and instantiated
//! through a [`Container`], never by the loader itself. Loading applies the
//! configured module and handler filters and rebuilds the invoker set from
//! scratch, making it idempotent.
use std::any::{type_name, Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::debug;

use super::invoker::{
    AsyncInvoker, MessageHandlerInvoker, MessageInvokerDescriptor, MultiEventInvoker, SyncInvoker,
};
use crate::core::{
    AsyncHandler, Handler, MessageDescriptor, MultiEventHandler, SubscriptionMode,
};
use crate::{Message, MessageTypeId};

#[derive(Debug, Error)]
pub enum Error {
    /// A handler type was registered twice for the same message type
    #[error("attempted to register a second invoker of {handler_type} for message {message_type}")]
    DoubleRegister {
        handler_type: &'static str,
        message_type: String,
    },

    /// The container has no instance of the handler type
    #[error("container returned no instance for handler {handler_type}")]
    MissingInstance { handler_type: &'static str },

    /// The container returned an instance of an unexpected type
    #[error("container returned an instance of the wrong type for handler {handler_type}")]
    WrongInstanceType { handler_type: &'static str },
}

/// Source of handler instances, the seam for dependency injection
pub trait Container: Send + Sync {
    /// Resolve an instance of the type identified by `type_id`
    fn get_instance(&self, type_id: TypeId) -> Option<Box<dyn Any + Send>>;
}

/// [`Container`] backed by registered factory functions, one per handler
/// type
#[derive(Default)]
pub struct TypeMapContainer {
    factories: HashMap<TypeId, Box<dyn Fn() -> Box<dyn Any + Send> + Send + Sync>>,
}

impl TypeMapContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H: Any + Send>(
        &mut self,
        factory: impl Fn() -> H + Send + Sync + 'static,
    ) -> &mut Self {
        self.factories
            .insert(TypeId::of::<H>(), Box::new(move || Box::new(factory())));
        self
    }
}

impl Container for TypeMapContainer {
    fn get_instance(&self, type_id: TypeId) -> Option<Box<dyn Any + Send>> {
        self.factories.get(&type_id).map(|factory| factory())
    }
}

fn resolve<H: Any + Send>(container: &dyn Container) -> Result<Arc<Mutex<H>>, Error> {
    let handler_type = type_name::<H>();
    let instance = container
        .get_instance(TypeId::of::<H>())
        .ok_or(Error::MissingInstance { handler_type })?;
    let instance = instance
        .downcast::<H>()
        .map_err(|_| Error::WrongInstanceType { handler_type })?;

    Ok(Arc::new(Mutex::new(*instance)))
}

type BuildFn =
    Box<dyn Fn(&dyn Container) -> Result<Vec<Arc<dyn MessageHandlerInvoker>>, Error> + Send + Sync>;

/// One handler registration inside a [`HandlerModule`]
pub struct HandlerDeclaration {
    handler_type: &'static str,
    build: BuildFn,
}

fn descriptor_of<M: MessageDescriptor, H>(
    dispatch_queue: Option<&'static str>,
    subscription_mode: SubscriptionMode,
) -> MessageInvokerDescriptor {
    MessageInvokerDescriptor {
        invoker_type: type_name::<H>(),
        message_type_id: MessageTypeId::of::<M>(),
        dispatch_queue,
        subscription_mode,
        routable: M::ROUTABLE,
    }
}

/// Declare a synchronous handler `H` for message `M`
pub fn handler_of<M, H>() -> SyncHandlerDeclarationBuilder<M, H>
where
    M: Message + MessageDescriptor + Clone,
    H: Handler<M> + Any + Send + 'static,
{
    SyncHandlerDeclarationBuilder {
        dispatch_queue: None,
        subscription_mode: SubscriptionMode::Auto,
        _marker: PhantomData,
    }
}

/// Declare an asynchronous handler `H` for message `M`
pub fn async_handler_of<M, H>() -> AsyncHandlerDeclarationBuilder<M, H>
where
    M: Message + MessageDescriptor + Clone,
    H: AsyncHandler<M> + Any + Send + 'static,
{
    AsyncHandlerDeclarationBuilder {
        dispatch_queue: None,
        subscription_mode: SubscriptionMode::Auto,
        _marker: PhantomData,
    }
}

/// Options of a pending synchronous handler declaration
pub struct SyncHandlerDeclarationBuilder<M, H> {
    dispatch_queue: Option<&'static str>,
    subscription_mode: SubscriptionMode,
    _marker: PhantomData<fn(M, H)>,
}

impl<M, H> SyncHandlerDeclarationBuilder<M, H> {
    /// Run the handler on the named dispatch queue instead of the default
    /// one
    pub fn in_dispatch_queue(mut self, name: &'static str) -> Self {
        self.dispatch_queue = Some(name);
        self
    }

    /// Opt the handler out of the startup subscription scan
    pub fn manual_subscription(mut self) -> Self {
        self.subscription_mode = SubscriptionMode::Manual;
        self
    }
}

impl<M, H> From<SyncHandlerDeclarationBuilder<M, H>> for HandlerDeclaration
where
    M: Message + MessageDescriptor + Clone,
    H: Handler<M> + Any + Send + 'static,
{
    fn from(builder: SyncHandlerDeclarationBuilder<M, H>) -> Self {
        let descriptor =
            descriptor_of::<M, H>(builder.dispatch_queue, builder.subscription_mode);

        HandlerDeclaration {
            handler_type: type_name::<H>(),
            build: Box::new(move |container| {
                let handler = resolve::<H>(container)?;
                Ok(vec![Arc::new(SyncInvoker::<H, M>::new(
                    descriptor.clone(),
                    handler,
                ))])
            }),
        }
    }
}

/// Options of a pending asynchronous handler declaration
pub struct AsyncHandlerDeclarationBuilder<M, H> {
    dispatch_queue: Option<&'static str>,
    subscription_mode: SubscriptionMode,
    _marker: PhantomData<fn(M, H)>,
}

impl<M, H> AsyncHandlerDeclarationBuilder<M, H> {
    /// Run the handler on the named dispatch queue instead of the default
    /// one
    pub fn in_dispatch_queue(mut self, name: &'static str) -> Self {
        self.dispatch_queue = Some(name);
        self
    }

    /// Opt the handler out of the startup subscription scan
    pub fn manual_subscription(mut self) -> Self {
        self.subscription_mode = SubscriptionMode::Manual;
        self
    }
}

impl<M, H> From<AsyncHandlerDeclarationBuilder<M, H>> for HandlerDeclaration
where
    M: Message + MessageDescriptor + Clone,
    H: AsyncHandler<M> + Any + Send + 'static,
{
    fn from(builder: AsyncHandlerDeclarationBuilder<M, H>) -> Self {
        let descriptor =
            descriptor_of::<M, H>(builder.dispatch_queue, builder.subscription_mode);

        HandlerDeclaration {
            handler_type: type_name::<H>(),
            build: Box::new(move |container| {
                let handler = resolve::<H>(container)?;
                Ok(vec![Arc::new(AsyncInvoker::<H, M>::new(
                    descriptor.clone(),
                    handler,
                ))])
            }),
        }
    }
}

/// Declare a [`MultiEventHandler`] `H`; one invoker is created per event
/// type it reports at load time
pub fn event_handler_of<H>() -> MultiEventDeclarationBuilder<H>
where
    H: MultiEventHandler + Any + Send + 'static,
{
    MultiEventDeclarationBuilder {
        dispatch_queue: None,
        subscription_mode: SubscriptionMode::Auto,
        _marker: PhantomData,
    }
}

pub struct MultiEventDeclarationBuilder<H> {
    dispatch_queue: Option<&'static str>,
    subscription_mode: SubscriptionMode,
    _marker: PhantomData<fn(H)>,
}

impl<H> MultiEventDeclarationBuilder<H> {
    pub fn in_dispatch_queue(mut self, name: &'static str) -> Self {
        self.dispatch_queue = Some(name);
        self
    }

    pub fn manual_subscription(mut self) -> Self {
        self.subscription_mode = SubscriptionMode::Manual;
        self
    }
}

impl<H> From<MultiEventDeclarationBuilder<H>> for HandlerDeclaration
where
    H: MultiEventHandler + Any + Send + 'static,
{
    fn from(builder: MultiEventDeclarationBuilder<H>) -> Self {
        let dispatch_queue = builder.dispatch_queue;
        let subscription_mode = builder.subscription_mode;

        HandlerDeclaration {
            handler_type: type_name::<H>(),
            build: Box::new(move |container| {
                let handler = resolve::<H>(container)?;
                let event_types = handler.lock().unwrap().handled_event_types();

                Ok(event_types
                    .into_iter()
                    .map(|message_type_id| {
                        let descriptor = MessageInvokerDescriptor {
                            invoker_type: type_name::<H>(),
                            message_type_id,
                            dispatch_queue,
                            subscription_mode,
                            routable: false,
                        };
                        Arc::new(MultiEventInvoker::new(descriptor, Arc::clone(&handler)))
                            as Arc<dyn MessageHandlerInvoker>
                    })
                    .collect())
            }),
        }
    }
}

/// A named collection of handler declarations, the unit the module filter
/// applies to
pub struct HandlerModule {
    name: &'static str,
    declarations: Vec<HandlerDeclaration>,
}

impl HandlerModule {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            declarations: Vec::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn handles(mut self, declaration: impl Into<HandlerDeclaration>) -> Self {
        self.declarations.push(declaration.into());
        self
    }
}

type Filter = Box<dyn Fn(&str) -> bool + Send + Sync>;

/// Builds and owns the invoker set resolved from the registered modules
pub(crate) struct InvokerRegistry {
    modules: Vec<HandlerModule>,
    container: Arc<dyn Container>,
    module_filter: Option<Filter>,
    handler_filter: Option<Filter>,
    invokers: HashMap<String, Vec<Arc<dyn MessageHandlerInvoker>>>,
}

impl InvokerRegistry {
    pub(crate) fn new(container: Arc<dyn Container>) -> Self {
        Self {
            modules: Vec::new(),
            container,
            module_filter: None,
            handler_filter: None,
            invokers: HashMap::new(),
        }
    }

    pub(crate) fn add_module(&mut self, module: HandlerModule) {
        self.modules.push(module);
    }

    pub(crate) fn set_module_filter(&mut self, filter: impl Fn(&str) -> bool + Send + Sync + 'static) {
        self.module_filter = Some(Box::new(filter));
    }

    pub(crate) fn set_handler_filter(
        &mut self,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) {
        self.handler_filter = Some(Box::new(filter));
    }

    /// Rebuild the invoker set from the registered modules, applying the
    /// filters. Idempotent: loading twice yields the same invoker set.
    pub(crate) fn load(&mut self) -> Result<(), Error> {
        let mut invokers: HashMap<String, Vec<Arc<dyn MessageHandlerInvoker>>> = HashMap::new();
        let mut registered: HashSet<(&'static str, String)> = HashSet::new();

        for module in &self.modules {
            if let Some(ref filter) = self.module_filter {
                if !filter(module.name) {
                    debug!("skipping handler module {}", module.name);
                    continue;
                }
            }

            for declaration in &module.declarations {
                if let Some(ref filter) = self.handler_filter {
                    if !filter(declaration.handler_type) {
                        debug!("skipping handler {}", declaration.handler_type);
                        continue;
                    }
                }

                for invoker in (declaration.build)(self.container.as_ref())? {
                    let message_type = invoker.descriptor().message_type_id.full_name().to_string();

                    if !registered.insert((declaration.handler_type, message_type.clone())) {
                        return Err(Error::DoubleRegister {
                            handler_type: declaration.handler_type,
                            message_type,
                        });
                    }

                    invokers.entry(message_type).or_default().push(invoker);
                }
            }
        }

        self.invokers = invokers;
        Ok(())
    }

    /// Invokers consuming the message type named `message_type`
    pub(crate) fn resolve(&self, message_type: &str) -> Vec<Arc<dyn MessageHandlerInvoker>> {
        self.invokers
            .get(message_type)
            .map(|invokers| invokers.to_vec())
            .unwrap_or_default()
    }

    pub(crate) fn descriptors(&self) -> Vec<MessageInvokerDescriptor> {
        self.invokers
            .values()
            .flatten()
            .map(|invoker| invoker.descriptor().clone())
            .collect()
    }

    /// Message types with at least one invoker, each exactly once
    pub(crate) fn handled_message_types(&self) -> Vec<MessageTypeId> {
        self.invokers
            .keys()
            .map(MessageTypeId::from_name)
            .collect()
    }
}
