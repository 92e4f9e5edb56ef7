use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use super::pipe::PipeManager;
use super::queue::{self, DispatchQueue, DEFAULT_DISPATCH_QUEUE};
use super::registry::{self, Container, HandlerModule, InvokerRegistry};
use super::{MessageDispatch, MessageInvokerDescriptor};
use crate::MessageTypeId;

/// Errors that can be returned by the [`MessageDispatcher`]
#[derive(Debug, Error)]
pub enum Error {
    /// An operation on a dispatch queue returned an error
    #[error("dispatch queue error {0}")]
    Queue(#[from] queue::Error),

    /// Loading the handler registry returned an error
    #[error("handler registry error {0}")]
    Registry(#[from] registry::Error),

    /// An operation was attempted while the dispatcher was in an invalid
    /// state for the operation
    #[error("an operation was attempted while the dispatcher was not in a valid state")]
    InvalidOperation,
}

enum Inner {
    Init,

    Started {
        dispatch_queues: HashMap<String, DispatchQueue>,
    },
}

/// Routes an inbound message to the invokers consuming it, serialized on
/// their dispatch queues, and reports the aggregate outcome through the
/// dispatch's completion callback
pub struct MessageDispatcher {
    registry: InvokerRegistry,
    pipes: Arc<dyn PipeManager>,
    runtime: tokio::runtime::Handle,
    inner: Inner,
}

impl MessageDispatcher {
    pub fn new(
        container: Arc<dyn Container>,
        pipes: Arc<dyn PipeManager>,
        runtime: tokio::runtime::Handle,
    ) -> Self {
        Self {
            registry: InvokerRegistry::new(container),
            pipes,
            runtime,
            inner: Inner::Init,
        }
    }

    /// Register a [`HandlerModule`], consumed on the next
    /// [`Self::load_message_handler_invokers`]
    pub fn add_module(&mut self, module: HandlerModule) -> &mut Self {
        self.registry.add_module(module);
        self
    }

    /// Set the module filter, consumed on the next
    /// [`Self::load_message_handler_invokers`]
    pub fn configure_module_filter(
        &mut self,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) {
        self.registry.set_module_filter(filter);
    }

    /// Set the handler type filter, consumed on the next
    /// [`Self::load_message_handler_invokers`]
    pub fn configure_handler_filter(
        &mut self,
        filter: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) {
        self.registry.set_handler_filter(filter);
    }

    /// Rebuild the invoker registry from the registered modules. Idempotent.
    pub fn load_message_handler_invokers(&mut self) -> Result<(), Error> {
        self.registry.load().map_err(Error::Registry)
    }

    /// Snapshot of the loaded invoker descriptors
    pub fn get_message_handler_invokers(&self) -> Vec<MessageInvokerDescriptor> {
        self.registry.descriptors()
    }

    /// Message types with at least one loaded invoker, each exactly once
    pub fn get_handled_message_types(&self) -> Vec<MessageTypeId> {
        self.registry.handled_message_types()
    }

    /// Start the dispatcher; queues are created on demand as messages are
    /// routed to them
    pub fn start(&mut self) -> Result<(), Error> {
        match self.inner {
            Inner::Init => {
                self.inner = Inner::Started {
                    dispatch_queues: HashMap::new(),
                };
                Ok(())
            }
            Inner::Started { .. } => Err(Error::InvalidOperation),
        }
    }

    /// Stop every dispatch queue; pending invocations are abandoned
    pub fn stop(&mut self) -> Result<(), Error> {
        match std::mem::replace(&mut self.inner, Inner::Init) {
            Inner::Started { mut dispatch_queues } => {
                for queue in dispatch_queues.values_mut() {
                    queue.stop();
                }
                Ok(())
            }
            state => {
                self.inner = state;
                Err(Error::InvalidOperation)
            }
        }
    }

    /// Discard the pending tasks of every known dispatch queue and return
    /// the total number discarded
    pub fn purge_queues(&mut self) -> usize {
        match self.inner {
            Inner::Started {
                ref dispatch_queues,
            } => dispatch_queues.values().map(DispatchQueue::purge_tasks).sum(),
            Inner::Init => 0,
        }
    }

    /// Dispatch a message to every invoker of its runtime type.
    ///
    /// A message with no invoker completes immediately with
    /// `was_handled == false`. Each invocation is wrapped in a pipe
    /// invocation and serialized on the queue named by the handler, the
    /// dispatch context or the default queue name, in that order.
    pub fn dispatch(&mut self, dispatch: MessageDispatch) -> Result<(), Error> {
        let Inner::Started {
            ref mut dispatch_queues,
        } = self.inner
        else {
            return Err(Error::InvalidOperation);
        };

        let invokers = self.registry.resolve(dispatch.message().name());
        dispatch.set_invoker_count(invokers.len());

        if invokers.is_empty() {
            debug!("no handler invoker for {}", dispatch.message().name());
            return Ok(());
        }

        for invoker in invokers {
            let invocation = self.pipes.build_pipe_invocation(
                invoker,
                Arc::clone(dispatch.message()),
                Arc::clone(dispatch.context()),
            );

            let queue_name = invocation
                .dispatch_queue()
                .map(str::to_string)
                .or_else(|| dispatch.context().dispatch_queue_name().map(str::to_string))
                .unwrap_or_else(|| DEFAULT_DISPATCH_QUEUE.to_string());

            let queue = match dispatch_queues.entry(queue_name) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let queue = DispatchQueue::start(entry.key().clone(), self.runtime.clone())?;
                    entry.insert(queue)
                }
            };

            let handler_type = invocation.handler_type();
            let task_dispatch = dispatch.clone();
            let enqueued = queue.enqueue(Box::new(move |runtime| {
                let result = invocation.run(runtime);
                task_dispatch.set_handled(handler_type, result);
            }));

            // A queue refusing the task still counts as this invocation's
            // outcome, so the completion callback eventually fires
            if let Err(e) = enqueued {
                dispatch.set_handled(handler_type, Err(Box::new(e)));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Condvar, Mutex};
    use std::time::Duration;

    use futures::future::BoxFuture;
    use futures::FutureExt;
    use thiserror::Error;
    use tokio::sync::Notify;

    use super::super::pipe::DefaultPipeManager;
    use super::super::registry::{async_handler_of, handler_of, TypeMapContainer};
    use super::super::{DispatchResult, MessageContext};
    use super::*;
    use crate::core::{AsyncHandler, Handler, Message, MessageDescriptor};
    use crate::PeerId;

    #[derive(Debug, Error)]
    #[error("{0}")]
    struct TestError(String);

    macro_rules! test_message {
        ($name:ident) => {
            #[derive(Clone, Default)]
            struct $name;

            impl MessageDescriptor for $name {
                fn name() -> &'static str {
                    concat!("Peerbus.Test.", stringify!($name))
                }
            }

            impl Message for $name {
                fn name(&self) -> &'static str {
                    <$name as MessageDescriptor>::name()
                }
            }
        };
    }

    test_message!(ScanCommand1);
    test_message!(ScanCommand2);
    test_message!(ScanCommand3);

    #[derive(Clone, Default)]
    struct RoutableCommand;

    impl MessageDescriptor for RoutableCommand {
        const ROUTABLE: bool = true;

        fn name() -> &'static str {
            "Peerbus.Test.RoutableCommand"
        }
    }

    impl Message for RoutableCommand {
        fn name(&self) -> &'static str {
            <RoutableCommand as MessageDescriptor>::name()
        }
    }

    #[derive(Clone)]
    struct DispatchCommand {
        signal: Arc<Notify>,
    }

    impl MessageDescriptor for DispatchCommand {
        fn name() -> &'static str {
            "Peerbus.Test.DispatchCommand"
        }
    }

    impl Message for DispatchCommand {
        fn name(&self) -> &'static str {
            <DispatchCommand as MessageDescriptor>::name()
        }
    }

    #[derive(Clone)]
    struct FailingCommand {
        message: String,
    }

    impl MessageDescriptor for FailingCommand {
        fn name() -> &'static str {
            "Peerbus.Test.FailingCommand"
        }
    }

    impl Message for FailingCommand {
        fn name(&self) -> &'static str {
            <FailingCommand as MessageDescriptor>::name()
        }
    }

    #[derive(Clone)]
    struct AsyncFailingCommand {
        message: String,
    }

    impl MessageDescriptor for AsyncFailingCommand {
        fn name() -> &'static str {
            "Peerbus.Test.AsyncFailingCommand"
        }
    }

    impl Message for AsyncFailingCommand {
        fn name(&self) -> &'static str {
            <AsyncFailingCommand as MessageDescriptor>::name()
        }
    }

    #[derive(Default)]
    struct ScanCommandHandler1;

    impl Handler<ScanCommand1> for ScanCommandHandler1 {
        type Err = TestError;

        fn handle(&mut self, _: ScanCommand1, _: &MessageContext) -> Result<(), TestError> {
            Ok(())
        }
    }

    impl Handler<ScanCommand2> for ScanCommandHandler1 {
        type Err = TestError;

        fn handle(&mut self, _: ScanCommand2, _: &MessageContext) -> Result<(), TestError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct ScanCommandHandler2;

    impl Handler<ScanCommand3> for ScanCommandHandler2 {
        type Err = TestError;

        fn handle(&mut self, _: ScanCommand3, _: &MessageContext) -> Result<(), TestError> {
            Ok(())
        }
    }

    impl Handler<ScanCommand1> for ScanCommandHandler2 {
        type Err = TestError;

        fn handle(&mut self, _: ScanCommand1, _: &MessageContext) -> Result<(), TestError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RoutableCommandHandler;

    impl Handler<RoutableCommand> for RoutableCommandHandler {
        type Err = TestError;

        fn handle(&mut self, _: RoutableCommand, _: &MessageContext) -> Result<(), TestError> {
            Ok(())
        }
    }

    struct SyncDispatchHandler {
        called: Arc<AtomicBool>,
    }

    impl Handler<DispatchCommand> for SyncDispatchHandler {
        type Err = TestError;

        fn handle(&mut self, _: DispatchCommand, _: &MessageContext) -> Result<(), TestError> {
            self.called.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct AsyncDispatchHandler {
        completed: Arc<AtomicBool>,
        worker_thread_seen: Arc<Mutex<Option<String>>>,
    }

    impl AsyncHandler<DispatchCommand> for AsyncDispatchHandler {
        type Err = TestError;

        fn handle(
            &mut self,
            command: DispatchCommand,
            _: Arc<MessageContext>,
        ) -> Option<BoxFuture<'static, Result<(), TestError>>> {
            let completed = Arc::clone(&self.completed);
            let seen = Arc::clone(&self.worker_thread_seen);

            Some(
                async move {
                    command.signal.notified().await;

                    let name = std::thread::current().name().unwrap_or("").to_string();
                    *seen.lock().unwrap() = Some(name);

                    completed.store(true, Ordering::SeqCst);
                    Ok(())
                }
                .boxed(),
            )
        }
    }

    #[derive(Default)]
    struct FailingHandler;

    impl Handler<FailingCommand> for FailingHandler {
        type Err = TestError;

        fn handle(&mut self, command: FailingCommand, _: &MessageContext) -> Result<(), TestError> {
            Err(TestError(command.message))
        }
    }

    #[derive(Default)]
    struct AsyncFailingHandler;

    impl AsyncHandler<AsyncFailingCommand> for AsyncFailingHandler {
        type Err = TestError;

        fn handle(
            &mut self,
            command: AsyncFailingCommand,
            _: Arc<MessageContext>,
        ) -> Option<BoxFuture<'static, Result<(), TestError>>> {
            Some(async move { Err(TestError(command.message)) }.boxed())
        }
    }

    #[derive(Default)]
    struct NotStartingHandler;

    impl AsyncHandler<AsyncFailingCommand> for NotStartingHandler {
        type Err = TestError;

        fn handle(
            &mut self,
            _: AsyncFailingCommand,
            _: Arc<MessageContext>,
        ) -> Option<BoxFuture<'static, Result<(), TestError>>> {
            None
        }
    }

    struct Gate {
        state: Mutex<bool>,
        condvar: Condvar,
        entered: std::sync::atomic::AtomicUsize,
    }

    impl Gate {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                state: Mutex::new(false),
                condvar: Condvar::new(),
                entered: std::sync::atomic::AtomicUsize::new(0),
            })
        }

        fn wait(&self) {
            self.entered.fetch_add(1, Ordering::SeqCst);
            let mut open = self.state.lock().unwrap();
            while !*open {
                open = self.condvar.wait(open).unwrap();
            }
        }

        fn open(&self) {
            *self.state.lock().unwrap() = true;
            self.condvar.notify_all();
        }
    }

    macro_rules! blocking_handler {
        ($name:ident) => {
            struct $name {
                gate: Arc<Gate>,
            }

            impl Handler<ScanCommand1> for $name {
                type Err = TestError;

                fn handle(&mut self, _: ScanCommand1, _: &MessageContext) -> Result<(), TestError> {
                    self.gate.wait();
                    Ok(())
                }
            }
        };
    }

    blocking_handler!(BlockingHandler1);
    blocking_handler!(BlockingHandler2);
    blocking_handler!(BlockingHandler3);

    fn dispatcher_with(
        container: TypeMapContainer,
        modules: Vec<HandlerModule>,
    ) -> MessageDispatcher {
        let mut dispatcher = MessageDispatcher::new(
            Arc::new(container),
            Arc::new(DefaultPipeManager::new()),
            tokio::runtime::Handle::current(),
        );
        for module in modules {
            dispatcher.add_module(module);
        }
        dispatcher
    }

    fn scan_module() -> HandlerModule {
        HandlerModule::new("scan")
            .handles(handler_of::<ScanCommand1, ScanCommandHandler1>())
            .handles(handler_of::<ScanCommand2, ScanCommandHandler1>())
            .handles(handler_of::<ScanCommand3, ScanCommandHandler2>().manual_subscription())
            .handles(handler_of::<RoutableCommand, RoutableCommandHandler>())
    }

    fn scan_container() -> TypeMapContainer {
        let mut container = TypeMapContainer::new();
        container.register(ScanCommandHandler1::default);
        container.register(ScanCommandHandler2::default);
        container.register(RoutableCommandHandler::default);
        container
    }

    fn dispatch_for<M: Message>(
        message: M,
    ) -> (MessageDispatch, std::sync::mpsc::Receiver<DispatchResult>) {
        let (tx, rx) = std::sync::mpsc::channel();
        let dispatch = MessageDispatch::new(
            MessageContext::new(PeerId::test()),
            Arc::new(message),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        );
        (dispatch, rx)
    }

    fn wait_result(rx: &std::sync::mpsc::Receiver<DispatchResult>) -> DispatchResult {
        rx.recv_timeout(Duration::from_secs(1))
            .expect("dispatch did not complete in time")
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_builds_one_invoker_per_handled_message() {
        let mut dispatcher = dispatcher_with(scan_container(), vec![scan_module()]);
        dispatcher.load_message_handler_invokers().unwrap();

        let descriptors = dispatcher.get_message_handler_invokers();
        assert_eq!(descriptors.len(), 4);

        let by_message = |name: &str| {
            descriptors
                .iter()
                .find(|d| d.message_type_id.full_name().ends_with(name))
                .unwrap()
        };

        assert!(by_message("ScanCommand1").should_subscribe_on_startup());
        assert!(by_message("ScanCommand2").should_subscribe_on_startup());

        // Opted out of the startup scan
        assert!(!by_message("ScanCommand3").should_subscribe_on_startup());

        // Routable messages are subscribed explicitly by binding key
        assert!(!by_message("RoutableCommand").should_subscribe_on_startup());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn load_twice_yields_the_same_invoker_set() {
        let mut dispatcher = dispatcher_with(scan_container(), vec![scan_module()]);
        dispatcher.load_message_handler_invokers().unwrap();
        let first: Vec<_> = dispatcher
            .get_handled_message_types()
            .iter()
            .map(|t| t.full_name().to_string())
            .collect();

        dispatcher.load_message_handler_invokers().unwrap();
        let second: Vec<_> = dispatcher
            .get_handled_message_types()
            .iter()
            .map(|t| t.full_name().to_string())
            .collect();

        let sorted = |mut v: Vec<String>| {
            v.sort();
            v
        };
        assert_eq!(sorted(first), sorted(second));
        assert_eq!(dispatcher.get_message_handler_invokers().len(), 4);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handled_message_types_are_distinct() {
        // Second handler type consuming ScanCommand1
        let module = scan_module().handles(handler_of::<ScanCommand1, ScanCommandHandler2>());

        let mut dispatcher = dispatcher_with(scan_container(), vec![module]);
        dispatcher.load_message_handler_invokers().unwrap();

        let types = dispatcher.get_handled_message_types();
        let scan1_count = types
            .iter()
            .filter(|t| t.full_name().ends_with("ScanCommand1"))
            .count();
        assert_eq!(scan1_count, 1);
        assert_eq!(dispatcher.get_message_handler_invokers().len(), 5);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn registering_a_handler_twice_for_a_message_fails_to_load() {
        let module = scan_module().handles(handler_of::<ScanCommand1, ScanCommandHandler1>());

        let mut dispatcher = dispatcher_with(scan_container(), vec![module]);
        assert!(matches!(
            dispatcher.load_message_handler_invokers(),
            Err(Error::Registry(registry::Error::DoubleRegister { .. }))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handler_filter_skips_handlers() {
        let mut dispatcher = dispatcher_with(scan_container(), vec![scan_module()]);
        dispatcher.configure_handler_filter(|handler| !handler.contains("ScanCommandHandler2"));
        dispatcher.load_message_handler_invokers().unwrap();

        assert!(!dispatcher
            .get_handled_message_types()
            .iter()
            .any(|t| t.full_name().ends_with("ScanCommand3")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn module_filter_skips_modules() {
        let mut dispatcher = dispatcher_with(scan_container(), vec![scan_module()]);
        dispatcher.configure_module_filter(|module| module != "scan");
        dispatcher.load_message_handler_invokers().unwrap();

        assert!(dispatcher.get_handled_message_types().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn dispatch_without_invokers_completes_unhandled() {
        let mut dispatcher = dispatcher_with(scan_container(), vec![scan_module()]);
        dispatcher.start().unwrap();

        // Invokers were never loaded
        let (dispatch, rx) = dispatch_for(ScanCommand1);
        dispatcher.dispatch(dispatch).unwrap();

        let result = wait_result(&rx);
        assert!(!result.was_handled());
        assert!(result.errors().is_empty());

        dispatcher.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_and_async_handlers_fan_out() {
        let called = Arc::new(AtomicBool::new(false));
        let completed = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(Mutex::new(None));

        let mut container = TypeMapContainer::new();
        let called_clone = Arc::clone(&called);
        container.register(move || SyncDispatchHandler {
            called: Arc::clone(&called_clone),
        });
        let completed_clone = Arc::clone(&completed);
        let seen_clone = Arc::clone(&seen);
        container.register(move || AsyncDispatchHandler {
            completed: Arc::clone(&completed_clone),
            worker_thread_seen: Arc::clone(&seen_clone),
        });

        let module = HandlerModule::new("dispatch")
            .handles(handler_of::<DispatchCommand, SyncDispatchHandler>())
            .handles(async_handler_of::<DispatchCommand, AsyncDispatchHandler>());

        let mut dispatcher = dispatcher_with(container, vec![module]);
        dispatcher.load_message_handler_invokers().unwrap();
        dispatcher.start().unwrap();

        let signal = Arc::new(Notify::new());
        let (dispatch, rx) = dispatch_for(DispatchCommand {
            signal: Arc::clone(&signal),
        });
        dispatcher.dispatch(dispatch).unwrap();

        // The sync handler runs first; the async handler is still waiting on
        // the command's signal
        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while !called.load(Ordering::SeqCst) {
            assert!(std::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        assert!(!completed.load(Ordering::SeqCst));

        signal.notify_one();

        let result = tokio::task::spawn_blocking(move || wait_result(&rx))
            .await
            .unwrap();
        assert!(result.was_handled());
        assert!(result.errors().is_empty());
        assert!(completed.load(Ordering::SeqCst));

        // The async handler body resumed on the runtime, not on the queue
        // worker thread
        let thread = seen.lock().unwrap().clone().unwrap();
        assert!(!thread.starts_with("dispatch-"), "ran on {thread}");

        dispatcher.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn handler_error_is_captured() {
        let mut container = TypeMapContainer::new();
        container.register(FailingHandler::default);

        let module = HandlerModule::new("failing")
            .handles(handler_of::<FailingCommand, FailingHandler>());

        let mut dispatcher = dispatcher_with(container, vec![module]);
        dispatcher.load_message_handler_invokers().unwrap();
        dispatcher.start().unwrap();

        let (dispatch, rx) = dispatch_for(FailingCommand {
            message: "boiler too cold".to_string(),
        });
        dispatcher.dispatch(dispatch).unwrap();

        let result = tokio::task::spawn_blocking(move || wait_result(&rx))
            .await
            .unwrap();
        assert!(result.was_handled());
        assert_eq!(result.errors().count(), 1);
        assert!(result.errors().to_string().contains("boiler too cold"));

        dispatcher.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_handler_error_is_captured() {
        let mut container = TypeMapContainer::new();
        container.register(AsyncFailingHandler::default);

        let module = HandlerModule::new("failing")
            .handles(async_handler_of::<AsyncFailingCommand, AsyncFailingHandler>());

        let mut dispatcher = dispatcher_with(container, vec![module]);
        dispatcher.load_message_handler_invokers().unwrap();
        dispatcher.start().unwrap();

        let (dispatch, rx) = dispatch_for(AsyncFailingCommand {
            message: "async boom".to_string(),
        });
        dispatcher.dispatch(dispatch).unwrap();

        let result = tokio::task::spawn_blocking(move || wait_result(&rx))
            .await
            .unwrap();
        assert!(result.was_handled());
        assert!(result.errors().to_string().contains("async boom"));

        dispatcher.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn async_handler_not_starting_its_task_is_an_error() {
        let mut container = TypeMapContainer::new();
        container.register(NotStartingHandler::default);

        let module = HandlerModule::new("failing")
            .handles(async_handler_of::<AsyncFailingCommand, NotStartingHandler>());

        let mut dispatcher = dispatcher_with(container, vec![module]);
        dispatcher.load_message_handler_invokers().unwrap();
        dispatcher.start().unwrap();

        let (dispatch, rx) = dispatch_for(AsyncFailingCommand {
            message: String::new(),
        });
        dispatcher.dispatch(dispatch).unwrap();

        let result = tokio::task::spawn_blocking(move || wait_result(&rx))
            .await
            .unwrap();
        assert!(result.was_handled());
        assert!(result
            .errors()
            .to_string()
            .contains("handler did not start its task"));

        dispatcher.stop().unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn purge_queues_sums_pending_tasks() {
        let gate = Gate::new();

        let mut container = TypeMapContainer::new();
        let g = Arc::clone(&gate);
        container.register(move || BlockingHandler1 {
            gate: Arc::clone(&g),
        });
        let g = Arc::clone(&gate);
        container.register(move || BlockingHandler2 {
            gate: Arc::clone(&g),
        });
        let g = Arc::clone(&gate);
        container.register(move || BlockingHandler3 {
            gate: Arc::clone(&g),
        });

        let module = HandlerModule::new("blocking")
            .handles(handler_of::<ScanCommand1, BlockingHandler1>().in_dispatch_queue("Queue1"))
            .handles(handler_of::<ScanCommand1, BlockingHandler2>().in_dispatch_queue("Queue2"))
            .handles(handler_of::<ScanCommand1, BlockingHandler3>().in_dispatch_queue("Queue3"));

        let mut dispatcher = dispatcher_with(container, vec![module]);
        dispatcher.load_message_handler_invokers().unwrap();
        dispatcher.start().unwrap();

        // First dispatch occupies the three queue workers
        let (first, _first_rx) = dispatch_for(ScanCommand1);
        dispatcher.dispatch(first).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(1);
        while gate.entered.load(Ordering::SeqCst) < 3 {
            assert!(std::time::Instant::now() < deadline, "workers did not start");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // Second dispatch leaves one pending task per queue
        let (second, _second_rx) = dispatch_for(ScanCommand1);
        dispatcher.dispatch(second).unwrap();

        assert_eq!(dispatcher.purge_queues(), 3);
        assert_eq!(dispatcher.purge_queues(), 0);

        gate.open();
        dispatcher.stop().unwrap();
    }
}
