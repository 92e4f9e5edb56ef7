use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static LOCAL_DISPATCH_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Per-thread toggle for local short-circuit delivery.
///
/// When the local peer also handles a message it is about to send, the bus
/// may dispatch it locally instead of going through the transport, unless
/// the current thread disabled the short-circuit. The flag defaults to
/// enabled.
pub struct LocalDispatch;

impl LocalDispatch {
    pub fn is_enabled() -> bool {
        LOCAL_DISPATCH_ENABLED.with(Cell::get)
    }

    /// Disable local dispatch on the current thread until the returned guard
    /// is dropped. The guard restores the value the flag had when it was
    /// taken, so nested disables compose.
    #[must_use = "local dispatch is re-enabled when the guard is dropped"]
    pub fn disable() -> LocalDispatchGuard {
        let prior = LOCAL_DISPATCH_ENABLED.with(|flag| flag.replace(false));
        LocalDispatchGuard {
            prior,
            _not_send: PhantomData,
        }
    }
}

/// Restores the local dispatch flag to its prior value on drop
pub struct LocalDispatchGuard {
    prior: bool,

    // The guard toggles a thread-local flag and must be dropped on the
    // thread that created it
    _not_send: PhantomData<*const ()>,
}

impl Drop for LocalDispatchGuard {
    fn drop(&mut self) {
        LOCAL_DISPATCH_ENABLED.with(|flag| flag.set(self.prior));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enabled_by_default() {
        assert!(LocalDispatch::is_enabled());
    }

    #[test]
    fn disable_restores_on_drop() {
        {
            let _guard = LocalDispatch::disable();
            assert!(!LocalDispatch::is_enabled());
        }
        assert!(LocalDispatch::is_enabled());
    }

    #[test]
    fn nested_disables_compose() {
        let outer = LocalDispatch::disable();
        assert!(!LocalDispatch::is_enabled());

        {
            let _inner = LocalDispatch::disable();
            assert!(!LocalDispatch::is_enabled());
        }

        // The inner guard restored the outer disabled state, not the default
        assert!(!LocalDispatch::is_enabled());

        drop(outer);
        assert!(LocalDispatch::is_enabled());
    }

    #[test]
    fn threads_are_independent() {
        let _guard = LocalDispatch::disable();

        std::thread::spawn(|| {
            assert!(LocalDispatch::is_enabled());
        })
        .join()
        .unwrap();
    }
}
