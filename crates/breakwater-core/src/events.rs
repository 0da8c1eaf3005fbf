//! Engine event hooks.
//!
//! Every engine reports notable moments (breaker transitions, evictions,
//! promotions, flushes, scaling decisions) through an [`EventSink`]: an
//! ordered list of closures installed at configuration time via the
//! builders' `on_*` methods. Hooks run synchronously on the thread that
//! produced the event, so they must be cheap; anything heavy belongs on a
//! channel the hook feeds.

use std::fmt;
use std::sync::Arc;

/// Implemented by each engine's event enum so telemetry can label what
/// happened and which engine instance it happened in.
pub trait EngineEvent: fmt::Debug {
    /// Short machine-readable label for the event variant.
    fn kind(&self) -> &'static str;

    /// Name of the engine instance that produced the event.
    fn source(&self) -> &str;
}

type Hook<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// An ordered set of event hooks.
///
/// Cloning is cheap (hooks are shared by refcount), and an empty sink
/// makes [`emit`](EventSink::emit) a no-op, so engines call it
/// unconditionally on hot paths.
pub struct EventSink<E> {
    hooks: Vec<Hook<E>>,
}

impl<E> EventSink<E> {
    /// A sink with no hooks installed.
    pub fn none() -> Self {
        Self { hooks: Vec::new() }
    }

    /// Installs a hook. Hooks run in installation order.
    pub fn hook<F>(&mut self, f: F)
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        self.hooks.push(Arc::new(f));
    }

    /// True when no hooks are installed.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Number of installed hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }
}

impl<E: EngineEvent> EventSink<E> {
    /// Reports an event to every hook.
    ///
    /// A panicking hook is contained and skipped; the hooks after it
    /// still run, and the panic surfaces through telemetry instead of
    /// unwinding into engine internals.
    pub fn emit(&self, event: &E) {
        if self.hooks.is_empty() {
            return;
        }
        for (position, hook) in self.hooks.iter().enumerate() {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| hook(event)));
            if outcome.is_err() {
                note_hook_panic(event, position);
            }
        }
    }
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
        }
    }
}

impl<E> Default for EventSink<E> {
    fn default() -> Self {
        Self::none()
    }
}

impl<E> fmt::Debug for EventSink<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

#[allow(unused_variables)]
fn note_hook_panic<E: EngineEvent>(event: &E, position: usize) {
    #[cfg(feature = "tracing")]
    tracing::error!(
        engine = event.source(),
        event = event.kind(),
        hook = position,
        "event hook panicked and was skipped"
    );
    #[cfg(feature = "metrics")]
    metrics::counter!(
        "breakwater_event_hook_panics_total",
        "event" => event.kind()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Tick(u64);

    impl EngineEvent for Tick {
        fn kind(&self) -> &'static str {
            "tick"
        }

        fn source(&self) -> &str {
            "test-engine"
        }
    }

    #[test]
    fn hooks_run_in_installation_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut sink = EventSink::none();
        for id in 0..3 {
            let order = Arc::clone(&order);
            sink.hook(move |event: &Tick| order.lock().push((id, event.0)));
        }

        sink.emit(&Tick(7));
        assert_eq!(*order.lock(), vec![(0, 7), (1, 7), (2, 7)]);
    }

    #[test]
    fn panicking_hook_is_contained() {
        let survivors = Arc::new(AtomicUsize::new(0));
        let mut sink = EventSink::none();
        sink.hook(|_: &Tick| panic!("bad hook"));
        {
            let survivors = Arc::clone(&survivors);
            sink.hook(move |_: &Tick| {
                survivors.fetch_add(1, Ordering::SeqCst);
            });
        }

        // The panic neither unwinds out of emit nor starves later hooks,
        // on this emit or the next.
        sink.emit(&Tick(1));
        sink.emit(&Tick(2));
        assert_eq!(survivors.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn clones_share_installed_hooks() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut sink = EventSink::none();
        {
            let fired = Arc::clone(&fired);
            sink.hook(move |_: &Tick| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        let copy = sink.clone();
        assert_eq!(copy.len(), 1);
        copy.emit(&Tick(0));
        sink.emit(&Tick(0));
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_sink_is_a_cheap_no_op() {
        let sink: EventSink<Tick> = EventSink::none();
        assert!(sink.is_empty());
        sink.emit(&Tick(0));
    }
}
