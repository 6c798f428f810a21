use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::trace;

pub const DEFAULT_QUIET_PERIOD: Duration = Duration::from_millis(1000);

type Sink<T> = Rc<dyn Fn(T)>;

struct Inner<T> {
    pending: Option<T>,
    sink: Sink<T>,
    timer: Option<JoinHandle<()>>,
}

impl<T> Inner<T> {
    fn stop_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

/// Delivers only the latest value once calls stop for the quiet period.
///
/// The dispatcher is created once; the sink can be swapped with
/// [`Debouncer::set_sink`] and is looked up when the timer fires, so the
/// value and the callback are always the current ones. Timers are local
/// tasks: use from inside a [`tokio::task::LocalSet`].
pub struct Debouncer<T> {
    inner: Rc<RefCell<Inner<T>>>,
    quiet: Duration,
}

impl<T> Clone for Debouncer<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            quiet: self.quiet,
        }
    }
}

impl<T: 'static> Debouncer<T> {
    pub fn new(quiet: Duration, sink: impl Fn(T) + 'static) -> Self {
        Self {
            inner: Rc::new(RefCell::new(Inner {
                pending: None,
                sink: Rc::new(sink),
                timer: None,
            })),
            quiet,
        }
    }

    pub fn quiet_period(&self) -> Duration {
        self.quiet
    }

    pub fn set_sink(&self, sink: impl Fn(T) + 'static) {
        self.inner.borrow_mut().sink = Rc::new(sink);
    }

    pub fn is_pending(&self) -> bool {
        self.inner.borrow().pending.is_some()
    }

    /// Replace the pending value and restart the quiet period.
    pub fn call(&self, value: T) {
        let weak: Weak<RefCell<Inner<T>>> = Rc::downgrade(&self.inner);
        let quiet = self.quiet;
        let mut inner = self.inner.borrow_mut();
        inner.pending = Some(value);
        inner.stop_timer();
        inner.timer = Some(tokio::task::spawn_local(async move {
            tokio::time::sleep(quiet).await;
            if let Some(inner) = weak.upgrade() {
                inner.borrow_mut().timer = None;
                Self::deliver(&inner);
            }
        }));
    }

    /// Deliver the pending value now, if any.
    pub fn flush(&self) {
        self.inner.borrow_mut().stop_timer();
        Self::deliver(&self.inner);
    }

    /// Drop the pending value without delivering it.
    pub fn cancel(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.stop_timer();
        inner.pending = None;
    }

    fn deliver(inner: &Rc<RefCell<Inner<T>>>) {
        let (value, sink) = {
            let mut guard = inner.borrow_mut();
            (guard.pending.take(), guard.sink.clone())
        };
        if let Some(value) = value {
            trace!("Debounced value delivered");
            sink(value);
        }
    }
}
