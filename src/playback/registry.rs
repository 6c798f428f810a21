use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

type ReadyCallback = Box<dyn FnOnce()>;

#[derive(Default)]
struct RegistryInner {
    loaded: bool,
    next_id: u64,
    waiting: Vec<(InstanceId, String, ReadyCallback)>,
}

/// Per-instance replacement for the player API's single global readiness
/// hook.
///
/// Each mounted player registers its own callback. When the API finishes
/// loading, only the players still registered are initialized; a player that
/// unmounted in the meantime is never called back. After loading, new
/// registrations are initialized immediately.
#[derive(Clone, Default)]
pub struct PlayerApiRegistry {
    inner: Rc<RefCell<RegistryInner>>,
}

impl PlayerApiRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.borrow().loaded
    }

    /// Number of players waiting for the API.
    pub fn pending(&self) -> usize {
        self.inner.borrow().waiting.len()
    }

    pub fn register(&self, instance: impl Into<String>, on_ready: impl FnOnce() + 'static) -> InstanceId {
        let instance = instance.into();
        let (id, run_now) = {
            let mut inner = self.inner.borrow_mut();
            inner.next_id += 1;
            let id = InstanceId(inner.next_id);
            if inner.loaded {
                (id, Some(on_ready))
            } else {
                debug!("Player '{}' waiting for API", instance);
                inner.waiting.push((id, instance, Box::new(on_ready)));
                (id, None)
            }
        };
        if let Some(f) = run_now {
            f();
        }
        id
    }

    pub fn unregister(&self, id: InstanceId) {
        self.inner.borrow_mut().waiting.retain(|(i, _, _)| *i != id);
    }

    /// The process-wide load hook. Fans out to the players registered right
    /// now; with none registered it only records that the API is loaded.
    pub fn api_loaded(&self) {
        let waiting = {
            let mut inner = self.inner.borrow_mut();
            inner.loaded = true;
            std::mem::take(&mut inner.waiting)
        };
        for (_, instance, on_ready) in waiting {
            debug!("Initializing player '{}'", instance);
            on_ready();
        }
    }
}
