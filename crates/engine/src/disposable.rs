use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

type DisposeFn = Box<dyn FnOnce() + Send>;

/// Token that relinquishes a registration when disposed.
///
/// Disposal runs the release callback at most once. Clones share the same
/// callback, so disposing any clone disposes them all.
#[derive(Clone)]
pub struct Disposable {
    release: Arc<Mutex<Option<DisposeFn>>>,
}

impl Disposable {
    pub fn new(release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            release: Arc::new(Mutex::new(Some(Box::new(release)))),
        }
    }

    /// A token with nothing to release.
    pub fn noop() -> Self {
        Self {
            release: Arc::new(Mutex::new(None)),
        }
    }

    pub fn dispose(&self) {
        let release = self
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(release) = release {
            release();
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

#[derive(Default)]
struct SubscriptionState {
    items: Vec<Disposable>,
    closed: bool,
}

/// Ordered list of everything an extension registered while loaded.
///
/// Once [`dispose_all`](Self::dispose_all) has run the list is closed: later
/// pushes are disposed immediately instead of being kept.
#[derive(Clone, Default)]
pub struct SubscriptionList {
    state: Arc<Mutex<SubscriptionState>>,
}

impl SubscriptionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `disposable`. Returns `false` if the list was already closed.
    pub fn push(&self, disposable: Disposable) -> bool {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            drop(state);
            disposable.dispose();
            return false;
        }
        state.items.push(disposable);
        true
    }

    /// Dispose every tracked item in registration order and close the list.
    pub(crate) fn dispose_all(&self) -> usize {
        let items = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.closed = true;
            std::mem::take(&mut state.items)
        };

        let count = items.len();
        for item in items {
            item.dispose();
        }
        count
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for SubscriptionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionList")
            .field("len", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
