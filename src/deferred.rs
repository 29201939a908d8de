use std::cell::{OnceCell, RefCell};

/// A computation whose result may be produced out of line from the code that
/// created it. Forcing runs the underlying thunk at most once and caches the
/// result; there is no cancellation, a forced computation runs to completion.
///
/// Sessions are single-threaded, so this doesn't need to be Sync.
pub struct Deferred<T> {
    cell: OnceCell<T>,
    thunk: RefCell<Option<Box<dyn FnOnce() -> T>>>,
}

impl<T> Deferred<T> {
    /// Wraps a value that is already available. Forcing is then free.
    pub fn ready(value: T) -> Deferred<T> {
        let cell = OnceCell::new();
        let _ = cell.set(value);
        Deferred {
            cell,
            thunk: RefCell::new(None),
        }
    }

    pub fn new(thunk: impl FnOnce() -> T + 'static) -> Deferred<T> {
        Deferred {
            cell: OnceCell::new(),
            thunk: RefCell::new(Some(Box::new(thunk))),
        }
    }

    pub fn is_forced(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Runs the thunk if it hasn't run yet, and returns the cached result.
    pub fn force(&self) -> &T {
        if self.cell.get().is_none() {
            let thunk = self
                .thunk
                .borrow_mut()
                .take()
                .expect("deferred computation has no thunk and no value");
            let value = thunk();
            let _ = self.cell.set(value);
        }
        self.cell.get().unwrap()
    }

    /// Forces and takes ownership of the result.
    pub fn into_inner(self) -> T {
        self.force();
        self.cell.into_inner().unwrap()
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.cell.get() {
            Some(value) => write!(f, "Deferred(forced: {:?})", value),
            None => write!(f, "Deferred(pending)"),
        }
    }
}
