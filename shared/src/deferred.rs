//! Deferred (lazy) computations with single-flight persistence
//!
//! A [`Deferred`] records a computation without running it. Nothing is
//! evaluated until a caller asks for the value:
//!
//! - [`Deferred::force`] evaluates and returns the value without caching it
//!   (a previously persisted value is returned as-is).
//! - [`Deferred::persist`] evaluates once, caches the value inside the handle
//!   and returns a handle that is still lazy from the consumer's point of
//!   view but resolves instantly.
//!
//! Clones share the same cache. Each handle carries an explicit state machine
//! `Unloaded -> Loading -> Ready`. `force` never blocks on a load in flight:
//! it returns the cached value if there is one and recomputes otherwise.
//! Concurrent `persist` calls from outside the rayon pool wait on a condition
//! variable and reuse the result, so a persisted computation runs once. A
//! `persist` issued from a rayon worker never waits, since the loader may be
//! that same worker further down the stack; it computes the value itself and
//! fills the cache if the loader has not. A failed or panicked load returns
//! the slot to `Unloaded`.
//!
//! Composition ([`Deferred::map`], [`Deferred::join`]) is free. Joined inputs
//! are forced in parallel on the rayon pool when the join itself is forced.

use rayon::prelude::*;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

type Thunk<T, E> = dyn Fn() -> Result<T, E> + Send + Sync;

/// Observable evaluation state of a deferred handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferredState {
    /// Not evaluated (or evaluated with `force` only)
    Unloaded,
    /// A `persist` is in flight on some thread
    Loading,
    /// Value cached
    Ready,
}

enum Slot<T> {
    Unloaded,
    Loading,
    Ready(Arc<T>),
}

struct Cell<T, E> {
    thunk: Box<Thunk<T, E>>,
    slot: Mutex<Slot<T>>,
    settled: Condvar,
}

impl<T, E> Cell<T, E> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the slot once no load is in flight.
    fn lock_settled(&self) -> MutexGuard<'_, Slot<T>> {
        self.settled
            .wait_while(self.lock(), |slot| matches!(slot, Slot::Loading))
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resets a `Loading` slot to `Unloaded` if the loader unwinds.
struct LoadingGuard<'a, T, E> {
    cell: &'a Cell<T, E>,
    armed: bool,
}

impl<T, E> Drop for LoadingGuard<'_, T, E> {
    fn drop(&mut self) {
        if self.armed {
            *self.cell.lock() = Slot::Unloaded;
            self.cell.settled.notify_all();
        }
    }
}

/// Lazy, shareable handle to a computation producing `T` or failing with `E`.
pub struct Deferred<T, E> {
    cell: Arc<Cell<T, E>>,
}

impl<T, E> Clone for Deferred<T, E> {
    fn clone(&self) -> Self {
        Self {
            cell: Arc::clone(&self.cell),
        }
    }
}

impl<T, E> fmt::Debug for Deferred<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("state", &self.state())
            .finish()
    }
}

impl<T, E> Deferred<T, E> {
    /// Current evaluation state
    pub fn state(&self) -> DeferredState {
        match &*self.cell.lock() {
            Slot::Unloaded => DeferredState::Unloaded,
            Slot::Loading => DeferredState::Loading,
            Slot::Ready(_) => DeferredState::Ready,
        }
    }

    /// Whether a value has been cached by `persist`
    pub fn is_persisted(&self) -> bool {
        self.state() == DeferredState::Ready
    }

    /// The cached value, if any, without evaluating anything
    pub fn cached(&self) -> Option<Arc<T>> {
        match &*self.cell.lock() {
            Slot::Ready(value) => Some(Arc::clone(value)),
            _ => None,
        }
    }

    /// Whether two handles share the same underlying computation
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T, E> Deferred<T, E>
where
    T: Send + Sync + 'static,
    E: Send + 'static,
{
    /// Record a computation without running it.
    pub fn new<F>(thunk: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self {
            cell: Arc::new(Cell {
                thunk: Box::new(thunk),
                slot: Mutex::new(Slot::Unloaded),
                settled: Condvar::new(),
            }),
        }
    }

    /// Wrap an already-computed value as a persisted handle.
    pub fn ready(value: T) -> Self
    where
        T: Clone,
    {
        let value = Arc::new(value);
        let source = Arc::clone(&value);
        Self {
            cell: Arc::new(Cell {
                thunk: Box::new(move || -> Result<T, E> { Ok(T::clone(&source)) }),
                slot: Mutex::new(Slot::Ready(value)),
                settled: Condvar::new(),
            }),
        }
    }

    /// Evaluate and return the value.
    ///
    /// Returns the cached value when the handle is persisted. Otherwise runs
    /// the computation without caching its result, even if a `persist` is in
    /// flight.
    pub fn force(&self) -> Result<Arc<T>, E> {
        if let Some(value) = self.cached() {
            return Ok(value);
        }
        (self.cell.thunk)().map(Arc::new)
    }

    /// Evaluate once, cache the value and return a handle sharing the cache.
    ///
    /// Only one caller runs the computation; concurrent callers off the rayon
    /// pool block until it settles. On failure the handle returns to
    /// `Unloaded` and the error is returned to the loading caller.
    pub fn persist(&self) -> Result<Self, E> {
        if rayon::current_thread_index().is_some() {
            return self.persist_without_waiting();
        }
        {
            let mut slot = self.cell.lock_settled();
            if matches!(*slot, Slot::Ready(_)) {
                return Ok(self.clone());
            }
            *slot = Slot::Loading;
        }

        let mut guard = LoadingGuard {
            cell: self.cell.as_ref(),
            armed: true,
        };
        let outcome = (self.cell.thunk)();
        guard.armed = false;

        let result = {
            let mut slot = self.cell.lock();
            match outcome {
                Ok(value) => {
                    *slot = Slot::Ready(Arc::new(value));
                    Ok(self.clone())
                }
                Err(err) => {
                    if matches!(*slot, Slot::Loading) {
                        *slot = Slot::Unloaded;
                    }
                    Err(err)
                }
            }
        };
        self.cell.settled.notify_all();
        result
    }

    fn persist_without_waiting(&self) -> Result<Self, E> {
        let should_load = {
            let mut slot = self.cell.lock();
            match *slot {
                Slot::Ready(_) => return Ok(self.clone()),
                Slot::Loading => false,
                Slot::Unloaded => {
                    *slot = Slot::Loading;
                    true
                }
            }
        };

        let mut guard = LoadingGuard {
            cell: self.cell.as_ref(),
            armed: should_load,
        };
        let outcome = (self.cell.thunk)();
        guard.armed = false;

        let result = {
            let mut slot = self.cell.lock();
            match outcome {
                Ok(value) => {
                    if !matches!(*slot, Slot::Ready(_)) {
                        *slot = Slot::Ready(Arc::new(value));
                    }
                    Ok(self.clone())
                }
                Err(err) => {
                    if should_load && matches!(*slot, Slot::Loading) {
                        *slot = Slot::Unloaded;
                    }
                    Err(err)
                }
            }
        };
        self.cell.settled.notify_all();
        result
    }

    /// Transform the value lazily.
    pub fn map<U, F>(&self, f: F) -> Deferred<U, E>
    where
        U: Send + Sync + 'static,
        F: Fn(&T) -> Result<U, E> + Send + Sync + 'static,
    {
        let source = self.clone();
        Deferred::new(move || {
            let value = source.force()?;
            f(value.as_ref())
        })
    }

    /// Combine several handles lazily; inputs are forced in parallel.
    pub fn join<U, F>(parts: Vec<Deferred<T, E>>, f: F) -> Deferred<U, E>
    where
        U: Send + Sync + 'static,
        F: Fn(&[Arc<T>]) -> Result<U, E> + Send + Sync + 'static,
    {
        Deferred::new(move || {
            let values = parts
                .par_iter()
                .map(Deferred::force)
                .collect::<Result<Vec<_>, E>>()?;
            f(&values)
        })
    }
}

impl<T, E> Deferred<T, E>
where
    T: Send + Sync + 'static,
    E: Send + fmt::Display + 'static,
{
    /// Start persisting on a dedicated thread and return immediately.
    ///
    /// Later `persist` calls wait for the in-flight load; `force` recomputes
    /// until the value is cached. The loader runs outside the rayon pool so
    /// joined inputs it forces never share a worker stack with it.
    pub fn persist_in_background(&self) {
        let handle = self.clone();
        let spawned = thread::Builder::new()
            .name("deferred-persist".to_string())
            .spawn(move || {
                if let Err(err) = handle.persist() {
                    log::warn!("background persist failed: {err}");
                }
            });
        if let Err(err) = spawned {
            log::warn!("could not start background persist: {err}");
        }
    }
}
