//! Hook registry for circuit breaker state changes.
//!
//! Hooks never run on the thread that performed the transition. The
//! transition happens under the breaker's lock, and a hook that called back
//! into the same breaker would otherwise deadlock. Each notification is
//! handed to the tokio blocking pool when a runtime is available, or to a
//! short-lived thread otherwise. Delivery order between rapid transitions is
//! not guaranteed, and a hook may observe a breaker that has already moved on.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::state::State;

/// A breaker state change, as delivered to hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    /// Name of the breaker.
    pub name: Arc<str>,
    /// State before the transition.
    pub from: State,
    /// State after the transition.
    pub to: State,
}

type ChangeHookFn = Arc<dyn Fn(&StateChange) + Send + Sync + 'static>;
type HookFn = Arc<dyn Fn() + Send + Sync + 'static>;

/// A registry for circuit breaker event hooks.
pub struct HookRegistry {
    on_state_change: RwLock<Option<ChangeHookFn>>,
    on_open: RwLock<Option<HookFn>>,
    on_close: RwLock<Option<HookFn>>,
    on_half_open: RwLock<Option<HookFn>>,
}

impl Default for HookRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HookRegistry {
    /// Creates a new empty hook registry.
    pub fn new() -> Self {
        Self {
            on_state_change: RwLock::new(None),
            on_open: RwLock::new(None),
            on_close: RwLock::new(None),
            on_half_open: RwLock::new(None),
        }
    }

    /// Sets the hook called on every transition.
    pub fn set_on_state_change<F>(&self, f: F)
    where
        F: Fn(&StateChange) + Send + Sync + 'static,
    {
        *self.on_state_change.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the circuit breaker opens.
    pub fn set_on_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_open.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the circuit breaker closes.
    pub fn set_on_close<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_close.write() = Some(Arc::new(f));
    }

    /// Sets the hook to call when the circuit breaker half-opens.
    pub fn set_on_half_open<F>(&self, f: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *self.on_half_open.write() = Some(Arc::new(f));
    }

    /// Moves every hook set in `other` into this registry. Slots `other`
    /// leaves empty keep their current hook.
    pub(crate) fn absorb(&self, other: HookRegistry) {
        fn take<T>(into: &RwLock<Option<T>>, from: RwLock<Option<T>>) {
            if let Some(hook) = from.into_inner() {
                *into.write() = Some(hook);
            }
        }

        take(&self.on_state_change, other.on_state_change);
        take(&self.on_open, other.on_open);
        take(&self.on_close, other.on_close);
        take(&self.on_half_open, other.on_half_open);
    }

    fn is_empty(&self) -> bool {
        self.on_state_change.read().is_none()
            && self.on_open.read().is_none()
            && self.on_close.read().is_none()
            && self.on_half_open.read().is_none()
    }

    /// Hands `change` to a detached execution unit.
    pub(crate) fn dispatch(self: &Arc<Self>, change: StateChange) {
        if self.is_empty() {
            return;
        }

        let hooks = Arc::clone(self);
        let job = move || hooks.execute(&change);

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            drop(handle.spawn_blocking(job));
            return;
        }

        if let Err(err) = thread::Builder::new()
            .name("breaker-hook".into())
            .spawn(job)
        {
            warn!(error = %err, "failed to spawn state change hook thread");
        }
    }

    fn execute(&self, change: &StateChange) {
        let on_change = self.on_state_change.read().clone();
        if let Some(hook) = on_change {
            guarded(change, || hook(change));
        }

        let on_state = match change.to {
            State::Open => self.on_open.read().clone(),
            State::Closed => self.on_close.read().clone(),
            State::HalfOpen => self.on_half_open.read().clone(),
        };
        if let Some(hook) = on_state {
            guarded(change, || hook());
        }
    }
}

/// Runs a hook, logging instead of propagating a panic.
fn guarded<F: FnOnce()>(change: &StateChange, f: F) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
        error!(
            breaker = %change.name,
            from = %change.from,
            to = %change.to,
            panic = panic_message(payload.as_ref()),
            "state change hook panicked"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn change(to: State) -> StateChange {
        StateChange {
            name: Arc::from("hooks"),
            from: State::Closed,
            to,
        }
    }

    #[test]
    fn dispatch_runs_off_the_calling_thread() {
        let hooks = Arc::new(HookRegistry::new());
        let (tx, rx) = mpsc::channel();
        let caller = thread::current().id();
        hooks.set_on_state_change(move |c| {
            tx.send((thread::current().id(), c.to)).unwrap();
        });

        hooks.dispatch(change(State::Open));

        let (id, to) = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_ne!(id, caller);
        assert_eq!(to, State::Open);
    }

    #[test]
    fn panicking_hook_does_not_stop_the_next_one() {
        let hooks = Arc::new(HookRegistry::new());
        let (tx, rx) = mpsc::channel();
        hooks.set_on_state_change(|_| panic!("hook failure"));
        hooks.set_on_open(move || tx.send(()).unwrap());

        hooks.dispatch(change(State::Open));

        rx.recv_timeout(Duration::from_secs(5)).unwrap();
    }

    #[test]
    fn per_state_hooks_only_fire_for_their_state() {
        let hooks = Arc::new(HookRegistry::new());
        let (tx, rx) = mpsc::channel();
        let closed = tx.clone();
        hooks.set_on_close(move || closed.send(State::Closed).unwrap());
        hooks.set_on_half_open(move || tx.send(State::HalfOpen).unwrap());

        hooks.dispatch(change(State::HalfOpen));

        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), State::HalfOpen);
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }
}
