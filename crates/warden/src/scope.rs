//! The security scope: the policy in force for the current unit of work.
//!
//! Exactly one [`Policy`] (or none) is current at any instant for a given
//! task or thread. "None" means the guard is not engaged and every operation
//! is allowed; this is the state of trusted code that never enters a scope.
//!
//! There are two slots:
//!
//! - inside a future run through [`SecurityScope::scope`], the slot belongs to
//!   that future and travels with it across worker threads;
//! - everywhere else the slot is thread-local, with a separate entry for each
//!   tokio task polled on the thread (e.g. tasks on a `LocalSet`).
//!
//! [`SecurityScope::enter`] pushes a policy onto whichever slot is active and
//! returns a [`ScopeToken`]. Dropping the token, on success, early return,
//! error or panic, removes exactly that entry, so tokens dropped out of order
//! never clobber a scope entered by someone else.
//!
//! Futures combined inside one task (`join!`, `select!`) share that task's
//! slot. Give each its own [`SecurityScope::scope`] when they need different
//! policies.
//!
//! ```
//! use std::sync::Arc;
//! use warden::{Policy, SecurityScope};
//!
//! assert!(SecurityScope::current().is_none());
//! {
//!     let _token = SecurityScope::enter(Some(Arc::new(Policy::deny_all())));
//!     assert!(SecurityScope::current().is_some());
//! }
//! assert!(SecurityScope::current().is_none());
//! ```
//!
//! Tasks spawned with `tokio::spawn` or `spawn_blocking` do not inherit the
//! caller's scope. Use [`SecurityScope::propagate`] and
//! [`SecurityScope::propagate_blocking`] to carry it over explicitly.

use std::cell::RefCell;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::task::Id as TaskId;

use crate::policy::Policy;

/// Entries pushed by live tokens on top of a base value.
#[derive(Debug, Default)]
struct ScopeStack {
    base: Option<Arc<Policy>>,
    entries: Vec<(u64, Option<Arc<Policy>>)>,
}

impl ScopeStack {
    fn new(base: Option<Arc<Policy>>) -> Self {
        Self {
            base,
            entries: Vec::new(),
        }
    }

    fn current(&self) -> Option<Arc<Policy>> {
        match self.entries.last() {
            Some((_, policy)) => policy.clone(),
            None => self.base.clone(),
        }
    }

    fn push(&mut self, token: u64, policy: Option<Arc<Policy>>) {
        self.entries.push((token, policy));
    }

    fn remove(&mut self, token: u64) {
        match self.entries.iter().rposition(|(id, _)| *id == token) {
            Some(idx) => {
                if idx + 1 != self.entries.len() {
                    tracing::warn!(
                        token,
                        "security scope exited out of order, keeping the newer scope"
                    );
                }
                self.entries.remove(idx);
            }
            None => tracing::warn!(token, "security scope token not found in its slot"),
        }
    }

    fn is_empty(&self) -> bool {
        self.base.is_none() && self.entries.is_empty()
    }
}

tokio::task_local! {
    static TASK_POLICY: RefCell<ScopeStack>;
}

thread_local! {
    static THREAD_POLICY: RefCell<HashMap<Option<TaskId>, ScopeStack>> =
        RefCell::new(HashMap::new());
}

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotKind {
    Task,
    /// Keyed by the tokio task polled on this thread, if any.
    Thread(Option<TaskId>),
}

impl SlotKind {
    fn active() -> Self {
        if TASK_POLICY.try_with(|_| ()).is_ok() {
            SlotKind::Task
        } else {
            SlotKind::Thread(tokio::task::try_id())
        }
    }

    fn push(self, token: u64, policy: Option<Arc<Policy>>) {
        let pushed = match self {
            SlotKind::Task => TASK_POLICY
                .try_with(|slot| slot.borrow_mut().push(token, policy))
                .is_ok(),
            SlotKind::Thread(task) => THREAD_POLICY
                .try_with(|slots| slots.borrow_mut().entry(task).or_default().push(token, policy))
                .is_ok(),
        };
        if !pushed {
            tracing::warn!(slot = ?self, "security scope slot is not reachable");
        }
    }

    fn remove(self, token: u64) {
        let removed = match self {
            SlotKind::Task => TASK_POLICY
                .try_with(|slot| slot.borrow_mut().remove(token))
                .is_ok(),
            SlotKind::Thread(task) => THREAD_POLICY
                .try_with(|slots| {
                    let mut slots = slots.borrow_mut();
                    if let Some(stack) = slots.get_mut(&task) {
                        stack.remove(token);
                        if stack.is_empty() {
                            slots.remove(&task);
                        }
                    }
                })
                .is_ok(),
        };
        if !removed {
            tracing::warn!(slot = ?self, "security scope slot is no longer reachable");
        }
    }

    fn get(self) -> Option<Arc<Policy>> {
        match self {
            SlotKind::Task => TASK_POLICY
                .try_with(|slot| slot.borrow().current())
                .ok()
                .flatten(),
            SlotKind::Thread(task) => THREAD_POLICY
                .try_with(|slots| slots.borrow().get(&task).and_then(ScopeStack::current))
                .ok()
                .flatten(),
        }
    }
}

/// Removes its scope entry when dropped.
///
/// Tokens are `!Send`: a token taken on a thread slot can never be restored
/// from another thread.
#[derive(Debug)]
#[must_use = "the previous scope is restored as soon as the token is dropped"]
pub struct ScopeToken {
    slot: SlotKind,
    id: u64,
    active: bool,
    _not_send: PhantomData<*const ()>,
}

impl ScopeToken {
    /// Restore the previous scope now.
    pub fn exit(self) {
        drop(self);
    }

    fn restore(&mut self) {
        if std::mem::take(&mut self.active) {
            tracing::debug!(slot = ?self.slot, token = self.id, "exiting security scope");
            self.slot.remove(self.id);
        }
    }
}

impl Drop for ScopeToken {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Entry points for establishing and inspecting the current policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct SecurityScope;

impl SecurityScope {
    /// Install `policy` as the current policy until the token is dropped.
    ///
    /// `None` lifts all restrictions for the extent of the token.
    pub fn enter(policy: Option<Arc<Policy>>) -> ScopeToken {
        let slot = SlotKind::active();
        let id = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(slot = ?slot, token = id, restricted = policy.is_some(), "entering security scope");
        slot.push(id, policy);
        ScopeToken {
            slot,
            id,
            active: true,
            _not_send: PhantomData,
        }
    }

    /// The current policy, or `None` when unrestricted.
    pub fn current() -> Option<Arc<Policy>> {
        SlotKind::active().get()
    }

    /// Returns true if a policy is in force.
    pub fn is_restricted() -> bool {
        Self::current().is_some()
    }

    /// Run `fut` with its own current policy.
    ///
    /// The scope is isolated from every other task, survives moves between
    /// worker threads, and is discarded when the future completes or is
    /// dropped (e.g. cancelled by a timeout).
    pub async fn scope<F>(policy: Option<Arc<Policy>>, fut: F) -> F::Output
    where
        F: Future,
    {
        TASK_POLICY.scope(RefCell::new(ScopeStack::new(policy)), fut).await
    }

    /// Run `f` with `policy` current, restoring the previous scope afterwards
    /// even if `f` panics.
    pub fn sync_scope<R>(policy: Option<Arc<Policy>>, f: impl FnOnce() -> R) -> R {
        let _token = Self::enter(policy);
        f()
    }

    /// Bind the caller's current policy to `fut`, for handing to
    /// `tokio::spawn`.
    pub fn propagate<F>(fut: F) -> impl Future<Output = F::Output>
    where
        F: Future,
    {
        Self::scope(Self::current(), fut)
    }

    /// Bind the caller's current policy to a blocking closure, for handing to
    /// `tokio::task::spawn_blocking` or `std::thread::spawn`.
    pub fn propagate_blocking<R>(f: impl FnOnce() -> R) -> impl FnOnce() -> R {
        let policy = Self::current();
        move || Self::sync_scope(policy, f)
    }
}
