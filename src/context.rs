//! Bound context: key/value pairs merged into every event produced while
//! they are active.
//!
//! Each logical task has its own store. Inside [`scope`] the store lives in
//! a `tokio` task-local and follows the future across threads; outside of
//! any scope a per-thread store is used. Stores are never shared, so no
//! locking is involved.

use crate::record::FieldValue;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::future::Future;
use std::marker::PhantomData;

pub type ContextMap = BTreeMap<String, FieldValue>;

tokio::task_local! {
    static TASK_CONTEXT: RefCell<ContextMap>;
}

thread_local! {
    static THREAD_CONTEXT: RefCell<ContextMap> = RefCell::new(BTreeMap::new());
}

fn in_task_scope() -> bool {
    TASK_CONTEXT.try_with(|_| ()).is_ok()
}

fn with_store<R>(f: impl FnOnce(&mut ContextMap) -> R) -> R {
    if in_task_scope() {
        TASK_CONTEXT.with(|store| f(&mut store.borrow_mut()))
    } else {
        THREAD_CONTEXT.with(|store| f(&mut store.borrow_mut()))
    }
}

/// Bind fields to the current task until [`clear`] is called.
pub fn bind<I, K>(fields: I)
where
    I: IntoIterator<Item = (K, FieldValue)>,
    K: Into<String>,
{
    with_store(|map| {
        for (key, value) in fields {
            map.insert(key.into(), value);
        }
    });
}

/// Remove the given keys from the current task's context.
pub fn unbind<I, K>(keys: I)
where
    I: IntoIterator<Item = K>,
    K: AsRef<str>,
{
    with_store(|map| {
        for key in keys {
            map.remove(key.as_ref());
        }
    });
}

/// Drop every bound field of the current task.
pub fn clear() {
    with_store(|map| map.clear());
}

/// Copy of the fields currently bound to this task.
pub fn snapshot() -> ContextMap {
    with_store(|map| map.clone())
}

/// Bind fields until the returned guard is dropped.
///
/// Previous values of the same keys are restored on drop, so guards nest.
/// The guard is tied to the current thread; use [`scope`] across `.await`.
pub fn bound<I, K>(fields: I) -> ContextGuard
where
    I: IntoIterator<Item = (K, FieldValue)>,
    K: Into<String>,
{
    // Collected before borrowing the store: the iterator may itself log.
    let fields: Vec<(String, FieldValue)> = fields.into_iter().map(|(k, v)| (k.into(), v)).collect();
    let previous = with_store(|map| {
        fields
            .into_iter()
            .map(|(key, value)| {
                let old = map.insert(key.clone(), value);
                (key, old)
            })
            .collect()
    });

    ContextGuard {
        previous,
        _not_send: PhantomData,
    }
}

/// Run `future` with its own context store, seeded with the caller's
/// context plus `fields`.
///
/// Bindings made inside the future do not leak out of it.
pub async fn scope<I, K, F>(fields: I, future: F) -> F::Output
where
    I: IntoIterator<Item = (K, FieldValue)>,
    K: Into<String>,
    F: Future,
{
    let mut seeded = snapshot();
    for (key, value) in fields {
        seeded.insert(key.into(), value);
    }
    TASK_CONTEXT.scope(RefCell::new(seeded), future).await
}

/// Restores the context bound by [`bound`] when dropped.
#[must_use = "the context is unbound as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Vec<(String, Option<FieldValue>)>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = std::mem::take(&mut self.previous);
        with_store(|map| {
            for (key, old) in previous.into_iter().rev() {
                match old {
                    Some(value) => {
                        map.insert(key, value);
                    }
                    None => {
                        map.remove(&key);
                    }
                }
            }
        });
    }
}
