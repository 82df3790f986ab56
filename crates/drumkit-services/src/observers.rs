//! Observer list with synchronous fan-out

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Callback<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Returned by [`ObserverList::subscribe`], used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

/// Registered callbacks, called in subscription order on every event
pub struct ObserverList<E> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(ObserverId, Callback<E>)>>,
}

impl<E> ObserverList<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: Mutex::new(Vec::new()),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(callback)));
        id
    }

    /// Returns false if `id` was not subscribed
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call every observer registered at the time of the call.
    ///
    /// The list is copied before fan-out, so callbacks may subscribe or
    /// unsubscribe (themselves or others) without affecting this event.
    pub fn notify(&self, event: &E) {
        self.notify_while(event, || true);
    }

    /// Like [`notify`](Self::notify), but `proceed` is asked before each
    /// callback and the fan-out ends the first time it returns false.
    pub fn notify_while(&self, event: &E, mut proceed: impl FnMut() -> bool) {
        let snapshot: Vec<Callback<E>> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();

        for callback in snapshot {
            if !proceed() {
                break;
            }
            callback(event);
        }
    }
}

impl<E> Default for ObserverList<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    #[test]
    fn test_notify_reaches_every_observer() {
        let list = ObserverList::<u32>::new();
        let total = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let total = total.clone();
            list.subscribe(move |v| {
                total.fetch_add(*v as usize, Ordering::SeqCst);
            });
        }

        list.notify(&2);
        assert_eq!(total.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_unsubscribe() {
        let list = ObserverList::<()>::new();
        let id = list.subscribe(|_| {});
        assert_eq!(list.len(), 1);
        assert!(list.unsubscribe(id));
        assert!(!list.unsubscribe(id));
        assert!(list.is_empty());
    }

    #[test]
    fn test_unsubscribe_during_notify_keeps_pending_calls() {
        let list = Arc::new(ObserverList::<()>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let second_id = Arc::new(Mutex::new(None));

        // The first observer removes the second one mid fan-out
        {
            let list_ref = Arc::downgrade(&list);
            let second_id = second_id.clone();
            let calls = calls.clone();
            list.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let id = second_id.lock().unwrap().take();
                if let (Some(list), Some(id)) = (list_ref.upgrade(), id) {
                    list.unsubscribe(id);
                }
            });
        }
        {
            let calls = calls.clone();
            let id = list.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
            *second_id.lock().unwrap() = Some(id);
        }

        list.notify(&());
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        list.notify(&());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_notify_while_stops_the_fan_out() {
        let list = Arc::new(ObserverList::<()>::new());
        let open = Arc::new(AtomicBool::new(true));
        let calls = Arc::new(AtomicUsize::new(0));

        // The first observer closes the gate for the rest of this event
        {
            let open = open.clone();
            let calls = calls.clone();
            list.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                open.store(false, Ordering::SeqCst);
            });
        }
        {
            let calls = calls.clone();
            list.subscribe(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            });
        }

        list.notify_while(&(), || open.load(Ordering::SeqCst));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        list.notify(&());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
