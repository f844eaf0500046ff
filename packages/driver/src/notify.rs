use homewave_core::notification::Notification;
use std::sync::Mutex;

pub type WatcherCallback = Box<dyn Fn(&Notification) + Send + Sync>;

/// Token returned by [Watchers::add], used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WatcherId(u64);

/// The notification fan-out. All deliveries happen under one mutex, so
/// watchers observe a serialized stream; a slow watcher therefore
/// stalls decode. Watchers must not call back into the library from
/// inside the callback stack; they may enqueue work instead.
#[derive(Default)]
pub struct Watchers {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    entries: Vec<(WatcherId, WatcherCallback)>,
}

impl Watchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, callback: WatcherCallback) -> WatcherId {
        let mut inner = self.inner.lock().expect("watcher list poisoned");
        inner.next_id += 1;
        let id = WatcherId(inner.next_id);
        inner.entries.push((id, callback));
        id
    }

    pub fn remove(&self, id: WatcherId) -> bool {
        let mut inner = self.inner.lock().expect("watcher list poisoned");
        let before = inner.entries.len();
        inner.entries.retain(|(entry_id, _)| *entry_id != id);
        inner.entries.len() != before
    }

    pub fn dispatch(&self, notification: &Notification) {
        let inner = self.inner.lock().expect("watcher list poisoned");
        for (_, callback) in &inner.entries {
            callback(notification);
        }
    }

    pub fn dispatch_all(&self, notifications: &[Notification]) {
        for notification in notifications {
            self.dispatch(notification);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use homewave_core::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_add_remove() {
        let watchers = Watchers::new();
        let count = Arc::new(AtomicUsize::new(0));

        let count2 = count.clone();
        let id = watchers.add(Box::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        }));

        let notification = Notification::AllNodesQueried {
            home_id: HomeId::new(1),
        };
        watchers.dispatch(&notification);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(watchers.remove(id));
        assert!(!watchers.remove(id));
        watchers.dispatch(&notification);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
