use std::sync::{Arc, Mutex};

/// Append-only list of callbacks notified when a new `T` appears.
pub struct Observers<T: ?Sized> {
    listeners: Mutex<Vec<Arc<dyn Fn(&Arc<T>) + Send + Sync>>>,
}

impl<T: ?Sized> Observers<T> {
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: impl Fn(&Arc<T>) + Send + Sync + 'static) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Arc::new(listener));
    }

    /// Call every listener registered so far, in registration order.
    pub fn notify(&self, item: &Arc<T>) {
        let listeners = self
            .listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        for listener in listeners {
            listener(item);
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: ?Sized> Default for Observers<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notify_in_registration_order() {
        let observers = Observers::<String>::new();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second"] {
            let calls = calls.clone();
            observers.add(move |item: &Arc<String>| {
                calls.lock().unwrap().push(format!("{tag}:{item}"));
            });
        }

        observers.notify(&Arc::new("lp-1".to_string()));

        assert_eq!(observers.len(), 2);
        assert_eq!(*calls.lock().unwrap(), vec!["first:lp-1", "second:lp-1"]);
    }

    #[test]
    fn test_listener_may_register_more_listeners() {
        let observers = Arc::new(Observers::<u32>::new());

        let inner = observers.clone();
        observers.add(move |_| inner.add(|_| {}));
        observers.notify(&Arc::new(1));

        assert_eq!(observers.len(), 2);
    }
}
