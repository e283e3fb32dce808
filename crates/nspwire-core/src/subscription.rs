use std::fmt;

/// Explicit unsubscribe handle returned by every registration.
///
/// Unsubscribes when [`Subscription::unsubscribe`] is called or when the
/// handle is dropped, whichever comes first.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(cancel: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A handle with nothing to release.
    pub fn noop() -> Self {
        Self { cancel: None }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn unsubscribe_runs_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let sub = Subscription::new(move || {
            c.fetch_add(1, Ordering::Relaxed);
        });
        sub.unsubscribe();
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn drop_unsubscribes() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let c = Arc::clone(&count);
            let _sub = Subscription::new(move || {
                c.fetch_add(1, Ordering::Relaxed);
            });
        }
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn noop_is_inactive() {
        let sub = Subscription::noop();
        assert!(format!("{sub:?}").contains("false"));
    }
}
