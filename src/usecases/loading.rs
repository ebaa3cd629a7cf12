use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Counts in-flight operations. The flag is up while any guard is alive.
#[derive(Debug, Clone, Default)]
pub struct LoadingFlag {
    in_flight: Arc<AtomicUsize>,
}

impl LoadingFlag {
    /// Raises the flag until the returned guard is dropped, on every exit
    /// path including errors and cancellation.
    pub fn begin(&self) -> LoadingGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        LoadingGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst) > 0
    }
}

#[derive(Debug)]
pub struct LoadingGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_follows_guard_lifetimes() {
        let flag = LoadingFlag::default();
        assert!(!flag.is_loading());

        let first = flag.begin();
        let second = flag.begin();
        drop(first);
        assert!(flag.is_loading());

        drop(second);
        assert!(!flag.is_loading());
    }

    #[test]
    fn flag_is_cleared_when_the_operation_fails() {
        fn failing(flag: &LoadingFlag) -> Result<(), &'static str> {
            let _guard = flag.begin();
            Err("backend down")
        }
        let flag = LoadingFlag::default();

        assert!(failing(&flag).is_err());

        assert!(!flag.is_loading());
    }
}
