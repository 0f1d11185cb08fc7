use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Single-slot "discovery needed" flag. Any watch unit may raise it; the
/// housekeeping task is the only consumer. Raising it twice before it is
/// consumed collapses into one refresh.
#[derive(Clone, Default)]
pub struct RefreshSignal {
    flag: Arc<AtomicBool>,
}

impl RefreshSignal {
    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Consume the flag, returning whether a refresh was pending.
    pub fn take(&self) -> bool {
        self.flag.swap(false, Ordering::AcqRel)
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_consumes_once() {
        let signal = RefreshSignal::default();
        assert!(!signal.take());
        signal.request();
        signal.clone().request();
        assert!(signal.is_requested());
        assert!(signal.take());
        assert!(!signal.take());
    }
}
