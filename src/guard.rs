use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Held for the duration of a submission; a flow refuses to start another while it exists.
#[derive(Debug)]
pub(crate) struct InFlight {
    flag: Arc<AtomicBool>,
}

impl InFlight {
    pub(crate) fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag: flag.clone() })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

pub(crate) fn is_busy(flag: &AtomicBool) -> bool {
    flag.load(Ordering::Acquire)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_until_drop() {
        let flag = Arc::new(AtomicBool::new(false));
        let first = InFlight::acquire(&flag).unwrap();
        assert!(InFlight::acquire(&flag).is_none());
        assert!(is_busy(&flag));

        drop(first);
        assert!(!is_busy(&flag));
        assert!(InFlight::acquire(&flag).is_some());
    }
}
