//! Purpose: Fire-once cancellation flag shared between orchestration and the decoder.
//! Exports: `CancelSignal`.
//! Role: Cooperative stop request polled between input keys.
//! Invariants: Once fired the signal never resets.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Clone, Debug, Default)]
pub struct CancelSignal {
    fired: Arc<AtomicBool>,
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fire(&self) {
        self.fired.store(true, Ordering::Release);
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::CancelSignal;

    #[test]
    fn clones_observe_the_same_flag() {
        let signal = CancelSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_fired());
        signal.fire();
        signal.fire();
        assert!(observer.is_fired());
    }
}
