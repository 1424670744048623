//! Cooperative shutdown signal
//!
//! Background loops receive a [`ShutdownSignal`] at construction and check
//! it once per iteration. A child signal fires when either it or any of its
//! ancestors is triggered, so a connector can be stopped on its own while
//! still following a process-wide shutdown.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
    parent: Option<Box<ShutdownSignal>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// New signal that also observes `self`
    pub fn child(&self) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            parent: Some(Box::new(self.clone())),
        }
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self.parent.as_ref().is_some_and(|p| p.is_triggered())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_trigger_reaches_child() {
        let root = ShutdownSignal::new();
        let child = root.child();
        assert!(!child.is_triggered());
        root.trigger();
        assert!(child.is_triggered());
    }

    #[test]
    fn test_child_trigger_stays_local() {
        let root = ShutdownSignal::new();
        let child = root.child();
        let clone = child.clone();
        child.trigger();
        assert!(clone.is_triggered());
        assert!(!root.is_triggered());
    }
}
