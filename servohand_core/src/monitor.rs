//! Observer plumbing for the periodic feedback monitor.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::actuator::Feedback;
use crate::servo_map::ServoMap;

/// One monitor sweep: connected servos, `None` where nothing could be read.
pub type FeedbackSnapshot = ServoMap<Option<Feedback>>;

pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every monitor sweep. Errors and panics are logged and
/// contained; they never stop the monitor.
pub trait MonitorObserver: Send + Sync {
    fn on_feedback(&self, snapshot: &FeedbackSnapshot) -> Result<(), ObserverError>;
}

impl<F> MonitorObserver for F
where
    F: Fn(&FeedbackSnapshot) -> Result<(), ObserverError> + Send + Sync,
{
    fn on_feedback(&self, snapshot: &FeedbackSnapshot) -> Result<(), ObserverError> {
        self(snapshot)
    }
}

pub(crate) fn notify(observers: &[Arc<dyn MonitorObserver>], snapshot: &FeedbackSnapshot) {
    for (index, obs) in observers.iter().enumerate() {
        match catch_unwind(AssertUnwindSafe(|| obs.on_feedback(snapshot))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(observer = index, error = %e, "monitor observer failed"),
            Err(_) => tracing::warn!(observer = index, "monitor observer panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn failing_observers_do_not_block_later_ones() {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let observers: Vec<Arc<dyn MonitorObserver>> = vec![
            Arc::new(|_: &FeedbackSnapshot| -> Result<(), ObserverError> { Err("nope".into()) }),
            Arc::new(|_: &FeedbackSnapshot| -> Result<(), ObserverError> { panic!("boom") }),
            Arc::new(move |_: &FeedbackSnapshot| -> Result<(), ObserverError> {
                h.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }),
        ];
        notify(&observers, &ServoMap::new());
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
