use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

/// Wall clock in nanoseconds since the Unix epoch that never repeats or goes
/// backwards within one node.
///
/// Readings are `max(now, last + 1)`, so two mutations stamped by the same
/// node always get distinct, increasing timestamps even if the system clock
/// steps back. Clocks on different nodes are not coordinated.
#[derive(Debug, Default)]
pub struct Clock {
    last: AtomicI64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> i64 {
        let wall = wall_nanos();
        let mut current = self.last.load(Ordering::SeqCst);
        loop {
            let next = wall.max(current + 1);
            match self
                .last
                .compare_exchange_weak(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

fn wall_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX))
        .unwrap_or_default()
}
