use std::sync::Mutex;
use std::time::{Duration, Instant};

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) fn remaining_budget(total_timeout: Duration, started_at: Instant) -> Option<Duration> {
    let elapsed = started_at.elapsed();
    if elapsed >= total_timeout {
        return None;
    }
    Some(total_timeout - elapsed)
}

pub(crate) fn bounded_retry_delay(
    retry_delay: Duration,
    total_timeout: Duration,
    started_at: Instant,
) -> Option<Duration> {
    let remaining = remaining_budget(total_timeout, started_at)?;
    if retry_delay >= remaining {
        return None;
    }
    Some(retry_delay)
}
