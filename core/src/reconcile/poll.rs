use log::debug;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

use crate::config::ReconcileOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub interval: Duration,
    pub window: Duration,
}

impl PollSchedule {
    pub fn new(interval: Duration, window: Duration) -> Self {
        Self { interval, window }
    }

    pub fn from_options(options: &ReconcileOptions) -> Self {
        Self::new(options.poll_interval(), options.poll_window())
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::from_options(&ReconcileOptions::default())
    }
}

/// Calls `attempt` immediately and then once per interval until it yields a
/// value or the window has elapsed. The last attempt lands on the window edge.
pub async fn poll_until<T, F, Fut>(schedule: PollSchedule, mut attempt: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + schedule.window;
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        if let Some(value) = attempt(attempts).await {
            debug!("poll satisfied on attempt {}", attempts);
            return Some(value);
        }

        let now = Instant::now();
        if now >= deadline || schedule.interval.is_zero() {
            debug!("poll window closed after {} attempts", attempts);
            return None;
        }
        sleep(schedule.interval.min(deadline - now)).await;
    }
}
