use std::{
    env,
    time::Duration,
};

use tokio::{
    sync::Mutex,
    time::{sleep, Instant},
};
use tracing::debug;

const WINDOW: Duration = Duration::from_secs(60);

/// Process-wide ceiling on live-backend calls per minute. All in-flight
/// requests draw from the same window; callers over the ceiling sleep until
/// capacity frees up instead of failing.
#[derive(Debug)]
pub struct CallGate {
    ceiling: u32,
    window: Mutex<CallWindow>,
}

#[derive(Debug)]
struct CallWindow {
    started_at: Instant,
    calls: u32,
}

impl CallGate {
    pub fn new(ceiling: u32) -> Self {
        Self {
            ceiling: ceiling.max(1),
            window: Mutex::new(CallWindow {
                started_at: Instant::now(),
                calls: 0,
            }),
        }
    }

    pub fn from_env() -> Self {
        let ceiling = env::var("REWRITE_CALLS_PER_MINUTE")
            .ok()
            .and_then(|value| value.parse::<u32>().ok())
            .filter(|value| *value > 0)
            .unwrap_or(60);
        Self::new(ceiling)
    }

    /// Consumes one unit of call capacity, sleeping across window boundaries
    /// until one is available.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut window = self.window.lock().await;
                let now = Instant::now();
                if now.duration_since(window.started_at) >= WINDOW {
                    window.started_at = now;
                    window.calls = 0;
                }

                if window.calls < self.ceiling {
                    window.calls += 1;
                    return;
                }

                window.started_at + WINDOW - now
            };

            debug!(wait_ms = wait.as_millis() as u64, "call gate saturated, waiting");
            sleep(wait).await;
        }
    }
}
