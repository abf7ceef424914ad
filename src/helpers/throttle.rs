// Pacing between batched API requests.
//
// The operations in `fetch` pause at fixed points (every 10th bulk lookup,
// after every feature chunk). The pause goes through this trait so tests can
// substitute an implementation that records pauses instead of sleeping.

use log::debug;
use std::time::Duration;

/// A blocking pause between requests to an external service.
pub trait Throttle: Send + Sync {
    fn pause(&self, wait: Duration);
}

/// Production throttle: blocks the current thread for the full duration.
#[derive(Debug, Clone, Default)]
pub struct SleepThrottle;

impl Throttle for SleepThrottle {
    fn pause(&self, wait: Duration) {
        debug!("throttling: sleeping for {} ms", wait.as_millis());
        std::thread::sleep(wait);
    }
}
