use std::thread;
use std::time::Duration;

use super::driver::DisplayError;

/// Bounded retries with exponential backoff for hardware operations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    attempts: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self { attempts: attempts.max(1), base_delay }
    }

    /// Pause after the `failed`-th failure: base, 2 x base, 4 x base, ...
    pub fn delay_after(&self, failed: u32) -> Duration {
        let exponent = failed.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// Runs `op` until it succeeds, fails with a permanent error, or runs out
    /// of attempts. The last error is returned.
    pub fn run<T>(&self, what: &str, mut op: impl FnMut() -> Result<T, DisplayError>) -> Result<T, DisplayError> {
        let mut failed = 0;
        loop {
            match op() {
                Ok(value) => {
                    if failed > 0 {
                        log::info!("Display {} succeeded after {} retries", what, failed);
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    failed += 1;
                    if failed >= self.attempts {
                        log::error!("Display {} failed after {} attempts: {}", what, failed, e);
                        return Err(e);
                    }
                    let delay = self.delay_after(failed);
                    log::warn!(
                        "Display {} failed (attempt {}/{}): {}, retrying in {:.1}s",
                        what,
                        failed,
                        self.attempts,
                        e,
                        delay.as_secs_f32()
                    );
                    thread::sleep(delay);
                }
            }
        }
    }
}
