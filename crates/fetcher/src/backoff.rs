//! Exponential backoff with optional jitter.
//!
//! The default configuration walks 1s → 4s → 16s → 64s; a fifth attempt
//! gets zero delay, which callers read as "give up".

use std::time::Duration;

use vh_domain::Error;

#[derive(Debug)]
pub struct Backoff {
    base_delay: Duration,
    max_retries: u32,
    jitter: bool,
    retry_count: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), 4, true)
    }
}

impl Backoff {
    pub fn new(base_delay: Duration, max_retries: u32, jitter: bool) -> Self {
        Self {
            base_delay,
            max_retries,
            jitter,
            retry_count: 0,
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Delay for the current attempt: `base * 4^retry_count`, plus up to
    /// 10% uniform jitter. Zero once the retry budget is spent.
    pub fn get_delay(&self) -> Duration {
        if self.retry_count >= self.max_retries {
            return Duration::ZERO;
        }
        let factor = 4u32.saturating_pow(self.retry_count);
        let mut delay = self.base_delay.saturating_mul(factor);
        if self.jitter {
            let jitter_max = delay.as_secs_f64() * 0.1;
            delay += Duration::from_secs_f64(rand::random::<f64>() * jitter_max);
        }
        delay
    }

    /// Whether `error` deserves another attempt with budget remaining.
    pub fn should_retry(&self, error: &Error) -> bool {
        self.retry_count < self.max_retries && error.is_retryable()
    }

    /// Sleep the current delay and consume one retry. Returns the delay
    /// actually used (zero means the budget was already exhausted).
    pub async fn wait_and_increment(&mut self) -> Duration {
        let delay = self.get_delay();
        if delay > Duration::ZERO {
            self.retry_count += 1;
            tokio::time::sleep(delay).await;
        }
        delay
    }

    pub fn reset(&mut self) {
        self.retry_count = 0;
    }
}
