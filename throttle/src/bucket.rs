use tokio::time::{Duration, Instant};

#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    burst: f64,
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    /// Creates a full bucket replenished at `rate` tokens per second, `0` means unlimited.
    #[must_use]
    pub fn new(rate: u64) -> Self {
        Self::with_burst(rate, (rate as f64 * crate::DEFAULT_BURST_FACTOR) as u64)
    }

    #[must_use]
    pub fn with_burst(rate: u64, burst: u64) -> Self {
        let burst = std::cmp::max(burst, rate) as f64;
        Self {
            rate: rate as f64,
            burst,
            tokens: burst,
            last_update: Instant::now(),
        }
    }

    #[must_use]
    pub fn is_unlimited(&self) -> bool {
        self.rate <= 0.0
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        self.last_update = now;
        self.tokens = f64::min(self.burst, self.tokens + elapsed * self.rate);
    }

    /// Tokens currently in the bucket, negative while paying off borrowed tokens.
    pub fn available(&mut self) -> f64 {
        if self.is_unlimited() {
            return f64::INFINITY;
        }
        self.refill();
        self.tokens
    }

    /// Checks whether a request may be admitted now. Returns the time until the bucket is
    /// non-negative again otherwise.
    pub fn check(&mut self) -> Result<(), Duration> {
        if self.is_unlimited() {
            return Ok(());
        }
        self.refill();
        if self.tokens >= 0.0 {
            Ok(())
        } else {
            // round up so that waking after `wait` always observes a non-negative bucket
            let wait = Duration::from_secs_f64(-self.tokens / self.rate);
            Err(wait + Duration::from_millis(1))
        }
    }

    /// Removes `tokens` from the bucket, possibly borrowing from future replenishment.
    pub fn consume(&mut self, tokens: u64) {
        if self.is_unlimited() {
            return;
        }
        self.refill();
        self.tokens -= tokens as f64;
        tracing::trace!("consumed {} tokens, {:.0} remaining", tokens, self.tokens);
    }

    pub fn try_consume(&mut self, tokens: u64) -> Result<(), Duration> {
        self.check()?;
        self.consume(tokens);
        Ok(())
    }
}
