//! Process-wide concurrency gate for outbound unsubscribe requests.
//!
//! One [`ConcurrencyGate`] is constructed at startup and shared by `Arc`
//! with every direct-link strategy. It bounds simultaneous requests with a
//! counting semaphore and spaces consecutive requests by a randomized
//! pacing delay drawn from `[min_delay, max_delay]`.
//!
//! The permit count is fixed at construction. Only the delay bounds may be
//! changed while running.

use std::sync::Mutex as StdMutex;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::{debug, warn};

/// Cooldown used when a `Retry-After` value is missing or unparseable.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Errors from gate operations.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// The permit count cannot change after construction.
    #[error("permit count is fixed at {current}; refusing to change it to {requested}")]
    PermitsFixed {
        /// Permits the gate was built with.
        current: usize,
        /// Permits the caller asked for.
        requested: usize,
    },

    /// Delay bounds are inverted.
    #[error("invalid delay bounds: min {min:?} exceeds max {max:?}")]
    InvalidDelays {
        /// Requested lower bound.
        min: Duration,
        /// Requested upper bound.
        max: Duration,
    },

    /// The semaphore was closed.
    #[error("concurrency gate is closed")]
    Closed,
}

/// Construction parameters for a [`ConcurrencyGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSettings {
    /// Maximum simultaneous requests.
    pub permits: usize,
    /// Lower bound of the pacing delay.
    pub min_delay: Duration,
    /// Upper bound of the pacing delay.
    pub max_delay: Duration,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            permits: 3,
            min_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct DelayBounds {
    min: Duration,
    max: Duration,
}

/// Shared rate limiter bounding and pacing outbound requests.
#[derive(Debug)]
pub struct ConcurrencyGate {
    semaphore: Semaphore,
    permits: usize,
    delays: StdMutex<DelayBounds>,
    last_request: Mutex<Instant>,
}

/// Held for the duration of one network call. Dropping it frees the slot.
#[derive(Debug)]
pub struct GatePermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl ConcurrencyGate {
    /// Build a gate. Zero permits are raised to one and inverted delay
    /// bounds are swapped.
    ///
    /// The construction instant counts as the last accepted request, so the
    /// first caller is paced too.
    pub fn new(settings: GateSettings) -> Self {
        let permits = settings.permits.max(1);
        let (min, max) = ordered(settings.min_delay, settings.max_delay);
        Self {
            semaphore: Semaphore::new(permits),
            permits,
            delays: StdMutex::new(DelayBounds { min, max }),
            last_request: Mutex::new(Instant::now()),
        }
    }

    /// Number of permits the gate was built with.
    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Permits not currently held.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Current `(min_delay, max_delay)` bounds.
    pub fn delay_bounds(&self) -> (Duration, Duration) {
        let bounds = self.read_bounds();
        (bounds.min, bounds.max)
    }

    /// Wait for a permit, then for the pacing window since the previous
    /// request to elapse.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Closed`] if the semaphore has been closed.
    pub async fn acquire(&self) -> Result<GatePermit<'_>, GateError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| GateError::Closed)?;

        let target = self.pick_delay();

        // Held across the sleep so consecutive requests stay spaced even
        // when several permits are out.
        let mut last = self.last_request.lock().await;
        let elapsed = last.elapsed();
        if let Some(remaining) = target.checked_sub(elapsed).filter(|d| !d.is_zero()) {
            debug!(delay_ms = remaining.as_millis(), "pacing outbound request");
            tokio::time::sleep(remaining).await;
        }
        *last = Instant::now();
        drop(last);

        Ok(GatePermit { _permit: permit })
    }

    /// Replace the pacing bounds. Takes effect on the next `acquire`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::InvalidDelays`] when `min > max`.
    pub fn set_delay_bounds(&self, min: Duration, max: Duration) -> Result<(), GateError> {
        if min > max {
            return Err(GateError::InvalidDelays { min, max });
        }
        match self.delays.lock() {
            Ok(mut bounds) => *bounds = DelayBounds { min, max },
            Err(poisoned) => *poisoned.into_inner() = DelayBounds { min, max },
        }
        debug!(
            min_ms = min.as_millis(),
            max_ms = max.as_millis(),
            "gate delay bounds updated"
        );
        Ok(())
    }

    /// Always rejects a different permit count; the semaphore size is fixed.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::PermitsFixed`] when `permits` differs from the
    /// construction value.
    pub fn set_permits(&self, permits: usize) -> Result<(), GateError> {
        if permits == self.permits {
            return Ok(());
        }
        warn!(
            current = self.permits,
            requested = permits,
            "ignoring attempt to resize concurrency gate"
        );
        Err(GateError::PermitsFixed {
            current: self.permits,
            requested: permits,
        })
    }

    fn read_bounds(&self) -> DelayBounds {
        match self.delays.lock() {
            Ok(bounds) => *bounds,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn pick_delay(&self) -> Duration {
        let DelayBounds { min, max } = self.read_bounds();
        if min >= max {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

fn ordered(a: Duration, b: Duration) -> (Duration, Duration) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Cooldown requested by an HTTP 429 `Retry-After` header.
///
/// Only the integer-seconds form is understood; anything else yields
/// [`DEFAULT_RETRY_AFTER`].
pub fn interpret_too_many_requests(retry_after: Option<&str>) -> Duration {
    retry_after
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map_or(DEFAULT_RETRY_AFTER, Duration::from_secs)
}

/// `base * 2^attempt`, capped at `max`, with ±10% jitter.
pub fn exponential_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    let factor = 2_f64.powi(i32::try_from(attempt).unwrap_or(i32::MAX));
    let raw = base.as_secs_f64() * factor;
    let capped = if raw.is_finite() {
        raw.min(max.as_secs_f64())
    } else {
        max.as_secs_f64()
    };
    let jitter = rand::thread_rng().gen_range(-0.1..=0.1);
    Duration::from_secs_f64((capped * (1.0 + jitter)).max(0.0))
}
