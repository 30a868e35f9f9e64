//! Injected time source, so the scheduler loop can be driven under
//! tokio's paused test clock instead of real sleeping.

/// Wall-clock seconds as the wheel sees them.
pub trait Clock: Send + 'static {
    fn now(&self) -> i64;
}

/// Real time (unix seconds).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A clock anchored to the tokio runtime's notion of time. Under
/// `#[tokio::test(start_paused = true)]` it advances exactly as fast as
/// the scheduler loop's own sleeps, which makes loop tests deterministic.
#[derive(Debug, Clone, Copy)]
pub struct TokioClock {
    base: i64,
    origin: tokio::time::Instant,
}

impl TokioClock {
    /// `base` is the unix-second reading at the moment of construction.
    pub fn new(base: i64) -> Self {
        Self {
            base,
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Clock for TokioClock {
    fn now(&self) -> i64 {
        self.base + self.origin.elapsed().as_secs() as i64
    }
}
