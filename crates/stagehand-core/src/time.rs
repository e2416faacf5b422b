//! Injectable time: a clock for "now" and a sleeper for retry back-off.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use fakes::{FixedClock, RecordingSleeper};

#[cfg(any(test, feature = "test-util"))]
mod fakes {
    use super::*;
    use std::sync::Mutex;

    /// Clock frozen at a settable instant.
    #[derive(Debug)]
    pub struct FixedClock {
        now: Mutex<DateTime<Utc>>,
    }

    impl FixedClock {
        pub fn new(now: DateTime<Utc>) -> Self {
            Self { now: Mutex::new(now) }
        }

        pub fn set(&self, now: DateTime<Utc>) {
            if let Ok(mut guard) = self.now.lock() {
                *guard = now;
            }
        }

        pub fn advance(&self, by: chrono::Duration) {
            if let Ok(mut guard) = self.now.lock() {
                *guard += by;
            }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            match self.now.lock() {
                Ok(guard) => *guard,
                Err(poisoned) => *poisoned.into_inner(),
            }
        }
    }

    /// Returns immediately and remembers every requested delay.
    #[derive(Debug, Default)]
    pub struct RecordingSleeper {
        slept: Mutex<Vec<Duration>>,
    }

    impl RecordingSleeper {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn recorded(&self) -> Vec<Duration> {
            match self.slept.lock() {
                Ok(guard) => guard.clone(),
                Err(poisoned) => poisoned.into_inner().clone(),
            }
        }
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            if let Ok(mut guard) = self.slept.lock() {
                guard.push(duration);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_advance() {
        let start = Utc::now();
        let clock = FixedClock::new(start);
        clock.advance(chrono::Duration::minutes(5));
        assert_eq!(clock.now(), start + chrono::Duration::minutes(5));
    }

    #[tokio::test]
    async fn test_recording_sleeper() {
        let sleeper = RecordingSleeper::new();
        sleeper.sleep(Duration::from_secs(2)).await;
        sleeper.sleep(Duration::from_secs(4)).await;
        assert_eq!(
            sleeper.recorded(),
            vec![Duration::from_secs(2), Duration::from_secs(4)]
        );
    }
}
