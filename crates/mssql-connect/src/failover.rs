//! Alternating attempts between a mirrored database's primary and its
//! failover partner.
//!
//! Each attempt gets a growing slice of the connect timeout: the first pair
//! gets one step each, the second pair two steps, and so on. After every
//! partner attempt the client pauses before going back to the primary,
//! doubling the pause from 100ms until it reaches one second.

use std::time::Duration;

use crate::datasource::DataSource;

/// The first attempt of each server gets 8% of the connect timeout.
const STEP_PERCENT: u32 = 8;

const FIRST_PAUSE: Duration = Duration::from_millis(100);
const MAX_PAUSE: Duration = Duration::from_secs(1);

/// The attempt to make after a transient failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextAttempt {
    /// The partner, or `None` for the configured data source.
    pub target: Option<DataSource>,
    /// Wait before connecting.
    pub pause: Option<Duration>,
    /// Longest the attempt may take.
    pub timeout: Duration,
}

/// Plans failover attempts for one connect.
#[derive(Debug, Clone)]
pub struct FailoverSchedule {
    partner: DataSource,
    step: Duration,
    attempt: u32,
    pause: Duration,
}

impl FailoverSchedule {
    /// Schedule for `partner` under `connect_timeout`.
    #[must_use]
    pub fn new(partner: DataSource, connect_timeout: Duration) -> Self {
        Self {
            partner,
            step: connect_timeout * STEP_PERCENT / 100,
            attempt: 0,
            pause: FIRST_PAUSE,
        }
    }

    /// Timeout of the first attempt against the primary.
    #[must_use]
    pub fn first_timeout(&self) -> Duration {
        self.step
    }

    /// Plan the next attempt, or `None` when `remaining` does not cover
    /// the pending pause.
    pub fn advance(&mut self, remaining: Duration) -> Option<NextAttempt> {
        if remaining <= self.pause {
            return None;
        }
        let pause = (self.attempt % 2 == 1).then(|| {
            let pause = self.pause;
            self.pause = if pause < Duration::from_millis(500) {
                pause * 2
            } else {
                MAX_PAUSE
            };
            pause
        });
        self.attempt += 1;
        Some(NextAttempt {
            target: (self.attempt % 2 == 1).then(|| self.partner.clone()),
            pause,
            timeout: self.step * (self.attempt / 2 + 1),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn schedule() -> FailoverSchedule {
        FailoverSchedule::new(
            DataSource::parse("mirror,1433").unwrap(),
            Duration::from_secs(10),
        )
    }

    #[test]
    fn test_alternates_and_grows() {
        let mut schedule = schedule();
        assert_eq!(schedule.first_timeout(), Duration::from_millis(800));

        let partner = schedule.advance(Duration::from_secs(9)).unwrap();
        assert_eq!(partner.target.unwrap().server_name, "mirror");
        assert_eq!(partner.pause, None);
        assert_eq!(partner.timeout, Duration::from_millis(800));

        let primary = schedule.advance(Duration::from_secs(8)).unwrap();
        assert!(primary.target.is_none());
        assert_eq!(primary.pause, Some(Duration::from_millis(100)));
        assert_eq!(primary.timeout, Duration::from_millis(1600));

        let partner = schedule.advance(Duration::from_secs(7)).unwrap();
        assert!(partner.target.is_some());
        assert_eq!(partner.timeout, Duration::from_millis(1600));
    }

    #[test]
    fn test_pause_doubles_then_caps() {
        let mut schedule = schedule();
        let pauses: Vec<_> = (0..10)
            .filter_map(|_| schedule.advance(Duration::from_secs(60)).unwrap().pause)
            .collect();
        let millis: Vec<_> = pauses.iter().map(Duration::as_millis).collect();
        assert_eq!(millis, [100, 200, 400, 800, 1000]);
    }

    #[test]
    fn test_stops_when_pause_exceeds_remaining() {
        let mut schedule = schedule();
        assert!(schedule.advance(Duration::from_millis(100)).is_none());
        assert!(schedule.advance(Duration::from_millis(101)).is_some());
    }
}
