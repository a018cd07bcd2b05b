use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Result, SchedulerError};

/// Defines when, and how often, a job fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Recurrence {
    /// Fire exactly once, as soon as the job is scheduled.
    #[default]
    Once,

    /// Fire exactly once, `d` after the job is scheduled.
    Delayed(Duration),

    /// Fire every `interval`, the first time `initial_delay` after scheduling.
    ///
    /// The interval runs from the instant the previous instance *started*.
    /// An instance that overruns its interval is followed immediately by the
    /// next one; instances never overlap.
    Periodic {
        interval: Duration,
        initial_delay: Duration,
    },

    /// Fire `times` times, `interval` apart, the first time immediately.
    Repeat { times: u32, interval: Duration },
}

impl Recurrence {
    pub fn once() -> Self {
        Recurrence::Once
    }

    pub fn delayed(delay: Duration) -> Self {
        Recurrence::Delayed(delay)
    }

    /// Periodic with no initial delay.
    pub fn periodic(interval: Duration) -> Self {
        Recurrence::Periodic {
            interval,
            initial_delay: Duration::ZERO,
        }
    }

    pub fn periodic_after(interval: Duration, initial_delay: Duration) -> Self {
        Recurrence::Periodic {
            interval,
            initial_delay,
        }
    }

    pub fn repeat(times: u32, interval: Duration) -> Self {
        Recurrence::Repeat { times, interval }
    }

    /// Whether the policy can yield more than one execution.
    pub fn is_recurring(&self) -> bool {
        match self {
            Recurrence::Once | Recurrence::Delayed(_) => false,
            Recurrence::Periodic { .. } => true,
            Recurrence::Repeat { times, .. } => *times > 1,
        }
    }

    /// Compute the next eligible fire instant.
    ///
    /// `last_fired_at` is the start instant of the most recent instance and
    /// `runs` the number of instances that have finished. Returns `None` when
    /// the policy is exhausted, or when the next instant is beyond what the
    /// clock can represent.
    pub fn next_fire_time(
        &self,
        scheduled_at: Instant,
        last_fired_at: Option<Instant>,
        runs: u32,
    ) -> Option<Instant> {
        match (self, last_fired_at) {
            (Recurrence::Once, None) => Some(scheduled_at),
            (Recurrence::Once, Some(_)) => None,

            (Recurrence::Delayed(delay), None) => scheduled_at.checked_add(*delay),
            (Recurrence::Delayed(_), Some(_)) => None,

            (Recurrence::Periodic { initial_delay, .. }, None) => {
                scheduled_at.checked_add(*initial_delay)
            }
            (Recurrence::Periodic { interval, .. }, Some(last)) => last.checked_add(*interval),

            (Recurrence::Repeat { times, .. }, _) if runs >= *times => None,
            (Recurrence::Repeat { .. }, None) => Some(scheduled_at),
            (Recurrence::Repeat { interval, .. }, Some(last)) => last.checked_add(*interval),
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Recurrence::Periodic { interval, .. } if interval.is_zero() => Err(
                SchedulerError::Validation("periodic interval must be greater than zero".into()),
            ),
            Recurrence::Repeat { times: 0, .. } => Err(SchedulerError::Validation(
                "repeat count must be at least 1".into(),
            )),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn once_fires_immediately_then_stops() {
        let t0 = Instant::now();
        let r = Recurrence::once();
        assert_eq!(r.next_fire_time(t0, None, 0), Some(t0));
        assert_eq!(r.next_fire_time(t0, Some(t0), 1), None);
        assert!(!r.is_recurring());
    }

    #[test]
    fn delayed_fires_after_delay_then_stops() {
        let t0 = Instant::now();
        let r = Recurrence::delayed(MS * 1_000);
        assert_eq!(r.next_fire_time(t0, None, 0), Some(t0 + MS * 1_000));
        assert_eq!(r.next_fire_time(t0, Some(t0 + MS * 1_000), 1), None);
    }

    #[test]
    fn periodic_measures_from_last_fire() {
        let t0 = Instant::now();
        let r = Recurrence::periodic_after(MS * 100, MS * 30);
        assert_eq!(r.next_fire_time(t0, None, 0), Some(t0 + MS * 30));

        // a slow instance does not push the schedule: interval counts from the start
        let fired = t0 + MS * 30;
        assert_eq!(r.next_fire_time(t0, Some(fired), 1), Some(fired + MS * 100));
        assert_eq!(r.next_fire_time(t0, Some(fired), 500), Some(fired + MS * 100));
        assert!(r.is_recurring());
    }

    #[test]
    fn periodic_default_has_no_initial_delay() {
        let t0 = Instant::now();
        let r = Recurrence::periodic(MS * 100);
        assert_eq!(r.next_fire_time(t0, None, 0), Some(t0));
    }

    #[test]
    fn repeat_stops_after_count() {
        let t0 = Instant::now();
        let r = Recurrence::repeat(3, MS * 50);
        assert_eq!(r.next_fire_time(t0, None, 0), Some(t0));
        assert_eq!(r.next_fire_time(t0, Some(t0), 1), Some(t0 + MS * 50));
        assert_eq!(r.next_fire_time(t0, Some(t0 + MS * 50), 2), Some(t0 + MS * 100));
        assert_eq!(r.next_fire_time(t0, Some(t0 + MS * 100), 3), None);
    }

    #[test]
    fn repeat_with_zero_interval_fires_back_to_back() {
        let t0 = Instant::now();
        let r = Recurrence::repeat(3, Duration::ZERO);
        assert_eq!(r.next_fire_time(t0, None, 0), Some(t0));
        assert_eq!(r.next_fire_time(t0, Some(t0), 1), Some(t0));
        assert_eq!(r.next_fire_time(t0, Some(t0), 3), None);
    }

    #[test]
    fn unrepresentable_instants_are_terminal() {
        let t0 = Instant::now();
        assert_eq!(
            Recurrence::delayed(Duration::MAX).next_fire_time(t0, None, 0),
            None
        );
        assert_eq!(
            Recurrence::periodic_after(MS, Duration::MAX).next_fire_time(t0, None, 0),
            None
        );
        assert_eq!(
            Recurrence::periodic(Duration::MAX).next_fire_time(t0, Some(t0), 1),
            None
        );
        assert_eq!(
            Recurrence::repeat(2, Duration::MAX).next_fire_time(t0, Some(t0), 1),
            None
        );
    }

    #[test]
    fn next_fire_time_is_pure() {
        let t0 = Instant::now();
        let r = Recurrence::periodic(MS * 10);
        let a = r.next_fire_time(t0, Some(t0), 1);
        let b = r.next_fire_time(t0, Some(t0), 1);
        assert_eq!(a, b);
    }

    #[test]
    fn validation_rejects_degenerate_policies() {
        assert!(Recurrence::periodic(Duration::ZERO).validate().is_err());
        assert!(Recurrence::repeat(0, MS).validate().is_err());
        // back-to-back repeats are fine: instances of one job never overlap
        assert!(Recurrence::repeat(3, Duration::ZERO).validate().is_ok());
        assert!(Recurrence::repeat(1, Duration::ZERO).validate().is_ok());
        assert!(Recurrence::delayed(Duration::ZERO).validate().is_ok());
        assert!(Recurrence::default().validate().is_ok());
    }
}
