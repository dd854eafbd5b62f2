//! Job polling as an explicit state machine.
//!
//! [`JobPoller`] never touches the network or the clock itself. The caller
//! feeds it the phase the server reported and the current time, and it
//! answers with what to do next. [`TapClient::wait_for_job`] drives it with a
//! real [`Clock`]; tests drive it with a fake one.
//!
//! [`TapClient::wait_for_job`]: crate::TapClient::wait_for_job

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::config::{optional_seconds, seconds};
use crate::error::{TapError, TapResult};
use crate::job::JobPhase;

/// Source of time for the poll loop.
pub trait Clock: Send {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

/// Wall clock backed by [`std::thread::sleep`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// How often to ask the server for the job phase, and for how long.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollPolicy {
    /// Wait before the first status request
    #[serde(with = "seconds")]
    pub interval: Duration,
    /// Multiplier applied to the wait after every request (1.0 = fixed interval)
    pub backoff: f64,
    /// Upper bound on the wait between requests
    #[serde(with = "seconds")]
    pub max_interval: Duration,
    /// Give up after this long; `None` waits forever
    #[serde(default, with = "optional_seconds")]
    pub timeout: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            backoff: 1.5,
            max_interval: Duration::from_secs(10),
            timeout: None,
        }
    }
}

impl PollPolicy {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            interval,
            backoff: 1.0,
            max_interval: interval,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn validate(&self) -> TapResult<()> {
        if self.interval.is_zero() {
            return Err(TapError::Config("poll interval must be positive".into()));
        }
        if !self.backoff.is_finite() || self.backoff < 1.0 {
            return Err(TapError::Config(format!(
                "poll backoff must be >= 1.0, got {}",
                self.backoff
            )));
        }
        if self.max_interval < self.interval {
            return Err(TapError::Config(
                "max poll interval is shorter than the poll interval".into(),
            ));
        }
        Ok(())
    }
}

/// Where the poller is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Nothing observed yet
    Waiting,
    /// At least one non-terminal phase observed
    Polling,
    Finished(JobPhase),
    TimedOut,
}

/// What the caller should do after an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollAction {
    /// Sleep this long, then request the phase again
    Sleep(Duration),
    /// The job reached a terminal phase; stop polling
    Done(JobPhase),
    /// The timeout expired after this much time
    TimedOut(Duration),
}

#[derive(Debug, Clone)]
pub struct JobPoller {
    policy: PollPolicy,
    started: Instant,
    next_wait: Duration,
    state: PollState,
}

impl JobPoller {
    pub fn new(policy: PollPolicy, now: Instant) -> Self {
        let next_wait = policy.interval;
        Self {
            policy,
            started: now,
            next_wait,
            state: PollState::Waiting,
        }
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Feed the latest reported phase.
    ///
    /// Terminal phases always win over the timeout. Once finished or timed
    /// out the poller keeps answering the same way.
    pub fn observe(&mut self, phase: JobPhase, now: Instant) -> PollAction {
        match self.state {
            PollState::Finished(done) => return PollAction::Done(done),
            PollState::TimedOut => {
                return PollAction::TimedOut(now.saturating_duration_since(self.started))
            }
            PollState::Waiting | PollState::Polling => {}
        }

        if phase.is_terminal() {
            self.state = PollState::Finished(phase);
            return PollAction::Done(phase);
        }

        let elapsed = now.saturating_duration_since(self.started);
        let mut wait = self.next_wait;
        if let Some(timeout) = self.policy.timeout {
            if elapsed >= timeout {
                self.state = PollState::TimedOut;
                return PollAction::TimedOut(elapsed);
            }
            wait = wait.min(timeout - elapsed);
        }

        let max = self.policy.max_interval;
        // Growth past what a Duration can hold saturates at the cap.
        let grown = self.next_wait.as_secs_f64() * self.policy.backoff;
        self.next_wait = Duration::try_from_secs_f64(grown).unwrap_or(max).min(max);
        self.state = PollState::Polling;
        PollAction::Sleep(wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::FakeClock;
    use rstest::rstest;

    #[test]
    fn test_terminal_phase_finishes_immediately() {
        let clock = FakeClock::new();
        let mut poller = JobPoller::new(PollPolicy::default(), clock.now());
        assert_eq!(
            poller.observe(JobPhase::Completed, clock.now()),
            PollAction::Done(JobPhase::Completed)
        );
        assert_eq!(poller.state(), PollState::Finished(JobPhase::Completed));
        // Later observations do not restart polling.
        assert_eq!(
            poller.observe(JobPhase::Executing, clock.now()),
            PollAction::Done(JobPhase::Completed)
        );
    }

    #[test]
    fn test_backoff_is_capped() {
        let clock = FakeClock::new();
        let policy = PollPolicy {
            interval: Duration::from_secs(2),
            backoff: 2.0,
            max_interval: Duration::from_secs(5),
            timeout: None,
        };
        let mut poller = JobPoller::new(policy, clock.now());
        let waits: Vec<Duration> = (0..4)
            .map(|_| match poller.observe(JobPhase::Executing, clock.now()) {
                PollAction::Sleep(d) => d,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(
            waits,
            vec![
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(5),
                Duration::from_secs(5)
            ]
        );
    }

    #[rstest]
    #[case(1.5, 10.0)]
    #[case(1e30, 10.0)]
    #[case(f64::MAX, 10.0)]
    #[case(1.0, 1.0)]
    fn test_large_backoff_stays_at_max_interval(#[case] backoff: f64, #[case] settled_secs: f64) {
        let clock = FakeClock::new();
        let policy = PollPolicy {
            backoff,
            ..PollPolicy::default()
        };
        assert!(policy.validate().is_ok());
        let mut poller = JobPoller::new(policy, clock.now());
        let mut last = Duration::ZERO;
        for _ in 0..20 {
            match poller.observe(JobPhase::Executing, clock.now()) {
                PollAction::Sleep(d) => last = d,
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(last, Duration::from_secs_f64(settled_secs));
    }

    #[test]
    fn test_timeout_clamps_last_sleep() {
        let clock = FakeClock::new();
        let policy = PollPolicy::fixed(Duration::from_secs(4)).with_timeout(Duration::from_secs(10));
        let mut poller = JobPoller::new(policy, clock.now());

        let mut slept = Vec::new();
        loop {
            match poller.observe(JobPhase::Queued, clock.now()) {
                PollAction::Sleep(d) => {
                    slept.push(d.as_secs());
                    clock.sleep(d);
                }
                PollAction::TimedOut(elapsed) => {
                    assert_eq!(elapsed, Duration::from_secs(10));
                    break;
                }
                PollAction::Done(_) => panic!("job never finishes here"),
            }
        }
        assert_eq!(slept, vec![4, 4, 2]);
        assert_eq!(poller.state(), PollState::TimedOut);
    }

    #[test]
    fn test_policy_validation() {
        assert!(PollPolicy::default().validate().is_ok());
        let bad = PollPolicy {
            backoff: 0.5,
            ..PollPolicy::default()
        };
        assert!(bad.validate().is_err());
        let zero = PollPolicy::fixed(Duration::ZERO);
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_policy_json_uses_seconds() {
        let json = r#"{"interval": 0.5, "backoff": 1.0, "max_interval": 2, "timeout": 30}"#;
        let policy: PollPolicy = serde_json::from_str(json).unwrap();
        assert_eq!(policy.interval, Duration::from_millis(500));
        assert_eq!(policy.timeout, Some(Duration::from_secs(30)));
    }
}
