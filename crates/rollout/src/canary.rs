//! Canary traffic stepping between an old and a new deployment version.
//!
//! ```text
//! Inactive --activate--> Stepping(current, total, delta) --tick*--> Complete
//!     ^                                                               |
//!     +---------------------------- reset ----------------------------+
//! ```
//!
//! The stepper never sleeps or spawns; a driver calls [`CanaryStepper::tick`] on its own
//! schedule. A tick before the next scheduled time is skipped, not an error.

use chrono::{DateTime, Duration, Utc};
use keel_core::{ApplicationSpec, CanarySpec, FULL_WEIGHT};
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

/// Longest step interval honored (about 100 years).
const MAX_INTERVAL_SECS: i64 = 100 * 365 * 24 * 60 * 60;

fn after(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    now.checked_add_signed(interval).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanaryError {
    #[error("canary needs at least one step")]
    NoSteps,
    #[error("step weight {0} must be within 1..=100")]
    StepWeight(u32),
    #[error("canary can only be activated from inactive, currently {0}")]
    NotInactive(&'static str),
    #[error("canary needs an old and a new deployment, found {0}")]
    Deployments(usize),
}

/// Traffic weights of the old and new version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrafficSplit {
    pub old: u32,
    pub new: u32,
}

impl Default for TrafficSplit {
    fn default() -> Self {
        Self { old: FULL_WEIGHT, new: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CanaryState {
    Inactive,
    #[serde(rename_all = "camelCase")]
    Stepping { current_step: u32, total_steps: u32, weight_delta: u32, next_scheduled: DateTime<Utc> },
    Complete,
}

impl CanaryState {
    pub fn name(&self) -> &'static str {
        match self {
            CanaryState::Inactive => "inactive",
            CanaryState::Stepping { .. } => "stepping",
            CanaryState::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Not stepping; nothing to do.
    Idle,
    /// Too early for the next step.
    Skipped { next_scheduled: DateTime<Utc> },
    Advanced { step: u32, split: TrafficSplit },
    Completed { split: TrafficSplit },
}

#[derive(Debug, Clone)]
pub struct CanaryStepper {
    state: CanaryState,
    split: TrafficSplit,
    interval: Duration,
}

impl Default for CanaryStepper {
    fn default() -> Self {
        Self::new()
    }
}

impl CanaryStepper {
    pub fn new() -> Self {
        Self { state: CanaryState::Inactive, split: TrafficSplit::default(), interval: Duration::zero() }
    }

    pub fn state(&self) -> &CanaryState {
        &self.state
    }

    pub fn split(&self) -> TrafficSplit {
        self.split
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.state, CanaryState::Complete)
    }

    /// Start stepping; the first step is due one interval after `now`.
    pub fn activate(&mut self, spec: &CanarySpec, now: DateTime<Utc>) -> Result<(), CanaryError> {
        if !matches!(self.state, CanaryState::Inactive) {
            return Err(CanaryError::NotInactive(self.state.name()));
        }
        if spec.steps == 0 {
            return Err(CanaryError::NoSteps);
        }
        if spec.step_weight == 0 || spec.step_weight > FULL_WEIGHT {
            return Err(CanaryError::StepWeight(spec.step_weight));
        }
        let secs = i64::try_from(spec.step_interval_seconds).unwrap_or(i64::MAX).min(MAX_INTERVAL_SECS);
        self.interval = Duration::seconds(secs);
        self.split = TrafficSplit::default();
        self.state = CanaryState::Stepping {
            current_step: 0,
            total_steps: spec.steps,
            weight_delta: spec.step_weight,
            next_scheduled: after(now, self.interval),
        };
        info!(steps = spec.steps, step_weight = spec.step_weight, interval_secs = spec.step_interval_seconds, "canary activated");
        Ok(())
    }

    /// Advance one step if the scheduled time has passed.
    pub fn tick(&mut self, now: DateTime<Utc>) -> TickOutcome {
        let (current_step, total_steps, weight_delta, next_scheduled) = match self.state {
            CanaryState::Stepping { current_step, total_steps, weight_delta, next_scheduled } => (current_step, total_steps, weight_delta, next_scheduled),
            _ => return TickOutcome::Idle,
        };
        if now < next_scheduled {
            debug!(%next_scheduled, "canary tick before schedule; skipping");
            return TickOutcome::Skipped { next_scheduled };
        }
        let step = current_step + 1;
        self.split.old = self.split.old.saturating_sub(weight_delta);
        self.split.new = (self.split.new + weight_delta).min(FULL_WEIGHT);
        counter!("canary_steps", 1u64);
        if step >= total_steps {
            self.split = TrafficSplit { old: 0, new: FULL_WEIGHT };
            self.state = CanaryState::Complete;
            info!(steps = total_steps, "canary complete");
            return TickOutcome::Completed { split: self.split };
        }
        self.state = CanaryState::Stepping { current_step: step, total_steps, weight_delta, next_scheduled: after(now, self.interval) };
        debug!(step, old = self.split.old, new = self.split.new, "canary advanced");
        TickOutcome::Advanced { step, split: self.split }
    }

    /// Back to inactive so a fresh canary can be activated.
    pub fn reset(&mut self) {
        self.state = CanaryState::Inactive;
        self.split = TrafficSplit::default();
        self.interval = Duration::zero();
    }

    /// Write the current split into the first (old) and second (new) deployment.
    pub fn apply_to(&self, app: &mut ApplicationSpec) -> Result<(), CanaryError> {
        match app.deployments.as_mut_slice() {
            [old, new] => {
                old.routing_weight = self.split.old;
                new.routing_weight = self.split.new;
                Ok(())
            }
            other => Err(CanaryError::Deployments(other.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use keel_core::{DeploymentSpec, DeploymentVersion};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn spec(steps: u32, weight: u32) -> CanarySpec {
        CanarySpec { steps, step_weight: weight, step_interval_seconds: 60 }
    }

    #[test]
    fn steps_shift_weight_until_complete() {
        let mut s = CanaryStepper::new();
        s.activate(&spec(4, 25), t0()).unwrap();

        assert_eq!(s.tick(t0() + Duration::seconds(60)), TickOutcome::Advanced { step: 1, split: TrafficSplit { old: 75, new: 25 } });
        assert_eq!(s.tick(t0() + Duration::seconds(120)), TickOutcome::Advanced { step: 2, split: TrafficSplit { old: 50, new: 50 } });
        assert_eq!(s.tick(t0() + Duration::seconds(180)), TickOutcome::Advanced { step: 3, split: TrafficSplit { old: 25, new: 75 } });
        assert_eq!(s.tick(t0() + Duration::seconds(240)), TickOutcome::Completed { split: TrafficSplit { old: 0, new: 100 } });
        assert!(s.is_complete());
        assert_eq!(s.tick(t0() + Duration::seconds(999)), TickOutcome::Idle);
    }

    #[test]
    fn early_ticks_are_skipped() {
        let mut s = CanaryStepper::new();
        s.activate(&spec(2, 50), t0()).unwrap();
        let due = t0() + Duration::seconds(60);
        assert_eq!(s.tick(t0() + Duration::seconds(59)), TickOutcome::Skipped { next_scheduled: due });
        assert_eq!(s.split(), TrafficSplit::default());
        // Late ticks still fire once; the next one is scheduled from the late tick.
        assert!(matches!(s.tick(t0() + Duration::seconds(90)), TickOutcome::Advanced { step: 1, .. }));
        assert!(matches!(s.tick(t0() + Duration::seconds(149)), TickOutcome::Skipped { .. }));
        assert!(matches!(s.tick(t0() + Duration::seconds(150)), TickOutcome::Completed { .. }));
    }

    #[test]
    fn complete_requires_reset() {
        let mut s = CanaryStepper::new();
        s.activate(&spec(1, 100), t0()).unwrap();
        assert!(matches!(s.tick(t0() + Duration::seconds(60)), TickOutcome::Completed { .. }));
        assert_eq!(s.activate(&spec(1, 100), t0()), Err(CanaryError::NotInactive("complete")));
        s.reset();
        assert_eq!(s.state(), &CanaryState::Inactive);
        s.activate(&spec(1, 100), t0()).unwrap();
    }

    #[test]
    fn activation_validates() {
        let mut s = CanaryStepper::new();
        assert_eq!(s.activate(&spec(0, 10), t0()), Err(CanaryError::NoSteps));
        assert_eq!(s.activate(&spec(3, 0), t0()), Err(CanaryError::StepWeight(0)));
        assert_eq!(s.activate(&spec(3, 101), t0()), Err(CanaryError::StepWeight(101)));
        assert_eq!(s.tick(t0()), TickOutcome::Idle);
    }

    #[test]
    fn apply_to_writes_both_weights() {
        let mut app = ApplicationSpec {
            name: "shop".into(),
            deployments: vec![
                DeploymentSpec { version: DeploymentVersion(1), routing_weight: 100, ..Default::default() },
                DeploymentSpec { version: DeploymentVersion(2), ..Default::default() },
            ],
            ..Default::default()
        };
        let mut s = CanaryStepper::new();
        s.activate(&spec(5, 20), t0()).unwrap();
        s.tick(t0() + Duration::seconds(60));
        s.apply_to(&mut app).unwrap();
        assert_eq!((app.deployments[0].routing_weight, app.deployments[1].routing_weight), (80, 20));

        app.deployments.pop();
        assert_eq!(s.apply_to(&mut app), Err(CanaryError::Deployments(1)));
    }
}
