//! Runtime state of a fired fault scenario.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::id::InstanceId;
use crate::rule::Finished;
use crate::time::{Timestamp, after};

use super::{FaultScenario, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioState {
    Active,
    Recovering,
    Resolved,
}

/// Read-only summary computed when a scenario fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpactAssessment {
    pub total_devices: usize,
    pub affected_devices: usize,
    /// Percentage of devices left untouched, `0..=100`.
    pub service_availability: f64,
    pub data_loss: bool,
    #[serde(with = "crate::time::secs")]
    pub estimated_downtime: Duration,
    pub business_impact: String,
    #[serde(with = "crate::time::secs")]
    pub recovery_time: Duration,
}

impl ImpactAssessment {
    #[must_use]
    pub fn assess(scenario: &FaultScenario, affected: usize, total: usize) -> Self {
        Self {
            total_devices: total,
            affected_devices: affected,
            service_availability: availability(affected, total),
            data_loss: scenario.loses_data(),
            estimated_downtime: scenario.duration,
            business_impact: scenario.severity.business_impact().to_string(),
            recovery_time: scenario.recovery_time,
        }
    }
}

/// `(total - affected) / total * 100`, 100 for an empty fleet.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn availability(affected: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    total.saturating_sub(affected) as f64 / total as f64 * 100.0
}

/// Result of one recovery verification pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Every affected device is healthy; the instance is now resolved.
    Resolved,
    /// Still unhealthy, another pass will follow.
    Retry { attempt: u32 },
    /// Still unhealthy and the attempt cap is reached; no further passes.
    Exhausted { attempts: u32 },
    /// Not recovering, or already exhausted.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveScenario {
    pub scenario_id: String,
    pub instance_id: InstanceId,
    pub severity: Severity,
    pub start_time: Timestamp,
    /// When the `active` phase ends and recovery starts.
    pub end_time: Timestamp,
    pub state: ScenarioState,
    pub affected_devices: Vec<String>,
    pub impact: ImpactAssessment,
    pub recovery_attempts: u32,
    /// Set once every recovery action has been issued, or right away when
    /// no action is going to be issued.
    pub recovery_actions_done: bool,
    /// The attempt cap was reached; the instance stays `recovering`
    /// until resolved externally.
    pub recovery_exhausted: bool,
    /// 0 for a direct trigger, parent depth + 1 for a cascade.
    pub cascade_depth: u32,
    pub resolved_at: Option<Timestamp>,
    pub last_update: Timestamp,
}

impl ActiveScenario {
    #[must_use]
    pub fn new(
        scenario: &FaultScenario,
        affected_devices: Vec<String>,
        total_devices: usize,
        at: Timestamp,
    ) -> Self {
        Self {
            scenario_id: scenario.id.clone(),
            instance_id: InstanceId::new(),
            severity: scenario.severity,
            start_time: at,
            end_time: after(at, scenario.duration),
            state: ScenarioState::Active,
            impact: ImpactAssessment::assess(scenario, affected_devices.len(), total_devices),
            affected_devices,
            recovery_attempts: 0,
            recovery_actions_done: false,
            recovery_exhausted: false,
            cascade_depth: 0,
            resolved_at: None,
            last_update: at,
        }
    }

    #[must_use]
    pub fn is_due_for_recovery(&self, at: Timestamp) -> bool {
        self.state == ScenarioState::Active && at >= self.end_time
    }

    /// `active → recovering`. Returns `false` from any other state.
    pub fn begin_recovery(&mut self, at: Timestamp) -> bool {
        if self.state != ScenarioState::Active {
            return false;
        }
        self.state = ScenarioState::Recovering;
        self.last_update = at;
        true
    }

    /// Whether the sweep should run a verification pass now.
    #[must_use]
    pub fn awaits_verification(&self) -> bool {
        self.state == ScenarioState::Recovering
            && self.recovery_actions_done
            && !self.recovery_exhausted
    }

    /// Count one verification pass. Attempts never exceed `max_attempts`;
    /// a pass that finds the cap already reached reports exhaustion.
    pub fn record_verification(
        &mut self,
        all_healthy: bool,
        max_attempts: u32,
        at: Timestamp,
    ) -> VerificationOutcome {
        if self.state != ScenarioState::Recovering || self.recovery_exhausted {
            return VerificationOutcome::Skipped;
        }
        if self.recovery_attempts >= max_attempts {
            self.recovery_exhausted = true;
            self.last_update = at;
            return VerificationOutcome::Exhausted {
                attempts: self.recovery_attempts,
            };
        }
        self.recovery_attempts += 1;
        self.last_update = at;
        if all_healthy {
            self.resolve(at);
            VerificationOutcome::Resolved
        } else if self.recovery_attempts >= max_attempts {
            self.recovery_exhausted = true;
            VerificationOutcome::Exhausted {
                attempts: self.recovery_attempts,
            }
        } else {
            VerificationOutcome::Retry {
                attempt: self.recovery_attempts,
            }
        }
    }

    /// Move to `resolved`. Returns `false` when already resolved; a resolved
    /// instance never leaves that state.
    pub fn resolve(&mut self, at: Timestamp) -> bool {
        if self.state == ScenarioState::Resolved {
            return false;
        }
        self.state = ScenarioState::Resolved;
        self.resolved_at = Some(at);
        self.last_update = at;
        true
    }
}

impl Finished for ActiveScenario {
    fn finished_at(&self) -> Option<Timestamp> {
        self.resolved_at.filter(|_| self.state == ScenarioState::Resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{EffectKind, FaultEffect, FaultKind};
    use crate::time::now;
    use chrono::TimeDelta;

    fn scenario() -> FaultScenario {
        FaultScenario::new(
            "power_outage",
            "Power outage",
            FaultKind::PowerFailure,
            Severity::Critical,
            Duration::from_secs(60),
        )
        .with_effect(FaultEffect::new(EffectKind::DataLoss, 0.8))
    }

    fn recovering(max_ready: bool) -> ActiveScenario {
        let t0 = now();
        let mut active = ActiveScenario::new(&scenario(), vec!["a".to_string()], 4, t0);
        assert!(active.begin_recovery(t0));
        active.recovery_actions_done = max_ready;
        active
    }

    #[test]
    fn should_assess_availability_and_data_loss() {
        let impact = ImpactAssessment::assess(&scenario(), 1, 4);
        assert!((impact.service_availability - 75.0).abs() < f64::EPSILON);
        assert!(impact.data_loss);
        assert_eq!(impact.business_impact, "Complete service outage");
        assert_eq!(impact.estimated_downtime, Duration::from_secs(60));
    }

    #[test]
    fn should_report_full_availability_for_empty_fleet() {
        assert!((availability(0, 0) - 100.0).abs() < f64::EPSILON);
        assert!(availability(5, 4).abs() < f64::EPSILON);
    }

    #[test]
    fn should_become_due_after_duration() {
        let t0 = now();
        let active = ActiveScenario::new(&scenario(), Vec::new(), 0, t0);
        assert!(!active.is_due_for_recovery(t0 + TimeDelta::seconds(59)));
        assert!(active.is_due_for_recovery(t0 + TimeDelta::seconds(60)));
    }

    #[test]
    fn should_only_begin_recovery_from_active() {
        let mut active = recovering(true);
        assert!(!active.begin_recovery(now()));
        active.resolve(now());
        assert!(!active.begin_recovery(now()));
        assert_eq!(active.state, ScenarioState::Resolved);
    }

    #[test]
    fn should_resolve_when_all_healthy() {
        let mut active = recovering(true);
        assert_eq!(
            active.record_verification(true, 3, now()),
            VerificationOutcome::Resolved
        );
        assert_eq!(active.state, ScenarioState::Resolved);
        assert_eq!(active.recovery_attempts, 1);
        assert!(active.finished_at().is_some());
    }

    #[test]
    fn should_cap_attempts_and_stay_recovering_when_exhausted() {
        let mut active = recovering(true);
        assert_eq!(
            active.record_verification(false, 3, now()),
            VerificationOutcome::Retry { attempt: 1 }
        );
        assert_eq!(
            active.record_verification(false, 3, now()),
            VerificationOutcome::Retry { attempt: 2 }
        );
        assert_eq!(
            active.record_verification(false, 3, now()),
            VerificationOutcome::Exhausted { attempts: 3 }
        );
        for _ in 0..5 {
            assert_eq!(
                active.record_verification(true, 3, now()),
                VerificationOutcome::Skipped
            );
        }
        assert_eq!(active.recovery_attempts, 3);
        assert_eq!(active.state, ScenarioState::Recovering);
        assert!(!active.awaits_verification());
    }

    #[test]
    fn should_exhaust_on_first_pass_when_no_attempt_is_allowed() {
        let mut active = recovering(true);
        assert_eq!(
            active.record_verification(true, 0, now()),
            VerificationOutcome::Exhausted { attempts: 0 }
        );
        assert!(active.recovery_exhausted);
        assert_eq!(active.recovery_attempts, 0);
        assert_eq!(active.state, ScenarioState::Recovering);
        assert_eq!(
            active.record_verification(true, 0, now()),
            VerificationOutcome::Skipped
        );
    }

    #[test]
    fn should_never_resolve_twice() {
        let mut active = recovering(true);
        assert!(active.resolve(now()));
        assert!(!active.resolve(now()));
        assert_eq!(
            active.record_verification(true, 3, now()),
            VerificationOutcome::Skipped
        );
    }

    #[test]
    fn should_wait_for_recovery_actions_before_verification() {
        let active = recovering(false);
        assert!(!active.awaits_verification());
    }
}
