// crates/fleetgraph-metrics/src/calculators.rs
// ============================================================================
// Module: Calculators
// Description: Domain metric formulas used by the snapshot materializer.
// ============================================================================

//! ## Overview
//! Each function here is a pure calculation over plain numeric/string
//! inputs. None of them touch a [`fleetgraph_core::interfaces::Store`] or a
//! clock; the caller is responsible for gathering the inputs (typically by
//! scanning live task/integration-attempt rows) and for stamping "now".

use std::collections::BTreeMap;

use crate::primitives;

/// Seconds in a calendar day, used throughout the age/bucket calculations.
pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// SLA, in hours, for resolving a blocker before it counts against
/// `blocker_resolution_rate`.
pub const BLOCKER_SLA_HOURS: f64 = 48.0;

/// Ceiling, in seconds, applied to average integration recovery time before
/// it is folded into `integration_reliability_score`.
pub const MAX_RECOVERY_SECONDS: f64 = 86_400.0;

/// One observed milestone: actual completion time, planned completion time,
/// and the planned duration in days (used to size the on-time tolerance).
pub struct MilestoneObservation {
    /// Seconds between planned and actual completion (signed; sign unused).
    pub delta_seconds: f64,
    /// Planned duration of the milestone, in days.
    pub planned_duration_days: f64,
}

/// Fraction of milestones that landed within 10% of their planned duration
/// of the planned date. `None` if no milestones were observed.
#[must_use]
pub fn schedule_reliability(milestones: &[MilestoneObservation]) -> Option<f64> {
    if milestones.is_empty() {
        return None;
    }
    let on_time = milestones
        .iter()
        .filter(|m| {
            let allowed = m.planned_duration_days * SECONDS_PER_DAY * 0.10;
            m.delta_seconds.abs() <= allowed
        })
        .count();
    primitives::ratio_or_none(on_time as f64, milestones.len() as f64)
}

/// `1 - coefficient_of_variation` of a set of cycle times, clamped to
/// `[0.0, 1.0]`. `None` if there are no samples; `1.0` if the mean is zero.
#[must_use]
pub fn cycle_time_stability(cycle_times_seconds: &[f64]) -> Option<f64> {
    let avg = primitives::mean(cycle_times_seconds)?;
    if avg == 0.0 {
        return Some(1.0);
    }
    let deviation = primitives::stddev(cycle_times_seconds).unwrap_or(0.0);
    Some(primitives::clamp01(1.0 - (deviation / avg)))
}

/// Fraction of blockers resolved within [`BLOCKER_SLA_HOURS`] of creation.
/// `None` if no blockers were observed. Each tuple is
/// `(created_at_seconds, resolved_at_seconds)` as epoch-like seconds; only
/// their difference matters.
#[must_use]
pub fn blocker_resolution_rate(blockers: &[(f64, f64)]) -> Option<f64> {
    if blockers.is_empty() {
        return None;
    }
    let within_sla = blockers
        .iter()
        .filter(|(created_at, resolved_at)| (resolved_at - created_at) / 3600.0 <= BLOCKER_SLA_HOURS)
        .count();
    primitives::ratio_or_none(within_sla as f64, blockers.len() as f64)
}

/// Weighted blend of schedule reliability, cycle-time stability, and
/// blocker-resolution rate. `None` if any input component is `None`.
#[must_use]
pub fn delivery_predictability_index(
    schedule_reliability_score: Option<f64>,
    cycle_time_stability_score: Option<f64>,
    blocker_resolution_rate_score: Option<f64>,
) -> Option<f64> {
    let schedule = schedule_reliability_score?;
    let cycle = cycle_time_stability_score?;
    let blocker = blocker_resolution_rate_score?;
    Some(schedule * 0.40 + cycle * 0.35 + blocker * 0.25)
}

/// Share of total lifecycle time spent actively worked, vs. waiting or
/// blocked. `None` if all three times are zero.
#[must_use]
pub fn flow_efficiency_score(active_time: f64, wait_time: f64, blocked_time: f64) -> Option<f64> {
    let denominator = active_time + wait_time + blocked_time;
    primitives::ratio_or_none(active_time, denominator)
}

/// Weighted blend of integration success rate and recovery-time score.
/// `None` if no attempts were observed.
#[must_use]
pub fn integration_reliability_score(attempt_outcomes: &[&str], recovery_times_seconds: &[f64]) -> Option<f64> {
    if attempt_outcomes.is_empty() {
        return None;
    }
    let successes = attempt_outcomes.iter().filter(|outcome| **outcome == "success").count();
    let success_rate = primitives::ratio_or_none(successes as f64, attempt_outcomes.len() as f64)?;

    let recovery_score = if recovery_times_seconds.is_empty() {
        1.0
    } else {
        let avg_recovery = primitives::mean(recovery_times_seconds).unwrap_or(0.0);
        primitives::clamp01(1.0 - (avg_recovery / MAX_RECOVERY_SECONDS))
    };

    Some(success_rate * 0.60 + recovery_score * 0.40)
}

/// Priority-weighted count of actively delivered tasks per day over
/// `window_days`. `None` if `window_days` is non-positive.
#[must_use]
pub fn active_value_delivery_rate(priorities: &[Option<&str>], window_days: f64) -> Option<f64> {
    if window_days <= 0.0 {
        return None;
    }
    let weighted_sum: f64 = priorities
        .iter()
        .map(|priority| {
            let normalized = priority.unwrap_or("P2").to_uppercase();
            match normalized.as_str() {
                "P0" => 4.0,
                "P1" => 2.0,
                "P2" => 1.0,
                other if other.starts_with("P3") => 0.5,
                other if other.starts_with('P') => 0.5,
                _ => 1.0,
            }
        })
        .sum();
    Some(weighted_sum / window_days)
}

/// Fraction of gate checks that passed. `None` if `total` is zero.
#[must_use]
pub fn quality_gate_score(passed: i64, total: i64) -> Option<f64> {
    primitives::ratio_or_none(passed as f64, total as f64)
}

/// Single worst-case summary across the four North-Star components.
/// `None` if every component is `None`.
#[must_use]
pub fn health_at_a_glance(
    delivery_predictability_index: Option<f64>,
    flow_efficiency_score: Option<f64>,
    integration_reliability_score: Option<f64>,
    quality_gate: Option<f64>,
) -> Option<f64> {
    [
        delivery_predictability_index,
        flow_efficiency_score,
        integration_reliability_score,
        quality_gate,
    ]
    .into_iter()
    .flatten()
    .fold(None, |acc, value| match acc {
        None => Some(value),
        Some(current) => Some(current.min(value)),
    })
}

/// Identity passthrough: count of tasks integrated in the window.
#[must_use]
pub fn throughput(count_integrated: i64) -> i64 {
    count_integrated
}

/// p50/p75/p90/p95 of a distribution of durations, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DurationDistribution {
    /// 50th percentile.
    pub p50: Option<f64>,
    /// 75th percentile.
    pub p75: Option<f64>,
    /// 90th percentile.
    pub p90: Option<f64>,
    /// 95th percentile.
    pub p95: Option<f64>,
}

fn duration_distribution(values: &[f64]) -> DurationDistribution {
    DurationDistribution {
        p50: primitives::percentile_cont(values, 0.50),
        p75: primitives::percentile_cont(values, 0.75),
        p90: primitives::percentile_cont(values, 0.90),
        p95: primitives::percentile_cont(values, 0.95),
    }
}

/// Distribution of lead times (request to delivery), in seconds.
#[must_use]
pub fn lead_time_distribution(lead_times_seconds: &[f64]) -> DurationDistribution {
    duration_distribution(lead_times_seconds)
}

/// Distribution of cycle times (start of active work to delivery), in
/// seconds.
#[must_use]
pub fn cycle_time_distribution(cycle_times_seconds: &[f64]) -> DurationDistribution {
    duration_distribution(cycle_times_seconds)
}

/// Age of a task still in WIP, given when it entered that state and the
/// current time, floored at zero.
#[must_use]
pub fn wip_age_seconds(entered_in_progress_at_seconds: f64, now_seconds: f64) -> f64 {
    (now_seconds - entered_in_progress_at_seconds).max(0.0)
}

/// WIP age bucket label for a given age in seconds.
#[must_use]
pub fn wip_age_bucket(age_seconds: f64) -> &'static str {
    if age_seconds < 3.0 * SECONDS_PER_DAY {
        "fresh"
    } else if age_seconds < 7.0 * SECONDS_PER_DAY {
        "aging"
    } else if age_seconds < 14.0 * SECONDS_PER_DAY {
        "stale"
    } else {
        "at_risk"
    }
}

/// Histogram of WIP ages across the four buckets.
#[must_use]
pub fn wip_age_buckets(ages_seconds: &[f64]) -> BTreeMap<&'static str, i64> {
    let mut buckets: BTreeMap<&'static str, i64> =
        [("fresh", 0), ("aging", 0), ("stale", 0), ("at_risk", 0)].into_iter().collect();
    for age in ages_seconds {
        *buckets.entry(wip_age_bucket(*age)).or_insert(0) += 1;
    }
    buckets
}

/// Fraction of in-flight tasks currently blocked. `None` if there is no WIP.
#[must_use]
pub fn blocked_ratio(blocked_count: i64, total_wip_count: i64) -> Option<f64> {
    primitives::ratio_or_none(blocked_count as f64, total_wip_count as f64)
}

/// Summary statistics (mean, p90, max) over the ages of currently-blocked
/// tasks. Every field is `None` if there are no blocked tasks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockedAgeSummary {
    /// Mean age of blocked tasks, in seconds.
    pub avg: Option<f64>,
    /// 90th percentile age of blocked tasks, in seconds.
    pub p90: Option<f64>,
    /// Oldest blocked task's age, in seconds.
    pub max: Option<f64>,
}

/// Computes [`BlockedAgeSummary`] over the ages of currently-blocked tasks.
#[must_use]
pub fn blocked_age_summary(ages_seconds: &[f64]) -> BlockedAgeSummary {
    if ages_seconds.is_empty() {
        return BlockedAgeSummary { avg: None, p90: None, max: None };
    }
    BlockedAgeSummary {
        avg: primitives::mean(ages_seconds),
        p90: primitives::percentile_cont(ages_seconds, 0.90),
        max: ages_seconds.iter().copied().fold(f64::MIN, f64::max).into(),
    }
}

/// Probability that an in-flight change will conflict by the time it lands,
/// modeled as `1 - (1 - base_conflict_rate) ^ age_days`.
#[must_use]
pub fn conflict_probability(age_days: f64, base_conflict_rate: f64) -> f64 {
    let effective_age = age_days.max(0.0);
    let probability = 1.0 - (1.0 - base_conflict_rate).powf(effective_age);
    primitives::clamp01(probability)
}

/// Count of tasks currently sitting in the `implemented` state
/// (implemented-but-not-yet-integrated backlog).
#[must_use]
pub fn ini_count(states: &[&str]) -> i64 {
    states.iter().filter(|state| **state == "implemented").count() as i64
}

/// Age of a task that has been sitting in `implemented` since
/// `implemented_at_seconds`, floored at zero.
#[must_use]
pub fn ini_age_seconds(implemented_at_seconds: f64, now_seconds: f64) -> f64 {
    (now_seconds - implemented_at_seconds).max(0.0)
}

/// p50/p90 of implemented-backlog ages, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IniAgeDistribution {
    /// 50th percentile.
    pub p50: Option<f64>,
    /// 90th percentile.
    pub p90: Option<f64>,
}

/// Computes [`IniAgeDistribution`] over implemented-backlog ages.
#[must_use]
pub fn ini_age_distribution(ages_seconds: &[f64]) -> IniAgeDistribution {
    IniAgeDistribution {
        p50: primitives::percentile_cont(ages_seconds, 0.50),
        p90: primitives::percentile_cont(ages_seconds, 0.90),
    }
}

/// Priority-weighted conflict risk score for one implemented-backlog task.
#[must_use]
pub fn ini_risk_score(conflict_probability_value: f64, priority: Option<&str>) -> f64 {
    let normalized = priority.unwrap_or("P2").to_uppercase();
    let weight = match normalized.as_str() {
        "P0" => 1.0,
        "P1" => 0.8,
        "P2" => 0.5,
        _ => 0.3,
    };
    conflict_probability_value * weight
}

/// One integration attempt's outcome and attempt number, for
/// [`integration_outcome_mix`].
pub struct IntegrationOutcome {
    /// The attempt's result: `"success"`, `"conflict"`, `"check_failure"`,
    /// or `"aborted"`.
    pub result: String,
    /// 1-indexed attempt number within the task's integration history.
    pub attempt_number: i64,
}

/// Breakdown of integration attempts by outcome, with ratios against the
/// total attempt count.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrationOutcomeMix {
    /// Successes on the first attempt.
    pub success_first: i64,
    /// Successes after at least one retry.
    pub success_retry: i64,
    /// Failures due to merge conflict.
    pub failed_conflict: i64,
    /// Failures due to a failing check.
    pub failed_checks: i64,
    /// Failures due to an aborted attempt.
    pub failed_abort: i64,
    /// Total attempts considered.
    pub total: i64,
    /// Each count above divided by `total`, keyed by name
    /// (`ratio_success_first`, `ratio_failed_conflict`, etc). `None` if
    /// `total` is zero.
    pub ratios: BTreeMap<&'static str, Option<f64>>,
}

/// Computes [`IntegrationOutcomeMix`] from a list of attempt outcomes.
#[must_use]
pub fn integration_outcome_mix(attempts: &[IntegrationOutcome]) -> IntegrationOutcomeMix {
    let mut success_first = 0;
    let mut success_retry = 0;
    let mut failed_conflict = 0;
    let mut failed_checks = 0;
    let mut failed_abort = 0;

    for attempt in attempts {
        match attempt.result.as_str() {
            "success" if attempt.attempt_number == 1 => success_first += 1,
            "success" => success_retry += 1,
            "conflict" => failed_conflict += 1,
            "check_failure" => failed_checks += 1,
            "aborted" => failed_abort += 1,
            _ => {}
        }
    }

    let total = attempts.len() as i64;
    let ratios = [
        ("ratio_success_first", success_first),
        ("ratio_success_retry", success_retry),
        ("ratio_failed_conflict", failed_conflict),
        ("ratio_failed_checks", failed_checks),
        ("ratio_failed_abort", failed_abort),
    ]
    .into_iter()
    .map(|(key, count)| (key, primitives::ratio_or_none(count as f64, total as f64)))
    .collect();

    IntegrationOutcomeMix {
        success_first,
        success_retry,
        failed_conflict,
        failed_checks,
        failed_abort,
        total,
        ratios,
    }
}

/// States counted toward `wip_count` in [`state_distribution`].
pub const WIP_STATES: [&str; 5] = ["claimed", "in_progress", "blocked", "implemented", "awaiting_review"];

/// Task counts broken out by state, with the WIP subtotal.
#[must_use]
pub fn state_distribution(counts_by_state: &BTreeMap<String, i64>) -> (BTreeMap<String, i64>, i64) {
    let wip_count = WIP_STATES.iter().map(|state| counts_by_state.get(*state).copied().unwrap_or(0)).sum();
    (counts_by_state.clone(), wip_count)
}

/// Fractional time-share of each lifecycle stage, plus the primary
/// bottleneck (the stage consuming at least 40% of total time, if any).
#[derive(Debug, Clone, PartialEq)]
pub struct BottleneckContribution {
    /// Fractional time-share per stage name.
    pub contributions: BTreeMap<String, f64>,
    /// The dominant stage, if one consumes at least 40% of total time.
    pub primary: Option<String>,
}

/// Computes [`BottleneckContribution`] from per-stage durations.
#[must_use]
pub fn bottleneck_contribution(stage_times_seconds: &BTreeMap<String, f64>) -> BottleneckContribution {
    let total: f64 = stage_times_seconds.values().sum();
    if total <= 0.0 {
        return BottleneckContribution { contributions: BTreeMap::new(), primary: None };
    }

    let contributions: BTreeMap<String, f64> = stage_times_seconds
        .iter()
        .map(|(stage, duration)| (stage.clone(), primitives::ratio_or_none(*duration, total).unwrap_or(0.0)))
        .collect();

    let primary = contributions
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .filter(|(_, value)| **value >= 0.40)
        .map(|(stage, _)| stage.clone());

    BottleneckContribution { contributions, primary }
}

/// Whether a task sitting in review for `review_age_hours` should trigger
/// reassignment (more than 48 hours).
#[must_use]
pub fn review_reassignment_trigger(review_age_hours: f64) -> bool {
    review_age_hours > 48.0
}

/// Weighted score for how suitable a candidate reviewer is, in `[0.0, 1.0]`.
#[must_use]
pub fn review_reassignment_score(domain_match: f64, load_capacity: f64, latency_history: f64) -> f64 {
    let score = domain_match * 0.4 + load_capacity * 0.3 + latency_history * 0.3;
    primitives::clamp01(score)
}

/// Risk assessment for a dependency delay against the available schedule
/// float.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyRisk {
    /// `"low"`, `"medium"`, `"high"`, or `"unknown"` (no float available).
    pub level: &'static str,
    /// Fraction of available float consumed by the delay. `None` if float
    /// is unavailable.
    pub float_consumption: Option<f64>,
    /// Passed through unchanged from the caller.
    pub downstream_impact: f64,
}

/// Computes [`DependencyRisk`] for a delayed dependency.
#[must_use]
pub fn dependency_risk(delay_days: f64, downstream_impact: f64, available_float_days: f64) -> DependencyRisk {
    let effective_delay = delay_days.max(0.0);
    if available_float_days <= 0.0 {
        return DependencyRisk { level: "unknown", float_consumption: None, downstream_impact };
    }

    let float_consumption = effective_delay / available_float_days;
    let level = if float_consumption >= 0.8 {
        "high"
    } else if float_consumption > 0.5 {
        "medium"
    } else {
        "low"
    };

    DependencyRisk { level, float_consumption: Some(float_consumption), downstream_impact }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_predictability_index_requires_all_components() {
        assert_eq!(delivery_predictability_index(Some(1.0), None, Some(1.0)), None);
        let value = delivery_predictability_index(Some(1.0), Some(1.0), Some(1.0)).unwrap();
        assert!((value - 1.0).abs() < 1e-9);
    }

    #[test]
    fn integration_reliability_score_defaults_recovery_to_perfect() {
        let score = integration_reliability_score(&["success", "success"], &[]).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn wip_age_bucket_boundaries() {
        assert_eq!(wip_age_bucket(0.0), "fresh");
        assert_eq!(wip_age_bucket(3.0 * SECONDS_PER_DAY), "aging");
        assert_eq!(wip_age_bucket(7.0 * SECONDS_PER_DAY), "stale");
        assert_eq!(wip_age_bucket(14.0 * SECONDS_PER_DAY), "at_risk");
    }

    #[test]
    fn conflict_probability_grows_with_age_and_clamps() {
        assert_eq!(conflict_probability(0.0, 0.05), 0.0);
        let far_future = conflict_probability(10_000.0, 0.05);
        assert!((far_future - 1.0).abs() < 1e-9);
    }

    #[test]
    fn bottleneck_contribution_flags_dominant_stage() {
        let mut stages = BTreeMap::new();
        stages.insert("review".to_string(), 80.0);
        stages.insert("implementation".to_string(), 20.0);
        let result = bottleneck_contribution(&stages);
        assert_eq!(result.primary.as_deref(), Some("review"));
    }

    #[test]
    fn bottleneck_contribution_empty_has_no_primary() {
        let result = bottleneck_contribution(&BTreeMap::new());
        assert_eq!(result.primary, None);
        assert!(result.contributions.is_empty());
    }

    #[test]
    fn dependency_risk_levels() {
        assert_eq!(dependency_risk(9.0, 1.0, 10.0).level, "high");
        assert_eq!(dependency_risk(6.0, 1.0, 10.0).level, "medium");
        assert_eq!(dependency_risk(1.0, 1.0, 10.0).level, "low");
        assert_eq!(dependency_risk(1.0, 1.0, 0.0).level, "unknown");
    }

    #[test]
    fn integration_outcome_mix_buckets_correctly() {
        let attempts = vec![
            IntegrationOutcome { result: "success".to_string(), attempt_number: 1 },
            IntegrationOutcome { result: "success".to_string(), attempt_number: 2 },
            IntegrationOutcome { result: "conflict".to_string(), attempt_number: 1 },
        ];
        let mix = integration_outcome_mix(&attempts);
        assert_eq!(mix.success_first, 1);
        assert_eq!(mix.success_retry, 1);
        assert_eq!(mix.failed_conflict, 1);
        assert_eq!(mix.total, 3);
    }
}
