//! # Admission Controller
//!
//! Liu-and-Layland utilization test for Rate-Monotonic scheduling.
//!
//! A set of `n` independent periodic tasks with implicit deadlines is
//! schedulable under RM if
//!
//! ```text
//!   U = Σ Cᵢ / Tᵢ ≤ n (2^(1/n) − 1)
//! ```
//!
//! The right-hand side falls towards `ln 2 ≈ 0.693` as `n` grows, so that
//! asymptotic value is used as a bound valid for any `n`. The test is
//! sufficient, not necessary: it may turn away a set that would in fact be
//! schedulable, but never admits one it cannot vouch for.
//!
//! All arithmetic is integer, scaled by
//! [`UTILIZATION_SCALE`](crate::config::UTILIZATION_SCALE). Each task's term
//! is truncated on its own before summing. Contracts come straight off the
//! wire, so the product is widened to `u128` and the sum saturates.
//!
//! Admission is checked once, at registration. A task that later runs
//! longer than its declared computation time is not re-checked.

use crate::config::UTILIZATION_SCALE;
use crate::registry::TaskRegistry;
use crate::task::TaskParams;

/// Scaled utilization of a single contract, truncated.
#[inline]
pub fn task_utilization(params: &TaskParams) -> u64 {
    let scaled = u128::from(params.computation_ms) * u128::from(UTILIZATION_SCALE)
        / u128::from(params.period_ms);
    u64::try_from(scaled).unwrap_or(u64::MAX)
}

/// Scaled utilization of everything currently registered.
pub fn utilization_milli(registry: &TaskRegistry) -> u64 {
    registry
        .iter()
        .fold(0u64, |sum, t| sum.saturating_add(task_utilization(&t.params)))
}

/// Scaled utilization the registry would have with `candidate` added.
pub fn utilization_with(candidate: &TaskParams, registry: &TaskRegistry) -> u64 {
    utilization_milli(registry).saturating_add(task_utilization(candidate))
}

/// Whether `candidate` can join `registry` without exceeding `bound_milli`.
///
/// Pure: the caller inserts only after a `true` result.
pub fn should_admit(candidate: &TaskParams, registry: &TaskRegistry, bound_milli: u64) -> bool {
    utilization_with(candidate, registry) <= bound_milli
}
