use opeg_core::{TargetParams, SECS_PER_DAY};

/// Daily measurement target for one currency.
///
/// Early stage (no history, or first observation younger than
/// `early_stage_days`) and windows without enough samples to judge
/// volatility get the early-stage target. Otherwise the target slides
/// linearly from `stable_target` at `stable_cv_bps` to `volatile_target`
/// at `volatile_cv_bps`. Always clamped to `[min_daily, max_daily]`.
pub fn dynamic_target(
    params: &TargetParams,
    first_seen: Option<u64>,
    now: u64,
    cv_bps: Option<u64>,
) -> u64 {
    let early = match first_seen {
        None => true,
        Some(first) => now.saturating_sub(first) < params.early_stage_days * SECS_PER_DAY,
    };

    let target = match (early, cv_bps) {
        (true, _) | (false, None) => params.early_stage_target,
        (false, Some(cv)) if cv >= params.volatile_cv_bps => params.volatile_target,
        (false, Some(cv)) if cv <= params.stable_cv_bps => params.stable_target,
        (false, Some(cv)) => {
            let span = params.volatile_cv_bps - params.stable_cv_bps;
            let position = cv - params.stable_cv_bps;
            if params.volatile_target >= params.stable_target {
                params.stable_target + (params.volatile_target - params.stable_target) * position / span
            } else {
                params.stable_target - (params.stable_target - params.volatile_target) * position / span
            }
        }
    };

    target.clamp(params.min_daily, params.max_daily)
}
