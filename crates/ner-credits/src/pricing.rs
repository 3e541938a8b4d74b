// SPDX-FileCopyrightText: 2026 NER Studio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Credit arithmetic for generation jobs.

/// Normalizes a requested variation count.
///
/// Missing or non-positive requests use `default`; anything above `max` is
/// clamped to `max`.
pub fn clamp_variations(requested: Option<i64>, default: u32, max: u32) -> u32 {
    match requested {
        Some(n) if n >= 1 => u32::try_from(n).map_or(max, |n| n.min(max)),
        _ => default.min(max),
    }
}

/// Up-front estimate: `cost_per_use * variations`, saturating on overflow.
pub fn estimated_cost(cost_per_use: i64, variations: u32) -> i64 {
    cost_per_use.saturating_mul(i64::from(variations))
}

/// Amount charged once a job finishes.
///
/// Only completed images are billed. The estimate is scaled by
/// `completed / total` with a single floor at the end, so the charge never
/// exceeds the estimate and no per-image truncation accumulates.
pub fn actual_cost(estimated: i64, total: i64, completed: i64) -> i64 {
    if total <= 0 || completed <= 0 || estimated <= 0 {
        return 0;
    }
    let completed = completed.min(total);
    let scaled = i128::from(estimated) * i128::from(completed) / i128::from(total);
    i64::try_from(scaled).unwrap_or(estimated)
}
