// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - INVITATION ISSUANCE
//
// Who gets asked to measure, and how many. Candidate order is derived from
// a deterministic seed so every node that replays an issuance request
// arrives at the same invite set.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use opeg_core::{DeterministicRng, Hash256, MeasurementType, UserDirectory, PPM};
use sha3::{Digest, Sha3_256};
use std::collections::BTreeSet;

/// Invite id: SHA3-256(domain || user || created_at || sequence)
pub fn compute_invite_id(user: &str, created_at: u64, sequence: u64) -> Hash256 {
    let mut hasher = Sha3_256::new();
    hasher.update(b"OPEG_INVITE_V1");
    hasher.update((user.len() as u64).to_le_bytes());
    hasher.update(user.as_bytes());
    hasher.update(created_at.to_le_bytes());
    hasher.update(sequence.to_le_bytes());
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    Hash256(out)
}

/// Selection stream for one issuance request
pub fn selection_rng(
    currency: Option<&str>,
    measurement_type: MeasurementType,
    now: u64,
    sequence: u64,
) -> DeterministicRng {
    DeterministicRng::from_parts(
        b"OPEG_INVITE_SELECT_V1",
        &[
            currency.unwrap_or("").as_bytes(),
            &[measurement_type.tag()],
            &now.to_le_bytes(),
            &sequence.to_le_bytes(),
        ],
    )
}

/// Pick `count` users: natives first, then regional, then everyone.
///
/// Each tier is shuffled on its own so tier priority is kept. The result
/// has no duplicates unless the native pool is smaller than `count`, in
/// which case the combined pool is cycled until `count` is reached.
pub fn select_candidates(
    directory: &dyn UserDirectory,
    currency: Option<&str>,
    count: usize,
    rng: &mut DeterministicRng,
) -> Vec<String> {
    if count == 0 {
        return Vec::new();
    }

    let mut native = currency.map(|c| directory.native_users(c)).unwrap_or_default();
    let mut regional = currency.map(|c| directory.regional_users(c)).unwrap_or_default();
    let mut general = directory.all_users();
    // Directory order is not part of consensus; normalize before shuffling.
    native.sort();
    regional.sort();
    general.sort();
    rng.shuffle(&mut native);
    rng.shuffle(&mut regional);
    rng.shuffle(&mut general);

    let mut seen = BTreeSet::new();
    let mut pool = Vec::new();
    for user in native.into_iter().chain(regional).chain(general) {
        if seen.insert(user.clone()) {
            pool.push(user);
        }
    }

    if pool.len() >= count {
        pool.truncate(count);
        return pool;
    }
    if pool.is_empty() {
        return pool;
    }

    // Unique pool exhausted, so the native pool is necessarily short.
    pool.iter().cycle().take(count).cloned().collect()
}

/// How many invites to send to expect `target` completed measurements.
///
/// `ceil(ceil(target / max(rate, floor)) * overhead)`, clamped to
/// `[target, target * 10]`.
pub fn invite_count_for_target(
    target: u64,
    rate_ppm: u64,
    min_rate_ppm: u64,
    overhead_pct: u64,
) -> u64 {
    if target == 0 {
        return 0;
    }
    let rate = rate_ppm.max(min_rate_ppm).max(1) as u128;
    let base = (target as u128 * PPM as u128).div_ceil(rate);
    let padded = (base * overhead_pct as u128).div_ceil(100);
    let upper = target as u128 * 10;
    padded.clamp(target as u128, upper) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use opeg_core::StaticDirectory;

    fn rng() -> DeterministicRng {
        selection_rng(Some("OUSD"), MeasurementType::WaterPrice, 1_700_000_000, 0)
    }

    #[test]
    fn test_invite_id_deterministic_and_unique() {
        let a = compute_invite_id("alice", 100, 0);
        assert_eq!(a, compute_invite_id("alice", 100, 0));
        assert_ne!(a, compute_invite_id("alice", 100, 1));
        assert_ne!(a, compute_invite_id("bob", 100, 0));
    }

    #[test]
    fn test_invite_count_for_target() {
        // 100 / 0.5 = 200, x1.2 = 240
        assert_eq!(invite_count_for_target(100, 500_000, 100_000, 120), 240);
        // Perfect conversion still pads, clamp keeps >= target
        assert_eq!(invite_count_for_target(100, 1_000_000, 100_000, 120), 120);
        // Rate floored at 0.10 then capped at 10x target
        assert_eq!(invite_count_for_target(100, 10_000, 100_000, 120), 1_000);
        // ceil(7 / 0.3) = 24, x1.2 = 28.8 -> 29
        assert_eq!(invite_count_for_target(7, 300_000, 100_000, 120), 29);
        assert_eq!(invite_count_for_target(0, 500_000, 100_000, 120), 0);
    }

    #[test]
    fn test_natives_preferred() {
        let mut dir = StaticDirectory::new().with_population("OUSD", 5);
        dir.add_native("OEUR", "eu_user");
        let picked = select_candidates(&dir, Some("OUSD"), 3, &mut rng());
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().all(|u| u.starts_with("OUSD_user_")));
    }

    #[test]
    fn test_regional_then_general_fill() {
        let mut dir = StaticDirectory::new().with_population("OUSD", 2);
        dir.add_regional("OUSD", "canadian");
        dir.add_native("OEUR", "eu_user");
        let picked = select_candidates(&dir, Some("OUSD"), 4, &mut rng());
        assert_eq!(picked.len(), 4);
        assert_eq!(picked[2], "canadian", "Regional tier comes right after natives");
        assert_eq!(picked[3], "eu_user");
    }

    #[test]
    fn test_cycles_when_native_pool_small() {
        let dir = StaticDirectory::new().with_population("OUSD", 2);
        let picked = select_candidates(&dir, Some("OUSD"), 5, &mut rng());
        assert_eq!(picked.len(), 5, "Small native pool allows repeats");
        let unique: BTreeSet<_> = picked.iter().collect();
        assert_eq!(unique.len(), 2);
    }

    #[test]
    fn test_empty_directory_yields_nothing() {
        let dir = StaticDirectory::new();
        assert!(select_candidates(&dir, Some("OUSD"), 3, &mut rng()).is_empty());
    }

    #[test]
    fn test_selection_deterministic() {
        let dir = StaticDirectory::new().with_population("OUSD", 50);
        let a = select_candidates(&dir, Some("OUSD"), 10, &mut rng());
        let b = select_candidates(&dir, Some("OUSD"), 10, &mut rng());
        assert_eq!(a, b);
    }
}
