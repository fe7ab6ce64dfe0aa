// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// PROPERTY-BASED TESTS - opeg-core
//
// Integer helpers and the deterministic RNG must behave identically on
// every node for arbitrary inputs.
//
// Run: cargo test --release -p opeg-core --test prop_core
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use opeg_core::{isqrt, micro_from_f64, DeterministicRng, Hash256, MAX_OBSERVATION_MICRO};
use proptest::prelude::*;

// ─────────────────────────────────────────────────────────────────
// INTEGER MATH
// ─────────────────────────────────────────────────────────────────

proptest! {
    /// PROPERTY: isqrt returns the floor square root
    #[test]
    fn prop_isqrt_is_floor(n in 0u128..=(u64::MAX as u128)) {
        let r = isqrt(n);
        prop_assert!(r * r <= n, "{}^2 exceeds {}", r, n);
        prop_assert!((r + 1) * (r + 1) > n, "{} is not the floor root of {}", r, n);
    }

    /// PROPERTY: Accepted decimals always land inside the observation bound
    #[test]
    fn prop_micro_from_f64_bounded(value in -10.0f64..2_000_000.0) {
        if let Some(micro) = micro_from_f64(value) {
            prop_assert!(micro >= 1 && micro <= MAX_OBSERVATION_MICRO);
            prop_assert!(value > 0.0);
        }
    }

    /// PROPERTY: Hex ids round-trip
    #[test]
    fn prop_hash_hex_roundtrip(bytes in prop::array::uniform32(any::<u8>())) {
        let id = Hash256(bytes);
        prop_assert_eq!(Hash256::from_hex(&id.to_hex()).unwrap(), id);
    }
}

// ─────────────────────────────────────────────────────────────────
// DETERMINISTIC RNG
// ─────────────────────────────────────────────────────────────────

proptest! {
    /// PROPERTY: below(bound) never reaches bound
    #[test]
    fn prop_below_in_range(seed in prop::array::uniform32(any::<u8>()), bound in 1u64..=u64::MAX) {
        let mut rng = DeterministicRng::from_seed(seed);
        for _ in 0..16 {
            prop_assert!(rng.below(bound) < bound);
        }
    }

    /// PROPERTY: Two nodes with the same seed parts shuffle identically
    #[test]
    fn prop_shuffle_deterministic_permutation(
        block in prop::collection::vec(any::<u8>(), 0..64),
        len in 0usize..300,
    ) {
        let items: Vec<usize> = (0..len).collect();
        let mut a = items.clone();
        let mut b = items.clone();
        DeterministicRng::from_parts(b"PROP", &[&block]).shuffle(&mut a);
        DeterministicRng::from_parts(b"PROP", &[&block]).shuffle(&mut b);
        prop_assert_eq!(&a, &b, "Same seed must shuffle the same way");

        a.sort_unstable();
        prop_assert_eq!(a, items, "Shuffle must be a permutation");
    }
}
