//! Reward recipient selection.
//!
//! The pool is every native user of every stable currency other than the
//! one being stabilized, deduplicated and sorted. A Fisher–Yates shuffle
//! seeded from (block hash, currency) then picks the prefix, so all nodes
//! agree on the sample without any node-local entropy.

use opeg_core::{DeterministicRng, Hash256, UserDirectory};
use std::collections::BTreeSet;

const SELECTION_DOMAIN: &[u8] = b"OPEG_STAB_SELECT_V1";

pub fn recipient_pool<'a, I>(directory: &dyn UserDirectory, stable_currencies: I, exclude: &str) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut pool = BTreeSet::new();
    for currency in stable_currencies {
        if currency == exclude {
            continue;
        }
        pool.extend(directory.native_users(currency));
    }
    pool.into_iter().collect()
}

/// Uniform sample without replacement of up to `count` users
pub fn select_recipients(pool: &[String], count: usize, block_hash: &Hash256, currency: &str) -> Vec<String> {
    if pool.is_empty() || count == 0 {
        return Vec::new();
    }
    let mut sample = pool.to_vec();
    let mut rng = DeterministicRng::from_parts(SELECTION_DOMAIN, &[&block_hash.as_bytes()[..], currency.as_bytes()]);
    rng.shuffle(&mut sample);
    sample.truncate(count);
    sample
}
