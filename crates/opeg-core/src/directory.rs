//! User directory seam.
//!
//! Identity, trust and geographic policy live outside the engine. The
//! engine only asks the directory which public keys belong to which
//! currency population when it issues invites or picks reward recipients,
//! and how much of each currency circulates.

use std::collections::{BTreeMap, BTreeSet};

pub trait UserDirectory: Send + Sync {
    /// Users whose home currency is `currency`
    fn native_users(&self, currency: &str) -> Vec<String>;

    /// Users in regions adjacent to the currency's home region
    fn regional_users(&self, currency: &str) -> Vec<String>;

    /// Every user eligible to measure anything
    fn all_users(&self) -> Vec<String>;

    /// Circulating supply of `currency` in minor units, as reported by the ledger
    fn coin_supply(&self, currency: &str) -> u128;
}

/// In-memory directory. Used by tests and by nodes that load their
/// population from a genesis file.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    native: BTreeMap<String, BTreeSet<String>>,
    regional: BTreeMap<String, BTreeSet<String>>,
    supply: BTreeMap<String, u128>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_native(&mut self, currency: &str, user: &str) {
        self.native
            .entry(currency.to_string())
            .or_default()
            .insert(user.to_string());
    }

    pub fn add_regional(&mut self, currency: &str, user: &str) {
        self.regional
            .entry(currency.to_string())
            .or_default()
            .insert(user.to_string());
    }

    pub fn set_supply(&mut self, currency: &str, minor_units: u128) {
        self.supply.insert(currency.to_string(), minor_units);
    }

    /// Builder: record `minor_units` of circulating supply for `currency`
    pub fn with_supply(mut self, currency: &str, minor_units: u128) -> Self {
        self.set_supply(currency, minor_units);
        self
    }

    /// Builder: register `count` native users named `{currency}_user_{i}`
    pub fn with_population(mut self, currency: &str, count: usize) -> Self {
        for i in 0..count {
            self.add_native(currency, &format!("{}_user_{}", currency, i));
        }
        self
    }
}

impl UserDirectory for StaticDirectory {
    fn native_users(&self, currency: &str) -> Vec<String> {
        self.native
            .get(currency)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn regional_users(&self, currency: &str) -> Vec<String> {
        self.regional
            .get(currency)
            .map(|users| users.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn all_users(&self) -> Vec<String> {
        let mut all = BTreeSet::new();
        for users in self.native.values().chain(self.regional.values()) {
            all.extend(users.iter().cloned());
        }
        all.into_iter().collect()
    }

    fn coin_supply(&self, currency: &str) -> u128 {
        self.supply.get(currency).copied().unwrap_or(0)
    }
}
