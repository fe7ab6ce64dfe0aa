// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - MEASUREMENT CRATE
//
// Crowd-sourced water-price and exchange-rate oracle:
//   invites      -> who is asked to measure, and how many
//   system       -> submission, automated validation, peer validation
//   stats        -> Gaussian outlier filtering (integer math)
//   averages     -> windowed averages, dynamic targets, daily rollups
//   volume       -> container sizes pro-rated to one liter
//   urls         -> validated source-URL registry
//   rewards      -> contributor reward schedule
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod averages;
pub mod conversion;
pub mod error;
pub mod invites;
pub mod proof;
pub mod rewards;
pub mod stats;
pub mod system;
pub mod targets;
pub mod types;
pub mod urls;
pub mod volume;

pub use averages::{day_bounds, utc_date};
pub use conversion::{ConversionKey, ConversionRate};
pub use error::{MeasurementError, RejectReason};
pub use rewards::calculate_reward;
pub use system::MeasurementSystem;
pub use types::*;
pub use volume::{ContainerVolume, VolumeUnit};

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use opeg_core::{
        fiat_for, Hash256, MeasurementSource, MeasurementType, PegConfig, StaticDirectory, UserDirectory,
    };
    use opeg_store::{KvStore, StoreError, WriteBatch};
    use std::sync::Arc;

    pub const NOW: u64 = 1_750_000_000;
    pub const PHOTO_HASH: &str = "9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08";

    pub fn directory(population: usize) -> Arc<dyn UserDirectory> {
        Arc::new(
            StaticDirectory::new()
                .with_population("OUSD", population)
                .with_population("OEUR", population),
        )
    }

    pub fn test_system<S: KvStore>(store: S) -> MeasurementSystem<S> {
        test_system_with_population(store, 20)
    }

    pub fn test_system_with_population<S: KvStore>(store: S, population: usize) -> MeasurementSystem<S> {
        MeasurementSystem::open(store, directory(population), &PegConfig::default()).unwrap()
    }

    pub fn test_system_with_config<S: KvStore>(store: S, config: PegConfig) -> MeasurementSystem<S> {
        MeasurementSystem::open(store, directory(20), &config).unwrap()
    }

    pub fn water_submission(invite: &MeasurementInvite, price_micro: u64, timestamp: u64) -> WaterPriceSubmission {
        WaterPriceSubmission {
            submitter: invite.invited_user.clone(),
            currency: invite.currency.clone().unwrap_or_else(|| "OUSD".to_string()),
            price_micro,
            volume: ContainerVolume::liter(),
            proof: "https://shop.example/water".to_string(),
            source: MeasurementSource::UserOnline,
            timestamp,
            block_height: 1,
            invite_id: invite.id,
        }
    }

    pub fn exchange_submission(invite: &MeasurementInvite, rate_micro: u64, timestamp: u64) -> ExchangeRateSubmission {
        let from = invite.currency.clone().unwrap_or_else(|| "OUSD".to_string());
        let to = fiat_for(&from).unwrap_or("USD").to_string();
        ExchangeRateSubmission {
            submitter: invite.invited_user.clone(),
            from_currency: from,
            to_currency: to,
            rate_micro,
            proof: "https://fx.example/rates".to_string(),
            source: MeasurementSource::BotOnline,
            timestamp,
            block_height: 1,
            invite_id: invite.id,
        }
    }

    /// One invite + one accepted submission per value, all at `now`
    pub fn submit_water_series<S: KvStore>(
        system: &MeasurementSystem<S>,
        currency: &str,
        values: &[u64],
        now: u64,
    ) -> Vec<Hash256> {
        values
            .iter()
            .map(|&value| {
                let invite = system
                    .create_invites(1, MeasurementType::WaterPrice, Some(currency), now, 1)
                    .unwrap()
                    .remove(0);
                system
                    .submit_water_price(water_submission(&invite, value, now), now)
                    .unwrap()
            })
            .collect()
    }

    pub fn submit_exchange_series<S: KvStore>(
        system: &MeasurementSystem<S>,
        currency: &str,
        values: &[u64],
        now: u64,
    ) -> Vec<Hash256> {
        values
            .iter()
            .map(|&value| {
                let invite = system
                    .create_invites(1, MeasurementType::ExchangeRate, Some(currency), now, 1)
                    .unwrap()
                    .remove(0);
                system
                    .submit_exchange_rate(exchange_submission(&invite, value, now), now)
                    .unwrap()
            })
            .collect()
    }

    /// Reads succeed empty, every mutation fails
    #[derive(Debug, Default)]
    pub struct FailingStore;

    impl KvStore for FailingStore {
        fn read(&self, _key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
            Ok(None)
        }

        fn write(&self, _key: &[u8], _value: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        fn erase(&self, _key: &[u8]) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }

        fn iterate(&self, _prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
            Ok(Vec::new())
        }

        fn apply_batch(&self, _batch: WriteBatch) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".to_string()))
        }
    }
}
