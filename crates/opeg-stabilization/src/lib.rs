// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// O PEG - STABILIZATION MINING CRATE
//
// Turns the oracle's price signal into deterministic issuance:
//   status      -> STABLE / UNSTABLE / INACTIVE state machine
//   coins       -> deviation-weighted issuance and reward sizing
//   recipients  -> seeded selection from other stable currencies
//   mining      -> the stateful manager, transactions and audit trail
//
// CONSENSUS: every node that sees the same block and the same averages
// computes the same coins, the same recipients and the same amounts.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod coins;
pub mod error;
pub mod mining;
pub mod recipients;
pub mod status;

pub use error::StabilizationError;
pub use mining::{
    LifetimeTotals, RewardOutput, StabilizationMining, StabilizationRecord, StabilizationStatistics,
    StabilizationTransaction,
};
pub use status::{stability_ratio_ppm, CurrencyStabilityInfo, StabilityStatus};
