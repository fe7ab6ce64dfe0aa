use opeg_core::Hash256;

/// Consensus-path failures. A block that triggers any of these is invalid.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StabilizationError {
    #[error("issuance for {currency} overflows")]
    Overflow { currency: String },
    #[error("expected {expected} stabilization transactions, block carries {found}")]
    CountMismatch { expected: usize, found: usize },
    #[error("stabilization transaction {tx_id} for {currency} does not match the recomputed plan")]
    TransactionMismatch { currency: String, tx_id: Hash256 },
}
