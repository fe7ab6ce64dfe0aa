use opeg_core::MeasurementType;
use opeg_store::StoreError;

/// Why a submission or validation was refused. Never fatal; an invite
/// that was not consumed stays usable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RejectReason {
    #[error("invite not found")]
    UnknownInvite,
    #[error("invite was issued to a different user")]
    InviteNotOwned,
    #[error("invite is for {0} measurements")]
    InviteTypeMismatch(MeasurementType),
    #[error("invite is for currency {0}")]
    InviteCurrencyMismatch(String),
    #[error("invite already used")]
    InviteUsed,
    #[error("invite expired")]
    InviteExpired,
    #[error("invalid proof: {0}")]
    InvalidProof(String),
    #[error("observation outside time tolerance ({age_secs}s old)")]
    StaleObservation { age_secs: u64 },
    #[error("observation stamped {ahead_secs}s in the future")]
    FutureTimestamp { ahead_secs: u64 },
    #[error("container volume {volume_micro_liters} uL outside the accepted range")]
    VolumeOutOfRange { volume_micro_liters: u64 },
    #[error("value must be positive")]
    NonPositiveValue,
    #[error("value {0} exceeds the observation bound")]
    ValueTooLarge(u64),
    #[error("invalid currency pair {from}/{to}")]
    InvalidCurrencyPair { from: String, to: String },
    #[error("value {value_micro} outside gaussian acceptance range around {mean_micro}")]
    OutOfRange { value_micro: u64, mean_micro: u64 },
    #[error("duplicate observation")]
    Duplicate,
    #[error("observation not found")]
    UnknownObservation,
    #[error("submitter cannot validate own record")]
    SelfValidation,
    #[error("validator already recorded")]
    AlreadyValidated,
    #[error("url already registered")]
    DuplicateUrl,
    #[error("url not found")]
    UnknownUrl,
}

#[derive(Debug, thiserror::Error)]
pub enum MeasurementError {
    #[error("rejected: {0}")]
    Rejected(#[from] RejectReason),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("date {0} is outside the unix epoch range")]
    InvalidDate(chrono::NaiveDate),
}

impl MeasurementError {
    pub fn reject_reason(&self) -> Option<&RejectReason> {
        match self {
            MeasurementError::Rejected(reason) => Some(reason),
            _ => None,
        }
    }
}
