pub mod epochs;
pub mod slots;
pub mod validators;

use beaconwatch_shared::bits;

/// The per-stage controllers an actor needs, bundled for cheap sharing.
pub struct Controllers {
    pub epochs: epochs::EpochsController,
    pub slots: slots::SlotsController,
    pub validators: validators::ValidatorsController,
}
use beaconwatch_shared::validator_status::StatusParseError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Client(#[from] crate::client::reliable::Error),
    #[error(transparent)]
    Storage(#[from] crate::storage::Error),
    #[error(transparent)]
    Bits(#[from] bits::Error),
    #[error(transparent)]
    Status(#[from] StatusParseError),
    #[error("Epoch {epoch} has no row")]
    UnknownEpoch { epoch: u64 },
    #[error("Slot {slot} has no row")]
    UnknownSlot { slot: u64 },
    #[error("Slot {slot}: no committee sizes stored for referenced slot {referenced}")]
    MissingCommitteeSize { slot: u64, referenced: u64 },
    #[error("Slot {slot}: aggregation bits shorter than the referenced committees")]
    AggregationBitsOverrun { slot: u64 },
    #[error("No sync committee stored covering epoch {epoch}")]
    MissingSyncCommittee { epoch: u64 },
    #[error("Epoch {epoch} still has unfinished stages")]
    EpochStagesIncomplete { epoch: u64 },
}
