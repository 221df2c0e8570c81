use std::str::FromStr;

/// Validator lifecycle states as reported by the beacon API, with the
/// integer codes the validator table stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ValidatorStatus {
    PendingInitialized = 0,
    PendingQueued = 1,
    ActiveOngoing = 2,
    ActiveExiting = 3,
    ActiveSlashed = 4,
    ExitedUnslashed = 5,
    ExitedSlashed = 6,
    WithdrawalPossible = 7,
    WithdrawalDone = 8,
}

impl ValidatorStatus {
    pub fn code(&self) -> i16 {
        *self as i16
    }

    pub fn from_code(code: i16) -> Option<Self> {
        let status = match code {
            0 => Self::PendingInitialized,
            1 => Self::PendingQueued,
            2 => Self::ActiveOngoing,
            3 => Self::ActiveExiting,
            4 => Self::ActiveSlashed,
            5 => Self::ExitedUnslashed,
            6 => Self::ExitedSlashed,
            7 => Self::WithdrawalPossible,
            8 => Self::WithdrawalDone,
            _ => return None,
        };
        Some(status)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingInitialized => "pending_initialized",
            Self::PendingQueued => "pending_queued",
            Self::ActiveOngoing => "active_ongoing",
            Self::ActiveExiting => "active_exiting",
            Self::ActiveSlashed => "active_slashed",
            Self::ExitedUnslashed => "exited_unslashed",
            Self::ExitedSlashed => "exited_slashed",
            Self::WithdrawalPossible => "withdrawal_possible",
            Self::WithdrawalDone => "withdrawal_done",
        }
    }

    /// Terminal statuses are excluded from future balance fetches.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::ExitedUnslashed | Self::ExitedSlashed | Self::WithdrawalDone
        )
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::PendingInitialized | Self::PendingQueued)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown validator status {0}")]
pub struct StatusParseError(String);

impl FromStr for ValidatorStatus {
    type Err = StatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "pending_initialized" => Self::PendingInitialized,
            "pending_queued" => Self::PendingQueued,
            "active_ongoing" => Self::ActiveOngoing,
            "active_exiting" => Self::ActiveExiting,
            "active_slashed" => Self::ActiveSlashed,
            "exited_unslashed" => Self::ExitedUnslashed,
            "exited_slashed" => Self::ExitedSlashed,
            "withdrawal_possible" => Self::WithdrawalPossible,
            "withdrawal_done" => Self::WithdrawalDone,
            other => return Err(StatusParseError(other.to_owned())),
        };
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() {
        for code in 0..=8 {
            let status = ValidatorStatus::from_code(code).unwrap();
            assert_eq!(status.code(), code);
            assert_eq!(status.as_str().parse::<ValidatorStatus>().unwrap(), status);
        }
        assert!(ValidatorStatus::from_code(9).is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(ValidatorStatus::ExitedUnslashed.is_terminal());
        assert!(ValidatorStatus::ExitedSlashed.is_terminal());
        assert!(ValidatorStatus::WithdrawalDone.is_terminal());
        assert!(!ValidatorStatus::WithdrawalPossible.is_terminal());
        assert!(!ValidatorStatus::ActiveOngoing.is_terminal());
    }
}
