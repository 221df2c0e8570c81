use std::collections::HashMap;
use std::sync::Arc;

use beaconwatch_shared::beacon_time::BeaconTime;
use beaconwatch_shared::validator_status::ValidatorStatus;

use crate::client::beacon::{BeaconClient, StateId, ValidatorData};
use crate::storage::validators::ValidatorRecord;
use crate::storage::Store;

use super::Error;

/// Upstream cap on ids per balances call.
const BALANCES_CHUNK: usize = 1_000_000;

/// Validator set maintenance: the initial sync, per-epoch balance capture
/// and activation tracking.
pub struct ValidatorsController {
    beacon: Arc<BeaconClient>,
    store: Arc<Store>,
    time: BeaconTime,
}

/// Withdrawal credentials with an 0x01/0x02 prefix embed an execution
/// address in their last 20 bytes; BLS credentials carry none.
pub(crate) fn withdrawal_address(credentials: &[u8]) -> Option<Vec<u8>> {
    match credentials.first() {
        Some(0x01) | Some(0x02) if credentials.len() == 32 => {
            Some(credentials[12..].to_vec())
        }
        _ => None,
    }
}

pub(crate) fn to_validator_record(data: &ValidatorData) -> Result<ValidatorRecord, Error> {
    let status: ValidatorStatus = data.status.parse()?;
    Ok(ValidatorRecord {
        id: data.index,
        status,
        balance: data.balance,
        effective_balance: data.validator.effective_balance,
        pubkey: data.validator.pubkey.clone(),
        withdrawal_address: withdrawal_address(&data.validator.withdrawal_credentials),
    })
}

impl ValidatorsController {
    pub fn new(beacon: Arc<BeaconClient>, store: Arc<Store>, time: BeaconTime) -> Self {
        Self { beacon, store, time }
    }

    /// Initial sync: bulk-load the full validator set at the lookback
    /// epoch's start state. A non-empty table means it already ran.
    pub async fn seed_if_empty(&self) -> Result<(), Error> {
        if self.store.count_validators().await? > 0 {
            return Ok(());
        }
        let state = StateId::Slot(self.time.epoch_start_slot(self.time.lookback_epoch()));
        tracing::info!("Validator table empty, running initial sync");
        let data = self.beacon.get_validators(&state, None, None).await?;
        let records: Vec<ValidatorRecord> = data
            .iter()
            .map(to_validator_record)
            .collect::<Result<_, _>>()?;
        tracing::info!(validators = records.len(), "Seeding validator table");
        self.store.seed_validators(&records).await?;
        Ok(())
    }

    /// Captures balances of every non-terminal validator at the epoch start
    /// state.
    pub async fn fetch_balances(&self, epoch: u64) -> Result<(), Error> {
        let row = self
            .store
            .get_epoch(epoch)
            .await?
            .ok_or(Error::UnknownEpoch { epoch })?;
        if row.validators_balances_fetched {
            tracing::debug!(epoch, "Balances already fetched");
            return Ok(());
        }
        let ids = self.store.non_terminal_validator_ids().await?;
        let state = StateId::Slot(self.time.epoch_start_slot(epoch));
        let mut balances = Vec::with_capacity(ids.len());
        for chunk in ids.chunks(BALANCES_CHUNK) {
            let fetched = self.beacon.get_validators_balances(&state, chunk).await?;
            balances.extend(fetched.iter().map(|entry| (entry.index, entry.balance)));
        }
        tracing::info!(epoch, validators = balances.len(), "Storing balances");
        self.store.apply_validator_balances(epoch, &balances).await?;
        Ok(())
    }

    /// Moves pending validators forward and discovers ones first seen in the
    /// queue; both sets are upserted so new validators enter the table here.
    pub async fn track_activations(&self, epoch: u64) -> Result<(), Error> {
        let row = self
            .store
            .get_epoch(epoch)
            .await?
            .ok_or(Error::UnknownEpoch { epoch })?;
        if row.validators_activation_fetched {
            tracing::debug!(epoch, "Activations already tracked");
            return Ok(());
        }
        let state = StateId::Slot(self.time.epoch_start_slot(epoch));
        let pending = [
            ValidatorStatus::PendingInitialized,
            ValidatorStatus::PendingQueued,
        ];

        let mut by_index: HashMap<u64, ValidatorRecord> = HashMap::new();
        let known_pending = self.store.validator_ids_with_statuses(&pending).await?;
        if !known_pending.is_empty() {
            let updated = self
                .beacon
                .get_validators(&state, Some(known_pending.as_slice()), None)
                .await?;
            for data in &updated {
                by_index.insert(data.index, to_validator_record(data)?);
            }
        }
        let discovered = self
            .beacon
            .get_validators(&state, None, Some(pending.as_slice()))
            .await?;
        for data in &discovered {
            by_index.insert(data.index, to_validator_record(data)?);
        }

        let records: Vec<ValidatorRecord> = by_index.into_values().collect();
        tracing::debug!(epoch, updated = records.len(), "Applying activation updates");
        self.store.apply_validator_activations(epoch, &records).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::beacon::ValidatorDetails;

    #[test]
    fn extracts_execution_withdrawal_address() {
        let mut credentials = vec![0u8; 32];
        credentials[0] = 0x01;
        credentials[12..].copy_from_slice(&[0xAB; 20]);
        assert_eq!(withdrawal_address(&credentials), Some(vec![0xAB; 20]));

        credentials[0] = 0x02;
        assert_eq!(withdrawal_address(&credentials), Some(vec![0xAB; 20]));

        credentials[0] = 0x00;
        assert_eq!(withdrawal_address(&credentials), None);
        assert_eq!(withdrawal_address(&[]), None);
    }

    #[test]
    fn converts_api_record() {
        let mut credentials = vec![0u8; 32];
        credentials[0] = 0x01;
        let data = ValidatorData {
            index: 549417,
            balance: 32_011_741_974,
            status: "active_ongoing".to_owned(),
            validator: ValidatorDetails {
                pubkey: vec![0xB8, 0x9B],
                withdrawal_credentials: credentials,
                effective_balance: 32_000_000_000,
            },
        };
        let record = to_validator_record(&data).unwrap();
        assert_eq!(record.id, 549417);
        assert_eq!(record.status, ValidatorStatus::ActiveOngoing);
        assert_eq!(record.effective_balance, 32_000_000_000);
        assert!(record.withdrawal_address.is_some());

        let bad = ValidatorData {
            status: "nonsense".to_owned(),
            ..data
        };
        assert!(to_validator_record(&bad).is_err());
    }
}
