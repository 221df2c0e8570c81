use std::ops::RangeInclusive;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};

use crate::chain::ChainConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("Timestamp {timestamp_ms}ms is before genesis {genesis_ms}ms")]
    BeforeGenesis { timestamp_ms: u64, genesis_ms: u64 },
}

/// Slot/epoch arithmetic for one chain. Pure except for the `wait_*`
/// helpers, which suspend on the tokio timer.
///
/// All timestamps are unix milliseconds. `delay_slots_to_head` shifts every
/// "has started" decision: slot N counts as started only once slot
/// N + delay has begun on chain, keeping the indexer behind the head.
#[derive(Debug, Clone)]
pub struct BeaconTime {
    genesis_ms: u64,
    slot_duration_ms: u64,
    slots_per_epoch: u64,
    epochs_per_sync_committee_period: u64,
    lookback_slot: u64,
    delay_slots_to_head: u64,
}

impl BeaconTime {
    pub fn new(config: &ChainConfig, lookback_slot: u64, delay_slots_to_head: u64) -> Self {
        Self {
            genesis_ms: config.genesis_timestamp * 1000,
            slot_duration_ms: config.slot_duration_ms,
            slots_per_epoch: config.slots_per_epoch,
            epochs_per_sync_committee_period: config.epochs_per_sync_committee_period,
            lookback_slot,
            delay_slots_to_head,
        }
    }

    pub fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or(0)
    }

    pub fn slots_per_epoch(&self) -> u64 {
        self.slots_per_epoch
    }

    pub fn slot_duration_ms(&self) -> u64 {
        self.slot_duration_ms
    }

    pub fn lookback_slot(&self) -> u64 {
        self.lookback_slot
    }

    pub fn lookback_epoch(&self) -> u64 {
        self.epoch_of(self.lookback_slot)
    }

    pub fn slot_of(&self, timestamp_ms: u64) -> Result<u64, Error> {
        if timestamp_ms < self.genesis_ms {
            return Err(Error::BeforeGenesis {
                timestamp_ms,
                genesis_ms: self.genesis_ms,
            });
        }
        Ok((timestamp_ms - self.genesis_ms) / self.slot_duration_ms)
    }

    pub fn time_of(&self, slot: u64) -> u64 {
        self.genesis_ms + slot * self.slot_duration_ms
    }

    pub fn epoch_of(&self, slot: u64) -> u64 {
        slot / self.slots_per_epoch
    }

    pub fn epoch_start_slot(&self, epoch: u64) -> u64 {
        epoch * self.slots_per_epoch
    }

    pub fn epoch_end_slot(&self, epoch: u64) -> u64 {
        (epoch + 1) * self.slots_per_epoch - 1
    }

    pub fn epoch_slots(&self, epoch: u64) -> RangeInclusive<u64> {
        self.epoch_start_slot(epoch)..=self.epoch_end_slot(epoch)
    }

    pub fn sync_period_start(&self, epoch: u64) -> u64 {
        (epoch / self.epochs_per_sync_committee_period) * self.epochs_per_sync_committee_period
    }

    /// `(from_epoch, to_epoch)` of the sync committee period covering `epoch`.
    pub fn sync_period_bounds(&self, epoch: u64) -> (u64, u64) {
        let from = self.sync_period_start(epoch);
        (from, from + self.epochs_per_sync_committee_period - 1)
    }

    fn effective_start_ms(&self, slot: u64) -> u64 {
        self.time_of(slot + self.delay_slots_to_head)
    }

    pub fn has_slot_started_at(&self, slot: u64, now_ms: u64) -> bool {
        now_ms >= self.effective_start_ms(slot)
    }

    pub fn has_slot_started(&self, slot: u64) -> bool {
        self.has_slot_started_at(slot, Self::now_ms())
    }

    pub fn has_epoch_ended_at(&self, epoch: u64, now_ms: u64) -> bool {
        self.has_slot_started_at(self.epoch_end_slot(epoch) + 1, now_ms)
    }

    pub fn has_epoch_ended(&self, epoch: u64) -> bool {
        self.has_epoch_ended_at(epoch, Self::now_ms())
    }

    /// An epoch becomes admissible one epoch before it starts, so committee
    /// fetches can run ahead of the slots themselves.
    pub fn can_process_epoch_at(&self, epoch: u64, now_ms: u64) -> bool {
        self.has_slot_started_at(self.epoch_start_slot(epoch.saturating_sub(1)), now_ms)
    }

    pub fn can_process_epoch(&self, epoch: u64) -> bool {
        self.can_process_epoch_at(epoch, Self::now_ms())
    }

    /// Suspends until the effective start of `slot`; returns immediately if
    /// it is already past.
    pub async fn wait_until_slot_start(&self, slot: u64) {
        let target_ms = self.effective_start_ms(slot);
        let now_ms = Self::now_ms();
        if now_ms >= target_ms {
            return;
        }
        tokio::time::sleep(Duration::from_millis(target_ms - now_ms)).await;
    }

    pub async fn wait_until_epoch_end(&self, epoch: u64) {
        self.wait_until_slot_start(self.epoch_end_slot(epoch) + 1).await;
    }

    /// UTC hour bucket the slot's wall-clock time falls into.
    pub fn hour_of_slot(&self, slot: u64) -> DateTime<Utc> {
        let seconds = (self.time_of(slot) / 1000) as i64;
        let hour_start = seconds - seconds.rem_euclid(3600);
        DateTime::<Utc>::from_timestamp(hour_start, 0)
            .unwrap_or_else(|| panic!("Slot {slot} maps to an unrepresentable timestamp"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{Chain, ChainInfo};

    fn gnosis_time() -> BeaconTime {
        BeaconTime::new(&Chain::Gnosis.config(), 24412640, 3)
    }

    #[test]
    fn slot_of_rejects_pre_genesis() {
        let time = gnosis_time();
        let err = time.slot_of(0).unwrap_err();
        assert!(matches!(err, Error::BeforeGenesis { .. }));
    }

    #[test]
    fn slot_of_inverts_time_of() {
        let time = gnosis_time();
        let slot = 24412640;
        assert_eq!(time.slot_of(time.time_of(slot)).unwrap(), slot);
        assert_eq!(time.slot_of(time.time_of(slot) + 4_999).unwrap(), slot);
        assert_eq!(time.slot_of(time.time_of(slot) + 5_000).unwrap(), slot + 1);
    }

    #[test]
    fn epoch_bounds() {
        let time = gnosis_time();
        assert_eq!(time.epoch_of(24412640), 1525790);
        assert_eq!(time.epoch_start_slot(1525790), 24412640);
        assert_eq!(time.epoch_end_slot(1525790), 24412655);
        assert_eq!(time.epoch_slots(1525790), 24412640..=24412655);
    }

    #[test]
    fn sync_period_bounds_cover_epoch() {
        let time = gnosis_time();
        assert_eq!(time.sync_period_start(1529346), 1529344);
        assert_eq!(time.sync_period_bounds(1529346), (1529344, 1529599));
        assert_eq!(time.sync_period_bounds(1529599), (1529344, 1529599));
        assert_eq!(time.sync_period_bounds(1529600), (1529600, 1529855));
    }

    #[test]
    fn epoch_rewards_hour_bucket() {
        // Both epochs of the hourly-fold scenario land in 2025-10-21T14:00Z.
        let time = gnosis_time();
        let hour = time.hour_of_slot(time.epoch_start_slot(1525790));
        assert_eq!(hour.to_rfc3339(), "2025-10-21T14:00:00+00:00");
        let next = time.hour_of_slot(time.epoch_start_slot(1525791));
        assert_eq!(hour, next);
    }

    #[test]
    fn slot_start_respects_head_delay() {
        let time = gnosis_time();
        let slot = 100;
        let undelayed_start = time.time_of(slot);
        assert!(!time.has_slot_started_at(slot, undelayed_start));
        let delayed_start = time.time_of(slot + 3);
        assert!(time.has_slot_started_at(slot, delayed_start));
    }

    #[test]
    fn epoch_ends_after_last_slot_plus_delay() {
        let time = gnosis_time();
        let end_slot = time.epoch_end_slot(1525790);
        assert!(!time.has_epoch_ended_at(1525790, time.time_of(end_slot + 3)));
        assert!(time.has_epoch_ended_at(1525790, time.time_of(end_slot + 4)));
    }

    #[test]
    fn epoch_admissible_one_epoch_ahead() {
        let time = gnosis_time();
        let epoch = 1525790;
        let previous_start = time.time_of(time.epoch_start_slot(epoch - 1) + 3);
        assert!(time.can_process_epoch_at(epoch, previous_start));
        assert!(!time.can_process_epoch_at(epoch + 1, previous_start));
    }
}
