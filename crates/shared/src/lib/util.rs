/// One full gwei-denominated ETH increment; effective balances move in these
/// steps and the ideal-rewards table is keyed by them.
pub const GWEI_BUCKET: u64 = 1_000_000_000;

/// Floors a gwei balance down to the effective-balance bucket it belongs to.
pub fn gwei_bucket(balance_gwei: u64) -> u64 {
    (balance_gwei / GWEI_BUCKET) * GWEI_BUCKET
}

pub fn usize_to_u64(val: usize) -> u64 {
    val.try_into()
        .unwrap_or_else(|error| panic!("Couldn't convert usize to u64: {error:?}"))
}

pub fn u64_to_i64(val: u64) -> i64 {
    val.try_into()
        .unwrap_or_else(|error| panic!("Couldn't convert u64 to i64: {error:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buckets_floor_to_whole_gwei_units() {
        assert_eq!(gwei_bucket(32_000_000_000), 32_000_000_000);
        assert_eq!(gwei_bucket(32_999_999_999), 32_000_000_000);
        assert_eq!(gwei_bucket(999_999_999), 0);
    }
}
