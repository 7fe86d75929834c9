//! Protocol constants. All monetary values in umbrites (1 UMB = 10^8 umbrites).

pub const COIN: u64 = 100_000_000;

/// Confirmations a coinbase or coinstake output needs before it can be spent.
pub const COINBASE_MATURITY: u64 = 100;

/// Lock-time values below this are block heights; above, unix timestamps.
pub const LOCKTIME_THRESHOLD: u64 = 500_000_000;

/// Fake height marking coins that exist only in the memory pool.
pub const MEMPOOL_HEIGHT: u64 = 0x7FFF_FFFF;

/// Default minimum relay feerate in umbrites per kB. Transactions below this
/// need enough coin-age priority to relay for free.
pub const DEFAULT_MIN_RELAY_FEE: u64 = 10_000;

/// Coin-age priority above which a transaction may relay with zero fee.
///
/// One day of age on one coin, per 250 bytes.
pub fn allow_free_threshold() -> f64 {
    COIN as f64 * 1440.0 / 250.0
}

/// Whether the given priority qualifies for free relay.
pub fn allow_free(priority: f64) -> bool {
    priority > allow_free_threshold()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_threshold_boundary() {
        assert!(!allow_free(allow_free_threshold()));
        assert!(allow_free(allow_free_threshold() + 1.0));
    }

    #[test]
    fn locktime_threshold_is_below_modern_timestamps() {
        // 500M seconds is in 1985; any live timestamp sorts as time-based.
        assert!(LOCKTIME_THRESHOLD < 1_700_000_000);
    }
}
