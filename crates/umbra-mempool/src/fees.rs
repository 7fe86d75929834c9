//! Fee and priority estimation from observed confirmation times.
//!
//! The estimator groups transactions into feerate (or coin-age priority)
//! buckets and tracks, per bucket, how many blocks each transaction took to
//! confirm, as exponentially-decayed moving averages. An estimate for a
//! confirmation target is the median value of the cheapest bucket range
//! whose transactions confirmed within the target at least 95% of the time.
//!
//! Only transactions that enter the pool at the current chain height with no
//! in-pool dependencies are tracked: anything else has a confirmation time
//! the estimator cannot attribute to its fee or priority alone.
//!
//! The pool owns one estimator and calls it while holding its lock; nothing
//! here calls back into the pool.

use std::collections::HashMap;
use std::io::{Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use umbra_core::constants::allow_free;
use umbra_core::feerate::FeeRate;
use umbra_core::types::Hash256;

use crate::entry::MempoolEntry;

/// Version of this software, recorded in the fee-estimate file envelope.
pub const CLIENT_VERSION: i32 = 1_000_000; // 1.0.0

/// Required confirmed-within-target rate for a bucket range to pass.
const MIN_SUCCESS_PCT: f64 = 0.95;

/// Decay applied to every per-bucket aggregate each block.
const DEFAULT_DECAY: f64 = 0.998;

/// Deepest confirmation horizon tracked.
const MAX_BLOCK_CONFIRMS: usize = 25;

/// Steady-state transaction count needed in a bucket range before its
/// confirmation rate is trusted, for fee and priority domains respectively.
const SUFFICIENT_FEETXS: f64 = 1.0;
const SUFFICIENT_PRITXS: f64 = 0.2;

/// Fee bucket layout: ×1.1 spacing with a catch-all top bucket.
const MIN_FEERATE: f64 = 10.0;
const MAX_FEERATE: f64 = 1e7;
const INF_FEERATE: f64 = 1e99;
const FEE_SPACING: f64 = 1.1;

/// Priority bucket layout: ×2 spacing with a catch-all top bucket.
const MIN_PRIORITY: f64 = 10.0;
const MAX_PRIORITY: f64 = 1e16;
const PRI_SPACING: f64 = 2.0;

/// Priority so high confirmation is certain; also the answer when the pool
/// is charging a minimum fee and free relay is effectively disabled.
pub const INF_PRIORITY: f64 = 1e9 * 21_000_000.0 * 100_000_000.0;

/// Failures reading or writing persisted estimator state. Callers treat
/// these as non-fatal: the pool runs fine with cold estimates.
#[derive(Error, Debug)]
pub enum EstimateFileError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("fee estimate file requires version {required}, running {running}")]
    UpVersion { required: i32, running: i32 },
    #[error("corrupt estimator state: {0}")]
    Corrupt(&'static str),
}

/// Which stats domain a tracked transaction was filed under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Domain {
    Fee,
    Priority,
}

#[derive(Clone, Copy, Debug)]
struct TrackedTx {
    height: u64,
    bucket: usize,
    domain: Domain,
}

/// Per-bucket confirmation statistics for one value domain.
#[derive(Clone, Debug)]
struct ConfirmStats {
    /// Upper bound of each bucket, ascending. The last bucket catches
    /// everything above the nominal maximum.
    buckets: Vec<f64>,
    /// conf_avg[t-1][b]: decayed count of bucket-b txs confirmed within t
    /// blocks.
    conf_avg: Vec<Vec<f64>>,
    /// Same layout, not yet folded into the averages (current block).
    cur_block_conf: Vec<Vec<u64>>,
    /// unconf_txs[h % max_confirms][b]: still-unconfirmed txs that entered
    /// at height h.
    unconf_txs: Vec<Vec<u64>>,
    /// Unconfirmed txs older than the tracked horizon.
    old_unconf_txs: Vec<u64>,
    /// Decayed tx count per bucket.
    tx_ct_avg: Vec<f64>,
    cur_block_tx_ct: Vec<u64>,
    /// Decayed value sum per bucket (median numerator).
    avg: Vec<f64>,
    cur_block_val: Vec<f64>,
    decay: f64,
}

impl ConfirmStats {
    fn new(buckets: Vec<f64>, max_confirms: usize, decay: f64) -> Self {
        let n = buckets.len();
        Self {
            buckets,
            conf_avg: vec![vec![0.0; n]; max_confirms],
            cur_block_conf: vec![vec![0; n]; max_confirms],
            unconf_txs: vec![vec![0; n]; max_confirms],
            old_unconf_txs: vec![0; n],
            tx_ct_avg: vec![0.0; n],
            cur_block_tx_ct: vec![0; n],
            avg: vec![0.0; n],
            cur_block_val: vec![0.0; n],
            decay,
        }
    }

    fn max_confirms(&self) -> usize {
        self.conf_avg.len()
    }

    /// Bucket holding `val`: the first bucket whose upper bound reaches it.
    fn bucket_index(&self, val: f64) -> usize {
        let idx = self.buckets.partition_point(|&b| b < val);
        idx.min(self.buckets.len() - 1)
    }

    /// Age the unconfirmed tracking for a new block and reset the
    /// current-block accumulators.
    fn clear_current(&mut self, height: u64) {
        let row = (height % self.unconf_txs.len() as u64) as usize;
        for b in 0..self.buckets.len() {
            self.old_unconf_txs[b] += self.unconf_txs[row][b];
            self.unconf_txs[row][b] = 0;
            for conf in &mut self.cur_block_conf {
                conf[b] = 0;
            }
            self.cur_block_tx_ct[b] = 0;
            self.cur_block_val[b] = 0.0;
        }
    }

    /// Record a confirmed transaction: it counts as confirmed-within-t for
    /// every horizon at or beyond its actual depth.
    fn record(&mut self, blocks_to_confirm: usize, val: f64) {
        if blocks_to_confirm < 1 {
            return;
        }
        let bucket = self.bucket_index(val);
        for t in blocks_to_confirm..=self.max_confirms() {
            self.cur_block_conf[t - 1][bucket] += 1;
        }
        self.cur_block_tx_ct[bucket] += 1;
        self.cur_block_val[bucket] += val;
    }

    /// Start tracking an unconfirmed transaction. Returns its bucket.
    fn new_tx(&mut self, height: u64, val: f64) -> usize {
        let bucket = self.bucket_index(val);
        let row = (height % self.unconf_txs.len() as u64) as usize;
        self.unconf_txs[row][bucket] += 1;
        bucket
    }

    /// Stop tracking an unconfirmed transaction (evicted, expired, or about
    /// to be recorded as confirmed).
    fn remove_tx(&mut self, entry_height: u64, best_seen_height: u64, bucket: usize) {
        // If we never saw a block since the tx entered, it is still in its
        // entry row regardless of age.
        let blocks_ago = best_seen_height.saturating_sub(entry_height);
        if blocks_ago as usize >= self.unconf_txs.len() {
            if self.old_unconf_txs[bucket] > 0 {
                self.old_unconf_txs[bucket] -= 1;
            } else {
                debug!(bucket, "old unconfirmed counter already zero");
            }
        } else {
            let row = (entry_height % self.unconf_txs.len() as u64) as usize;
            if self.unconf_txs[row][bucket] > 0 {
                self.unconf_txs[row][bucket] -= 1;
            } else {
                debug!(bucket, row, "unconfirmed counter already zero");
            }
        }
    }

    /// Fold the current block's observations into the decayed averages.
    fn update_moving_averages(&mut self) {
        for b in 0..self.buckets.len() {
            for t in 0..self.max_confirms() {
                self.conf_avg[t][b] =
                    self.conf_avg[t][b] * self.decay + self.cur_block_conf[t][b] as f64;
            }
            self.avg[b] = self.avg[b] * self.decay + self.cur_block_val[b];
            self.tx_ct_avg[b] = self.tx_ct_avg[b] * self.decay + self.cur_block_tx_ct[b] as f64;
        }
    }

    /// Median value over the best passing bucket range, or -1.0 if no range
    /// with sufficient data confirms within `target` blocks at
    /// `success_pct`.
    ///
    /// With `require_greater` the scan runs from the most valuable bucket
    /// downward, finding the lowest value such that everything above it
    /// passes (fee-style question). Without it the scan runs upward,
    /// finding the highest value such that everything below passes.
    fn estimate_median_val(
        &self,
        target: usize,
        sufficient: f64,
        success_pct: f64,
        require_greater: bool,
        height: u64,
    ) -> f64 {
        if target < 1 || target > self.max_confirms() {
            return -1.0;
        }
        let max_bucket = self.buckets.len() - 1;
        let bins = self.unconf_txs.len() as u64;

        let mut n_conf = 0.0;
        let mut total_num = 0.0;
        let mut extra_num: u64 = 0;

        let start: i64 = if require_greater { max_bucket as i64 } else { 0 };
        let step: i64 = if require_greater { -1 } else { 1 };

        let mut cur_near_bucket = start;
        let mut best_near_bucket = start;
        let mut cur_far_bucket = start;
        let mut best_far_bucket = start;
        let mut found_answer = false;

        let mut bucket = start;
        while (0..=max_bucket as i64).contains(&bucket) {
            let b = bucket as usize;
            cur_far_bucket = bucket;
            n_conf += self.conf_avg[target - 1][b];
            total_num += self.tx_ct_avg[b];
            for confct in target as u64..self.max_confirms() as u64 {
                if height >= confct {
                    extra_num += self.unconf_txs[((height - confct) % bins) as usize][b];
                }
            }
            extra_num += self.old_unconf_txs[b];

            // Enough data points in this range to test for success.
            if total_num >= sufficient / (1.0 - self.decay) {
                let cur_pct = n_conf / (total_num + extra_num as f64);
                if require_greater && cur_pct < success_pct {
                    break;
                }
                if !require_greater && cur_pct > success_pct {
                    break;
                }
                found_answer = true;
                n_conf = 0.0;
                total_num = 0.0;
                extra_num = 0;
                best_near_bucket = cur_near_bucket;
                best_far_bucket = cur_far_bucket;
                cur_near_bucket = bucket + step;
            }
            bucket += step;
        }

        if !found_answer {
            return -1.0;
        }

        let min_bucket = best_near_bucket.min(best_far_bucket) as usize;
        let max_bucket_hit = best_near_bucket.max(best_far_bucket) as usize;
        let mut tx_sum: f64 = (min_bucket..=max_bucket_hit)
            .map(|b| self.tx_ct_avg[b])
            .sum();
        if tx_sum == 0.0 {
            return -1.0;
        }
        tx_sum /= 2.0;
        for b in min_bucket..=max_bucket_hit {
            if self.tx_ct_avg[b] < tx_sum {
                tx_sum -= self.tx_ct_avg[b];
            } else {
                return self.avg[b] / self.tx_ct_avg[b];
            }
        }
        -1.0
    }

    fn to_snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            decay: self.decay,
            buckets: self.buckets.clone(),
            avg: self.avg.clone(),
            tx_ct_avg: self.tx_ct_avg.clone(),
            conf_avg: self.conf_avg.clone(),
        }
    }

    fn from_snapshot(snap: StatsSnapshot) -> Result<Self, EstimateFileError> {
        if !(0.0..1.0).contains(&snap.decay) || snap.decay <= 0.0 {
            return Err(EstimateFileError::Corrupt("decay out of range"));
        }
        let n = snap.buckets.len();
        if n == 0 || snap.buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(EstimateFileError::Corrupt("buckets not ascending"));
        }
        if snap.avg.len() != n || snap.tx_ct_avg.len() != n {
            return Err(EstimateFileError::Corrupt("bucket average length mismatch"));
        }
        if snap.conf_avg.is_empty() || snap.conf_avg.iter().any(|row| row.len() != n) {
            return Err(EstimateFileError::Corrupt("confirm table shape mismatch"));
        }
        let max_confirms = snap.conf_avg.len();
        let mut stats = Self::new(snap.buckets, max_confirms, snap.decay);
        stats.avg = snap.avg;
        stats.tx_ct_avg = snap.tx_ct_avg;
        stats.conf_avg = snap.conf_avg;
        Ok(stats)
    }
}

/// Persisted form of one stats domain: only the decayed averages survive a
/// restart; unconfirmed tracking starts fresh.
#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct StatsSnapshot {
    decay: f64,
    buckets: Vec<f64>,
    avg: Vec<f64>,
    tx_ct_avg: Vec<f64>,
    conf_avg: Vec<Vec<f64>>,
}

#[derive(Serialize, Deserialize, bincode::Encode, bincode::Decode)]
struct EstimatorSnapshot {
    best_seen_height: u64,
    fee_stats: StatsSnapshot,
    pri_stats: StatsSnapshot,
}

/// Block-policy fee and priority estimator.
pub struct FeeEstimator {
    best_seen_height: u64,
    min_tracked_fee: FeeRate,
    fee_stats: ConfirmStats,
    pri_stats: ConfirmStats,
    tracked: HashMap<Hash256, TrackedTx>,
}

fn fee_buckets() -> Vec<f64> {
    let mut buckets = Vec::new();
    let mut v = MIN_FEERATE;
    while v <= MAX_FEERATE {
        buckets.push(v);
        v *= FEE_SPACING;
    }
    buckets.push(INF_FEERATE);
    buckets
}

fn priority_buckets() -> Vec<f64> {
    let mut buckets = Vec::new();
    let mut v = MIN_PRIORITY;
    while v <= MAX_PRIORITY {
        buckets.push(v);
        v *= PRI_SPACING;
    }
    buckets.push(INF_PRIORITY);
    buckets
}

impl FeeEstimator {
    /// Create an estimator. `min_relay_fee` bounds which feerates are worth
    /// tracking at all: anything below it relays on priority, not fee.
    pub fn new(min_relay_fee: FeeRate) -> Self {
        let min_tracked_fee = min_relay_fee.max(FeeRate::from_per_kb(MIN_FEERATE as u64));
        Self {
            best_seen_height: 0,
            min_tracked_fee,
            fee_stats: ConfirmStats::new(fee_buckets(), MAX_BLOCK_CONFIRMS, DEFAULT_DECAY),
            pri_stats: ConfirmStats::new(priority_buckets(), MAX_BLOCK_CONFIRMS, DEFAULT_DECAY),
            tracked: HashMap::new(),
        }
    }

    fn is_priority_point(&self, fee_rate: FeeRate, priority: f64) -> bool {
        fee_rate < self.min_tracked_fee && allow_free(priority)
    }

    fn is_fee_point(&self, fee_rate: FeeRate) -> bool {
        fee_rate >= self.min_tracked_fee
    }

    /// Start tracking a transaction that just entered the pool.
    ///
    /// Skipped when the entry is already tracked, entered at a stale height,
    /// depends on other pool transactions, or when the caller is not at a
    /// current chain tip (`is_current` false while syncing).
    pub fn process_transaction(&mut self, entry: &MempoolEntry, is_current: bool) {
        let txid = entry.txid();
        if self.tracked.contains_key(&txid) {
            return;
        }
        if entry.height() != self.best_seen_height || !is_current {
            return;
        }
        if !entry.had_no_dependencies() {
            // Its confirmation waits on parents, not on its own fee.
            return;
        }
        let fee_rate = FeeRate::from_fee(entry.fee(), entry.size());
        let priority = entry.current_priority(entry.height());
        if entry.fee() == 0 || self.is_priority_point(fee_rate, priority) {
            let bucket = self.pri_stats.new_tx(entry.height(), priority);
            self.tracked.insert(
                txid,
                TrackedTx { height: entry.height(), bucket, domain: Domain::Priority },
            );
        } else if self.is_fee_point(fee_rate) {
            let bucket = self.fee_stats.new_tx(entry.height(), fee_rate.per_kb() as f64);
            self.tracked.insert(
                txid,
                TrackedTx { height: entry.height(), bucket, domain: Domain::Fee },
            );
        }
    }

    /// Forget a transaction that left the pool unconfirmed.
    pub fn remove_tx(&mut self, txid: &Hash256) {
        if let Some(t) = self.tracked.remove(txid) {
            let stats = match t.domain {
                Domain::Fee => &mut self.fee_stats,
                Domain::Priority => &mut self.pri_stats,
            };
            stats.remove_tx(t.height, self.best_seen_height, t.bucket);
        }
    }

    /// Record a connected block and the pool entries it confirmed.
    ///
    /// Must be called before those entries are erased from the pool, with
    /// copies of their entry state.
    pub fn process_block(&mut self, height: u64, entries: &[MempoolEntry], is_current: bool) {
        if height <= self.best_seen_height {
            // Duplicate or out-of-order notification (e.g. mid-reorg).
            return;
        }
        self.best_seen_height = height;
        if !is_current {
            return;
        }
        self.fee_stats.clear_current(height);
        self.pri_stats.clear_current(height);
        for entry in entries {
            self.process_block_tx(height, entry);
        }
        self.fee_stats.update_moving_averages();
        self.pri_stats.update_moving_averages();
        debug!(height, confirmed = entries.len(), "processed block for fee estimates");
    }

    fn process_block_tx(&mut self, height: u64, entry: &MempoolEntry) {
        let Some(t) = self.tracked.remove(&entry.txid()) else {
            // Not something we were tracking.
            return;
        };
        let stats = match t.domain {
            Domain::Fee => &mut self.fee_stats,
            Domain::Priority => &mut self.pri_stats,
        };
        stats.remove_tx(t.height, height, t.bucket);

        if height <= entry.height() {
            return;
        }
        let blocks_to_confirm = (height - entry.height()) as usize;
        let fee_rate = FeeRate::from_fee(entry.fee(), entry.size());
        let priority = entry.current_priority(height);
        if entry.fee() == 0 || self.is_priority_point(fee_rate, priority) {
            self.pri_stats.record(blocks_to_confirm, priority);
        } else if self.is_fee_point(fee_rate) {
            self.fee_stats.record(blocks_to_confirm, fee_rate.per_kb() as f64);
        }
    }

    /// Feerate expected to confirm within `target` blocks, if the data
    /// supports an answer at exactly that horizon.
    pub fn estimate_fee(&self, target: usize) -> Option<FeeRate> {
        let median = self.fee_stats.estimate_median_val(
            target,
            SUFFICIENT_FEETXS,
            MIN_SUCCESS_PCT,
            true,
            self.best_seen_height,
        );
        if median < 0.0 {
            None
        } else {
            Some(FeeRate::from_per_kb(median as u64))
        }
    }

    /// Like [`estimate_fee`](Self::estimate_fee) but scans deeper horizons
    /// until one is answerable, and never answers below the pool's current
    /// minimum fee. Returns the estimate and the horizon it was found at.
    pub fn estimate_smart_fee(
        &self,
        target: usize,
        min_pool_fee: FeeRate,
    ) -> (Option<FeeRate>, usize) {
        let mut horizon = target.max(1);
        let mut median = -1.0;
        while median < 0.0 && horizon <= self.fee_stats.max_confirms() {
            median = self.fee_stats.estimate_median_val(
                horizon,
                SUFFICIENT_FEETXS,
                MIN_SUCCESS_PCT,
                true,
                self.best_seen_height,
            );
            if median < 0.0 {
                horizon += 1;
            }
        }
        let found_at = horizon.min(self.fee_stats.max_confirms());
        if min_pool_fee > FeeRate::ZERO && (min_pool_fee.per_kb() as f64) > median {
            return (Some(min_pool_fee), found_at);
        }
        if median < 0.0 {
            (None, found_at)
        } else {
            (Some(FeeRate::from_per_kb(median as u64)), found_at)
        }
    }

    /// Coin-age priority expected to confirm within `target` blocks.
    pub fn estimate_priority(&self, target: usize) -> Option<f64> {
        let median = self.pri_stats.estimate_median_val(
            target,
            SUFFICIENT_PRITXS,
            MIN_SUCCESS_PCT,
            true,
            self.best_seen_height,
        );
        if median < 0.0 { None } else { Some(median) }
    }

    /// Like [`estimate_priority`](Self::estimate_priority) but scans deeper
    /// horizons, and answers [`INF_PRIORITY`] when the pool is charging a
    /// minimum fee (free relay is effectively off, so no finite priority
    /// suffices).
    pub fn estimate_smart_priority(
        &self,
        target: usize,
        min_pool_fee: FeeRate,
    ) -> (Option<f64>, usize) {
        if min_pool_fee > FeeRate::ZERO {
            return (Some(INF_PRIORITY), target.max(1));
        }
        let mut horizon = target.max(1);
        let mut median = -1.0;
        while median < 0.0 && horizon <= self.pri_stats.max_confirms() {
            median = self.pri_stats.estimate_median_val(
                horizon,
                SUFFICIENT_PRITXS,
                MIN_SUCCESS_PCT,
                true,
                self.best_seen_height,
            );
            if median < 0.0 {
                horizon += 1;
            }
        }
        let found_at = horizon.min(self.pri_stats.max_confirms());
        if median < 0.0 { (None, found_at) } else { (Some(median), found_at) }
    }

    /// Serialize the decayed averages. Unconfirmed tracking is not
    /// persisted.
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<(), EstimateFileError> {
        let snapshot = EstimatorSnapshot {
            best_seen_height: self.best_seen_height,
            fee_stats: self.fee_stats.to_snapshot(),
            pri_stats: self.pri_stats.to_snapshot(),
        };
        bincode::encode_into_std_write(&snapshot, writer, bincode::config::standard())?;
        Ok(())
    }

    /// Replace this estimator's averages with previously written state.
    pub fn read<R: Read>(
        &mut self,
        reader: &mut R,
        _writer_version: i32,
    ) -> Result<(), EstimateFileError> {
        let snapshot: EstimatorSnapshot =
            bincode::decode_from_std_read(reader, bincode::config::standard())?;
        let fee_stats = ConfirmStats::from_snapshot(snapshot.fee_stats)?;
        let pri_stats = ConfirmStats::from_snapshot(snapshot.pri_stats)?;
        self.best_seen_height = snapshot.best_seen_height;
        self.fee_stats = fee_stats;
        self.pri_stats = pri_stats;
        self.tracked.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use umbra_core::constants::allow_free_threshold;
    use umbra_core::types::{OutPoint, Transaction, TxInput, TxOutput};

    fn make_entry(seq: u64, height: u64, fee: u64, priority: f64) -> MempoolEntry {
        let tx = Arc::new(Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::new(Hash256([7; 32]), seq),
                signature: vec![0u8; 64],
                public_key: vec![0u8; 32],
            }],
            outputs: vec![TxOutput {
                value: 1_000_000,
                pubkey_hash: Hash256([(seq % 251) as u8; 32]),
            }],
            lock_time: seq,
            shielded: None,
        });
        MempoolEntry::new(tx, fee, 1000 + seq as i64, priority, height, true, 0, false, 1)
    }

    /// Drive `blocks` blocks through the estimator, `per_block` transactions
    /// each, all paying `fee`, each confirming in the next block.
    fn simulate_fee_traffic(est: &mut FeeEstimator, blocks: u64, per_block: u64, fee: u64) {
        let mut seq = 0u64;
        let mut pending: Vec<MempoolEntry> = Vec::new();
        for height in 1..=blocks {
            est.process_block(height, &pending, true);
            pending.clear();
            for _ in 0..per_block {
                seq += 1;
                let entry = make_entry(seq, height, fee, 0.0);
                est.process_transaction(&entry, true);
                pending.push(entry);
            }
        }
    }

    #[test]
    fn bucket_index_boundaries() {
        let stats = ConfirmStats::new(vec![10.0, 20.0, 40.0], 5, DEFAULT_DECAY);
        assert_eq!(stats.bucket_index(0.0), 0);
        assert_eq!(stats.bucket_index(10.0), 0);
        assert_eq!(stats.bucket_index(10.1), 1);
        assert_eq!(stats.bucket_index(40.0), 2);
        // Above every bound lands in the top bucket.
        assert_eq!(stats.bucket_index(1e12), 2);
    }

    #[test]
    fn no_data_no_estimate() {
        let est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        assert!(est.estimate_fee(1).is_none());
        assert!(est.estimate_priority(1).is_none());
    }

    #[test]
    fn out_of_range_target_no_estimate() {
        let mut est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        simulate_fee_traffic(&mut est, 100, 10, 50_000);
        assert!(est.estimate_fee(0).is_none());
        assert!(est.estimate_fee(MAX_BLOCK_CONFIRMS + 1).is_none());
    }

    #[test]
    fn steady_traffic_produces_fee_estimate() {
        let mut est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        // ~193-byte txs paying 50000 umbrites: ~259k umbrites/kB.
        simulate_fee_traffic(&mut est, 120, 10, 50_000);
        let rate = est.estimate_fee(2).expect("sufficient data");
        let seen = FeeRate::from_fee(50_000, make_entry(1, 1, 50_000, 0.0).size());
        // The answer is the median of a geometric bucket, so allow spacing
        // slack around the true rate.
        assert!(rate.per_kb() as f64 > seen.per_kb() as f64 / FEE_SPACING.powi(2));
        assert!((rate.per_kb() as f64) < seen.per_kb() as f64 * FEE_SPACING.powi(2));
    }

    #[test]
    fn smart_fee_scans_horizons() {
        let mut est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        simulate_fee_traffic(&mut est, 120, 10, 50_000);
        let (rate, found_at) = est.estimate_smart_fee(1, FeeRate::ZERO);
        assert!(rate.is_some());
        assert!(found_at >= 1);
    }

    #[test]
    fn smart_fee_floors_at_pool_minimum() {
        let est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        let floor = FeeRate::from_per_kb(77_000);
        let (rate, _) = est.estimate_smart_fee(1, floor);
        assert_eq!(rate, Some(floor));
    }

    #[test]
    fn smart_priority_infinite_under_min_fee() {
        let est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        let (pri, _) = est.estimate_smart_priority(2, FeeRate::from_per_kb(1));
        assert_eq!(pri, Some(INF_PRIORITY));
    }

    #[test]
    fn zero_fee_transactions_feed_priority_stats() {
        let mut est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        let pri = allow_free_threshold() * 10.0;
        let mut seq = 0u64;
        let mut pending: Vec<MempoolEntry> = Vec::new();
        for height in 1..=150u64 {
            est.process_block(height, &pending, true);
            pending.clear();
            for _ in 0..10 {
                seq += 1;
                let entry = make_entry(seq, height, 0, pri);
                est.process_transaction(&entry, true);
                pending.push(entry);
            }
        }
        let estimate = est.estimate_priority(2).expect("sufficient data");
        assert!(estimate > 0.0);
    }

    #[test]
    fn stale_height_not_tracked() {
        let mut est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        simulate_fee_traffic(&mut est, 10, 1, 50_000);
        // Entry claims height 3 while best seen is 10: ignored.
        let entry = make_entry(9999, 3, 50_000, 0.0);
        est.process_transaction(&entry, true);
        assert!(!est.tracked.contains_key(&entry.txid()));
    }

    #[test]
    fn dependent_entries_not_tracked() {
        let mut est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        est.process_block(1, &[], true);
        let tx = make_entry(1, 1, 50_000, 0.0);
        let dependent = MempoolEntry::new(
            tx.tx_handle().clone(),
            50_000,
            1000,
            0.0,
            1,
            false, // has in-pool dependencies
            0,
            false,
            1,
        );
        est.process_transaction(&dependent, true);
        assert!(est.tracked.is_empty());
    }

    #[test]
    fn remove_tx_forgets() {
        let mut est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        est.process_block(1, &[], true);
        let entry = make_entry(1, 1, 50_000, 0.0);
        est.process_transaction(&entry, true);
        assert_eq!(est.tracked.len(), 1);
        est.remove_tx(&entry.txid());
        assert!(est.tracked.is_empty());
        // Second removal is a no-op.
        est.remove_tx(&entry.txid());
    }

    #[test]
    fn old_blocks_ignored() {
        let mut est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        simulate_fee_traffic(&mut est, 20, 5, 50_000);
        assert_eq!(est.best_seen_height, 20);
        est.process_block(15, &[], true);
        assert_eq!(est.best_seen_height, 20);
    }

    #[test]
    fn write_read_round_trip() {
        let mut est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        simulate_fee_traffic(&mut est, 120, 10, 50_000);
        let before = est.estimate_fee(2);
        assert!(before.is_some());

        let mut buf = Vec::new();
        est.write(&mut buf).unwrap();

        let mut fresh = FeeEstimator::new(FeeRate::from_per_kb(1000));
        fresh.read(&mut buf.as_slice(), CLIENT_VERSION).unwrap();
        assert_eq!(fresh.estimate_fee(2), before);
        assert_eq!(fresh.best_seen_height, est.best_seen_height);
    }

    #[test]
    fn read_rejects_garbage() {
        let mut est = FeeEstimator::new(FeeRate::from_per_kb(1000));
        let garbage = vec![0xFFu8; 16];
        assert!(est.read(&mut garbage.as_slice(), CLIENT_VERSION).is_err());
    }
}
