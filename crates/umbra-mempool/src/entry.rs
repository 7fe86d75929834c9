//! One pooled transaction plus its pool-computed metrics.
//!
//! A [`MempoolEntry`] stores data about the corresponding transaction and
//! about all in-pool transactions that depend on it ("descendants") or that
//! it depends on ("ancestors"). The scalar fields are fixed at construction;
//! the aggregate fields are maintained exclusively by the pool as relatives
//! are added and removed, and are always exact sums over the current in-pool
//! relative set plus the entry itself.

use std::sync::Arc;

use umbra_core::types::{Hash256, Transaction};

/// Approximate per-entry heap overhead beyond the transaction bytes: the
/// `Arc` allocation, vector headers, and index bookkeeping.
const ENTRY_OVERHEAD: usize = 256;

/// A transaction in the pool, with cached metrics and aggregate state.
#[derive(Clone, Debug)]
pub struct MempoolEntry {
    tx: Arc<Transaction>,
    txid: Hash256,
    fee: u64,
    size: usize,
    modified_size: usize,
    usage: usize,
    is_shielded: bool,
    time: i64,
    entry_priority: f64,
    entry_height: u64,
    had_no_dependencies: bool,
    in_chain_input_value: u64,
    spends_coinbase_or_coinstake: bool,
    sigop_count: u64,
    /// Manual adjustment applied by the prioritisation overlay.
    fee_delta: i64,

    // Aggregates over this entry plus its in-pool descendants. If we remove
    // this entry we must remove all of them as well.
    count_with_descendants: u64,
    size_with_descendants: u64,
    mod_fees_with_descendants: i64,

    // Analogous aggregates over in-pool ancestors.
    count_with_ancestors: u64,
    size_with_ancestors: u64,
    mod_fees_with_ancestors: i64,
    sigops_with_ancestors: u64,
}

impl MempoolEntry {
    /// Build an entry for a fully validated transaction.
    ///
    /// `entry_priority` is the coin-age priority at entry time,
    /// `in_chain_input_value` the total value of inputs already confirmed
    /// on-chain (only those age), and `had_no_dependencies` whether the pool
    /// held none of this transaction's inputs at entry.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx: Arc<Transaction>,
        fee: u64,
        time: i64,
        entry_priority: f64,
        entry_height: u64,
        had_no_dependencies: bool,
        in_chain_input_value: u64,
        spends_coinbase_or_coinstake: bool,
        sigop_count: u64,
    ) -> Self {
        let txid = tx.txid();
        let size = tx.serialized_size();
        let modified_size = tx.modified_size(size);
        let is_shielded = tx.is_shielded();

        if let Some(value_out) = tx.total_output_value() {
            debug_assert!(in_chain_input_value <= value_out.saturating_add(fee));
        }

        Self {
            tx,
            txid,
            fee,
            size,
            modified_size,
            usage: ENTRY_OVERHEAD + size,
            is_shielded,
            time,
            entry_priority,
            entry_height,
            had_no_dependencies,
            in_chain_input_value,
            spends_coinbase_or_coinstake,
            sigop_count,
            fee_delta: 0,
            count_with_descendants: 1,
            size_with_descendants: size as u64,
            mod_fees_with_descendants: fee as i64,
            count_with_ancestors: 1,
            size_with_ancestors: size as u64,
            mod_fees_with_ancestors: fee as i64,
            sigops_with_ancestors: sigop_count,
        }
    }

    pub fn tx(&self) -> &Transaction {
        &self.tx
    }

    /// Shared handle to the transaction body.
    pub fn tx_handle(&self) -> &Arc<Transaction> {
        &self.tx
    }

    pub fn txid(&self) -> Hash256 {
        self.txid
    }

    pub fn fee(&self) -> u64 {
        self.fee
    }

    /// Base fee plus the prioritisation overlay's delta.
    pub fn modified_fee(&self) -> i64 {
        self.fee as i64 + self.fee_delta
    }

    pub fn fee_delta(&self) -> i64 {
        self.fee_delta
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn time(&self) -> i64 {
        self.time
    }

    pub fn height(&self) -> u64 {
        self.entry_height
    }

    pub fn is_shielded(&self) -> bool {
        self.is_shielded
    }

    /// Whether the pool held none of this transaction's inputs at entry.
    pub fn had_no_dependencies(&self) -> bool {
        self.had_no_dependencies
    }

    pub fn spends_coinbase_or_coinstake(&self) -> bool {
        self.spends_coinbase_or_coinstake
    }

    pub fn sigop_count(&self) -> u64 {
        self.sigop_count
    }

    /// Heap usage estimate for this entry.
    pub fn dynamic_usage(&self) -> usize {
        self.usage
    }

    /// Lower bound on the current coin-age priority: only inputs that were
    /// in-chain at entry accrue age.
    pub fn current_priority(&self, current_height: u64) -> f64 {
        if self.modified_size == 0 {
            return self.entry_priority;
        }
        let aged_blocks = current_height.saturating_sub(self.entry_height) as f64;
        let delta = aged_blocks * self.in_chain_input_value as f64 / self.modified_size as f64;
        let result = self.entry_priority + delta;
        if result < 0.0 { 0.0 } else { result }
    }

    pub fn count_with_descendants(&self) -> u64 {
        self.count_with_descendants
    }

    pub fn size_with_descendants(&self) -> u64 {
        self.size_with_descendants
    }

    pub fn mod_fees_with_descendants(&self) -> i64 {
        self.mod_fees_with_descendants
    }

    pub fn count_with_ancestors(&self) -> u64 {
        self.count_with_ancestors
    }

    pub fn size_with_ancestors(&self) -> u64 {
        self.size_with_ancestors
    }

    pub fn mod_fees_with_ancestors(&self) -> i64 {
        self.mod_fees_with_ancestors
    }

    pub fn sigops_with_ancestors(&self) -> u64 {
        self.sigops_with_ancestors
    }

    /// Adjust the descendant aggregates. The result must still cover the
    /// entry itself.
    pub(crate) fn update_descendant_state(
        &mut self,
        modify_size: i64,
        modify_fee: i64,
        modify_count: i64,
    ) {
        self.size_with_descendants = (self.size_with_descendants as i64 + modify_size) as u64;
        assert!(self.size_with_descendants >= self.size as u64);
        self.mod_fees_with_descendants += modify_fee;
        self.count_with_descendants = (self.count_with_descendants as i64 + modify_count) as u64;
        assert!(self.count_with_descendants >= 1);
    }

    /// Adjust the ancestor aggregates. The result must still cover the
    /// entry itself.
    pub(crate) fn update_ancestor_state(
        &mut self,
        modify_size: i64,
        modify_fee: i64,
        modify_count: i64,
        modify_sigops: i64,
    ) {
        self.size_with_ancestors = (self.size_with_ancestors as i64 + modify_size) as u64;
        assert!(self.size_with_ancestors >= self.size as u64);
        self.mod_fees_with_ancestors += modify_fee;
        self.count_with_ancestors = (self.count_with_ancestors as i64 + modify_count) as u64;
        assert!(self.count_with_ancestors >= 1);
        self.sigops_with_ancestors =
            (self.sigops_with_ancestors as i64 + modify_sigops) as u64;
    }

    /// Replace the prioritisation fee delta, folding the change into both
    /// package aggregates (this entry is a member of both of its own
    /// packages).
    pub(crate) fn update_fee_delta(&mut self, new_delta: i64) {
        let change = new_delta - self.fee_delta;
        self.mod_fees_with_descendants += change;
        self.mod_fees_with_ancestors += change;
        self.fee_delta = new_delta;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use umbra_core::types::{OutPoint, TxInput, TxOutput};

    fn make_entry(fee: u64, entry_priority: f64, in_chain_value: u64) -> MempoolEntry {
        let tx = Arc::new(Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::new(Hash256([1; 32]), 0),
                signature: vec![0u8; 64],
                public_key: vec![0u8; 32],
            }],
            outputs: vec![TxOutput {
                value: 1_000_000,
                pubkey_hash: Hash256([2; 32]),
            }],
            lock_time: 0,
            shielded: None,
        });
        MempoolEntry::new(tx, fee, 1000, entry_priority, 100, true, in_chain_value, false, 2)
    }

    #[test]
    fn new_entry_aggregates_cover_self() {
        let entry = make_entry(500, 0.0, 0);
        assert_eq!(entry.count_with_descendants(), 1);
        assert_eq!(entry.count_with_ancestors(), 1);
        assert_eq!(entry.size_with_descendants(), entry.size() as u64);
        assert_eq!(entry.size_with_ancestors(), entry.size() as u64);
        assert_eq!(entry.mod_fees_with_descendants(), 500);
        assert_eq!(entry.mod_fees_with_ancestors(), 500);
        assert_eq!(entry.sigops_with_ancestors(), 2);
    }

    #[test]
    fn txid_matches_transaction() {
        let entry = make_entry(500, 0.0, 0);
        assert_eq!(entry.txid(), entry.tx().txid());
    }

    #[test]
    fn modified_fee_tracks_delta() {
        let mut entry = make_entry(100, 0.0, 0);
        assert_eq!(entry.modified_fee(), 100);
        entry.update_fee_delta(5000);
        assert_eq!(entry.modified_fee(), 5100);
        assert_eq!(entry.mod_fees_with_descendants(), 5100);
        assert_eq!(entry.mod_fees_with_ancestors(), 5100);
        // Replacing the delta folds only the change.
        entry.update_fee_delta(2000);
        assert_eq!(entry.modified_fee(), 2100);
        assert_eq!(entry.mod_fees_with_descendants(), 2100);
    }

    #[test]
    fn negative_delta_allowed() {
        let mut entry = make_entry(100, 0.0, 0);
        entry.update_fee_delta(-150);
        assert_eq!(entry.modified_fee(), -50);
    }

    #[test]
    fn descendant_state_update() {
        let mut entry = make_entry(500, 0.0, 0);
        entry.update_descendant_state(150, 300, 1);
        assert_eq!(entry.count_with_descendants(), 2);
        assert_eq!(entry.size_with_descendants(), entry.size() as u64 + 150);
        assert_eq!(entry.mod_fees_with_descendants(), 800);
        entry.update_descendant_state(-150, -300, -1);
        assert_eq!(entry.count_with_descendants(), 1);
    }

    #[test]
    #[should_panic]
    fn descendant_count_cannot_drop_below_self() {
        let mut entry = make_entry(500, 0.0, 0);
        entry.update_descendant_state(0, 0, -1);
    }

    #[test]
    fn ancestor_state_update() {
        let mut entry = make_entry(500, 0.0, 0);
        entry.update_ancestor_state(200, 1000, 1, 3);
        assert_eq!(entry.count_with_ancestors(), 2);
        assert_eq!(entry.size_with_ancestors(), entry.size() as u64 + 200);
        assert_eq!(entry.mod_fees_with_ancestors(), 1500);
        assert_eq!(entry.sigops_with_ancestors(), 5);
    }

    #[test]
    fn priority_ages_with_height() {
        let entry = make_entry(0, 10.0, 1_000_000);
        let at_entry = entry.current_priority(100);
        assert_eq!(at_entry, 10.0);
        let later = entry.current_priority(110);
        assert!(later > at_entry);
        // Height below entry height does not go negative.
        assert!(entry.current_priority(0) >= 0.0);
    }

    #[test]
    fn usage_exceeds_size() {
        let entry = make_entry(500, 0.0, 0);
        assert!(entry.dynamic_usage() > entry.size());
    }
}
