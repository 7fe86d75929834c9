//! The transaction pool: primary entry arena, dependency graph, spend and
//! nullifier indices, and the insertion/removal protocols that keep every
//! aggregate exact.
//!
//! All state is guarded by one `parking_lot::Mutex` inside [`Mempool`].
//! Public methods lock once for their full duration; internal helpers work
//! on the already-locked [`PoolInner`] and never re-acquire, so no recursive
//! locking is needed. Callers never observe a partially updated graph.
//!
//! Index design: the entry map owns the data; the entry-time and
//! descendant-score orderings are `BTreeSet`s of `(key, txid)` pairs kept in
//! sync on every aggregate mutation; parent/child links are sets of txids
//! resolved through the entry map on traversal. The spend index is a
//! `BTreeMap` so all spenders of one transaction's outputs are a range scan.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::io::{Read, Write};
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use umbra_core::coins::CoinsView;
use umbra_core::constants::{COINBASE_MATURITY, DEFAULT_MIN_RELAY_FEE};
use umbra_core::feerate::FeeRate;
use umbra_core::types::{Hash256, OutPoint, Transaction};

use crate::entry::MempoolEntry;
use crate::error::MempoolError;
use crate::fees::{FeeEstimator, CLIENT_VERSION};

/// Default memory ceiling for the pool (300 MB).
pub const DEFAULT_MAX_MEMORY_BYTES: usize = 300 * 1024 * 1024;

/// Rolling-fee decay half-life in seconds.
pub const ROLLING_FEE_HALFLIFE: i64 = 60 * 60 * 12;

/// Occupancy thresholds (as divisors of the size limit) below which the
/// rolling-fee half-life is shortened, and the shortening factors. Policy
/// constants, not invariants.
const QUARTER_OCCUPANCY_DIVISOR: usize = 4;
const HALF_OCCUPANCY_DIVISOR: usize = 2;

/// Fixed-point precision for descendant-score index keys.
const SCORE_PRECISION: u128 = 1_000_000;

/// Approximate heap usage of one parent/child link set element.
const LINK_USAGE: usize = 40;

/// Approximate per-row heap usage of the auxiliary indices.
const SPEND_INDEX_ROW_USAGE: usize = 64;
const NULLIFIER_ROW_USAGE: usize = 80;
const DELTA_ROW_USAGE: usize = 56;
const TIME_INDEX_ROW_USAGE: usize = 48;
const SCORE_INDEX_ROW_USAGE: usize = 48;

/// Per-entry overhead of the primary map beyond the entry itself.
const ENTRY_MAP_OVERHEAD: usize = 15 * mem::size_of::<usize>();

/// Why an entry left the pool. Passed to the event sink and the removal
/// protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RemovalReason {
    /// Manually removed.
    Unknown,
    /// Older than the expiry cutoff.
    Expiry,
    /// Evicted while trimming to the size limit.
    SizeLimit,
    /// Invalidated by a chain reorganization.
    Reorg,
    /// Confirmed in a connected block.
    Block,
    /// Conflicts with a transaction in a connected block.
    Conflict,
}

impl std::fmt::Display for RemovalReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unknown => "unknown",
            Self::Expiry => "expiry",
            Self::SizeLimit => "size limit",
            Self::Reorg => "reorg",
            Self::Block => "block",
            Self::Conflict => "conflict",
        };
        f.write_str(s)
    }
}

/// Synchronous observer of pool membership changes, called at the same
/// points the insertion and removal protocols commit them.
pub trait MempoolEvents: Send {
    fn on_added(&self, _tx: &Arc<Transaction>) {}
    fn on_removed(&self, _tx: &Arc<Transaction>, _reason: RemovalReason) {}
}

/// Package limits enforced while computing the ancestor set of a candidate
/// transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AncestorLimits {
    /// Maximum in-pool ancestors (candidate included).
    pub max_ancestor_count: u64,
    /// Maximum total size of the candidate plus its ancestors, in bytes.
    pub max_ancestor_size: u64,
    /// Maximum descendants any ancestor may end up with.
    pub max_descendant_count: u64,
    /// Maximum descendant-package size any ancestor may end up with.
    pub max_descendant_size: u64,
}

impl AncestorLimits {
    /// No limits; used for internal full walks.
    pub const fn unbounded() -> Self {
        Self {
            max_ancestor_count: u64::MAX,
            max_ancestor_size: u64::MAX,
            max_descendant_count: u64::MAX,
            max_descendant_size: u64::MAX,
        }
    }
}

impl Default for AncestorLimits {
    fn default() -> Self {
        Self {
            max_ancestor_count: 25,
            max_ancestor_size: 101_000,
            max_descendant_count: 25,
            max_descendant_size: 101_000,
        }
    }
}

/// Snapshot of one pooled transaction for external consumers.
#[derive(Clone, Debug)]
pub struct TxMempoolInfo {
    /// The transaction itself.
    pub tx: Arc<Transaction>,
    /// Time it entered the pool.
    pub time: i64,
    /// Feerate from its base fee and size.
    pub fee_rate: FeeRate,
    /// Prioritisation overlay delta in effect.
    pub fee_delta: i64,
}

#[derive(Default, Clone)]
struct TxLinks {
    parents: BTreeSet<Hash256>,
    children: BTreeSet<Hash256>,
}

/// Descendant-score index key: package feerate in fixed-point, tie-broken
/// by txid. The front of the index is the least fee-efficient package.
fn descendant_score_key(entry: &MempoolEntry) -> (u64, Hash256) {
    let fees = entry.mod_fees_with_descendants().max(0) as u128;
    let size = entry.size_with_descendants().max(1) as u128;
    let rate = (fees * SCORE_PRECISION / size).min(u64::MAX as u128) as u64;
    (rate, entry.txid())
}

/// Depth-and-score ordering: parents before children (ancestor count
/// ascending), then modified feerate descending, txid tie-break.
fn cmp_depth_and_score(a: &MempoolEntry, b: &MempoolEntry) -> std::cmp::Ordering {
    a.count_with_ancestors()
        .cmp(&b.count_with_ancestors())
        .then_with(|| cmp_score(a, b))
}

/// Modified-feerate ordering, descending, without division.
fn cmp_score(a: &MempoolEntry, b: &MempoolEntry) -> std::cmp::Ordering {
    let f1 = a.modified_fee() as i128 * b.size() as i128;
    let f2 = b.modified_fee() as i128 * a.size() as i128;
    f2.cmp(&f1).then_with(|| b.txid().cmp(&a.txid()))
}

struct PoolInner {
    /// Primary arena: txid -> entry.
    entries: HashMap<Hash256, MempoolEntry>,
    /// Direct parent/child adjacency, maintained in lockstep with the spend
    /// index; no dangling ids tolerated.
    links: HashMap<Hash256, TxLinks>,
    /// Spent outpoint -> spending txid. Exactly one spender per outpoint.
    by_spent_outpoint: BTreeMap<OutPoint, Hash256>,
    /// Spent shielded nullifier -> spending txid.
    nullifiers: HashMap<Hash256, Hash256>,
    /// Entry-time ordering for expiry prefix scans.
    by_entry_time: BTreeSet<(i64, Hash256)>,
    /// Descendant-score ordering for eviction.
    by_descendant_score: BTreeSet<(u64, Hash256)>,
    /// Prioritisation overlay: txid -> (priority delta, fee delta).
    /// Independent of pool membership.
    deltas: HashMap<Hash256, (f64, i64)>,
    estimator: FeeEstimator,
    events: Option<Box<dyn MempoolEvents>>,

    min_reasonable_relay_fee: FeeRate,
    max_memory_bytes: usize,
    total_tx_size: u64,
    /// Heap usage of entries and link sets (not the container shells).
    cached_inner_usage: usize,
    transactions_updated: u64,
    /// Probability that a `check` call actually runs.
    check_frequency: f64,

    rolling_minimum_fee_rate: f64,
    last_rolling_fee_update: i64,
    block_since_last_rolling_fee_bump: bool,

    is_loaded: bool,
    mock_time: Option<i64>,
}

impl PoolInner {
    fn now(&self) -> i64 {
        self.mock_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp())
    }

    fn link(&self, txid: &Hash256) -> &TxLinks {
        self.links
            .get(txid)
            .expect("links missing for pooled entry")
    }

    fn entry(&self, txid: &Hash256) -> &MempoolEntry {
        self.entries
            .get(txid)
            .expect("entry missing from pool arena")
    }

    /// Mutate an entry, keeping the descendant-score index in sync.
    fn modify_entry(&mut self, txid: &Hash256, f: impl FnOnce(&mut MempoolEntry)) {
        let entry = self
            .entries
            .get_mut(txid)
            .expect("modify of nonexistent mempool entry");
        let old_key = descendant_score_key(entry);
        f(entry);
        let new_key = descendant_score_key(entry);
        if new_key != old_key {
            self.by_descendant_score.remove(&old_key);
            self.by_descendant_score.insert(new_key);
        }
    }

    fn update_parent(&mut self, child: Hash256, parent: Hash256, add: bool) {
        let links = self
            .links
            .get_mut(&child)
            .expect("links missing for child entry");
        if add {
            if links.parents.insert(parent) {
                self.cached_inner_usage += LINK_USAGE;
            }
        } else if links.parents.remove(&parent) {
            self.cached_inner_usage -= LINK_USAGE;
        }
    }

    fn update_child(&mut self, parent: Hash256, child: Hash256, add: bool) {
        let links = self
            .links
            .get_mut(&parent)
            .expect("links missing for parent entry");
        if add {
            if links.children.insert(child) {
                self.cached_inner_usage += LINK_USAGE;
            }
        } else if links.children.remove(&child) {
            self.cached_inner_usage -= LINK_USAGE;
        }
    }

    /// Full transitive ancestor set reachable through the link graph, not
    /// including the seeds' descendant-of-interest itself.
    fn ancestors_unbounded(&self, seed: BTreeSet<Hash256>) -> BTreeSet<Hash256> {
        let mut ancestors = BTreeSet::new();
        let mut stage = seed;
        while let Some(txid) = stage.pop_first() {
            if ancestors.insert(txid) {
                for parent in &self.link(&txid).parents {
                    if !ancestors.contains(parent) {
                        stage.insert(*parent);
                    }
                }
            }
        }
        ancestors
    }

    /// Limit-checked ancestor walk. `seed` holds the candidate's direct
    /// in-pool parents; `entry_size` its own size. On success the full
    /// ancestor set is returned; on failure the partial result is dropped.
    fn ancestors_limited(
        &self,
        seed: BTreeSet<Hash256>,
        entry_size: u64,
        limits: &AncestorLimits,
    ) -> Result<BTreeSet<Hash256>, MempoolError> {
        let mut parents = seed;
        let mut ancestors: BTreeSet<Hash256> = BTreeSet::new();
        let mut total_size = entry_size;

        while let Some(stage) = parents.pop_first() {
            ancestors.insert(stage);
            let stage_entry = self.entry(&stage);
            total_size += stage_entry.size() as u64;

            if stage_entry.size_with_descendants() + entry_size > limits.max_descendant_size {
                return Err(MempoolError::DescendantSizeLimit {
                    txid: stage.to_string(),
                    limit: limits.max_descendant_size,
                });
            } else if stage_entry.count_with_descendants() + 1 > limits.max_descendant_count {
                return Err(MempoolError::TooManyDescendants {
                    txid: stage.to_string(),
                    limit: limits.max_descendant_count,
                });
            } else if total_size > limits.max_ancestor_size {
                return Err(MempoolError::AncestorSizeLimit {
                    limit: limits.max_ancestor_size,
                });
            }

            for parent in &self.link(&stage).parents {
                if !ancestors.contains(parent) {
                    parents.insert(*parent);
                }
                if parents.len() as u64 + ancestors.len() as u64 + 1 > limits.max_ancestor_count {
                    return Err(MempoolError::TooManyAncestors {
                        limit: limits.max_ancestor_count,
                    });
                }
            }
        }

        Ok(ancestors)
    }

    /// In-pool direct parents of a transaction, discovered from its inputs
    /// (valid whether or not the transaction is pooled yet).
    fn discover_parents(&self, tx: &Transaction) -> BTreeSet<Hash256> {
        tx.inputs
            .iter()
            .map(|input| input.previous_output.txid)
            .filter(|txid| self.entries.contains_key(txid))
            .collect()
    }

    fn calculate_ancestors(
        &self,
        entry: &MempoolEntry,
        limits: &AncestorLimits,
        search_parents: bool,
    ) -> Result<BTreeSet<Hash256>, MempoolError> {
        let seed = if search_parents {
            let seed = self.discover_parents(entry.tx());
            if seed.len() as u64 + 1 > limits.max_ancestor_count {
                return Err(MempoolError::TooManyParents {
                    limit: limits.max_ancestor_count,
                });
            }
            seed
        } else {
            // Only valid for entries already in the pool.
            self.link(&entry.txid()).parents.clone()
        };
        self.ancestors_limited(seed, entry.size() as u64, limits)
    }

    /// Add every in-pool descendant of `txid` (itself included) to
    /// `descendants`. Entries already present are assumed complete
    /// sub-walks and are not traversed again.
    fn calculate_descendants(&self, txid: &Hash256, descendants: &mut BTreeSet<Hash256>) {
        let mut stage = BTreeSet::new();
        if !descendants.contains(txid) {
            stage.insert(*txid);
        }
        while let Some(it) = stage.pop_first() {
            descendants.insert(it);
            for child in &self.link(&it).children {
                if !descendants.contains(child) {
                    stage.insert(*child);
                }
            }
        }
    }

    /// Register or unregister `txid` as a descendant of every ancestor,
    /// and mirror the child link in each direct parent.
    fn update_ancestors_of(&mut self, add: bool, txid: &Hash256, ancestors: &BTreeSet<Hash256>) {
        let parents = self.link(txid).parents.clone();
        for parent in parents {
            self.update_child(parent, *txid, add);
        }
        let entry = self.entry(txid);
        let count: i64 = if add { 1 } else { -1 };
        let size = count * entry.size() as i64;
        let fee = count * entry.modified_fee();
        for ancestor in ancestors {
            self.modify_entry(ancestor, |e| e.update_descendant_state(size, fee, count));
        }
    }

    /// Set a new entry's own ancestor aggregates from its ancestor set.
    fn update_entry_for_ancestors(&mut self, txid: &Hash256, ancestors: &BTreeSet<Hash256>) {
        let mut size = 0i64;
        let mut fee = 0i64;
        let mut sigops = 0i64;
        for ancestor in ancestors {
            let e = self.entry(ancestor);
            size += e.size() as i64;
            fee += e.modified_fee();
            sigops += e.sigop_count() as i64;
        }
        let count = ancestors.len() as i64;
        self.modify_entry(txid, |e| e.update_ancestor_state(size, fee, count, sigops));
    }

    fn add_unchecked(
        &mut self,
        entry: MempoolEntry,
        ancestors: &BTreeSet<Hash256>,
        current_estimate: bool,
    ) {
        let txid = entry.txid();
        let tx = entry.tx_handle().clone();
        if let Some(events) = &self.events {
            events.on_added(&tx);
        }

        self.by_entry_time.insert((entry.time(), txid));
        self.by_descendant_score.insert(descendant_score_key(&entry));
        self.cached_inner_usage += entry.dynamic_usage();
        self.total_tx_size += entry.size() as u64;
        self.entries.insert(txid, entry);
        self.links.insert(txid, TxLinks::default());

        // Apply any fee delta accumulated before this transaction arrived.
        if let Some(&(_, fee_delta)) = self.deltas.get(&txid) {
            if fee_delta != 0 {
                self.modify_entry(&txid, |e| e.update_fee_delta(fee_delta));
            }
        }

        // Register spent outpoints and link in-pool parents. New arrivals
        // cannot have in-pool children (those would be orphans); the reorg
        // path that violates this calls update_transactions_from_block
        // afterwards to repair child links.
        let mut parent_txids = BTreeSet::new();
        for input in &tx.inputs {
            self.by_spent_outpoint
                .insert(input.previous_output.clone(), txid);
            parent_txids.insert(input.previous_output.txid);
        }
        for parent in parent_txids {
            if self.entries.contains_key(&parent) {
                self.update_parent(txid, parent, true);
            }
        }

        self.update_ancestors_of(true, &txid, ancestors);
        self.update_entry_for_ancestors(&txid, ancestors);

        for spend in tx.shielded_spends() {
            self.nullifiers.insert(spend.nullifier, txid);
        }

        self.transactions_updated += 1;
        let entry = self.entry(&txid).clone();
        self.estimator.process_transaction(&entry, current_estimate);
        debug!(%txid, size = entry.size(), fee = entry.fee(), "added transaction to mempool");
    }

    /// Physically erase one staged entry from every index.
    /// `update_for_remove` must already have run for the whole stage.
    fn remove_unchecked(&mut self, txid: &Hash256, reason: RemovalReason) {
        let entry = self
            .entries
            .get(txid)
            .expect("removal of nonexistent mempool entry");
        let tx = entry.tx_handle().clone();
        if let Some(events) = &self.events {
            events.on_removed(&tx, reason);
        }

        for input in &tx.inputs {
            self.by_spent_outpoint.remove(&input.previous_output);
        }
        for spend in tx.shielded_spends() {
            self.nullifiers.remove(&spend.nullifier);
        }

        let entry = self.entries.remove(txid).expect("entry vanished mid-removal");
        let links = self.links.remove(txid).expect("links vanished mid-removal");
        self.total_tx_size -= entry.size() as u64;
        self.cached_inner_usage -= entry.dynamic_usage();
        self.cached_inner_usage -= LINK_USAGE * (links.parents.len() + links.children.len());
        self.by_entry_time.remove(&(entry.time(), *txid));
        self.by_descendant_score
            .remove(&descendant_score_key(&entry));
        self.transactions_updated += 1;
        self.estimator.remove_tx(txid);
    }

    /// Update graph state for a set of entries about to be removed, then
    /// erase them. If an entry's descendants are *not* all in the stage
    /// (block confirmation), pass `update_descendants` so the survivors'
    /// ancestor aggregates are corrected first.
    fn remove_staged(
        &mut self,
        stage: &BTreeSet<Hash256>,
        update_descendants: bool,
        reason: RemovalReason,
    ) {
        self.update_for_remove(stage, update_descendants);
        for txid in stage {
            self.remove_unchecked(txid, reason);
        }
    }

    fn update_for_remove(&mut self, stage: &BTreeSet<Hash256>, update_descendants: bool) {
        if update_descendants {
            // Decrement surviving descendants' ancestor aggregates before
            // any deletion invalidates the link graph.
            for txid in stage {
                let mut descendants = BTreeSet::new();
                self.calculate_descendants(txid, &mut descendants);
                descendants.remove(txid);
                let entry = self.entry(txid);
                let size = -(entry.size() as i64);
                let fee = -entry.modified_fee();
                let sigops = -(entry.sigop_count() as i64);
                for descendant in &descendants {
                    self.modify_entry(descendant, |e| {
                        e.update_ancestor_state(size, fee, -1, sigops)
                    });
                }
            }
        }
        for txid in stage {
            // The link-graph notion of ancestors is authoritative here: mid
            // reorg the searched-from-inputs set can differ, and the link
            // graph is what the aggregates were built from.
            let seed = self.link(txid).parents.clone();
            let ancestors = self.ancestors_unbounded(seed);
            self.update_ancestors_of(false, txid, &ancestors);
        }
        // With all aggregates corrected, sever the child links pointing at
        // the stage.
        for txid in stage {
            let children = self.link(txid).children.clone();
            for child in children {
                self.update_parent(child, *txid, false);
            }
        }
    }

    /// Remove a transaction and its whole descendant package. If the
    /// transaction itself is gone, any surviving in-pool spenders of its
    /// outputs are removed instead.
    fn remove_recursive(&mut self, txid: &Hash256, reason: RemovalReason) {
        let mut to_remove = BTreeSet::new();
        if self.entries.contains_key(txid) {
            to_remove.insert(*txid);
        } else {
            let range = OutPoint::new(*txid, 0)..=OutPoint::new(*txid, u64::MAX);
            for (_, spender) in self.by_spent_outpoint.range(range) {
                to_remove.insert(*spender);
            }
        }
        let mut stage = BTreeSet::new();
        for id in &to_remove {
            self.calculate_descendants(id, &mut stage);
        }
        self.remove_staged(&stage, false, reason);
    }

    /// Remove everything that conflicts with a confirmed transaction:
    /// in-pool spenders of its inputs and of its shielded nullifiers.
    fn remove_conflicts(&mut self, tx: &Transaction, txid: &Hash256) {
        for input in &tx.inputs {
            if let Some(&conflict) = self.by_spent_outpoint.get(&input.previous_output) {
                if conflict != *txid {
                    self.remove_recursive(&conflict, RemovalReason::Conflict);
                    self.deltas.remove(&conflict);
                }
            }
        }
        for spend in tx.shielded_spends() {
            if let Some(&conflict) = self.nullifiers.get(&spend.nullifier) {
                if conflict != *txid {
                    self.remove_recursive(&conflict, RemovalReason::Conflict);
                    self.deltas.remove(&conflict);
                }
            }
        }
    }

    fn remove_for_block(
        &mut self,
        block_txs: &[Arc<Transaction>],
        height: u64,
        current_estimate: bool,
    ) {
        let txids: Vec<Hash256> = block_txs.iter().map(|tx| tx.txid()).collect();
        // Snapshot confirmed entries for the estimator before they are
        // erased.
        let confirmed: Vec<MempoolEntry> = txids
            .iter()
            .filter_map(|txid| self.entries.get(txid).cloned())
            .collect();
        self.estimator
            .process_block(height, &confirmed, current_estimate);

        for (tx, txid) in block_txs.iter().zip(&txids) {
            if self.entries.contains_key(txid) {
                let mut stage = BTreeSet::new();
                stage.insert(*txid);
                // Descendants are presumed confirmed too or handled as
                // conflicts; survivors get their ancestor state fixed up.
                self.remove_staged(&stage, true, RemovalReason::Block);
            }
            self.remove_conflicts(tx, txid);
            self.deltas.remove(txid);
        }
        self.last_rolling_fee_update = self.now();
        self.block_since_last_rolling_fee_bump = true;
    }

    /// Stage every entry invalidated by a reorg: no longer final under the
    /// new chain, or spending a generated output that is now immature or
    /// spent.
    fn remove_for_reorg(&mut self, coins: &dyn CoinsView, pool_height: u64, pool_time: i64) {
        let mut to_remove = BTreeSet::new();
        for (txid, entry) in &self.entries {
            let tx = entry.tx();
            if !tx.is_final(pool_height, pool_time) {
                to_remove.insert(*txid);
            } else if entry.spends_coinbase_or_coinstake() {
                for input in &tx.inputs {
                    if self.entries.contains_key(&input.previous_output.txid) {
                        continue;
                    }
                    match coins.access_coin(&input.previous_output) {
                        None => {
                            to_remove.insert(*txid);
                            break;
                        }
                        Some(coin) => {
                            let age = pool_height as i64 - coin.height as i64;
                            if coin.is_generated() && age < COINBASE_MATURITY as i64 {
                                to_remove.insert(*txid);
                                break;
                            }
                        }
                    }
                }
            }
        }
        let mut stage = BTreeSet::new();
        for txid in &to_remove {
            self.calculate_descendants(txid, &mut stage);
        }
        let removed = stage.len();
        self.remove_staged(&stage, false, RemovalReason::Reorg);
        if removed > 0 {
            debug!(removed, "removed transactions for reorg");
        }
    }

    /// Remove every shielded transaction whose spend proof was built
    /// against a commitment-tree root invalidated by a disconnect.
    fn remove_with_anchor(&mut self, anchor: &Hash256) {
        let to_remove: Vec<Hash256> = self
            .entries
            .iter()
            .filter(|(_, entry)| {
                entry
                    .tx()
                    .shielded_spends()
                    .iter()
                    .any(|spend| spend.anchor == *anchor)
            })
            .map(|(txid, _)| *txid)
            .collect();
        for txid in to_remove {
            self.remove_recursive(&txid, RemovalReason::Unknown);
        }
    }

    /// Repair descendant state after a disconnected block's transactions
    /// were re-added: reconnect child links via the spend index, then fold
    /// out-of-set descendants back into each re-added entry's aggregates.
    fn update_transactions_from_block(&mut self, txids: &[Hash256]) {
        let already_included: HashSet<Hash256> = txids.iter().copied().collect();
        let mut cached_descendants: HashMap<Hash256, BTreeSet<Hash256>> = HashMap::new();

        // Reverse order guarantees all in-pool descendants of each entry
        // are processed before the entry itself, maximizing cache reuse.
        for txid in txids.iter().rev() {
            if !self.entries.contains_key(txid) {
                continue;
            }
            let range = OutPoint::new(*txid, 0)..=OutPoint::new(*txid, u64::MAX);
            let children: Vec<Hash256> = self
                .by_spent_outpoint
                .range(range)
                .map(|(_, spender)| *spender)
                .collect();
            let mut seen = BTreeSet::new();
            for child in children {
                if seen.insert(child) && !already_included.contains(&child) {
                    self.update_child(*txid, child, true);
                    self.update_parent(child, *txid, true);
                }
            }
            self.update_for_descendants(txid, &mut cached_descendants, &already_included);
        }
    }

    fn update_for_descendants(
        &mut self,
        update_txid: &Hash256,
        cached_descendants: &mut HashMap<Hash256, BTreeSet<Hash256>>,
        exclude: &HashSet<Hash256>,
    ) {
        let mut stage = self.link(update_txid).children.clone();
        let mut all_descendants = BTreeSet::new();
        while let Some(child) = stage.pop_first() {
            all_descendants.insert(child);
            let grandchildren = self.link(&child).children.clone();
            for grandchild in grandchildren {
                if let Some(cached) = cached_descendants.get(&grandchild) {
                    // Sub-walk already complete; splice it in.
                    all_descendants.extend(cached.iter().copied());
                } else if !all_descendants.contains(&grandchild) {
                    stage.insert(grandchild);
                }
            }
        }

        let update_entry = self.entry(update_txid);
        let add_size = update_entry.size() as i64;
        let add_fee = update_entry.modified_fee();
        let add_sigops = update_entry.sigop_count() as i64;

        let mut modify_size = 0i64;
        let mut modify_fee = 0i64;
        let mut modify_count = 0i64;
        for descendant in &all_descendants {
            if exclude.contains(descendant) {
                continue;
            }
            let d = self.entry(descendant);
            modify_size += d.size() as i64;
            modify_fee += d.modified_fee();
            modify_count += 1;
            cached_descendants
                .entry(*update_txid)
                .or_default()
                .insert(*descendant);
            self.modify_entry(descendant, |e| {
                e.update_ancestor_state(add_size, add_fee, 1, add_sigops)
            });
        }
        self.modify_entry(update_txid, |e| {
            e.update_descendant_state(modify_size, modify_fee, modify_count)
        });
    }

    fn prioritise_transaction(&mut self, txid: &Hash256, priority_delta: f64, fee_delta: i64) {
        let deltas = self.deltas.entry(*txid).or_insert((0.0, 0));
        deltas.0 += priority_delta;
        deltas.1 += fee_delta;
        let cumulative_fee_delta = deltas.1;

        if self.entries.contains_key(txid) {
            self.modify_entry(txid, |e| e.update_fee_delta(cumulative_fee_delta));
            // Ancestors count this entry in their descendant packages, so
            // propagate the change upward. Descendants already see it via
            // this entry's own aggregate.
            let seed = self.link(txid).parents.clone();
            let ancestors = self.ancestors_unbounded(seed);
            for ancestor in &ancestors {
                self.modify_entry(ancestor, |e| e.update_descendant_state(0, fee_delta, 0));
            }
        }
        info!(%txid, priority_delta, fee_delta, "prioritised transaction");
    }

    /// Bump the rolling minimum feerate for an evicted package.
    fn track_package_removed(&mut self, rate: FeeRate) {
        if rate.per_kb() as f64 > self.rolling_minimum_fee_rate {
            self.rolling_minimum_fee_rate = rate.per_kb() as f64;
            self.block_since_last_rolling_fee_bump = false;
        }
    }

    fn min_fee(&mut self, size_limit: usize) -> FeeRate {
        if !self.block_since_last_rolling_fee_bump || self.rolling_minimum_fee_rate == 0.0 {
            return FeeRate::from_per_kb(self.rolling_minimum_fee_rate as u64);
        }
        let time = self.now();
        if time > self.last_rolling_fee_update + 10 {
            let mut halflife = ROLLING_FEE_HALFLIFE as f64;
            let usage = self.dynamic_memory_usage();
            if usage < size_limit / QUARTER_OCCUPANCY_DIVISOR {
                halflife /= QUARTER_OCCUPANCY_DIVISOR as f64;
            } else if usage < size_limit / HALF_OCCUPANCY_DIVISOR {
                halflife /= HALF_OCCUPANCY_DIVISOR as f64;
            }

            self.rolling_minimum_fee_rate /=
                2f64.powf((time - self.last_rolling_fee_update) as f64 / halflife);
            self.last_rolling_fee_update = time;

            if self.rolling_minimum_fee_rate < self.min_reasonable_relay_fee.per_kb() as f64 / 2.0
            {
                self.rolling_minimum_fee_rate = 0.0;
                return FeeRate::ZERO;
            }
        }
        FeeRate::from_per_kb(self.rolling_minimum_fee_rate as u64)
            .max(self.min_reasonable_relay_fee)
    }

    fn trim_to_size(&mut self, limit: usize, mut no_spends_remaining: Option<&mut Vec<OutPoint>>) {
        let mut removed_count = 0usize;
        let mut max_feerate_removed = FeeRate::ZERO;

        while self.dynamic_memory_usage() > limit {
            let Some(&(_, worst)) = self.by_descendant_score.iter().next() else {
                break;
            };
            let entry = self.entry(&worst);
            // The new floor is the evicted package's rate plus the minimum
            // reasonable rate, so nothing re-enters at the evicted level
            // until a block passes.
            let removed_rate = FeeRate::from_fee(
                entry.mod_fees_with_descendants().max(0) as u64,
                entry.size_with_descendants() as usize,
            )
            .saturating_add(self.min_reasonable_relay_fee);
            self.track_package_removed(removed_rate);
            max_feerate_removed = max_feerate_removed.max(removed_rate);

            let mut stage = BTreeSet::new();
            self.calculate_descendants(&worst, &mut stage);
            removed_count += stage.len();

            let staged_txs: Vec<Arc<Transaction>> = if no_spends_remaining.is_some() {
                stage
                    .iter()
                    .map(|txid| self.entry(txid).tx_handle().clone())
                    .collect()
            } else {
                Vec::new()
            };

            self.remove_staged(&stage, false, RemovalReason::SizeLimit);

            if let Some(out) = no_spends_remaining.as_mut() {
                for tx in &staged_txs {
                    for input in &tx.inputs {
                        if self.entries.contains_key(&input.previous_output.txid) {
                            continue;
                        }
                        if !self.by_spent_outpoint.contains_key(&input.previous_output) {
                            out.push(input.previous_output.clone());
                        }
                    }
                }
            }
        }

        if max_feerate_removed > FeeRate::ZERO {
            debug!(
                removed = removed_count,
                rolling_minimum = %max_feerate_removed,
                "trimmed mempool to size"
            );
        }
    }

    fn expire(&mut self, cutoff_time: i64) -> usize {
        let expired: Vec<Hash256> = self
            .by_entry_time
            .iter()
            .take_while(|(time, _)| *time < cutoff_time)
            .map(|(_, txid)| *txid)
            .collect();
        let mut stage = BTreeSet::new();
        for txid in &expired {
            self.calculate_descendants(txid, &mut stage);
        }
        let removed = stage.len();
        self.remove_staged(&stage, false, RemovalReason::Expiry);
        removed
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.links.clear();
        self.by_spent_outpoint.clear();
        self.nullifiers.clear();
        self.by_entry_time.clear();
        self.by_descendant_score.clear();
        self.total_tx_size = 0;
        self.cached_inner_usage = 0;
        self.last_rolling_fee_update = self.now();
        self.block_since_last_rolling_fee_bump = false;
        self.rolling_minimum_fee_rate = 0.0;
        self.transactions_updated += 1;
    }

    fn sorted_by_depth_and_score(&self) -> Vec<&MempoolEntry> {
        let mut entries: Vec<&MempoolEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| cmp_depth_and_score(a, b));
        entries
    }

    fn dynamic_memory_usage(&self) -> usize {
        (mem::size_of::<MempoolEntry>() + ENTRY_MAP_OVERHEAD) * self.entries.len()
            + (TIME_INDEX_ROW_USAGE + SCORE_INDEX_ROW_USAGE) * self.entries.len()
            + SPEND_INDEX_ROW_USAGE * self.by_spent_outpoint.len()
            + NULLIFIER_ROW_USAGE * self.nullifiers.len()
            + DELTA_ROW_USAGE * self.deltas.len()
            + self.cached_inner_usage
    }

    /// Re-derive every aggregate from scratch and assert it matches the
    /// cached state; replay every transaction against the chain view to
    /// assert individual spendability. Debug path only, gated by
    /// `check_frequency`.
    fn check(&self, coins: &dyn CoinsView) {
        if self.check_frequency <= 0.0 {
            return;
        }
        if self.check_frequency < 1.0 && rand::random::<f64>() >= self.check_frequency {
            return;
        }
        debug!(
            txs = self.entries.len(),
            inputs = self.by_spent_outpoint.len(),
            "checking mempool"
        );

        let mut check_total: u64 = 0;
        let mut inner_usage: usize = 0;

        // Scratch overlay over the chain view: outputs created by pooled
        // transactions, and outpoints consumed during replay.
        let mut scratch_added: HashSet<OutPoint> = HashSet::new();
        let mut scratch_spent: HashSet<OutPoint> = HashSet::new();

        let mut waiting: VecDeque<Hash256> = VecDeque::new();

        for (txid, entry) in &self.entries {
            check_total += entry.size() as u64;
            let links = self.link(txid);
            inner_usage +=
                entry.dynamic_usage() + LINK_USAGE * (links.parents.len() + links.children.len());

            let tx = entry.tx();
            let mut parent_check = BTreeSet::new();
            let mut depends_wait = false;
            for input in &tx.inputs {
                if let Some(parent) = self.entries.get(&input.previous_output.txid) {
                    assert!(
                        (input.previous_output.index as usize) < parent.tx().outputs.len(),
                        "input references nonexistent parent output"
                    );
                    depends_wait = true;
                    parent_check.insert(input.previous_output.txid);
                } else {
                    assert!(
                        coins.have_coin(&input.previous_output),
                        "input not found in pool or chain state"
                    );
                }
                assert_eq!(
                    self.by_spent_outpoint.get(&input.previous_output),
                    Some(txid),
                    "spend index row missing or pointing at wrong spender"
                );
            }
            for spend in tx.shielded_spends() {
                assert!(
                    !coins.get_nullifier(&spend.nullifier),
                    "pooled nullifier already committed to chain"
                );
                assert_eq!(
                    self.nullifiers.get(&spend.nullifier),
                    Some(txid),
                    "nullifier index row missing or pointing at wrong spender"
                );
            }
            assert_eq!(parent_check, links.parents, "parent links out of sync");

            // Re-derive the ancestor aggregates from the graph.
            let ancestors = self.ancestors_unbounded(parent_check);
            let count_check = ancestors.len() as u64 + 1;
            let mut size_check = entry.size() as u64;
            let mut fees_check = entry.modified_fee();
            let mut sigops_check = entry.sigop_count();
            for ancestor in &ancestors {
                let a = self.entry(ancestor);
                size_check += a.size() as u64;
                fees_check += a.modified_fee();
                sigops_check += a.sigop_count();
            }
            assert_eq!(entry.count_with_ancestors(), count_check);
            assert_eq!(entry.size_with_ancestors(), size_check);
            assert_eq!(entry.mod_fees_with_ancestors(), fees_check);
            assert_eq!(entry.sigops_with_ancestors(), sigops_check);

            // Re-derive the child set from the spend index.
            let range = OutPoint::new(*txid, 0)..=OutPoint::new(*txid, u64::MAX);
            let mut children_check = BTreeSet::new();
            let mut child_sizes = 0u64;
            for (_, spender) in self.by_spent_outpoint.range(range) {
                if children_check.insert(*spender) {
                    child_sizes += self.entry(spender).size() as u64;
                }
            }
            assert_eq!(children_check, links.children, "child links out of sync");
            // Descendant package covers at least the direct children.
            assert!(entry.size_with_descendants() >= child_sizes + entry.size() as u64);

            if depends_wait {
                waiting.push_back(*txid);
            } else {
                self.replay_into_scratch(txid, coins, &mut scratch_added, &mut scratch_spent);
            }
        }

        // Dependency-ordered replay of the remainder; progress is asserted.
        let mut steps_since_last_replay = 0usize;
        while let Some(txid) = waiting.pop_front() {
            let tx = self.entry(&txid).tx();
            let ready = tx.inputs.iter().all(|input| {
                let op = &input.previous_output;
                !scratch_spent.contains(op) && (scratch_added.contains(op) || coins.have_coin(op))
            });
            if ready {
                self.replay_into_scratch(&txid, coins, &mut scratch_added, &mut scratch_spent);
                steps_since_last_replay = 0;
            } else {
                waiting.push_back(txid);
                steps_since_last_replay += 1;
                assert!(
                    steps_since_last_replay < waiting.len(),
                    "dependency replay made no progress"
                );
            }
        }

        for (outpoint, spender) in &self.by_spent_outpoint {
            let entry = self.entry(spender);
            assert!(
                entry
                    .tx()
                    .inputs
                    .iter()
                    .any(|input| input.previous_output == *outpoint),
                "spend index row not backed by spender input"
            );
        }

        self.check_nullifiers();

        assert_eq!(self.total_tx_size, check_total);
        assert_eq!(self.cached_inner_usage, inner_usage);
    }

    fn replay_into_scratch(
        &self,
        txid: &Hash256,
        coins: &dyn CoinsView,
        scratch_added: &mut HashSet<OutPoint>,
        scratch_spent: &mut HashSet<OutPoint>,
    ) {
        let tx = self.entry(txid).tx();
        for input in &tx.inputs {
            let op = &input.previous_output;
            assert!(
                !scratch_spent.contains(op) && (scratch_added.contains(op) || coins.have_coin(op)),
                "transaction no longer individually spendable"
            );
            scratch_spent.insert(op.clone());
        }
        for index in 0..tx.outputs.len() as u64 {
            scratch_added.insert(OutPoint::new(*txid, index));
        }
    }

    fn check_nullifiers(&self) {
        for (nullifier, spender) in &self.nullifiers {
            let entry = self
                .entries
                .get(spender)
                .expect("nullifier index points at missing entry");
            assert!(
                entry
                    .tx()
                    .shielded_spends()
                    .iter()
                    .any(|spend| spend.nullifier == *nullifier),
                "nullifier index row not backed by a shielded spend"
            );
        }
    }
}

/// Thread-safe pool of unconfirmed transactions.
///
/// One instance is shared (by reference or `Arc`) with every subsystem that
/// needs it; constructed at node startup, dropped at shutdown.
pub struct Mempool {
    inner: Mutex<PoolInner>,
}

impl Mempool {
    /// Create an empty pool.
    ///
    /// `min_reasonable_relay_fee` is a rate at or below which a transaction
    /// is effectively free to relay; it bounds how far the rolling minimum
    /// decays and pads the floor set on eviction. `max_memory_bytes` is the
    /// configured memory ceiling, used for occupancy-based decay and as the
    /// smart-fee floor context (trimming itself takes an explicit limit).
    pub fn new(min_reasonable_relay_fee: FeeRate, max_memory_bytes: usize) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            inner: Mutex::new(PoolInner {
                entries: HashMap::new(),
                links: HashMap::new(),
                by_spent_outpoint: BTreeMap::new(),
                nullifiers: HashMap::new(),
                by_entry_time: BTreeSet::new(),
                by_descendant_score: BTreeSet::new(),
                deltas: HashMap::new(),
                estimator: FeeEstimator::new(min_reasonable_relay_fee),
                events: None,
                min_reasonable_relay_fee,
                max_memory_bytes,
                total_tx_size: 0,
                cached_inner_usage: 0,
                transactions_updated: 0,
                check_frequency: 0.0,
                rolling_minimum_fee_rate: 0.0,
                last_rolling_fee_update: now,
                block_since_last_rolling_fee_bump: false,
                is_loaded: false,
                mock_time: None,
            }),
        }
    }

    /// Create an empty pool with the default relay-fee floor and memory
    /// ceiling.
    pub fn with_defaults() -> Self {
        Self::new(
            FeeRate::from_per_kb(DEFAULT_MIN_RELAY_FEE),
            DEFAULT_MAX_MEMORY_BYTES,
        )
    }

    /// Set the probability (0.0..=1.0) that [`check`](Self::check) runs.
    /// Off by default: the full audit is O(n²) in pool size.
    pub fn set_sanity_check(&self, frequency: f64) {
        self.inner.lock().check_frequency = frequency;
    }

    /// Install a synchronous observer for add/remove events.
    pub fn set_event_sink(&self, events: Box<dyn MempoolEvents>) {
        self.inner.lock().events = Some(events);
    }

    /// Override wall-clock time for tests. `None` restores the real clock.
    pub fn set_mock_time(&self, time: Option<i64>) {
        self.inner.lock().mock_time = time;
    }

    /// Insert a pre-validated entry, computing its ancestor set internally
    /// with no limits.
    ///
    /// The caller must have performed all consensus and policy validation;
    /// this operation cannot fail.
    pub fn add_unchecked(&self, entry: MempoolEntry, current_estimate: bool) {
        let mut inner = self.inner.lock();
        let seed = inner.discover_parents(entry.tx());
        let ancestors = inner.ancestors_unbounded(seed);
        inner.add_unchecked(entry, &ancestors, current_estimate);
    }

    /// Insert a pre-validated entry with the ancestor set the acceptance
    /// layer already computed via [`calculate_ancestors`](Self::calculate_ancestors).
    pub fn add_unchecked_with_ancestors(
        &self,
        entry: MempoolEntry,
        ancestors: &BTreeSet<Hash256>,
        current_estimate: bool,
    ) {
        self.inner.lock().add_unchecked(entry, ancestors, current_estimate);
    }

    /// Compute the full in-pool ancestor set of a candidate entry, failing
    /// if any package limit would be exceeded.
    ///
    /// With `search_parents`, parents are discovered from the candidate's
    /// inputs (required for entries not yet pooled); otherwise the entry
    /// must already be pooled and its links are used directly.
    pub fn calculate_ancestors(
        &self,
        entry: &MempoolEntry,
        limits: &AncestorLimits,
        search_parents: bool,
    ) -> Result<BTreeSet<Hash256>, MempoolError> {
        self.inner.lock().calculate_ancestors(entry, limits, search_parents)
    }

    /// Remove a transaction and all in-pool descendants. Absent
    /// transactions with no surviving spenders make this a no-op.
    pub fn remove_recursive(&self, txid: &Hash256, reason: RemovalReason) {
        self.inner.lock().remove_recursive(txid, reason);
    }

    /// Remove in-pool transactions that conflict with a confirmed
    /// transaction on an input outpoint or a shielded nullifier.
    pub fn remove_conflicts(&self, tx: &Transaction) {
        let txid = tx.txid();
        self.inner.lock().remove_conflicts(tx, &txid);
    }

    /// Process a connected block: feed confirmations to the fee estimator,
    /// drop confirmed entries (fixing survivors' ancestor state), sweep
    /// conflicts, and clear confirmed prioritisations.
    pub fn remove_for_block(
        &self,
        block_txs: &[Arc<Transaction>],
        height: u64,
        current_estimate: bool,
    ) {
        self.inner
            .lock()
            .remove_for_block(block_txs, height, current_estimate);
    }

    /// Drop entries invalidated by a reorg: no longer final at
    /// `pool_height`/`pool_time`, or spending generated coins that the
    /// chain view now reports immature or spent.
    pub fn remove_for_reorg(&self, coins: &dyn CoinsView, pool_height: u64, pool_time: i64) {
        self.inner.lock().remove_for_reorg(coins, pool_height, pool_time);
    }

    /// Drop shielded transactions anchored at an invalidated commitment
    /// root, with their descendants.
    pub fn remove_with_anchor(&self, anchor: &Hash256) {
        self.inner.lock().remove_with_anchor(anchor);
    }

    /// Repair child links and descendant aggregates after transactions from
    /// a disconnected block were re-added. `txids` must list the re-added
    /// transactions; until this runs the pool is not consistent.
    pub fn update_transactions_from_block(&self, txids: &[Hash256]) {
        self.inner.lock().update_transactions_from_block(txids);
    }

    /// Remove everything.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    /// Evict lowest-scoring packages until dynamic memory usage fits
    /// `limit`. Optionally reports previously-spent outpoints that no
    /// pooled transaction spends anymore.
    pub fn trim_to_size(&self, limit: usize, no_spends_remaining: Option<&mut Vec<OutPoint>>) {
        self.inner.lock().trim_to_size(limit, no_spends_remaining);
    }

    /// Remove entries older than `cutoff_time` (and their descendants).
    /// Returns how many entries were removed.
    pub fn expire(&self, cutoff_time: i64) -> usize {
        self.inner.lock().expire(cutoff_time)
    }

    /// The feerate below which the pool currently refuses entry, given the
    /// configured `size_limit`: the rolling minimum raised by evictions and
    /// decayed over time.
    pub fn min_fee(&self, size_limit: usize) -> FeeRate {
        self.inner.lock().min_fee(size_limit)
    }

    /// Accumulate a manual priority/fee adjustment for a transaction,
    /// applied now if pooled and on (re-)entry otherwise.
    pub fn prioritise_transaction(&self, txid: &Hash256, priority_delta: f64, fee_delta: i64) {
        self.inner.lock().prioritise_transaction(txid, priority_delta, fee_delta);
    }

    /// Current cumulative prioritisation deltas for a transaction.
    pub fn apply_deltas(&self, txid: &Hash256) -> (f64, i64) {
        self.inner
            .lock()
            .deltas
            .get(txid)
            .copied()
            .unwrap_or((0.0, 0))
    }

    /// Drop any prioritisation for a transaction, pooled or not.
    pub fn clear_prioritisation(&self, txid: &Hash256) {
        self.inner.lock().deltas.remove(txid);
    }

    /// Whether a shielded nullifier is spent by a pooled transaction.
    pub fn nullifier_exists(&self, nullifier: &Hash256) -> bool {
        self.inner.lock().nullifiers.contains_key(nullifier)
    }

    /// Whether any of `tx`'s inputs are supplied by pooled transactions.
    pub fn has_no_inputs_of(&self, tx: &Transaction) -> bool {
        let inner = self.inner.lock();
        !tx.inputs
            .iter()
            .any(|input| inner.entries.contains_key(&input.previous_output.txid))
    }

    pub fn exists(&self, txid: &Hash256) -> bool {
        self.inner.lock().entries.contains_key(txid)
    }

    /// Whether the pool holds the transaction creating `outpoint` and the
    /// output index is in range.
    pub fn exists_outpoint(&self, outpoint: &OutPoint) -> bool {
        let inner = self.inner.lock();
        inner
            .entries
            .get(&outpoint.txid)
            .is_some_and(|entry| (outpoint.index as usize) < entry.tx().outputs.len())
    }

    /// Whether a pooled transaction spends `outpoint`.
    pub fn is_spent(&self, outpoint: &OutPoint) -> bool {
        self.inner.lock().by_spent_outpoint.contains_key(outpoint)
    }

    pub fn get(&self, txid: &Hash256) -> Option<Arc<Transaction>> {
        self.inner
            .lock()
            .entries
            .get(txid)
            .map(|entry| entry.tx_handle().clone())
    }

    pub fn info(&self, txid: &Hash256) -> Option<TxMempoolInfo> {
        let inner = self.inner.lock();
        inner.entries.get(txid).map(|entry| TxMempoolInfo {
            tx: entry.tx_handle().clone(),
            time: entry.time(),
            fee_rate: FeeRate::from_fee(entry.fee(), entry.size()),
            fee_delta: entry.modified_fee() - entry.fee() as i64,
        })
    }

    /// Snapshot of every entry, parents before children (depth, then score).
    pub fn info_all(&self) -> Vec<TxMempoolInfo> {
        let inner = self.inner.lock();
        inner
            .sorted_by_depth_and_score()
            .into_iter()
            .map(|entry| TxMempoolInfo {
                tx: entry.tx_handle().clone(),
                time: entry.time(),
                fee_rate: FeeRate::from_fee(entry.fee(), entry.size()),
                fee_delta: entry.modified_fee() - entry.fee() as i64,
            })
            .collect()
    }

    /// All txids, parents before children (depth, then score).
    pub fn query_hashes(&self) -> Vec<Hash256> {
        let inner = self.inner.lock();
        inner
            .sorted_by_depth_and_score()
            .into_iter()
            .map(|entry| entry.txid())
            .collect()
    }

    /// All txids as a set, unordered.
    pub fn txid_set(&self) -> BTreeSet<Hash256> {
        self.inner.lock().entries.keys().copied().collect()
    }

    /// Relay ordering between two transactions: `a` sorts before `b` when
    /// it has fewer in-pool ancestors, or a better score at equal depth.
    /// Unknown transactions sort last.
    pub fn compare_depth_and_score(&self, a: &Hash256, b: &Hash256) -> bool {
        let inner = self.inner.lock();
        let Some(entry_a) = inner.entries.get(a) else {
            return false;
        };
        let Some(entry_b) = inner.entries.get(b) else {
            return true;
        };
        cmp_depth_and_score(entry_a, entry_b) == std::cmp::Ordering::Less
    }

    /// Aggregate (count, size, modified fees) over a transaction and its
    /// in-pool ancestors.
    pub fn ancestor_state(&self, txid: &Hash256) -> Option<(u64, u64, i64)> {
        let inner = self.inner.lock();
        inner.entries.get(txid).map(|entry| {
            (
                entry.count_with_ancestors(),
                entry.size_with_ancestors(),
                entry.mod_fees_with_ancestors(),
            )
        })
    }

    /// Aggregate (count, size, modified fees) over a transaction and its
    /// in-pool descendants.
    pub fn descendant_state(&self, txid: &Hash256) -> Option<(u64, u64, i64)> {
        let inner = self.inner.lock();
        inner.entries.get(txid).map(|entry| {
            (
                entry.count_with_descendants(),
                entry.size_with_descendants(),
                entry.mod_fees_with_descendants(),
            )
        })
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Sum of all pooled transactions' byte sizes.
    pub fn total_tx_size(&self) -> u64 {
        self.inner.lock().total_tx_size
    }

    /// Deterministic estimate of the pool's heap footprint.
    pub fn dynamic_memory_usage(&self) -> usize {
        self.inner.lock().dynamic_memory_usage()
    }

    /// Counter incremented on every membership change; external consumers
    /// poll it to notice pool churn.
    pub fn transactions_updated(&self) -> u64 {
        self.inner.lock().transactions_updated
    }

    pub fn add_transactions_updated(&self, n: u64) {
        self.inner.lock().transactions_updated += n;
    }

    /// Whether initial load (e.g. from a persisted pool file) finished.
    pub fn is_loaded(&self) -> bool {
        self.inner.lock().is_loaded
    }

    pub fn set_loaded(&self, loaded: bool) {
        self.inner.lock().is_loaded = loaded;
    }

    /// Feerate expected to confirm within `target` blocks.
    pub fn estimate_fee(&self, target: usize) -> Option<FeeRate> {
        self.inner.lock().estimator.estimate_fee(target)
    }

    /// Feerate expected to confirm within `target` blocks, scanning deeper
    /// horizons when needed and floored at the pool's current minimum fee.
    /// Also returns the horizon the answer was found at.
    pub fn estimate_smart_fee(&self, target: usize) -> (Option<FeeRate>, usize) {
        let mut inner = self.inner.lock();
        let size_limit = inner.max_memory_bytes;
        let min_pool_fee = inner.min_fee(size_limit);
        inner.estimator.estimate_smart_fee(target, min_pool_fee)
    }

    /// Coin-age priority expected to confirm within `target` blocks.
    pub fn estimate_priority(&self, target: usize) -> Option<f64> {
        self.inner.lock().estimator.estimate_priority(target)
    }

    /// Priority expected to confirm within `target` blocks, scanning deeper
    /// horizons; [`INF_PRIORITY`](crate::INF_PRIORITY) while the pool
    /// is charging a minimum fee.
    pub fn estimate_smart_priority(&self, target: usize) -> (Option<f64>, usize) {
        let mut inner = self.inner.lock();
        let size_limit = inner.max_memory_bytes;
        let min_pool_fee = inner.min_fee(size_limit);
        inner.estimator.estimate_smart_priority(target, min_pool_fee)
    }

    /// Write fee-estimator state framed by the format version required to
    /// read it and the writer's version. Returns whether the write
    /// succeeded; failures are logged and non-fatal.
    pub fn write_fee_estimates<W: Write>(&self, writer: &mut W) -> bool {
        let inner = self.inner.lock();
        let result = (|| {
            writer.write_all(&CLIENT_VERSION.to_le_bytes())?;
            writer.write_all(&CLIENT_VERSION.to_le_bytes())?;
            inner.estimator.write(writer).map_err(std::io::Error::other)
        })();
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("unable to write fee estimator data (non-fatal): {e}");
                false
            }
        }
    }

    /// Read back fee-estimator state written by
    /// [`write_fee_estimates`](Self::write_fee_estimates). Fails (returning
    /// `false`, logged, non-fatal) on an up-version file or corrupt data;
    /// the pool then simply runs with cold estimates.
    pub fn read_fee_estimates<R: Read>(&self, reader: &mut R) -> bool {
        let mut inner = self.inner.lock();
        let result = (|| {
            let mut buf = [0u8; 4];
            reader.read_exact(&mut buf)?;
            let version_required = i32::from_le_bytes(buf);
            reader.read_exact(&mut buf)?;
            let version_that_wrote = i32::from_le_bytes(buf);
            if version_required > CLIENT_VERSION {
                return Err(std::io::Error::other(format!(
                    "up-version ({version_required}) fee estimate file"
                )));
            }
            inner
                .estimator
                .read(reader, version_that_wrote)
                .map_err(std::io::Error::other)
        })();
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!("unable to read fee estimator data (non-fatal): {e}");
                false
            }
        }
    }

    /// Run the full consistency audit (subject to the sanity-check
    /// frequency): every aggregate re-derived and compared, link symmetry
    /// against the spend index, and a dependency-ordered replay proving
    /// every pooled transaction is still individually spendable against
    /// `coins`.
    pub fn check(&self, coins: &dyn CoinsView) {
        self.inner.lock().check(coins);
    }
}
