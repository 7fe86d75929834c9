//! Core protocol types: transactions and their transparent/shielded parts.
//!
//! All monetary values are in umbrites (1 UMB = 10^8 umbrites). Transaction
//! ids are BLAKE3 hashes of the canonical bincode encoding.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::constants::LOCKTIME_THRESHOLD;

/// A 32-byte hash value.
///
/// Used for transaction IDs, shielded-spend nullifiers, and commitment-tree
/// anchors. Totally ordered so it can serve as a deterministic tie-break key
/// in sorted indices.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default,
    bincode::Encode, bincode::Decode,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The zero hash (32 zero bytes). Used for coinbase previous outpoints.
    pub const ZERO: Self = Self([0u8; 32]);

    /// Create a Hash256 from a byte array.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Return the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Check if this is the zero hash.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl AsRef<[u8]> for Hash256 {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Reference to a specific output of a previous transaction.
///
/// Ordered by `(txid, index)` so a `BTreeMap<OutPoint, _>` can be
/// range-scanned for all outpoints of a single transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord,
    bincode::Encode, bincode::Decode,
)]
pub struct OutPoint {
    /// Transaction ID containing the referenced output.
    pub txid: Hash256,
    /// Index of the output within the transaction.
    pub index: u64,
}

impl OutPoint {
    /// Create an outpoint referencing output `index` of transaction `txid`.
    pub fn new(txid: Hash256, index: u64) -> Self {
        Self { txid, index }
    }

    /// The null outpoint, used for coinbase transaction inputs.
    pub fn null() -> Self {
        Self {
            txid: Hash256::ZERO,
            index: u64::MAX,
        }
    }

    /// Check if this is the null outpoint (coinbase marker).
    pub fn is_null(&self) -> bool {
        self.txid.is_zero() && self.index == u64::MAX
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

/// A transaction input, spending a previous transparent output.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxInput {
    /// The outpoint being spent. Null outpoint for coinbase.
    pub previous_output: OutPoint,
    /// Signature bytes. Empty for coinbase inputs.
    pub signature: Vec<u8>,
    /// Public key bytes. Empty for coinbase inputs.
    pub public_key: Vec<u8>,
}

/// A transaction output, creating a new transparent coin.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct TxOutput {
    /// Value in umbrites (1 UMB = 10^8 umbrites).
    pub value: u64,
    /// Hash of the recipient's public key.
    pub pubkey_hash: Hash256,
}

impl TxOutput {
    /// An "empty" output: zero value paying to the zero hash. The first
    /// output of a coinstake transaction is empty by convention.
    pub fn is_empty_marker(&self) -> bool {
        self.value == 0 && self.pubkey_hash.is_zero()
    }
}

/// One shielded spend: consumes a prior note without revealing which.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct ShieldedSpend {
    /// Unique per-spend value preventing double-spends of the hidden note.
    pub nullifier: Hash256,
    /// Commitment-tree root the spend proof was built against.
    pub anchor: Hash256,
}

/// Shielded component of a transaction.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct ShieldedData {
    /// Net value flowing from the shielded pool into the transparent pool
    /// (negative when shielding funds).
    pub value_balance: i64,
    /// Shielded spends published by this transaction.
    pub spends: Vec<ShieldedSpend>,
    /// Number of shielded outputs (note commitments) created.
    pub output_count: u64,
}

/// A transaction transferring value between transparent and shielded pools.
#[derive(
    Serialize, Deserialize, Clone, Debug, PartialEq, Eq,
    bincode::Encode, bincode::Decode,
)]
pub struct Transaction {
    /// Protocol version.
    pub version: u64,
    /// Inputs consuming previous transparent outputs.
    pub inputs: Vec<TxInput>,
    /// New transparent outputs created by this transaction.
    pub outputs: Vec<TxOutput>,
    /// Block height or timestamp before which this tx is invalid.
    pub lock_time: u64,
    /// Shielded component, if any.
    pub shielded: Option<ShieldedData>,
}

impl Transaction {
    /// Canonical byte encoding used for hashing and size accounting.
    ///
    /// Explicit fixed layout (all integers little-endian) so the txid does
    /// not depend on any serialization framework's encoding choices.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(128);
        data.extend_from_slice(&self.version.to_le_bytes());
        data.extend_from_slice(&(self.inputs.len() as u64).to_le_bytes());
        for input in &self.inputs {
            data.extend_from_slice(input.previous_output.txid.as_bytes());
            data.extend_from_slice(&input.previous_output.index.to_le_bytes());
            data.extend_from_slice(&(input.signature.len() as u64).to_le_bytes());
            data.extend_from_slice(&input.signature);
            data.extend_from_slice(&(input.public_key.len() as u64).to_le_bytes());
            data.extend_from_slice(&input.public_key);
        }
        data.extend_from_slice(&(self.outputs.len() as u64).to_le_bytes());
        for output in &self.outputs {
            data.extend_from_slice(&output.value.to_le_bytes());
            data.extend_from_slice(output.pubkey_hash.as_bytes());
        }
        data.extend_from_slice(&self.lock_time.to_le_bytes());
        match &self.shielded {
            None => data.push(0),
            Some(shielded) => {
                data.push(1);
                data.extend_from_slice(&shielded.value_balance.to_le_bytes());
                data.extend_from_slice(&(shielded.spends.len() as u64).to_le_bytes());
                for spend in &shielded.spends {
                    data.extend_from_slice(spend.nullifier.as_bytes());
                    data.extend_from_slice(spend.anchor.as_bytes());
                }
                data.extend_from_slice(&shielded.output_count.to_le_bytes());
            }
        }
        data
    }

    /// Compute the transaction ID (BLAKE3 hash of the canonical encoding).
    pub fn txid(&self) -> Hash256 {
        Hash256(blake3::hash(&self.canonical_bytes()).into())
    }

    /// Serialized size in bytes (canonical encoding).
    pub fn serialized_size(&self) -> usize {
        self.canonical_bytes().len()
    }

    /// Size adjusted for signature cost, used for coin-age priority.
    ///
    /// Each input gets a fixed allowance (outpoint + bookkeeping, plus up to
    /// 110 bytes of signature data) subtracted from the raw size, so that
    /// larger scripts do not dilute priority.
    pub fn modified_size(&self, serialized_size: usize) -> usize {
        let mut size = serialized_size;
        for input in &self.inputs {
            let offset = 41 + (input.signature.len() + input.public_key.len()).min(110);
            size = size.saturating_sub(offset);
        }
        size
    }

    /// Check if this is a coinbase transaction (single input with null outpoint).
    pub fn is_coinbase(&self) -> bool {
        self.inputs.len() == 1 && self.inputs[0].previous_output.is_null()
    }

    /// Check if this is a coinstake transaction: spends real inputs and its
    /// first output is the empty marker (proof-of-stake convention).
    pub fn is_coinstake(&self) -> bool {
        !self.inputs.is_empty()
            && !self.inputs[0].previous_output.is_null()
            && self.outputs.len() >= 2
            && self.outputs[0].is_empty_marker()
    }

    /// Whether the transaction carries a shielded component.
    pub fn is_shielded(&self) -> bool {
        self.shielded.is_some()
    }

    /// Shielded spends, or an empty slice for transparent transactions.
    pub fn shielded_spends(&self) -> &[ShieldedSpend] {
        self.shielded.as_ref().map_or(&[], |s| &s.spends)
    }

    /// Sum of all transparent output values. Returns None on overflow.
    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, out| acc.checked_add(out.value))
    }

    /// Whether the transaction is final under the given chain height and
    /// time: a lock time below [`LOCKTIME_THRESHOLD`] is a block height,
    /// anything above is a unix timestamp.
    pub fn is_final(&self, height: u64, time: i64) -> bool {
        if self.lock_time == 0 {
            return true;
        }
        let cutoff = if self.lock_time < LOCKTIME_THRESHOLD {
            height
        } else {
            time.max(0) as u64
        };
        self.lock_time < cutoff
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::COIN;

    fn sample_tx() -> Transaction {
        Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint {
                    txid: Hash256([0x11; 32]),
                    index: 0,
                },
                signature: vec![0u8; 64],
                public_key: vec![0u8; 32],
            }],
            outputs: vec![TxOutput {
                value: 50 * COIN,
                pubkey_hash: Hash256([0xAA; 32]),
            }],
            lock_time: 0,
            shielded: None,
        }
    }

    fn sample_shielded_tx() -> Transaction {
        Transaction {
            version: 2,
            inputs: vec![],
            outputs: vec![TxOutput {
                value: 10 * COIN,
                pubkey_hash: Hash256([0xBB; 32]),
            }],
            lock_time: 0,
            shielded: Some(ShieldedData {
                value_balance: (11 * COIN) as i64,
                spends: vec![ShieldedSpend {
                    nullifier: Hash256([0x01; 32]),
                    anchor: Hash256([0x02; 32]),
                }],
                output_count: 0,
            }),
        }
    }

    // --- Hash256 ---

    #[test]
    fn hash256_zero_is_zero() {
        assert!(Hash256::ZERO.is_zero());
        assert_eq!(Hash256::ZERO, Hash256::default());
    }

    #[test]
    fn hash256_display_hex() {
        let s = format!("{}", Hash256([0xAB; 32]));
        assert_eq!(s.len(), 64);
        assert_eq!(&s[0..2], "ab");
    }

    #[test]
    fn hash256_ordering_is_bytewise() {
        assert!(Hash256([0x01; 32]) < Hash256([0x02; 32]));
    }

    // --- OutPoint ---

    #[test]
    fn outpoint_null_detection() {
        assert!(OutPoint::null().is_null());
        assert!(!OutPoint::new(Hash256([1; 32]), 0).is_null());
    }

    #[test]
    fn outpoint_ordering_groups_by_txid() {
        let a0 = OutPoint::new(Hash256([1; 32]), 0);
        let a1 = OutPoint::new(Hash256([1; 32]), 1);
        let b0 = OutPoint::new(Hash256([2; 32]), 0);
        assert!(a0 < a1);
        assert!(a1 < b0);
    }

    // --- Transaction ---

    #[test]
    fn coinbase_detection() {
        let cb = Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::null(),
                signature: vec![],
                public_key: vec![],
            }],
            outputs: vec![],
            lock_time: 0,
            shielded: None,
        };
        assert!(cb.is_coinbase());
        assert!(!sample_tx().is_coinbase());
    }

    #[test]
    fn coinstake_detection() {
        let mut tx = sample_tx();
        tx.outputs = vec![
            TxOutput { value: 0, pubkey_hash: Hash256::ZERO },
            TxOutput { value: 50 * COIN, pubkey_hash: Hash256([0xAA; 32]) },
        ];
        assert!(tx.is_coinstake());
        assert!(!sample_tx().is_coinstake());
    }

    #[test]
    fn shielded_detection() {
        assert!(sample_shielded_tx().is_shielded());
        assert!(!sample_tx().is_shielded());
        assert_eq!(sample_shielded_tx().shielded_spends().len(), 1);
        assert!(sample_tx().shielded_spends().is_empty());
    }

    #[test]
    fn txid_deterministic_and_distinct() {
        let tx = sample_tx();
        assert_eq!(tx.txid(), tx.txid());
        let mut tx2 = sample_tx();
        tx2.lock_time = 1;
        assert_ne!(tx.txid(), tx2.txid());
    }

    #[test]
    fn shielded_data_changes_txid() {
        assert_ne!(sample_tx().txid(), sample_shielded_tx().txid());
    }

    #[test]
    fn serialized_size_matches_canonical_bytes() {
        let tx = sample_tx();
        assert_eq!(tx.serialized_size(), tx.canonical_bytes().len());
        assert!(tx.serialized_size() > 0);
    }

    #[test]
    fn modified_size_subtracts_input_allowance() {
        let tx = sample_tx();
        let size = tx.serialized_size();
        let modified = tx.modified_size(size);
        // One input with 96 bytes of sig data: offset = 41 + 96.
        assert_eq!(modified, size.saturating_sub(41 + 96));
    }

    #[test]
    fn modified_size_saturates() {
        let tx = sample_tx();
        assert_eq!(tx.modified_size(10), 0);
    }

    // --- Finality ---

    #[test]
    fn zero_locktime_is_final() {
        assert!(sample_tx().is_final(0, 0));
    }

    #[test]
    fn height_locktime() {
        let mut tx = sample_tx();
        tx.lock_time = 100;
        assert!(!tx.is_final(100, 0));
        assert!(tx.is_final(101, 0));
    }

    #[test]
    fn time_locktime() {
        let mut tx = sample_tx();
        tx.lock_time = 1_700_000_000;
        assert!(!tx.is_final(u64::MAX, 1_600_000_000));
        assert!(tx.is_final(0, 1_700_000_001));
    }

    // --- Bincode round-trips ---

    #[test]
    fn bincode_round_trip_transparent() {
        let tx = sample_tx();
        let encoded = bincode::encode_to_vec(&tx, bincode::config::standard()).unwrap();
        let (decoded, _): (Transaction, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(tx, decoded);
    }

    #[test]
    fn bincode_round_trip_shielded() {
        let tx = sample_shielded_tx();
        let encoded = bincode::encode_to_vec(&tx, bincode::config::standard()).unwrap();
        let (decoded, _): (Transaction, usize) =
            bincode::decode_from_slice(&encoded, bincode::config::standard()).unwrap();
        assert_eq!(tx, decoded);
    }
}
