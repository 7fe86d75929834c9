//! Chain-state view that brings pooled transactions' outputs into scope.
//!
//! Used by the acceptance layer so a candidate transaction can spend
//! unconfirmed outputs: pool transactions supply coins at the mempool
//! height sentinel, and nullifier lookups union the pool's spent set with
//! the chain's committed set. Spends *by* pool transactions are not
//! reflected; conflict detection is the pool's own job.

use umbra_core::coins::{Coin, CoinsView};
use umbra_core::constants::MEMPOOL_HEIGHT;
use umbra_core::types::{Hash256, OutPoint};

use crate::pool::Mempool;

/// [`CoinsView`] decorator over a base view plus the mempool.
pub struct MempoolCoinsView<'a> {
    base: &'a dyn CoinsView,
    mempool: &'a Mempool,
}

impl<'a> MempoolCoinsView<'a> {
    pub fn new(base: &'a dyn CoinsView, mempool: &'a Mempool) -> Self {
        Self { base, mempool }
    }
}

impl CoinsView for MempoolCoinsView<'_> {
    fn access_coin(&self, outpoint: &OutPoint) -> Option<Coin> {
        // A pool entry always wins: it cannot conflict with the base view
        // and it carries the full transaction, never a pruned one.
        if let Some(tx) = self.mempool.get(&outpoint.txid) {
            return tx.outputs.get(outpoint.index as usize).map(|output| Coin {
                output: output.clone(),
                height: MEMPOOL_HEIGHT,
                is_coinbase: false,
                is_coinstake: false,
            });
        }
        self.base.access_coin(outpoint)
    }

    fn have_coin(&self, outpoint: &OutPoint) -> bool {
        self.mempool.exists_outpoint(outpoint) || self.base.have_coin(outpoint)
    }

    fn get_nullifier(&self, nullifier: &Hash256) -> bool {
        self.mempool.nullifier_exists(nullifier) || self.base.get_nullifier(nullifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use umbra_core::coins::MemoryCoinsView;
    use umbra_core::feerate::FeeRate;
    use umbra_core::types::{ShieldedData, ShieldedSpend, Transaction, TxInput, TxOutput};

    use crate::entry::MempoolEntry;

    fn pooled_tx() -> Arc<Transaction> {
        Arc::new(Transaction {
            version: 1,
            inputs: vec![TxInput {
                previous_output: OutPoint::new(Hash256([9; 32]), 0),
                signature: vec![0u8; 64],
                public_key: vec![0u8; 32],
            }],
            outputs: vec![TxOutput {
                value: 700,
                pubkey_hash: Hash256([3; 32]),
            }],
            lock_time: 0,
            shielded: Some(ShieldedData {
                value_balance: 0,
                spends: vec![ShieldedSpend {
                    nullifier: Hash256([0x42; 32]),
                    anchor: Hash256([0x43; 32]),
                }],
                output_count: 1,
            }),
        })
    }

    fn pool_with_tx() -> (Mempool, Hash256) {
        let pool = Mempool::new(FeeRate::from_per_kb(1000), 5_000_000);
        let tx = pooled_tx();
        let txid = tx.txid();
        let entry = MempoolEntry::new(tx, 100, 1000, 0.0, 0, true, 0, false, 1);
        pool.add_unchecked(entry, true);
        (pool, txid)
    }

    #[test]
    fn pool_outputs_visible_at_mempool_height() {
        let (pool, txid) = pool_with_tx();
        let base = MemoryCoinsView::new();
        let view = MempoolCoinsView::new(&base, &pool);

        let coin = view.access_coin(&OutPoint::new(txid, 0)).unwrap();
        assert_eq!(coin.height, MEMPOOL_HEIGHT);
        assert_eq!(coin.output.value, 700);
        assert!(!coin.is_coinbase);

        // Out-of-range index of a pooled tx yields nothing.
        assert!(view.access_coin(&OutPoint::new(txid, 5)).is_none());
    }

    #[test]
    fn base_coins_fall_through() {
        let (pool, _) = pool_with_tx();
        let mut base = MemoryCoinsView::new();
        let op = OutPoint::new(Hash256([8; 32]), 1);
        base.add_coin(
            op.clone(),
            Coin {
                output: TxOutput { value: 55, pubkey_hash: Hash256::ZERO },
                height: 12,
                is_coinbase: false,
                is_coinstake: false,
            },
        );
        let view = MempoolCoinsView::new(&base, &pool);
        assert!(view.have_coin(&op));
        assert_eq!(view.access_coin(&op).unwrap().height, 12);
    }

    #[test]
    fn nullifiers_union_pool_and_base() {
        let (pool, _) = pool_with_tx();
        let mut base = MemoryCoinsView::new();
        base.add_nullifier(Hash256([0x99; 32]));
        let view = MempoolCoinsView::new(&base, &pool);

        assert!(view.get_nullifier(&Hash256([0x42; 32]))); // pool
        assert!(view.get_nullifier(&Hash256([0x99; 32]))); // base
        assert!(!view.get_nullifier(&Hash256([0x00; 32])));
    }
}
