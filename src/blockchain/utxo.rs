// UTXO discovery
//
// Every query walks the blocks it is given from tip to genesis and rebuilds
// the spent-output index from scratch. Nothing here is cached between calls.
//
// Within a block, a transaction's outputs are examined before its own inputs
// are recorded as spends. That is only sound because a transaction can never
// spend an output from its own block, which the ledger enforces at mining time.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::ops::ControlFlow;

use super::block::Block;
use super::crypto::PubKeyHash;
use super::transaction::{OutPoint, Transaction, TxId, TxOutput};

/// Visits every unspent output locked to `pub_key_hash` in walk order
///
/// Stops early when `visit` breaks.
fn walk_unspent<I, E, F>(blocks: I, pub_key_hash: &PubKeyHash, mut visit: F) -> Result<(), E>
where
    I: IntoIterator<Item = Result<Block, E>>,
    F: FnMut(&Transaction, u32, &TxOutput) -> ControlFlow<()>,
{
    let mut spent: HashMap<TxId, HashSet<u32>> = HashMap::new();

    for block in blocks {
        let block = block?;

        for tx in &block.transactions {
            let spent_here = spent.get(&tx.id);

            for (index, output) in tx.outputs.iter().enumerate() {
                let vout = index as u32;
                if spent_here.map_or(false, |outs| outs.contains(&vout)) {
                    continue;
                }

                if output.is_locked_with_key(pub_key_hash) && visit(tx, vout, output).is_break() {
                    return Ok(());
                }
            }

            if !tx.is_coinbase() {
                for outpoint in tx.inputs.iter().filter_map(|input| input.previous) {
                    spent.entry(outpoint.txid).or_default().insert(outpoint.vout);
                }
            }
        }
    }

    Ok(())
}

/// Transactions holding at least one unspent output locked to `pub_key_hash`
pub fn find_unspent_transactions<I, E>(
    blocks: I,
    pub_key_hash: &PubKeyHash,
) -> Result<Vec<Transaction>, E>
where
    I: IntoIterator<Item = Result<Block, E>>,
{
    let mut unspent: Vec<Transaction> = Vec::new();

    walk_unspent(blocks, pub_key_hash, |tx, _, _| {
        // Outputs of one transaction are visited back to back
        if unspent.last().map(|last| last.id) != Some(tx.id) {
            unspent.push(tx.clone());
        }
        ControlFlow::Continue(())
    })?;

    Ok(unspent)
}

/// Every unspent output locked to `pub_key_hash`
pub fn find_utxo<I, E>(blocks: I, pub_key_hash: &PubKeyHash) -> Result<Vec<TxOutput>, E>
where
    I: IntoIterator<Item = Result<Block, E>>,
{
    let mut outputs = Vec::new();

    walk_unspent(blocks, pub_key_hash, |_, _, output| {
        outputs.push(output.clone());
        ControlFlow::Continue(())
    })?;

    Ok(outputs)
}

/// First-fit selection of unspent outputs covering `amount`
///
/// Returns the accumulated value (which may fall short of `amount`) and the
/// chosen output indices per transaction id.
pub fn find_spendable_outputs<I, E>(
    blocks: I,
    pub_key_hash: &PubKeyHash,
    amount: u64,
) -> Result<(u64, BTreeMap<TxId, Vec<u32>>), E>
where
    I: IntoIterator<Item = Result<Block, E>>,
{
    let mut accumulated = 0u64;
    let mut chosen: BTreeMap<TxId, Vec<u32>> = BTreeMap::new();

    if amount == 0 {
        return Ok((accumulated, chosen));
    }

    walk_unspent(blocks, pub_key_hash, |tx, vout, output| {
        accumulated = accumulated.saturating_add(output.value);
        chosen.entry(tx.id).or_default().push(vout);

        if accumulated >= amount {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    })?;

    Ok((accumulated, chosen))
}

/// Every output referenced by some non-coinbase input
pub fn find_spent_outpoints<I, E>(blocks: I) -> Result<HashSet<OutPoint>, E>
where
    I: IntoIterator<Item = Result<Block, E>>,
{
    let mut spent = HashSet::new();

    for block in blocks {
        for tx in block?.transactions.iter().filter(|tx| !tx.is_coinbase()) {
            spent.extend(tx.inputs.iter().filter_map(|input| input.previous));
        }
    }

    Ok(spent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::codec::Hash;
    use crate::blockchain::transaction::TxInput;
    use crate::blockchain::wallet::Wallet;

    use std::convert::Infallible;

    // Blocks are built by hand here; proof of work is irrelevant to the scan.
    fn block(transactions: Vec<Transaction>, prev_hash: Option<Hash>, tag: u8) -> Block {
        Block {
            timestamp: 0,
            transactions,
            prev_hash,
            hash: [tag; 32],
            nonce: 0,
        }
    }

    fn payment(inputs: Vec<OutPoint>, outputs: Vec<TxOutput>) -> Transaction {
        let mut tx = Transaction {
            id: Hash::default(),
            inputs: inputs
                .into_iter()
                .map(|outpoint| TxInput {
                    previous: Some(outpoint),
                    signature: Vec::new(),
                    pub_key: Vec::new(),
                })
                .collect(),
            outputs,
        };
        tx.id = tx.hash().unwrap();
        tx
    }

    fn tip_first(blocks: &[Block]) -> impl Iterator<Item = Result<Block, Infallible>> + '_ {
        blocks.iter().rev().cloned().map(Ok)
    }

    struct Fixture {
        alice: Wallet,
        bob: Wallet,
        genesis: Transaction,
        spend: Transaction,
        blocks: Vec<Block>,
    }

    // genesis: 50 -> alice
    // block 1: alice pays bob 10, change 40 -> alice
    fn fixture() -> Fixture {
        let alice = Wallet::new();
        let bob = Wallet::new();

        let genesis = Transaction::new_coinbase(&alice.address(), Some(b"genesis"), 50).unwrap();
        let spend = payment(
            vec![OutPoint {
                txid: genesis.id,
                vout: 0,
            }],
            vec![
                TxOutput::new(10, &bob.address()),
                TxOutput::new(40, &alice.address()),
            ],
        );

        let first = block(vec![genesis.clone()], None, 1);
        let second = block(vec![spend.clone()], Some(first.hash), 2);

        Fixture {
            alice,
            bob,
            genesis,
            spend,
            blocks: vec![first, second],
        }
    }

    #[test]
    fn test_find_utxo_after_spend() {
        let f = fixture();

        let alice = find_utxo(tip_first(&f.blocks), &f.alice.pub_key_hash()).unwrap();
        assert_eq!(alice, vec![TxOutput::new(40, &f.alice.address())]);

        let bob = find_utxo(tip_first(&f.blocks), &f.bob.pub_key_hash()).unwrap();
        assert_eq!(bob, vec![TxOutput::new(10, &f.bob.address())]);

        let stranger = Wallet::new();
        let none = find_utxo(tip_first(&f.blocks), &stranger.pub_key_hash()).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_find_unspent_transactions() {
        let f = fixture();

        let alice = find_unspent_transactions(tip_first(&f.blocks), &f.alice.pub_key_hash())
            .unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].id, f.spend.id);

        // Before the spend the genesis coinbase is Alice's only source
        let before = find_unspent_transactions(tip_first(&f.blocks[..1]), &f.alice.pub_key_hash())
            .unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(before[0].id, f.genesis.id);
    }

    #[test]
    fn test_transaction_listed_once() {
        let alice = Wallet::new();
        let source = Transaction::new_coinbase(&alice.address(), None, 50).unwrap();
        let split = payment(
            vec![OutPoint {
                txid: source.id,
                vout: 0,
            }],
            vec![
                TxOutput::new(20, &alice.address()),
                TxOutput::new(30, &alice.address()),
            ],
        );
        let first = block(vec![source], None, 1);
        let second = block(vec![split.clone()], Some(first.hash), 2);
        let blocks = vec![first, second];

        let txs = find_unspent_transactions(tip_first(&blocks), &alice.pub_key_hash()).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].id, split.id);

        let outputs = find_utxo(tip_first(&blocks), &alice.pub_key_hash()).unwrap();
        assert_eq!(outputs.iter().map(|o| o.value).sum::<u64>(), 50);
    }

    #[test]
    fn test_spendable_outputs_first_fit() {
        let alice = Wallet::new();
        let first_cb = Transaction::new_coinbase(&alice.address(), None, 30).unwrap();
        let second_cb = Transaction::new_coinbase(&alice.address(), None, 30).unwrap();
        let third_cb = Transaction::new_coinbase(&alice.address(), None, 30).unwrap();

        let first = block(vec![first_cb.clone()], None, 1);
        let second = block(vec![second_cb.clone()], Some(first.hash), 2);
        let third = block(vec![third_cb.clone()], Some(second.hash), 3);
        let blocks = vec![first, second, third];

        // Walk order is tip first, so the newest outputs are picked first
        let (accumulated, chosen) =
            find_spendable_outputs(tip_first(&blocks), &alice.pub_key_hash(), 40).unwrap();
        assert_eq!(accumulated, 60);
        assert_eq!(chosen.len(), 2);
        assert_eq!(chosen.get(&third_cb.id), Some(&vec![0]));
        assert_eq!(chosen.get(&second_cb.id), Some(&vec![0]));
        assert!(!chosen.contains_key(&first_cb.id));

        let (accumulated, chosen) =
            find_spendable_outputs(tip_first(&blocks), &alice.pub_key_hash(), 500).unwrap();
        assert_eq!(accumulated, 90);
        assert_eq!(chosen.len(), 3);
    }

    #[test]
    fn test_spent_outputs_not_spendable() {
        let f = fixture();
        let (accumulated, chosen) =
            find_spendable_outputs(tip_first(&f.blocks), &f.alice.pub_key_hash(), 45).unwrap();

        assert_eq!(accumulated, 40);
        assert!(!chosen.contains_key(&f.genesis.id));
    }

    #[test]
    fn test_find_spent_outpoints() {
        let f = fixture();
        let spent = find_spent_outpoints(tip_first(&f.blocks)).unwrap();

        assert_eq!(spent.len(), 1);
        assert!(spent.contains(&OutPoint {
            txid: f.genesis.id,
            vout: 0
        }));
    }

    #[test]
    fn test_walk_stops_on_error() {
        let f = fixture();
        let blocks = vec![Err("corrupt block"), Ok(f.blocks[0].clone())];

        let result = find_utxo(blocks, &f.alice.pub_key_hash());
        assert_eq!(result, Err("corrupt block"));
    }
}
