//! Shared test helpers for the mining module

use crate::core::block::GENESIS_TIME;
use crate::core::{Address, Block, Blockchain, OutPoint, Transaction, TxOutput};
use crate::mining::NetworkClock;
use std::sync::atomic::{AtomicU32, Ordering};

pub fn address(seed: u8) -> Address {
    Address::from_key_hash([seed; 20])
}

/// Genesis plus one block carrying a funding transaction with one
/// non-payout output per amount. Returns the chain and those outputs.
pub fn funded_chain(amounts: &[u64]) -> (Blockchain, Vec<OutPoint>) {
    let mut chain = Blockchain::new();
    let genesis = Block::genesis();
    let time = GENESIS_TIME + 60;

    let mut transactions = vec![Transaction::payout(address(200), 1_000, time)];
    let mut outpoints = Vec::new();
    if !amounts.is_empty() {
        let funding = Transaction::new(
            time,
            vec![OutPoint::new([0xEE; 32], 0)],
            amounts
                .iter()
                .map(|amount| TxOutput::new(address(201), *amount))
                .collect(),
        )
        .unwrap();
        outpoints = (0..amounts.len())
            .map(|index| OutPoint::new(*funding.hash(), index as u16))
            .collect();
        transactions.push(funding);
    }

    let block = Block::new(*genesis.hash(), time, genesis.difficulty(), transactions);
    chain.add_block(block).unwrap();
    (chain, outpoints)
}

/// Spend `outpoint` worth `amount`, leaving `fee` to the miner
pub fn spend(outpoint: OutPoint, amount: u64, fee: u64) -> Transaction {
    Transaction::new(
        GENESIS_TIME + 100,
        vec![outpoint],
        vec![TxOutput::new(address(202), amount - fee)],
    )
    .unwrap()
}

/// Spend with `outputs` one-unit outputs; about 29 bytes per output
pub fn wide_spend(outpoint: OutPoint, outputs: usize) -> Transaction {
    Transaction::new(
        GENESIS_TIME + 100,
        vec![outpoint],
        vec![TxOutput::new(address(203), 1); outputs],
    )
    .unwrap()
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU32);

impl ManualClock {
    pub fn new(now: u32) -> Self {
        Self(AtomicU32::new(now))
    }

    pub fn advance(&self, secs: u32) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl NetworkClock for ManualClock {
    fn now(&self) -> u32 {
        self.0.load(Ordering::SeqCst)
    }
}
