use tessera_core::types::abci::Header;
use tessera_core::{Timestamp, Transaction};
use tracing::debug;

use crate::error::RoundError;

/// A committed block: the engine's header and the delivered transactions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: Header,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: Header, transactions: Vec<Transaction>) -> Self {
        Block {
            header,
            transactions,
        }
    }

    pub fn height(&self) -> i64 {
        self.header.height
    }

    pub fn timestamp(&self) -> Option<Timestamp> {
        self.header.time
    }
}

/// Append-only list of blocks.
///
/// The height of the chain is its length plus `height_offset`, so a chain
/// started at a later initial height expects its first block at
/// `height_offset + 1`.
#[derive(Debug, Clone, Default)]
pub struct Blockchain {
    blocks: Vec<Block>,
    height_offset: u64,
}

impl Blockchain {
    pub fn new(height_offset: u64) -> Self {
        Blockchain {
            blocks: Vec::new(),
            height_offset,
        }
    }

    pub fn height_offset(&self) -> u64 {
        self.height_offset
    }

    pub fn add_block(&mut self, block: Block) -> Result<(), RoundError> {
        let expected = self.height() + 1;
        let actual = block.height();
        if actual < 0 || actual as u64 != expected {
            return Err(RoundError::AddBlock(format!(
                "expected height {}, got {}",
                expected, actual
            )));
        }
        debug!(height = actual, txs = block.transactions.len(), "block added");
        self.blocks.push(block);
        Ok(())
    }

    /// Height of the last block, or the offset when empty
    pub fn height(&self) -> u64 {
        self.height_offset + self.blocks.len() as u64
    }

    pub fn length(&self) -> usize {
        self.blocks.len()
    }

    pub fn last_block(&self) -> Option<&Block> {
        self.blocks.last()
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }
}

/// Accumulates the block in progress between begin_block and commit
#[derive(Debug, Default)]
pub struct BlockBuilder {
    header: Option<Header>,
    transactions: Vec<Transaction>,
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.header = None;
        self.transactions.clear();
    }

    pub fn header(&self) -> Result<&Header, RoundError> {
        self.header
            .as_ref()
            .ok_or_else(|| RoundError::BlockBuilder("header not set".to_string()))
    }

    pub fn set_header(&mut self, header: Header) -> Result<(), RoundError> {
        if self.header.is_some() {
            return Err(RoundError::BlockBuilder("header already set".to_string()));
        }
        self.header = Some(header);
        Ok(())
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn add_transaction(&mut self, transaction: Transaction) {
        self.transactions.push(transaction);
    }

    pub fn get_block(&self) -> Result<Block, RoundError> {
        let header = self.header.clone().ok_or_else(|| {
            RoundError::BlockBuilder("cannot get block, header not set".to_string())
        })?;
        Ok(Block::new(header, self.transactions.clone()))
    }
}
