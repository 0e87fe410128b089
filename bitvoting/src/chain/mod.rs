//! The append-only block store: a key-value index plus packed block-file
//! segments on disk, and an in-memory variant for tests. Exactly one chain is
//! kept; a block that does not extend the local tip is rejected.

mod disk;
mod index;
mod mem;

pub use disk::DiskStore;
pub use mem::MemStore;

use rand::{CryptoRng, Rng};
use thiserror::Error;

use crate::{
    unix_time_ms, Block, Role, SignKeyPair, Signed, Transaction, TxElection, TxTally,
    TxTrusteeTally, TxVote, Uint256, VerifyError,
};

/// Hash of the genesis block. The genesis block itself is never materialized;
/// the first real block simply links to this hash.
pub const GENESIS_BLOCK_HASH: &str =
    "a71b445873a2f1c0256af99d7fc0ffb117ca2fa16945ebcaa6393b60bdd8e787";

/// Maximum size of a single block file (8 MiB).
pub const BLOCK_FILE_SIZE: i64 = 1024 * 1024 * 8;

pub fn genesis_hash() -> Uint256 {
    Uint256::from_hex(GENESIS_BLOCK_HASH).expect("genesis block hash constant")
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChainError {
    #[error("block chain: block or transaction not found")]
    NotFound,

    #[error("block chain: storage failure: {0}")]
    FileCorrupt(String),

    #[error("block chain: chain is empty, only the genesis hash exists")]
    Empty,

    #[error("block chain: block does not link to the latest block")]
    UnlinkedBlock,
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::FileCorrupt(err.to_string())
    }
}

/// Position of a serialized block inside the block files. Transactions share
/// the locator of their enclosing block.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Locator {
    pub file_id: u32,
    pub offset: i64,
}

/// Index entry per block: where it lives on disk and its predecessor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    pub locator: Locator,
    pub prev_hash: Uint256,
}

/// The block store interface. All implementations keep a single chain and
/// serialize access internally, so methods take `&self`.
pub trait ChainStore: Send + Sync {
    fn genesis(&self) -> Uint256;

    fn latest(&self) -> Uint256;

    /// Append a block. The block must link to the current latest block.
    fn add_block(&self, block: &Block) -> Result<(), ChainError>;

    fn contains_block(&self, hash: &Uint256) -> bool;

    fn block(&self, hash: &Uint256) -> Result<Block, ChainError>;

    fn contains_transaction(&self, hash: &Uint256) -> bool;

    /// The block holding the given transaction.
    fn block_by_transaction(&self, hash: &Uint256) -> Result<Block, ChainError>;

    /// Remove every block strictly after `hash`; `hash` becomes the tip.
    fn cut_off_after(&self, hash: &Uint256) -> Result<(), ChainError>;

    // ----------------------------------------------------------------

    fn latest_block(&self) -> Result<Block, ChainError> {
        let latest = self.latest();
        if latest == self.genesis() {
            return Err(ChainError::Empty);
        }
        self.block(&latest)
    }

    fn transaction(&self, hash: &Uint256) -> Result<Transaction, ChainError> {
        let block = self.block_by_transaction(hash)?;
        block
            .transactions
            .into_iter()
            .find(|tx| tx.hash() == *hash)
            .ok_or(ChainError::NotFound)
    }

    /// All blocks from `start` to `end` inclusive, in chain order, walking
    /// the prev-hash links backwards from `end`. When `start` is the genesis
    /// hash it is not materialized.
    fn blocks_between(&self, start: &Uint256, end: &Uint256) -> Result<Vec<Block>, ChainError> {
        let mut start_block = None;
        if *start != self.genesis() {
            start_block = Some(self.block(start)?);
        }

        let mut blocks = Vec::new();
        let mut hash = *end;
        while hash != *start {
            if hash == self.genesis() {
                // walked past the requested start without meeting it
                return Err(ChainError::NotFound);
            }
            let block = self.block(&hash)?;
            hash = block.header.prev_block_hash;
            blocks.push(block);
        }
        if let Some(block) = start_block {
            blocks.push(block);
        }
        blocks.reverse();
        Ok(blocks)
    }

    /// All blocks from `start` to the chain tip, inclusive.
    fn blocks_from(&self, start: &Uint256) -> Result<Vec<Block>, ChainError> {
        self.blocks_between(start, &self.latest())
    }

    /// Blocks strictly after `hash`, in chain order. Used to answer block
    /// requests from peers that already hold `hash`.
    fn blocks_after(&self, hash: &Uint256) -> Result<Vec<Block>, ChainError> {
        let mut blocks = self.blocks_from(hash)?;
        if *hash != self.genesis() && !blocks.is_empty() {
            blocks.remove(0);
        }
        Ok(blocks)
    }

    // typed transaction lookups, used during verification ------------

    fn get_election(&self, hash: &Uint256) -> Result<Signed<TxElection>, VerifyError> {
        match self.transaction(hash) {
            Ok(Transaction::Election(tx)) => Ok(tx),
            _ => Err(VerifyError::MissingTransaction(*hash)),
        }
    }

    fn get_vote(&self, hash: &Uint256) -> Result<Signed<TxVote>, VerifyError> {
        match self.transaction(hash) {
            Ok(Transaction::Vote(tx)) => Ok(tx),
            _ => Err(VerifyError::MissingTransaction(*hash)),
        }
    }

    fn get_tally(&self, hash: &Uint256) -> Result<Signed<TxTally>, VerifyError> {
        match self.transaction(hash) {
            Ok(Transaction::Tally(tx)) => Ok(tx),
            _ => Err(VerifyError::MissingTransaction(*hash)),
        }
    }

    fn get_trustee_tally(&self, hash: &Uint256) -> Result<Signed<TxTrusteeTally>, VerifyError> {
        match self.transaction(hash) {
            Ok(Transaction::TrusteeTally(tx)) => Ok(tx),
            _ => Err(VerifyError::MissingTransaction(*hash)),
        }
    }

    /// Append the given transactions as a new block signed with a throwaway
    /// mining key, without a proof-of-work search. Chain-level tooling and
    /// the test harness use this; gossip blocks go through full validation
    /// in the node instead.
    fn commit_unchecked<R: Rng + CryptoRng>(
        &self,
        transactions: Vec<Transaction>,
        rng: &mut R,
    ) -> Result<Block, ChainError>
    where
        Self: Sized,
    {
        let pair = SignKeyPair::generate(Role::Mining, rng);
        let mut block = Block::build(
            self.latest(),
            transactions,
            unix_time_ms(),
            pair.public.clone(),
        );
        block
            .sign(&pair)
            .map_err(|err| ChainError::FileCorrupt(err.to_string()))?;
        self.add_block(&block)?;
        Ok(block)
    }
}
