use std::collections::BTreeMap;

use parking_lot::Mutex;

use super::{genesis_hash, ChainError, ChainStore};
use crate::{Block, Uint256};

/// In-memory block store with the same semantics as the disk store. Used by
/// the test harness, where block file I/O would only slow things down.
pub struct MemStore {
    inner: Mutex<Inner>,
}

struct Inner {
    genesis: Uint256,
    latest: Uint256,
    blocks: BTreeMap<Uint256, Block>,
    tx_block: BTreeMap<Uint256, Uint256>,
}

impl MemStore {
    pub fn new() -> MemStore {
        let genesis = genesis_hash();
        MemStore {
            inner: Mutex::new(Inner {
                genesis,
                latest: genesis,
                blocks: BTreeMap::new(),
                tx_block: BTreeMap::new(),
            }),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        MemStore::new()
    }
}

impl ChainStore for MemStore {
    fn genesis(&self) -> Uint256 {
        self.inner.lock().genesis
    }

    fn latest(&self) -> Uint256 {
        self.inner.lock().latest
    }

    fn add_block(&self, block: &Block) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();
        if block.header.prev_block_hash != inner.latest {
            return Err(ChainError::UnlinkedBlock);
        }
        let hash = block.hash();
        for tx in &block.transactions {
            inner.tx_block.insert(tx.hash(), hash);
        }
        inner.blocks.insert(hash, block.clone());
        inner.latest = hash;
        Ok(())
    }

    fn contains_block(&self, hash: &Uint256) -> bool {
        self.inner.lock().blocks.contains_key(hash)
    }

    fn block(&self, hash: &Uint256) -> Result<Block, ChainError> {
        self.inner
            .lock()
            .blocks
            .get(hash)
            .cloned()
            .ok_or(ChainError::NotFound)
    }

    fn contains_transaction(&self, hash: &Uint256) -> bool {
        self.inner.lock().tx_block.contains_key(hash)
    }

    fn block_by_transaction(&self, hash: &Uint256) -> Result<Block, ChainError> {
        let inner = self.inner.lock();
        let block_hash = inner.tx_block.get(hash).ok_or(ChainError::NotFound)?;
        inner
            .blocks
            .get(block_hash)
            .cloned()
            .ok_or(ChainError::NotFound)
    }

    fn cut_off_after(&self, hash: &Uint256) -> Result<(), ChainError> {
        let mut inner = self.inner.lock();
        if *hash == inner.latest {
            return Ok(());
        }
        if *hash != inner.genesis && !inner.blocks.contains_key(hash) {
            return Err(ChainError::NotFound);
        }

        let mut cursor = inner.latest;
        while cursor != *hash {
            let block = inner.blocks.remove(&cursor).ok_or(ChainError::NotFound)?;
            for tx in &block.transactions {
                inner.tx_block.remove(&tx.hash());
            }
            cursor = block.header.prev_block_hash;
        }
        inner.latest = *hash;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn append_and_walk() {
        let mut rng = StdRng::seed_from_u64(91);
        let store = MemStore::new();
        let b1 = store.commit_unchecked(vec![], &mut rng).unwrap();
        let b2 = store.commit_unchecked(vec![], &mut rng).unwrap();

        assert_eq!(store.latest(), b2.hash());
        assert!(store.contains_block(&b1.hash()));

        let all = store.blocks_from(&store.genesis()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].hash(), b1.hash());
        assert_eq!(all[1].header.prev_block_hash, b1.hash());

        // unlinked blocks are rejected
        let stale = crate::Block::build(
            b1.hash(),
            vec![],
            0,
            b1.public_key.clone(),
        );
        assert_eq!(store.add_block(&stale), Err(ChainError::UnlinkedBlock));
    }

    #[test]
    fn cut_off_restores_previous_tip() {
        let mut rng = StdRng::seed_from_u64(92);
        let store = MemStore::new();
        let b1 = store.commit_unchecked(vec![], &mut rng).unwrap();
        let _b2 = store.commit_unchecked(vec![], &mut rng).unwrap();
        let _b3 = store.commit_unchecked(vec![], &mut rng).unwrap();

        store.cut_off_after(&b1.hash()).unwrap();
        assert_eq!(store.latest(), b1.hash());
        assert_eq!(store.blocks_from(&store.genesis()).unwrap().len(), 1);
    }
}
