use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Deserialize;

use super::index::{tagged_key, KvIndex};
use super::{genesis_hash, BlockInfo, ChainError, ChainStore, Locator, BLOCK_FILE_SIZE};
use crate::{Block, Uint256};

const KEY_GENESIS: &[u8] = b"genesisBlock";
const KEY_LATEST: &[u8] = b"latestBlock";
const KEY_CURRENT: &[u8] = b"currentLocation";

/// Tag for block info entries, keyed by block hash.
const TAG_BLOCK: &str = "bl";
/// Tag for transaction locators, keyed by transaction hash.
const TAG_LOCATOR: &str = "l";

/// On-disk block store: `<dataDir>/databases/blockchain/` holds the
/// key-value index and `blockfile_<id>.bin` segments of concatenated
/// canonical-encoded blocks. A single mutex serializes every access.
pub struct DiskStore {
    dir: PathBuf,
    inner: Mutex<Inner>,
}

struct Inner {
    index: KvIndex,
    genesis: Uint256,
    latest: Uint256,
    current: Locator,
}

fn blockfile_path(dir: &Path, file_id: u32) -> PathBuf {
    // example: blockfile_0006072612.bin
    dir.join(format!("blockfile_{:010}.bin", file_id))
}

fn read_block_at(dir: &Path, locator: &Locator) -> Result<Block, ChainError> {
    let path = blockfile_path(dir, locator.file_id);
    if !path.exists() {
        return Err(ChainError::NotFound);
    }
    let mut file = File::open(&path)?;
    file.seek(SeekFrom::Start(locator.offset as u64))?;
    let mut deserializer = serde_cbor::Deserializer::from_reader(file);
    Block::deserialize(&mut deserializer).map_err(|err| ChainError::FileCorrupt(err.to_string()))
}

impl DiskStore {
    /// Open (or initialize) the store under the given data directory.
    pub fn open(data_dir: &Path) -> Result<DiskStore, ChainError> {
        let dir = data_dir.join("databases").join("blockchain");
        let index_dir = dir.join("index");
        std::fs::create_dir_all(&index_dir)?;

        let mut index = KvIndex::open(index_dir.join("index.bin"))?;
        let genesis = genesis_hash();

        let inner = match index.read::<Uint256>(KEY_GENESIS) {
            Some(stored) => {
                if stored != genesis {
                    return Err(ChainError::FileCorrupt(
                        "genesis hash initialization error".to_owned(),
                    ));
                }
                Inner {
                    latest: index.read(KEY_LATEST).unwrap_or(genesis),
                    current: index.read(KEY_CURRENT).unwrap_or_default(),
                    index,
                    genesis,
                }
            }
            None => {
                index.write(KEY_GENESIS.to_vec(), &genesis)?;
                index.write(KEY_LATEST.to_vec(), &genesis)?;
                index.write(KEY_CURRENT.to_vec(), &Locator::default())?;
                index.flush()?;
                Inner {
                    index,
                    genesis,
                    latest: genesis,
                    current: Locator::default(),
                }
            }
        };

        Ok(DiskStore {
            dir,
            inner: Mutex::new(inner),
        })
    }

    fn save_meta(inner: &mut Inner) -> Result<(), ChainError> {
        let latest = inner.latest;
        let current = inner.current;
        inner.index.write(KEY_LATEST.to_vec(), &latest)?;
        inner.index.write(KEY_CURRENT.to_vec(), &current)?;
        inner.index.flush()
    }
}

impl ChainStore for DiskStore {
    fn genesis(&self) -> Uint256 {
        self.inner.lock().genesis
    }

    fn latest(&self) -> Uint256 {
        self.inner.lock().latest
    }

    fn add_block(&self, block: &Block) -> Result<(), ChainError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if block.header.prev_block_hash != inner.latest {
            return Err(ChainError::UnlinkedBlock);
        }

        let path = blockfile_path(&self.dir, inner.current.file_id);
        if !path.exists() {
            File::create(&path)?;
            inner.current.offset = 0;
        }

        let mut file = OpenOptions::new().append(true).open(&path)?;
        let position = file.seek(SeekFrom::End(0))? as i64;
        if position != inner.current.offset {
            return Err(ChainError::FileCorrupt(
                "block file length does not match the stored append position".to_owned(),
            ));
        }

        let hash = block.hash();
        let location = inner.current;
        let info = BlockInfo {
            locator: location,
            prev_hash: block.header.prev_block_hash,
        };
        inner.index.write(tagged_key(TAG_BLOCK, &hash), &info)?;
        for tx in &block.transactions {
            inner
                .index
                .write(tagged_key(TAG_LOCATOR, &tx.hash()), &location)?;
        }

        serde_cbor::to_writer(&mut file, block)
            .map_err(|err| ChainError::FileCorrupt(err.to_string()))?;
        inner.current.offset = file.seek(SeekFrom::End(0))? as i64;

        // roll to the next segment once the file grows past its limit
        if inner.current.offset > BLOCK_FILE_SIZE {
            inner.current.file_id += 1;
        }

        inner.latest = hash;
        Self::save_meta(inner)
    }

    fn contains_block(&self, hash: &Uint256) -> bool {
        self.inner.lock().index.exists(&tagged_key(TAG_BLOCK, hash))
    }

    fn block(&self, hash: &Uint256) -> Result<Block, ChainError> {
        let guard = self.inner.lock();
        let info: BlockInfo = guard
            .index
            .read(&tagged_key(TAG_BLOCK, hash))
            .ok_or(ChainError::NotFound)?;
        read_block_at(&self.dir, &info.locator)
    }

    fn contains_transaction(&self, hash: &Uint256) -> bool {
        self.inner
            .lock()
            .index
            .exists(&tagged_key(TAG_LOCATOR, hash))
    }

    fn block_by_transaction(&self, hash: &Uint256) -> Result<Block, ChainError> {
        let guard = self.inner.lock();
        let locator: Locator = guard
            .index
            .read(&tagged_key(TAG_LOCATOR, hash))
            .ok_or(ChainError::NotFound)?;
        read_block_at(&self.dir, &locator)
    }

    fn cut_off_after(&self, hash: &Uint256) -> Result<(), ChainError> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if *hash == inner.latest {
            return Ok(());
        }

        let start_info: BlockInfo = inner
            .index
            .read(&tagged_key(TAG_BLOCK, hash))
            .ok_or(ChainError::NotFound)?;

        // walk back from the tip collecting everything to remove
        let mut removed: Vec<(Uint256, BlockInfo)> = Vec::new();
        let mut cursor = inner.latest;
        while cursor != *hash {
            let info: BlockInfo = inner
                .index
                .read(&tagged_key(TAG_BLOCK, &cursor))
                .ok_or(ChainError::NotFound)?;
            let prev = info.prev_hash;
            removed.push((cursor, info));
            cursor = prev;
        }
        removed.reverse();

        // if the first removed block shares the cut block's file, the file
        // is truncated back to where that block started
        let first_removed = &removed[0].1.locator;
        let truncate_to = if first_removed.file_id == start_info.locator.file_id {
            Some(first_removed.offset)
        } else {
            None
        };

        for (block_hash, info) in &removed {
            let block = read_block_at(&self.dir, &info.locator)?;
            for tx in &block.transactions {
                inner.index.erase(&tagged_key(TAG_LOCATOR, &tx.hash()));
            }
            inner.index.erase(&tagged_key(TAG_BLOCK, block_hash));
        }

        // drop block files past the cut block's file
        for file_id in (start_info.locator.file_id + 1)..=inner.current.file_id {
            let path = blockfile_path(&self.dir, file_id);
            if path.exists() {
                std::fs::remove_file(&path)?;
            }
        }

        // restore the append cursor to the end of the cut block
        let path = blockfile_path(&self.dir, start_info.locator.file_id);
        let new_offset = match truncate_to {
            Some(offset) => {
                let file = OpenOptions::new().write(true).open(&path)?;
                file.set_len(offset as u64)?;
                offset
            }
            None => std::fs::metadata(&path)?.len() as i64,
        };

        inner.latest = *hash;
        inner.current = Locator {
            file_id: start_info.locator.file_id,
            offset: new_offset,
        };
        if inner.current.offset > BLOCK_FILE_SIZE {
            inner.current.file_id += 1;
        }

        Self::save_meta(inner)
    }
}
