use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ChainError;
use crate::Uint256;

/// Tag-prefixed key-value index, held in memory and snapshotted to a single
/// file. Keys are a short ASCII tag followed by the hash bytes; metadata
/// entries use the bare name.
pub(crate) struct KvIndex {
    path: Option<PathBuf>,
    map: BTreeMap<Vec<u8>, Vec<u8>>,
}

pub(crate) fn tagged_key(tag: &str, hash: &Uint256) -> Vec<u8> {
    let mut key = Vec::with_capacity(tag.len() + Uint256::BYTES);
    key.extend_from_slice(tag.as_bytes());
    key.extend_from_slice(hash.as_bytes());
    key
}

impl KvIndex {
    /// In-memory index with no backing file.
    pub fn ephemeral() -> KvIndex {
        KvIndex {
            path: None,
            map: BTreeMap::new(),
        }
    }

    /// Open or create the index file.
    pub fn open(path: PathBuf) -> Result<KvIndex, ChainError> {
        let map = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_cbor::from_slice(&bytes)
                .map_err(|err| ChainError::FileCorrupt(err.to_string()))?
        } else {
            BTreeMap::new()
        };
        Ok(KvIndex {
            path: Some(path),
            map,
        })
    }

    pub fn write<T: Serialize>(&mut self, key: Vec<u8>, value: &T) -> Result<(), ChainError> {
        let bytes =
            serde_cbor::to_vec(value).map_err(|err| ChainError::FileCorrupt(err.to_string()))?;
        self.map.insert(key, bytes);
        Ok(())
    }

    pub fn read<T: DeserializeOwned>(&self, key: &[u8]) -> Option<T> {
        let bytes = self.map.get(key)?;
        serde_cbor::from_slice(bytes).ok()
    }

    pub fn exists(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    pub fn erase(&mut self, key: &[u8]) {
        self.map.remove(key);
    }

    /// Persist the whole index: write to a sibling temp file, then rename.
    pub fn flush(&self) -> Result<(), ChainError> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        let bytes = serde_cbor::to_vec(&self.map)
            .map_err(|err| ChainError::FileCorrupt(err.to_string()))?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}
