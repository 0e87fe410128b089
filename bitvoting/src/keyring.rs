use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use rand::{CryptoRng, Rng};

use crate::paillier::PaillierPartialKey;
use crate::{Error, KeyId, Role, SignKeyPair, Uint256};

/// A trustee's Paillier share for one election, bound to the signing key the
/// trustee uses for that election. This is what gets exported to a key file
/// by the election creator and imported by the trustee.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ElectionPrivateKey {
    pub election: Uint256,
    pub key: PaillierPartialKey,
    pub signature_key: KeyId,
}

impl ElectionPrivateKey {
    pub fn save_to(&self, path: &Path) -> Result<(), Error> {
        let bytes = serde_cbor::to_vec(self)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }

    pub fn load_from(path: &Path) -> Result<Self, Error> {
        let bytes = std::fs::read(path)?;
        Ok(serde_cbor::from_slice(&bytes)?)
    }
}

/// Read-through store for signing keys and Paillier shares. Loaded from the
/// data directory on startup, written back on every mutation.
pub struct Keyring {
    dir: Option<PathBuf>,
    inner: Mutex<Inner>,
}

#[derive(Serialize, Deserialize, Default)]
struct Inner {
    sign_keys: BTreeMap<KeyId, SignKeyPair>,
    paillier: BTreeMap<Uint256, Vec<ElectionPrivateKey>>,
}

const KEYRING_FILE: &str = "keyring.bin";

impl Keyring {
    /// Open the keyring persisted under `<dataDir>/databases/keys/`.
    pub fn open(data_dir: &Path) -> Result<Keyring, Error> {
        let dir = data_dir.join("databases").join("keys");
        std::fs::create_dir_all(&dir)?;
        let file = dir.join(KEYRING_FILE);
        let inner = if file.exists() {
            let bytes = std::fs::read(&file)?;
            serde_cbor::from_slice(&bytes)?
        } else {
            Inner::default()
        };
        Ok(Keyring {
            dir: Some(dir),
            inner: Mutex::new(inner),
        })
    }

    /// A keyring that lives only in memory.
    pub fn ephemeral() -> Keyring {
        Keyring {
            dir: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn persist(&self, inner: &Inner) -> Result<(), Error> {
        if let Some(dir) = &self.dir {
            let bytes = serde_cbor::to_vec(inner)?;
            std::fs::write(dir.join(KEYRING_FILE), bytes)?;
        }
        Ok(())
    }

    /// Generate a fresh signing key of the given role and store it.
    pub fn generate<R: Rng + CryptoRng>(
        &self,
        role: Role,
        rng: &mut R,
    ) -> Result<SignKeyPair, Error> {
        let pair = SignKeyPair::generate(role, rng);
        self.add_sign_key(pair.clone())?;
        Ok(pair)
    }

    pub fn add_sign_key(&self, pair: SignKeyPair) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.sign_keys.insert(pair.key_id(), pair);
        self.persist(&inner)
    }

    pub fn remove_sign_key(&self, id: &KeyId) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.sign_keys.remove(id);
        self.persist(&inner)
    }

    pub fn sign_key(&self, id: &KeyId) -> Option<SignKeyPair> {
        self.inner.lock().sign_keys.get(id).cloned()
    }

    pub fn contains_sign_key(&self, id: &KeyId) -> bool {
        self.inner.lock().sign_keys.contains_key(id)
    }

    pub fn keys_of_role(&self, role: Role) -> Vec<SignKeyPair> {
        self.inner
            .lock()
            .sign_keys
            .values()
            .filter(|pair| pair.role() == role)
            .cloned()
            .collect()
    }

    pub fn all_keys(&self) -> Vec<SignKeyPair> {
        self.inner.lock().sign_keys.values().cloned().collect()
    }

    /// The key used to sign mined blocks; generated on first use.
    pub fn mining_key<R: Rng + CryptoRng>(&self, rng: &mut R) -> Result<SignKeyPair, Error> {
        let existing = self.keys_of_role(Role::Mining);
        match existing.into_iter().next() {
            Some(pair) => Ok(pair),
            None => self.generate(Role::Mining, rng),
        }
    }

    pub fn add_paillier_key(&self, key: ElectionPrivateKey) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.paillier.entry(key.election).or_default().push(key);
        self.persist(&inner)
    }

    pub fn paillier_keys(&self, election: &Uint256) -> Vec<ElectionPrivateKey> {
        self.inner
            .lock()
            .paillier
            .get(election)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempDir;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn keys_survive_reopen() {
        let mut rng = StdRng::seed_from_u64(101);
        let dir = TempDir::new("keyring");

        let id = {
            let ring = Keyring::open(&dir.path).unwrap();
            let pair = ring.generate(Role::Trustee, &mut rng).unwrap();
            ring.add_paillier_key(ElectionPrivateKey {
                election: Uint256::random(&mut rng),
                key: PaillierPartialKey {
                    id: 1,
                    share: 42u32.into(),
                },
                signature_key: pair.key_id(),
            })
            .unwrap();
            pair.key_id()
        };

        let ring = Keyring::open(&dir.path).unwrap();
        assert!(ring.contains_sign_key(&id));
        assert_eq!(ring.keys_of_role(Role::Trustee).len(), 1);
        assert!(ring.keys_of_role(Role::Vote).is_empty());
    }

    #[test]
    fn mining_key_is_created_once() {
        let mut rng = StdRng::seed_from_u64(102);
        let ring = Keyring::ephemeral();
        let a = ring.mining_key(&mut rng).unwrap();
        let b = ring.mining_key(&mut rng).unwrap();
        assert_eq!(a.key_id(), b.key_id());
    }
}
