use crate::{
    sha256d, verify_signature, Error, PublicKey, Role, SignKeyPair, Signature, Transaction,
    Uint256, VerifyError,
};

pub const CLIENT_VERSION: i32 = 100;

/// Milliseconds since the Unix epoch.
pub fn unix_time_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_block_hash: Uint256,
    /// Nonce found by the proof-of-work search.
    pub nonce: u32,
    /// Time the block was solved, in milliseconds.
    pub time_ms: i64,
}

/// A block: header plus transactions, signed by a mining-role key. The block
/// hash covers the verification key, the header and the transactions but not
/// the signature.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub public_key: PublicKey,
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub signature: Signature,
}

#[derive(Serialize)]
struct SigningView<'a> {
    public_key: &'a PublicKey,
    header: &'a BlockHeader,
    transactions: &'a [Transaction],
}

impl Block {
    /// Assemble an unsigned candidate block. Transactions are kept as an
    /// ordered set: sorted by hash, duplicates removed.
    pub fn build(
        prev_block_hash: Uint256,
        mut transactions: Vec<Transaction>,
        time_ms: i64,
        public_key: PublicKey,
    ) -> Block {
        transactions.sort_by_key(|tx| tx.hash());
        transactions.dedup_by_key(|tx| tx.hash());
        Block {
            public_key,
            header: BlockHeader {
                version: CLIENT_VERSION,
                prev_block_hash,
                nonce: 0,
                time_ms,
            },
            transactions,
            signature: Signature::default(),
        }
    }

    pub fn signing_bytes(&self) -> Vec<u8> {
        let view = SigningView {
            public_key: &self.public_key,
            header: &self.header,
            transactions: &self.transactions,
        };
        serde_cbor::to_vec(&view).expect("bitvoting: unable to serialize block")
    }

    pub fn hash(&self) -> Uint256 {
        sha256d(&self.signing_bytes())
    }

    /// Sign with a mining-role key. Sets the verification key, so the hash
    /// must be considered fixed only afterwards.
    pub fn sign(&mut self, pair: &SignKeyPair) -> Result<(), Error> {
        if pair.role() != Role::Mining {
            return Err(Error::WrongKeyRole);
        }
        self.public_key = pair.public.clone();
        let hash = self.hash();
        self.signature = pair.key.sign(&hash);
        Ok(())
    }

    pub fn verify_signature(&self) -> Result<(), VerifyError> {
        if self.public_key.role() != Role::Mining {
            return Err(VerifyError::WrongRole);
        }
        verify_signature(&self.public_key, &self.hash(), &self.signature)
    }

    pub fn contains_transaction(&self, hash: &Uint256) -> bool {
        self.transactions.iter().any(|tx| tx.hash() == *hash)
    }
}

/// The proof-of-work target: the all-ones word with the top
/// `leading_zero_bits` bits cleared. A block is valid when its hash is not
/// above this value.
pub fn mining_target(leading_zero_bits: u32) -> Uint256 {
    Uint256::zero().wrapping_sub(&Uint256::one()) >> leading_zero_bits
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn block_hash_excludes_signature() {
        let mut rng = StdRng::seed_from_u64(81);
        let pair = SignKeyPair::generate(Role::Mining, &mut rng);

        let mut block = Block::build(Uint256::zero(), vec![], 1000, pair.public.clone());
        let unsigned_hash = block.hash();
        block.sign(&pair).unwrap();
        assert_eq!(block.hash(), unsigned_hash);
        block.verify_signature().unwrap();

        // nonce changes the hash
        block.header.nonce = 1;
        assert_ne!(block.hash(), unsigned_hash);
    }

    #[test]
    fn only_mining_keys_sign_blocks() {
        let mut rng = StdRng::seed_from_u64(82);
        let vote_pair = SignKeyPair::generate(Role::Vote, &mut rng);
        let mut block = Block::build(Uint256::zero(), vec![], 0, vote_pair.public.clone());
        assert!(block.sign(&vote_pair).is_err());
    }

    #[test]
    fn target_monotone_in_difficulty() {
        assert!(mining_target(14) < mining_target(13));
        assert_eq!(
            mining_target(0),
            Uint256::zero().wrapping_sub(&Uint256::one())
        );
    }
}
