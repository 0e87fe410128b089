use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use num_traits::ToPrimitive;
use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, warn};

use crate::chain::ChainStore;
use crate::paillier::{
    ciphertext_one, encrypt_binary_with_proof, homomorphic_mul, partial_decrypt_with_proof,
    verify_encryption, verify_partial_decryption, PaillierPartialKey, PartialDecryptionProof,
};
use crate::{
    Ballot, Election, EncryptedBallot, Error, KeyId, Keyring, PublicKey, Role, Signed,
    TalliedBallots, Transaction, TxElection, TxTally, TxTrusteeTally, TxVote, Uint160, Uint256,
    VoteError,
};

/// Per-election bookkeeping, kept only on peers that are creator, voter or
/// trustee of the election. Everything here can be rebuilt by replaying the
/// chain; it exists so the node does not walk the chain on every lookup.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ElectionState {
    /// The committed election transaction this state belongs to.
    pub transaction: Signed<TxElection>,

    /// Set once an end-marker tally was processed; never cleared.
    pub ended: bool,

    /// Everyone who has voted so far, last writer wins by block order.
    pub votes_registered: BTreeSet<KeyId>,

    /// My own votes: key-id to vote transaction hash, so the UI can warn
    /// before a revote invalidates the old one.
    pub my_votes: BTreeMap<KeyId, Uint256>,

    /// Tally transaction hash to the trustee tallies answering it.
    pub tallies: BTreeMap<Uint256, BTreeSet<Uint256>>,

    /// Tally transaction hash to decrypted counts per question.
    pub results: BTreeMap<Uint256, BTreeSet<Ballot>>,
}

impl ElectionState {
    pub fn new(transaction: Signed<TxElection>) -> ElectionState {
        ElectionState {
            transaction,
            ended: false,
            votes_registered: BTreeSet::new(),
            my_votes: BTreeMap::new(),
            tallies: BTreeMap::new(),
            results: BTreeMap::new(),
        }
    }

    pub fn election(&self) -> &Election {
        &self.transaction.body.election
    }

    pub fn hash(&self) -> Uint256 {
        self.transaction.hash()
    }

    pub fn is_voter_eligible(&self, key: &PublicKey) -> bool {
        self.election().is_voter(key)
    }

    pub fn is_trustee_eligible(&self, key: &PublicKey) -> bool {
        self.election().is_trustee(key)
    }

    pub fn am_i_creator(&self, keyring: &Keyring) -> bool {
        let creator = self.transaction.public_key.key_id();
        keyring
            .keys_of_role(Role::Election)
            .iter()
            .any(|pair| pair.key_id() == creator)
    }

    pub fn am_i_voter(&self, keyring: &Keyring) -> bool {
        keyring
            .keys_of_role(Role::Vote)
            .iter()
            .any(|pair| self.is_voter_eligible(&pair.public))
    }

    pub fn am_i_trustee(&self, keyring: &Keyring) -> bool {
        keyring
            .keys_of_role(Role::Trustee)
            .iter()
            .any(|pair| self.is_trustee_eligible(&pair.public))
    }

    pub fn am_i_involved(&self, keyring: &Keyring) -> bool {
        self.am_i_creator(keyring) || self.am_i_voter(keyring) || self.am_i_trustee(keyring)
    }

    pub fn already_voted(&self) -> bool {
        !self.my_votes.is_empty()
    }

    pub fn results_available(&self) -> bool {
        !self.results.is_empty()
    }

    /// Turn a set of cleartext answers into a vote transaction body. Every
    /// question must be answered exactly once; abstentions produce no
    /// encrypted ballot.
    pub fn create_vote<R: Rng>(
        &self,
        answers: &BTreeSet<Ballot>,
        rng: &mut R,
    ) -> Result<TxVote, Error> {
        let election = self.election();

        if answers.len() != election.questions.len() {
            return Err(VoteError::InvalidCount.into());
        }

        let mut answered: BTreeSet<Uint160> = BTreeSet::new();
        for ballot in answers {
            if answered.contains(&ballot.question_id) {
                return Err(VoteError::DuplicateQuestion.into());
            }
            if election.question(&ballot.question_id).is_some() {
                answered.insert(ballot.question_id);
            }
        }
        if answers.len() != answered.len() {
            return Err(VoteError::UnknownQuestion.into());
        }

        let mut ballots = BTreeSet::new();
        for ballot in answers {
            if ballot.answer == Ballot::ABSTAIN {
                continue;
            }
            if ballot.answer != 0 && ballot.answer != 1 {
                return Err(VoteError::InvalidAnswer.into());
            }
            let proof =
                encrypt_binary_with_proof(&election.enc_pub_key, ballot.answer as u64, rng)?;
            ballots.insert(EncryptedBallot {
                question_id: ballot.question_id,
                answer: proof,
            });
        }

        Ok(TxVote {
            election: self.hash(),
            ballots,
        })
    }

    /// Build this trustee's partial tally for a committed tally transaction:
    /// sum the valid votes per question homomorphically, then partially
    /// decrypt each sum with the given share.
    pub fn create_trustee_tally<S: ChainStore + ?Sized, R: Rng>(
        &self,
        tally: &Signed<TxTally>,
        key: &PaillierPartialKey,
        chain: &S,
        rng: &mut R,
    ) -> Result<TxTrusteeTally, Error> {
        let ballots = self.collect_votes(&tally.body.last_block, chain)?;
        if ballots.is_empty() {
            return Err(Error::NoVotesToTally);
        }

        let enc_key = &self.election().enc_pub_key;

        let mut sums: BTreeMap<Uint160, num_bigint_dig::BigUint> = BTreeMap::new();
        for ballot in &ballots {
            // only count votes whose membership proof still checks
            if !verify_encryption(enc_key, &ballot.answer) {
                warn!(
                    question = %ballot.question_id,
                    "dropping ballot with invalid membership proof"
                );
                continue;
            }
            let sum = sums
                .entry(ballot.question_id)
                .or_insert_with(ciphertext_one);
            *sum = homomorphic_mul(enc_key, sum, &ballot.answer.c);
        }

        let mut partial_decryption = BTreeSet::new();
        for (question_id, sum) in &sums {
            let proof = partial_decrypt_with_proof(enc_key, key, sum, rng);
            partial_decryption.insert(TalliedBallots {
                question_id: *question_id,
                answers: proof,
            });
        }

        Ok(TxTrusteeTally {
            tally: tally.hash(),
            partial_decryption,
        })
    }

    /// Decrypt the counts for a tally once enough trustee tallies were
    /// committed: per question keep at most `threshold` valid partial
    /// decryptions, fail if any question has fewer, combine the rest.
    pub fn tally<S: ChainStore + ?Sized>(
        &mut self,
        tally_hash: &Uint256,
        chain: &S,
    ) -> Result<(), Error> {
        let enc_key = self.election().enc_pub_key.clone();
        let threshold = enc_key.threshold as usize;

        let trustee_tallies = self
            .tallies
            .get(tally_hash)
            .ok_or(Error::NotEnoughShares {
                needed: threshold,
                found: 0,
            })?
            .clone();

        // gather partial decryptions from all committed trustee tallies
        let mut ballots: BTreeSet<TalliedBallots> = BTreeSet::new();
        for hash in &trustee_tallies {
            match chain.get_trustee_tally(hash) {
                Ok(tx) => ballots.extend(tx.body.partial_decryption),
                Err(_) => continue,
            }
        }

        // sort by question, dropping invalid proofs and extras
        let mut sets: BTreeMap<Uint160, Vec<PartialDecryptionProof>> = BTreeMap::new();
        for ballot in ballots {
            let proofs = sets.entry(ballot.question_id).or_default();
            if proofs.len() >= threshold {
                continue;
            }
            if !verify_partial_decryption(&enc_key, &ballot.answers) {
                debug!(question = %ballot.question_id, "invalid partial decryption discarded");
                continue;
            }
            proofs.push(ballot.answers);
        }

        for proofs in sets.values() {
            if proofs.len() < threshold {
                return Err(Error::NotEnoughShares {
                    needed: threshold,
                    found: proofs.len(),
                });
            }
        }

        let mut results = BTreeSet::new();
        for (question_id, proofs) in &sets {
            let plaintext = crate::paillier::combine(&enc_key, proofs)?;
            let answer = plaintext.to_i64().ok_or(Error::TallyValueOutOfRange)?;
            results.insert(Ballot {
                question_id: *question_id,
                answer,
            });
        }

        self.results.insert(*tally_hash, results);
        Ok(())
    }

    /// The last-vote rule: walk from the block containing the election
    /// transaction up to `last_block` and keep only the most recent vote per
    /// voter for this election.
    fn collect_votes<S: ChainStore + ?Sized>(
        &self,
        last_block: &Uint256,
        chain: &S,
    ) -> Result<BTreeSet<EncryptedBallot>, Error> {
        let election_hash = self.hash();

        let start_block = chain.block_by_transaction(&election_hash)?;
        let blocks = chain.blocks_between(&start_block.hash(), last_block)?;

        let mut ballots = BTreeSet::new();
        let mut voters_seen: BTreeSet<KeyId> = BTreeSet::new();
        for block in blocks.iter().rev() {
            for tx in &block.transactions {
                let vote = match tx {
                    Transaction::Vote(vote) => vote,
                    _ => continue,
                };
                if vote.body.election != election_hash {
                    continue;
                }
                // newest first: later votes shadow earlier ones
                if !voters_seen.insert(vote.public_key.key_id()) {
                    continue;
                }
                ballots.extend(vote.body.ballots.iter().cloned());
            }
        }

        Ok(ballots)
    }
}

/// Persisted map of the elections this peer is involved in.
pub struct ElectionDb {
    dir: Option<PathBuf>,
    inner: Mutex<BTreeMap<Uint256, ElectionState>>,
}

const ELECTIONS_FILE: &str = "elections.bin";

impl ElectionDb {
    pub fn open(data_dir: &Path) -> Result<ElectionDb, Error> {
        let dir = data_dir.join("databases").join("elections");
        std::fs::create_dir_all(&dir)?;
        let file = dir.join(ELECTIONS_FILE);
        let inner = if file.exists() {
            let bytes = std::fs::read(&file)?;
            serde_cbor::from_slice(&bytes)?
        } else {
            BTreeMap::new()
        };
        Ok(ElectionDb {
            dir: Some(dir),
            inner: Mutex::new(inner),
        })
    }

    pub fn ephemeral() -> ElectionDb {
        ElectionDb {
            dir: None,
            inner: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, election: &Uint256) -> Option<ElectionState> {
        self.inner.lock().get(election).cloned()
    }

    pub fn contains(&self, election: &Uint256) -> bool {
        self.inner.lock().contains_key(election)
    }

    pub fn all(&self) -> Vec<ElectionState> {
        self.inner.lock().values().cloned().collect()
    }

    pub fn save(&self, state: ElectionState) -> Result<(), Error> {
        let mut inner = self.inner.lock();
        inner.insert(state.hash(), state);
        if let Some(dir) = &self.dir {
            let bytes = serde_cbor::to_vec(&*inner)?;
            std::fs::write(dir.join(ELECTIONS_FILE), bytes)?;
        }
        Ok(())
    }
}
