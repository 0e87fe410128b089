use std::collections::BTreeSet;

use rand::Rng;

use crate::chain::ChainStore;
use crate::paillier::{CiphertextProof, PaillierPublicKey, PartialDecryptionProof};
use crate::{KeyId, PublicKey, Role, TxBody, TxType, Uint160, VerifyError};

pub const MAX_NAME_LEN: usize = 25;
pub const MAX_DESCRIPTION_LEN: usize = 255;

pub const DEFAULT_ANSWERS: [&str; 2] = ["NO", "YES"];

/// A single yes/no question of an election. Exactly two answers.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Question {
    pub id: Uint160,
    pub question: String,
    pub answers: [String; 2],
}

impl Question {
    pub fn new<R: Rng>(question: &str, answers: [String; 2], rng: &mut R) -> Self {
        Question {
            id: Uint160::random(rng),
            question: question.to_owned(),
            answers,
        }
    }

    pub fn yes_no<R: Rng>(question: &str, rng: &mut R) -> Self {
        Question::new(
            question,
            [DEFAULT_ANSWERS[0].to_owned(), DEFAULT_ANSWERS[1].to_owned()],
            rng,
        )
    }
}

/// A cleartext answer: the index of the chosen answer, or -1 for abstention.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ballot {
    pub question_id: Uint160,
    pub answer: i64,
}

impl Ballot {
    pub const ABSTAIN: i64 = -1;
}

/// An encrypted answer with its 0-or-1 membership proof.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EncryptedBallot {
    pub question_id: Uint160,
    pub answer: CiphertextProof,
}

/// One trustee's partial decryption of a question's homomorphic vote sum.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TalliedBallots {
    pub question_id: Uint160,
    pub answers: PartialDecryptionProof,
}

/// An election: its questions, deadline, encryption key and the key-ids of
/// everyone allowed to take part.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Election {
    pub name: String,
    pub description: String,
    pub questions: Vec<Question>,
    pub ending_time_ms: i64,
    pub enc_pub_key: PaillierPublicKey,
    pub voters: BTreeSet<KeyId>,
    pub trustees: BTreeSet<KeyId>,
}

impl Election {
    pub fn question(&self, id: &Uint160) -> Option<&Question> {
        self.questions.iter().find(|question| question.id == *id)
    }

    pub fn is_voter(&self, key: &PublicKey) -> bool {
        self.voters.contains(&key.key_id())
    }

    pub fn is_trustee(&self, key: &PublicKey) -> bool {
        self.trustees.contains(&key.key_id())
    }
}

/// Transaction announcing a new election, published by its creator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxElection {
    pub election: Election,
}

impl TxBody for TxElection {
    const TX_TYPE: TxType = TxType::Election;
    const REQUIRED_ROLE: Role = Role::Election;

    fn verify<S: ChainStore + ?Sized>(
        &self,
        _signer: &PublicKey,
        _chain: &S,
    ) -> Result<(), VerifyError> {
        let election = &self.election;

        if election.questions.is_empty()
            || election.voters.is_empty()
            || election.trustees.is_empty()
        {
            return Err(VerifyError::ElectionInvalid);
        }
        if election.name.len() > MAX_NAME_LEN
            || election.description.len() > MAX_DESCRIPTION_LEN
        {
            return Err(VerifyError::ElectionInvalid);
        }

        // one decryption server per trustee, threshold within bounds
        let key = &election.enc_pub_key;
        if election.trustees.len() != key.servers as usize
            || key.threshold > key.servers
            || key.threshold == 0
        {
            return Err(VerifyError::ElectionInvalid);
        }
        if key.verification_keys.len() != key.servers as usize {
            return Err(VerifyError::ElectionInvalid);
        }

        Ok(())
    }
}
