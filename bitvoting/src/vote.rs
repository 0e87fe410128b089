use std::collections::BTreeSet;

use crate::chain::ChainStore;
use crate::paillier::verify_encryption;
use crate::{EncryptedBallot, PublicKey, Role, TxBody, TxType, Uint160, Uint256, VerifyError};

/// Transaction carrying a voter's encrypted answers for one election.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxVote {
    /// Hash of the election transaction this vote belongs to.
    pub election: Uint256,
    pub ballots: BTreeSet<EncryptedBallot>,
}

impl TxBody for TxVote {
    const TX_TYPE: TxType = TxType::Vote;
    const REQUIRED_ROLE: Role = Role::Vote;

    fn verify<S: ChainStore + ?Sized>(
        &self,
        signer: &PublicKey,
        chain: &S,
    ) -> Result<(), VerifyError> {
        let election_tx = chain.get_election(&self.election)?;
        let election = &election_tx.body.election;

        // every ballot answers a distinct, known question with a valid
        // membership proof
        let mut answered: BTreeSet<Uint160> = BTreeSet::new();
        for ballot in &self.ballots {
            if election.question(&ballot.question_id).is_none() {
                return Err(VerifyError::BallotInvalid);
            }
            if !answered.insert(ballot.question_id) {
                return Err(VerifyError::BallotInvalid);
            }
            if !verify_encryption(&election.enc_pub_key, &ballot.answer) {
                return Err(VerifyError::BallotInvalid);
            }
        }

        if !election.is_voter(signer) {
            return Err(VerifyError::Unauthorized);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemStore;
    use crate::paillier::encrypt_binary_with_proof;
    use crate::testutil::election_fixture;
    use crate::{Signed, SignKeyPair, Transaction, TxElection};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn vote_verification_rules() {
        let mut rng = StdRng::seed_from_u64(51);
        let store = MemStore::new();
        let fixture = election_fixture(&mut rng, 2, 2, 2);

        let election_tx = Signed::sign(
            &fixture.creator,
            TxElection {
                election: fixture.election.clone(),
            },
        )
        .unwrap();
        let election_hash = election_tx.hash();
        store
            .commit_unchecked(vec![Transaction::Election(election_tx)], &mut rng)
            .unwrap();

        let question = fixture.election.questions[0].id;
        let ballot = EncryptedBallot {
            question_id: question,
            answer: encrypt_binary_with_proof(&fixture.election.enc_pub_key, 1, &mut rng).unwrap(),
        };

        let vote = Signed::sign(
            &fixture.voters[0],
            TxVote {
                election: election_hash,
                ballots: [ballot.clone()].into_iter().collect(),
            },
        )
        .unwrap();
        vote.verify(&store).unwrap();

        // vote for a non-committed election
        let missing = Signed::sign(
            &fixture.voters[0],
            TxVote {
                election: Uint256::random(&mut rng),
                ballots: [ballot.clone()].into_iter().collect(),
            },
        )
        .unwrap();
        assert!(matches!(
            missing.verify(&store),
            Err(VerifyError::MissingTransaction(_))
        ));

        // unknown question id
        let stray = EncryptedBallot {
            question_id: Uint160::random(&mut rng),
            answer: ballot.answer.clone(),
        };
        let bad = Signed::sign(
            &fixture.voters[0],
            TxVote {
                election: election_hash,
                ballots: [stray].into_iter().collect(),
            },
        )
        .unwrap();
        assert_eq!(bad.verify(&store), Err(VerifyError::BallotInvalid));

        // signer outside the voter set
        let outsider = SignKeyPair::generate(Role::Vote, &mut rng);
        let rejected = Signed::sign(
            &outsider,
            TxVote {
                election: election_hash,
                ballots: [ballot].into_iter().collect(),
            },
        )
        .unwrap();
        assert_eq!(rejected.verify(&store), Err(VerifyError::Unauthorized));
    }
}
