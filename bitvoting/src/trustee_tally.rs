use std::collections::BTreeSet;

use crate::chain::ChainStore;
use crate::paillier::verify_partial_decryption;
use crate::{PublicKey, Role, TalliedBallots, TxBody, TxType, Uint160, Uint256, VerifyError};

/// Transaction carrying one trustee's partial decryption of a tally,
/// one proof per question.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxTrusteeTally {
    /// Hash of the tally transaction being answered.
    pub tally: Uint256,
    pub partial_decryption: BTreeSet<TalliedBallots>,
}

impl TxBody for TxTrusteeTally {
    const TX_TYPE: TxType = TxType::TrusteeTally;
    const REQUIRED_ROLE: Role = Role::Trustee;

    fn verify<S: ChainStore + ?Sized>(
        &self,
        signer: &PublicKey,
        chain: &S,
    ) -> Result<(), VerifyError> {
        let tally_tx = chain.get_tally(&self.tally)?;
        let election_tx = chain.get_election(&tally_tx.body.election)?;
        let election = &election_tx.body.election;

        if !election.is_trustee(signer) {
            return Err(VerifyError::Unauthorized);
        }

        // exactly one partial decryption per question
        if self.partial_decryption.len() != election.questions.len() {
            return Err(VerifyError::BallotInvalid);
        }

        let mut answered: BTreeSet<Uint160> = BTreeSet::new();
        for ballots in &self.partial_decryption {
            if election.question(&ballots.question_id).is_none() {
                return Err(VerifyError::BallotInvalid);
            }
            if !answered.insert(ballots.question_id) {
                return Err(VerifyError::BallotInvalid);
            }
            if !verify_partial_decryption(&election.enc_pub_key, &ballots.answers) {
                return Err(VerifyError::BallotInvalid);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemStore;
    use crate::paillier::{
        encrypt_binary_with_proof, homomorphic_mul, partial_decrypt_with_proof,
    };
    use crate::testutil::election_fixture;
    use crate::{EncryptedBallot, Signed, Transaction, TxElection, TxTally, TxVote};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn trustee_tally_verification_rules() {
        let mut rng = StdRng::seed_from_u64(71);
        let store = MemStore::new();
        let fixture = election_fixture(&mut rng, 1, 2, 2);
        let key = &fixture.election.enc_pub_key;

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
        let proof = encrypt_binary_with_proof(key, 1, &mut rng).unwrap();
        let sum = homomorphic_mul(key, &crate::paillier::ciphertext_one(), &proof.c);
        let vote = Signed::sign(
            &fixture.voters[0],
            TxVote {
                election: election_hash,
                ballots: [EncryptedBallot {
                    question_id: question,
                    answer: proof,
                }]
                .into_iter()
                .collect(),
            },
        )
        .unwrap();
        let vote_block = store
            .commit_unchecked(vec![Transaction::Vote(vote)], &mut rng)
            .unwrap();

        let tally_tx = Signed::sign(
            &fixture.creator,
            TxTally {
                election: election_hash,
                last_block: vote_block.hash(),
                end_election: true,
            },
        )
        .unwrap();
        let tally_hash = tally_tx.hash();
        store
            .commit_unchecked(vec![Transaction::Tally(tally_tx)], &mut rng)
            .unwrap();

        let partial = partial_decrypt_with_proof(key, &fixture.partial_keys[0], &sum, &mut rng);
        let good = Signed::sign(
            &fixture.trustees[0],
            TxTrusteeTally {
                tally: tally_hash,
                partial_decryption: [TalliedBallots {
                    question_id: question,
                    answers: partial.clone(),
                }]
                .into_iter()
                .collect(),
            },
        )
        .unwrap();
        good.verify(&store).unwrap();

        // non-trustee signers are rejected
        let outsider = crate::SignKeyPair::generate(Role::Trustee, &mut rng);
        let rejected = Signed::sign(
            &outsider,
            TxTrusteeTally {
                tally: tally_hash,
                partial_decryption: [TalliedBallots {
                    question_id: question,
                    answers: partial.clone(),
                }]
                .into_iter()
                .collect(),
            },
        )
        .unwrap();
        assert_eq!(rejected.verify(&store), Err(VerifyError::Unauthorized));

        // a tampered proof is rejected
        let mut bad_partial = partial;
        bad_partial.ci2 += num_bigint_dig::BigUint::from(1u32);
        let tampered = Signed::sign(
            &fixture.trustees[0],
            TxTrusteeTally {
                tally: tally_hash,
                partial_decryption: [TalliedBallots {
                    question_id: question,
                    answers: bad_partial,
                }]
                .into_iter()
                .collect(),
            },
        )
        .unwrap();
        assert_eq!(tampered.verify(&store), Err(VerifyError::BallotInvalid));
    }
}
