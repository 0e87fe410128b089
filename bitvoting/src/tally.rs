use crate::chain::ChainStore;
use crate::{PublicKey, Role, Transaction, TxBody, TxType, Uint256, VerifyError};

/// Transaction announcing a vote count, published by the election creator.
/// `last_block` marks the last block whose votes take part; `end_election`
/// closes the election for good.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TxTally {
    pub election: Uint256,
    pub last_block: Uint256,
    pub end_election: bool,
}

impl TxBody for TxTally {
    const TX_TYPE: TxType = TxType::Tally;
    const REQUIRED_ROLE: Role = Role::Election;

    fn verify<S: ChainStore + ?Sized>(
        &self,
        signer: &PublicKey,
        chain: &S,
    ) -> Result<(), VerifyError> {
        let election_tx = chain.get_election(&self.election)?;

        // the referenced block must exist and contain at least one vote for
        // this election, otherwise there is nothing to count
        let last_block = chain
            .block(&self.last_block)
            .map_err(|_| VerifyError::MissingVotes)?;
        let has_votes = last_block.transactions.iter().any(|tx| match tx {
            Transaction::Vote(vote) => vote.body.election == self.election,
            _ => false,
        });
        if !has_votes {
            return Err(VerifyError::MissingVotes);
        }

        // only the election creator may call a tally
        if *signer != election_tx.public_key {
            return Err(VerifyError::CreatorKeyMismatch);
        }

        Ok(())
    }
}
