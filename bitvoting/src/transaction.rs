use std::fmt;

use crate::chain::ChainStore;
use crate::{
    sha256d, verify_signature, Error, PublicKey, Role, SignKeyPair, Signature, TxElection, TxTally,
    TxTrusteeTally, TxVote, Uint256, VerifyError,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    Vote,
    Election,
    Tally,
    TrusteeTally,
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TxType::Vote => "vote",
            TxType::Election => "election",
            TxType::Tally => "tally",
            TxType::TrusteeTally => "trustee_tally",
        };
        write!(f, "{}", name)
    }
}

/// A transaction body: the payload of one of the four transaction variants.
///
/// Bodies know their type tag, the key role allowed to sign them, and how to
/// verify themselves against the committed chain.
pub trait TxBody: serde::Serialize + Clone {
    const TX_TYPE: TxType;
    const REQUIRED_ROLE: Role;

    fn verify<S: ChainStore + ?Sized>(
        &self,
        signer: &PublicKey,
        chain: &S,
    ) -> Result<(), VerifyError>;
}

/// A signable envelope: the body plus the verification key and a detached
/// DER signature. The hash covers the type tag, the verification key and the
/// body, never the signature, so it is stable across signing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Signed<T> {
    pub public_key: PublicKey,
    pub body: T,
    pub signature: Signature,
}

#[derive(Serialize)]
struct SigningView<'a, T: serde::Serialize> {
    tx_type: TxType,
    public_key: &'a PublicKey,
    body: &'a T,
}

impl<T: TxBody> Signed<T> {
    /// Sign a body with the given keypair. The key must carry the role the
    /// transaction type prescribes.
    pub fn sign(pair: &SignKeyPair, body: T) -> Result<Self, Error> {
        if pair.role() != T::REQUIRED_ROLE {
            return Err(Error::WrongKeyRole);
        }
        let mut signed = Signed {
            public_key: pair.public.clone(),
            body,
            signature: Signature::default(),
        };
        let hash = signed.hash();
        signed.signature = pair.key.sign(&hash);
        Ok(signed)
    }

    /// Canonical encoding of everything except the signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let view = SigningView {
            tx_type: T::TX_TYPE,
            public_key: &self.public_key,
            body: &self.body,
        };
        serde_cbor::to_vec(&view).expect("bitvoting: unable to serialize transaction")
    }

    pub fn hash(&self) -> Uint256 {
        sha256d(&self.signing_bytes())
    }

    pub fn verify_signature(&self) -> Result<(), VerifyError> {
        if self.public_key.role() != T::REQUIRED_ROLE {
            return Err(VerifyError::WrongRole);
        }
        verify_signature(&self.public_key, &self.hash(), &self.signature)
    }

    /// Full verification: signature, role, then the body rules against the
    /// chain.
    pub fn verify<S: ChainStore + ?Sized>(&self, chain: &S) -> Result<(), VerifyError> {
        self.verify_signature()?;
        self.body.verify(&self.public_key, chain)
    }
}

/// One of the four transaction variants, as carried in blocks and gossip.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum Transaction {
    Election(Signed<TxElection>),
    Vote(Signed<TxVote>),
    Tally(Signed<TxTally>),
    TrusteeTally(Signed<TxTrusteeTally>),
}

impl Transaction {
    pub fn tx_type(&self) -> TxType {
        match self {
            Transaction::Election(_) => TxType::Election,
            Transaction::Vote(_) => TxType::Vote,
            Transaction::Tally(_) => TxType::Tally,
            Transaction::TrusteeTally(_) => TxType::TrusteeTally,
        }
    }

    pub fn hash(&self) -> Uint256 {
        match self {
            Transaction::Election(tx) => tx.hash(),
            Transaction::Vote(tx) => tx.hash(),
            Transaction::Tally(tx) => tx.hash(),
            Transaction::TrusteeTally(tx) => tx.hash(),
        }
    }

    pub fn public_key(&self) -> &PublicKey {
        match self {
            Transaction::Election(tx) => &tx.public_key,
            Transaction::Vote(tx) => &tx.public_key,
            Transaction::Tally(tx) => &tx.public_key,
            Transaction::TrusteeTally(tx) => &tx.public_key,
        }
    }

    pub fn verify<S: ChainStore + ?Sized>(&self, chain: &S) -> Result<(), VerifyError> {
        match self {
            Transaction::Election(tx) => tx.verify(chain),
            Transaction::Vote(tx) => tx.verify(chain),
            Transaction::Tally(tx) => tx.verify(chain),
            Transaction::TrusteeTally(tx) => tx.verify(chain),
        }
    }

    pub fn pack(&self) -> Vec<u8> {
        serde_cbor::to_vec(self).expect("bitvoting: unable to serialize transaction")
    }

    pub fn unpack(packed: &[u8]) -> Result<Self, Error> {
        Ok(serde_cbor::from_slice(packed)?)
    }
}

impl From<Signed<TxElection>> for Transaction {
    fn from(tx: Signed<TxElection>) -> Self {
        Transaction::Election(tx)
    }
}

impl From<Signed<TxVote>> for Transaction {
    fn from(tx: Signed<TxVote>) -> Self {
        Transaction::Vote(tx)
    }
}

impl From<Signed<TxTally>> for Transaction {
    fn from(tx: Signed<TxTally>) -> Self {
        Transaction::Tally(tx)
    }
}

impl From<Signed<TxTrusteeTally>> for Transaction {
    fn from(tx: Signed<TxTrusteeTally>) -> Self {
        Transaction::TrusteeTally(tx)
    }
}
