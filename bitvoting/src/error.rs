use crate::Uint256;

use thiserror::Error;

/// Operational error types
#[derive(Debug, Error)]
pub enum Error {
    #[error("bitvoting: secp256k1 error: {0}")]
    Secp256k1(#[from] secp256k1::Error),

    #[error("bitvoting: CBOR encoding error: {0}")]
    Cbor(#[from] serde_cbor::Error),

    #[error("bitvoting: I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bitvoting: invalid hexadecimal: {0}")]
    BadHex(#[from] hex::FromHexError),

    #[error("bitvoting: fixed-width integer must be {expected} bytes, got {got}")]
    BadUintLength { expected: usize, got: usize },

    #[error("bitvoting: key has wrong role for this operation")]
    WrongKeyRole,

    #[error("bitvoting: signing key not found in key ring")]
    SignKeyMissing,

    #[error("bitvoting: not involved in this election, no local state for it")]
    ElectionUnknown,

    #[error("bitvoting: element of Z*_n expected, value shares a factor with n")]
    NotInvertible,

    #[error("bitvoting: not enough partial decryptions: need {needed}, found {found}")]
    NotEnoughShares { needed: usize, found: usize },

    #[error("bitvoting: no votes found up to the requested block")]
    NoVotesToTally,

    #[error("bitvoting: decrypted tally does not fit a vote count")]
    TallyValueOutOfRange,

    #[error("{0}")]
    Vote(#[from] VoteError),

    #[error("bitvoting: network is shut down")]
    NetworkDown,

    #[error("{0}")]
    Verify(#[from] VerifyError),

    #[error("{0}")]
    Chain(#[from] crate::chain::ChainError),
}

/// Transaction and block verification errors. The offending transaction or
/// block is dropped, never retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VerifyError {
    #[error("bitvoting verify: signature could not be verified")]
    SignatureInvalid,

    #[error("bitvoting verify: signature encoding is not canonical DER")]
    NonCanonicalSignature,

    #[error("bitvoting verify: key role does not match transaction type")]
    WrongRole,

    #[error("bitvoting verify: signer is not authorized for this election")]
    Unauthorized,

    #[error("bitvoting verify: required transaction {0} is not in the chain")]
    MissingTransaction(Uint256),

    #[error("bitvoting verify: tally was not signed by the election creator")]
    CreatorKeyMismatch,

    #[error("bitvoting verify: referenced block holds no votes for this election")]
    MissingVotes,

    #[error("bitvoting verify: ballot is malformed or its proof does not check")]
    BallotInvalid,

    #[error("bitvoting verify: election attributes are missing or out of range")]
    ElectionInvalid,

    #[error("bitvoting verify: block does not extend the local chain tip")]
    ChainMismatch,

    #[error("bitvoting verify: block timestamp is implausible")]
    BadTimestamp,

    #[error("bitvoting verify: block hash exceeds the mining target")]
    AboveTarget,

    #[error("bitvoting verify: block or transaction already committed")]
    AlreadyKnown,
}

/// Errors raised while turning a set of answers into a vote
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VoteError {
    #[error("bitvoting vote: wrong number of answers for this election")]
    InvalidCount,

    #[error("bitvoting vote: a question was answered more than once")]
    DuplicateQuestion,

    #[error("bitvoting vote: answer references an unknown question")]
    UnknownQuestion,

    #[error("bitvoting vote: answer must be -1 (abstain), 0 or 1")]
    InvalidAnswer,
}
