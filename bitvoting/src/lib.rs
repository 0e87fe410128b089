#[macro_use]
extern crate serde;

mod block;
mod election;
mod election_state;
mod error;
mod hash;
mod keyring;
mod keys;
mod miner;
mod node;
mod serde_hex;
mod tally;
mod transaction;
mod trustee_tally;
mod uint;
mod vote;

pub mod chain;
pub mod net;
pub mod paillier;

pub use block::*;
pub use chain::{ChainError, ChainStore, DiskStore, MemStore};
pub use election::*;
pub use election_state::*;
pub use error::*;
pub use hash::*;
pub use keyring::*;
pub use keys::*;
pub use miner::*;
pub use node::*;
pub use serde_hex::*;
pub use tally::*;
pub use transaction::*;
pub use trustee_tally::*;
pub use uint::*;
pub use vote::*;

#[cfg(test)]
mod tests;

#[cfg(test)]
pub(crate) mod testutil;
