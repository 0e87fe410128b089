//! Shared fixtures for unit and scenario tests.

use std::path::PathBuf;

use rand::rngs::StdRng;

use crate::paillier::{keygen, PaillierPartialKey};
use crate::{Election, Question, Role, SignKeyPair};

/// A directory under the system temp dir, removed on drop.
pub struct TempDir {
    pub path: PathBuf,
}

impl TempDir {
    pub fn new(tag: &str) -> TempDir {
        let path = std::env::temp_dir().join(format!(
            "bitvoting-test-{}-{}",
            tag,
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&path).unwrap();
        TempDir { path }
    }
}

impl Drop for TempDir {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.path);
    }
}

pub struct ElectionFixture {
    pub election: Election,
    pub creator: SignKeyPair,
    pub voters: Vec<SignKeyPair>,
    pub trustees: Vec<SignKeyPair>,
    pub partial_keys: Vec<PaillierPartialKey>,
}

/// A small election: `voters` voter keys, `trustees` trustee keys, one
/// yes/no question, threshold = number of trustees, 256-bit key.
pub fn election_fixture(
    rng: &mut StdRng,
    voters: usize,
    trustees: usize,
    threshold: u32,
) -> ElectionFixture {
    let (enc_pub_key, partial_keys) = keygen(256, trustees as u32, threshold, rng).unwrap();
    let creator = SignKeyPair::generate(Role::Election, rng);
    let voters: Vec<_> = (0..voters)
        .map(|_| SignKeyPair::generate(Role::Vote, rng))
        .collect();
    let trustees: Vec<_> = (0..trustees)
        .map(|_| SignKeyPair::generate(Role::Trustee, rng))
        .collect();

    let election = Election {
        name: "board".into(),
        description: "annual board vote".into(),
        questions: vec![Question::yes_no("re-elect the chair?", rng)],
        ending_time_ms: 0,
        enc_pub_key,
        voters: voters.iter().map(|v| v.key_id()).collect(),
        trustees: trustees.iter().map(|t| t.key_id()).collect(),
    };

    ElectionFixture {
        election,
        creator,
        voters,
        trustees,
        partial_keys,
    }
}

