use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::chain::{ChainStore, DiskStore, MemStore};
use crate::paillier::{combine, keygen};
use crate::net::NetConfig;
use crate::testutil::{election_fixture, ElectionFixture, TempDir};
use crate::*;

fn commit_election(
    store: &impl ChainStore,
    fixture: &ElectionFixture,
    rng: &mut StdRng,
) -> Uint256 {
    let tx = Signed::sign(
        &fixture.creator,
        TxElection {
            election: fixture.election.clone(),
        },
    )
    .unwrap();
    let hash = tx.hash();
    store
        .commit_unchecked(vec![Transaction::Election(tx)], rng)
        .unwrap();
    hash
}

fn signed_vote(
    fixture: &ElectionFixture,
    voter: usize,
    election: Uint256,
    answer: u64,
    rng: &mut StdRng,
) -> Signed<TxVote> {
    let ballot = EncryptedBallot {
        question_id: fixture.election.questions[0].id,
        answer: crate::paillier::encrypt_binary_with_proof(
            &fixture.election.enc_pub_key,
            answer,
            rng,
        )
        .unwrap(),
    };
    Signed::sign(
        &fixture.voters[voter],
        TxVote {
            election,
            ballots: [ballot].into_iter().collect(),
        },
    )
    .unwrap()
}

fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if check() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    false
}

/// Seven ballots [1,0,1,1,0,0,1] for one question, summed homomorphically
/// and decrypted by all three trustees: the count comes out as 4.
#[test]
fn ballots_sum_to_four_through_the_full_tally_path() {
    let mut rng = StdRng::seed_from_u64(201);
    let store = MemStore::new();
    let fixture = election_fixture(&mut rng, 7, 3, 3);
    let election_hash = commit_election(&store, &fixture, &mut rng);

    let answers = [1u64, 0, 1, 1, 0, 0, 1];
    let votes: Vec<Transaction> = answers
        .iter()
        .enumerate()
        .map(|(i, &answer)| {
            Transaction::Vote(signed_vote(&fixture, i, election_hash, answer, &mut rng))
        })
        .collect();
    let vote_block = store.commit_unchecked(votes, &mut rng).unwrap();

    let tally = Signed::sign(
        &fixture.creator,
        TxTally {
            election: election_hash,
            last_block: vote_block.hash(),
            end_election: true,
        },
    )
    .unwrap();
    tally.verify(&store).unwrap();

    let state = ElectionState::new(store.get_election(&election_hash).unwrap());
    let mut proofs = Vec::new();
    for key in &fixture.partial_keys {
        let trustee_tally = state
            .create_trustee_tally(&tally, key, &store, &mut rng)
            .unwrap();
        assert_eq!(trustee_tally.partial_decryption.len(), 1);
        proofs.push(
            trustee_tally
                .partial_decryption
                .iter()
                .next()
                .unwrap()
                .answers
                .clone(),
        );
    }

    let count = combine(&fixture.election.enc_pub_key, &proofs).unwrap();
    assert_eq!(count, num_bigint_dig::BigUint::from(4u32));

    // two of three shares interpolate to something else entirely
    let short = combine(&fixture.election.enc_pub_key, &proofs[..2]).unwrap();
    assert_ne!(short, num_bigint_dig::BigUint::from(4u32));
}

/// Three blocks carrying elections "E1", "E2", "E3" come back
/// from the disk store in order with chained hashes.
#[test]
fn disk_store_commit_and_retrieval() {
    let mut rng = StdRng::seed_from_u64(202);
    let dir = TempDir::new("chain-commit");
    let store = DiskStore::open(&dir.path).unwrap();

    let fixture = election_fixture(&mut rng, 1, 2, 2);
    let mut tx_hashes = Vec::new();
    for name in ["E1", "E2", "E3"] {
        let mut election = fixture.election.clone();
        election.name = name.to_owned();
        let tx = Signed::sign(&fixture.creator, TxElection { election }).unwrap();
        tx_hashes.push(tx.hash());
        store
            .commit_unchecked(vec![Transaction::Election(tx)], &mut rng)
            .unwrap();
    }

    let blocks = store.blocks_from(&store.genesis()).unwrap();
    assert_eq!(blocks.len(), 3);
    let mut prev = store.genesis();
    for (block, tx_hash) in blocks.iter().zip(&tx_hashes) {
        assert_eq!(block.header.prev_block_hash, prev);
        assert!(block.contains_transaction(tx_hash));
        prev = block.hash();
    }
    assert_eq!(store.latest(), prev);

    // transactions are reachable through their locators
    for (tx_hash, name) in tx_hashes.iter().zip(["E1", "E2", "E3"]) {
        assert!(store.contains_transaction(tx_hash));
        match store.transaction(tx_hash).unwrap() {
            Transaction::Election(tx) => assert_eq!(tx.body.election.name, name),
            other => panic!("wrong transaction type: {}", other.tx_type()),
        }
    }

    // the store state survives a reopen
    drop(store);
    let reopened = DiskStore::open(&dir.path).unwrap();
    assert_eq!(reopened.latest(), prev);
    assert!(reopened.contains_transaction(&tx_hashes[0]));
}

/// Cutting the chain after block three forgets blocks four
/// and five, shrinks the block file, and re-appending the removed blocks
/// restores the chain byte for byte.
#[test]
fn disk_store_cut_off_truncates_and_restores() {
    let mut rng = StdRng::seed_from_u64(203);
    let dir = TempDir::new("chain-cutoff");
    let store = DiskStore::open(&dir.path).unwrap();

    let mut blocks = Vec::new();
    for _ in 0..5 {
        blocks.push(store.commit_unchecked(vec![], &mut rng).unwrap());
    }
    let blockfile = dir
        .path
        .join("databases")
        .join("blockchain")
        .join("blockfile_0000000000.bin");
    let len_after_five = std::fs::metadata(&blockfile).unwrap().len();

    store.cut_off_after(&blocks[2].hash()).unwrap();
    assert_eq!(store.latest(), blocks[2].hash());
    assert_eq!(store.blocks_from(&store.genesis()).unwrap().len(), 3);
    assert!(!store.contains_block(&blocks[3].hash()));
    assert!(!store.contains_block(&blocks[4].hash()));

    let len_after_cut = std::fs::metadata(&blockfile).unwrap().len();
    assert!(len_after_cut < len_after_five);

    // re-appending the removed blocks restores the exact previous state
    store.add_block(&blocks[3]).unwrap();
    store.add_block(&blocks[4]).unwrap();
    assert_eq!(store.latest(), blocks[4].hash());
    assert_eq!(std::fs::metadata(&blockfile).unwrap().len(), len_after_five);
}

/// Of two votes by the same voter, the first is mined first,
/// the second follows in the next block, and the tally counts the later one.
#[test]
fn duplicate_vote_is_deferred_and_the_last_vote_counts() {
    let mut rng = StdRng::seed_from_u64(204);
    let chain = Arc::new(MemStore::new());
    let fixture = election_fixture(&mut rng, 1, 2, 2);
    let election_hash = commit_election(&*chain, &fixture, &mut rng);

    let (events_tx, events_rx) = std::sync::mpsc::channel();
    let mining_pair = SignKeyPair::generate(Role::Mining, &mut rng);
    let manager = MiningManager::new(
        chain.clone(),
        mining_pair,
        events_tx,
        MiningConfig {
            min_transactions: 1,
            leading_zero_bits: 4,
            nonces_per_batch: 100,
            threads: 2,
        },
    );

    let v1 = signed_vote(&fixture, 0, election_hash, 1, &mut rng);
    let v2 = signed_vote(&fixture, 0, election_hash, 0, &mut rng);
    manager
        .add_transaction(Transaction::Vote(v1.clone()))
        .unwrap();
    manager
        .add_transaction(Transaction::Vote(v2.clone()))
        .unwrap();

    let mut mined = Vec::new();
    while mined.len() < 2 {
        match events_rx.recv_timeout(Duration::from_secs(30)).unwrap() {
            NodeEvent::BlockFound(block) => {
                chain.add_block(&block).unwrap();
                manager.on_new_block(&block);
                mined.push(block);
            }
            _ => continue,
        }
    }

    // first block holds only the earlier vote, the second the later one
    assert!(mined[0].contains_transaction(&v1.hash()));
    assert!(!mined[0].contains_transaction(&v2.hash()));
    assert!(mined[1].contains_transaction(&v2.hash()));

    // the last-vote rule counts v2 (answer 0), not v1 (answer 1)
    let tally = Signed::sign(
        &fixture.creator,
        TxTally {
            election: election_hash,
            last_block: mined[1].hash(),
            end_election: true,
        },
    )
    .unwrap();

    let state = ElectionState::new(chain.get_election(&election_hash).unwrap());
    let mut proofs = Vec::new();
    for key in &fixture.partial_keys {
        let trustee_tally = state
            .create_trustee_tally(&tally, key, &*chain, &mut rng)
            .unwrap();
        proofs.push(
            trustee_tally
                .partial_decryption
                .iter()
                .next()
                .unwrap()
                .answers
                .clone(),
        );
    }
    let count = combine(&fixture.election.enc_pub_key, &proofs).unwrap();
    assert_eq!(count, num_bigint_dig::BigUint::from(0u32));
}

/// A full election on a single node: create, vote, tally, import trustee
/// shares, and read the decrypted result, with every step carried through
/// mined blocks.
#[test]
fn full_election_flow_on_one_node() {
    let mut rng = StdRng::seed_from_u64(205);
    let export_dir = TempDir::new("shares");

    let chain: Arc<dyn ChainStore> = Arc::new(MemStore::new());
    let keyring = Arc::new(Keyring::ephemeral());
    let elections = Arc::new(ElectionDb::ephemeral());

    let creator = keyring.generate(Role::Election, &mut rng).unwrap();
    let voter = keyring.generate(Role::Vote, &mut rng).unwrap();
    let trustee_pairs = vec![
        keyring.generate(Role::Trustee, &mut rng).unwrap(),
        keyring.generate(Role::Trustee, &mut rng).unwrap(),
    ];

    let (enc_pub_key, partial_keys) = keygen(256, 2, 2, &mut rng).unwrap();
    let election = Election {
        name: "flow".into(),
        description: "single node end to end".into(),
        questions: vec![Question::yes_no("proceed?", &mut rng)],
        ending_time_ms: unix_time_ms() + 3_600_000,
        enc_pub_key,
        voters: [voter.key_id()].into_iter().collect(),
        trustees: trustee_pairs.iter().map(|t| t.key_id()).collect(),
    };

    let config = NodeConfig {
        net: NetConfig {
            port: 0,
            ..NetConfig::default()
        },
        mining: MiningConfig {
            min_transactions: 1,
            leading_zero_bits: 4,
            nonces_per_batch: 100,
            threads: 2,
        },
        connect: vec![],
    };
    let node = Node::new(
        config,
        chain.clone(),
        keyring.clone(),
        elections.clone(),
        Box::new(NoHooks),
    )
    .unwrap();
    node.start().unwrap();
    let handle = node.spawn();

    // create the election; the node mines it and starts tracking it
    let election_hash = node
        .on_election_created(election, &creator, &export_dir.path, partial_keys)
        .unwrap();
    assert!(wait_until(Duration::from_secs(30), || {
        elections.contains(&election_hash)
    }));

    // vote yes
    let answers: BTreeSet<Ballot> = {
        let state = elections.get(&election_hash).unwrap();
        [Ballot {
            question_id: state.election().questions[0].id,
            answer: 1,
        }]
        .into_iter()
        .collect()
    };
    node.on_vote(&election_hash, &answers, &voter).unwrap();
    assert!(wait_until(Duration::from_secs(30), || {
        elections
            .get(&election_hash)
            .map(|state| state.votes_registered.contains(&voter.key_id()))
            .unwrap_or(false)
    }));

    // close the election with a tally over the whole chain
    node.on_tally(&election_hash, true, chain.latest()).unwrap();
    assert!(wait_until(Duration::from_secs(30), || {
        elections
            .get(&election_hash)
            .map(|state| state.ended && !state.tallies.is_empty())
            .unwrap_or(false)
    }));

    // trustees import their exported shares, publishing partial tallies
    for trustee in &trustee_pairs {
        let file = export_dir
            .path
            .join(format!("trustee_{}", &trustee.key_id().to_hex()[..8]));
        let private_key = ElectionPrivateKey::load_from(&file).unwrap();
        assert_eq!(private_key.election, election_hash);
        node.on_new_paillier_key(private_key).unwrap();
    }

    // once both partial tallies are mined, the result appears: 1 yes vote
    assert!(wait_until(Duration::from_secs(60), || {
        elections
            .get(&election_hash)
            .map(|state| state.results_available())
            .unwrap_or(false)
    }));
    let state = elections.get(&election_hash).unwrap();
    let results = state.results.values().next().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results.iter().next().unwrap().answer, 1);

    node.shutdown();
    handle.join().unwrap();
}

/// Two nodes over loopback TCP: the second node joins late and catches up
/// through the block-request exchange, then receives new blocks by flood.
#[test]
fn two_nodes_sync_over_loopback() {
    let mut rng = StdRng::seed_from_u64(206);

    let make_node = |mining: MiningConfig,
                     connect: Vec<String>,
                     rng: &mut StdRng|
     -> (Arc<Node>, Arc<ElectionDb>, Arc<dyn ChainStore>) {
        let chain: Arc<dyn ChainStore> = Arc::new(MemStore::new());
        let keyring = Arc::new(Keyring::ephemeral());
        // seeded key generation for the mining key
        keyring.generate(Role::Mining, rng).unwrap();
        let elections = Arc::new(ElectionDb::ephemeral());
        let config = NodeConfig {
            net: NetConfig {
                port: 0,
                ..NetConfig::default()
            },
            mining,
            connect,
        };
        let node = Node::new(
            config,
            chain.clone(),
            keyring,
            elections.clone(),
            Box::new(NoHooks),
        )
        .unwrap();
        (node, elections, chain)
    };

    let miner_config = MiningConfig {
        min_transactions: 1,
        leading_zero_bits: 4,
        nonces_per_batch: 100,
        threads: 2,
    };
    // the second node never mines; it only follows the chain
    let follower_config = MiningConfig {
        min_transactions: usize::MAX,
        ..miner_config.clone()
    };

    let (node_a, _elections_a, chain_a) = make_node(miner_config, vec![], &mut rng);
    let addr_a = node_a.start().unwrap();
    let handle_a = node_a.spawn();

    // node A commits an election before B ever connects
    let fixture = election_fixture(&mut rng, 1, 2, 2);
    let export = TempDir::new("sync-shares");
    let election_hash = node_a
        .on_election_created(
            fixture.election.clone(),
            &fixture.creator,
            &export.path,
            fixture.partial_keys.clone(),
        )
        .unwrap();
    assert!(wait_until(Duration::from_secs(30), || {
        chain_a.contains_transaction(&election_hash)
    }));

    // B joins and syncs the existing chain through a block request
    let (node_b, _elections_b, chain_b) = make_node(
        follower_config,
        vec![format!("127.0.0.1:{}", addr_a.port())],
        &mut rng,
    );
    node_b.start().unwrap();
    let handle_b = node_b.spawn();

    assert!(wait_until(Duration::from_secs(30), || {
        chain_b.contains_transaction(&election_hash)
    }));

    // a new transaction published on A reaches B inside a flooded block
    let vote = signed_vote(&fixture, 0, election_hash, 1, &mut rng);
    let vote_hash = vote.hash();
    node_a
        .publish_transaction(Transaction::Vote(vote))
        .unwrap();
    assert!(wait_until(Duration::from_secs(30), || {
        chain_b.contains_transaction(&vote_hash)
    }));
    assert_eq!(chain_a.latest(), chain_b.latest());

    node_a.shutdown();
    node_b.shutdown();
    handle_a.join().unwrap();
    handle_b.join().unwrap();
}
