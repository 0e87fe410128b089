use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::chain::ChainStore;
use crate::{
    mining_target, unix_time_ms, Block, NodeEvent, SignKeyPair, Transaction, Uint256, VerifyError,
};

#[derive(Debug, Clone)]
pub struct MiningConfig {
    /// Minimum number of transactions mined into one block.
    pub min_transactions: usize,
    /// Leading zero bits of the hash target (difficulty).
    pub leading_zero_bits: u32,
    /// Nonces a worker reserves per visit to the shared cursor.
    pub nonces_per_batch: u32,
    /// Worker threads; 0 means hardware concurrency.
    pub threads: usize,
}

impl Default for MiningConfig {
    fn default() -> MiningConfig {
        MiningConfig {
            min_transactions: 1,
            leading_zero_bits: 13,
            nonces_per_batch: 1000,
            threads: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiningStatus {
    Started,
    InProgress,
    NotEnoughTransactions,
}

/// One proof-of-work round over a fixed candidate transaction set.
///
/// Workers count up from a random starting nonce, reserving batches from the
/// shared cursor; the nonce space is exhausted when the cursor comes back
/// around to the start. The stop flag preempts workers between nonces.
struct MiningRound {
    transactions: Vec<Transaction>,
    prev_block_hash: Uint256,
    time_ms: i64,
    target: Uint256,
    start_nonce: u32,
    cursor: Mutex<u32>,
    found: Mutex<bool>,
    stop: AtomicBool,
    threads_done: Mutex<usize>,
    num_threads: usize,
    batch: u32,
}

impl MiningRound {
    /// Reserve the next batch. Equal bounds mean the space is exhausted.
    fn consume_nonces(&self) -> (u32, u32) {
        let mut cursor = self.cursor.lock();
        let lower = *cursor;
        let until_start = self.start_nonce.wrapping_sub(lower);
        if until_start < self.batch {
            *cursor = self.start_nonce;
        } else {
            *cursor = lower.wrapping_add(self.batch);
        }
        (lower, *cursor)
    }
}

struct ManagerInner {
    queue: Vec<Transaction>,
    round: Option<Arc<MiningRound>>,
}

/// Owns the queue of verified transactions and runs one mining round at a
/// time. Found blocks are handed to the node's event loop, which publishes
/// them through the same path as network blocks.
pub struct MiningManager {
    chain: Arc<dyn ChainStore>,
    config: MiningConfig,
    keypair: SignKeyPair,
    events: Sender<NodeEvent>,
    inner: Arc<Mutex<ManagerInner>>,
}

impl MiningManager {
    pub fn new(
        chain: Arc<dyn ChainStore>,
        keypair: SignKeyPair,
        events: Sender<NodeEvent>,
        config: MiningConfig,
    ) -> MiningManager {
        info!(
            target_bits = config.leading_zero_bits,
            threads = config.threads,
            "mining manager ready"
        );
        MiningManager {
            chain,
            config,
            keypair,
            events,
            inner: Arc::new(Mutex::new(ManagerInner {
                queue: Vec::new(),
                round: None,
            })),
        }
    }

    pub fn is_mining(&self) -> bool {
        self.inner.lock().round.is_some()
    }

    /// Hashes of the queued transactions, in queue order.
    pub fn queue_hashes(&self) -> Vec<Uint256> {
        self.inner.lock().queue.iter().map(|tx| tx.hash()).collect()
    }

    /// Verify a transaction and append it to the queue, then try to start a
    /// round. Invalid transactions are rejected outright.
    pub fn add_transaction(&self, transaction: Transaction) -> Result<MiningStatus, VerifyError> {
        if let Err(err) = transaction.verify(&*self.chain) {
            warn!(
                tx_type = %transaction.tx_type(),
                hash = %transaction.hash(),
                %err,
                "rejecting transaction"
            );
            return Err(err);
        }
        debug!(
            tx_type = %transaction.tx_type(),
            hash = %transaction.hash(),
            "accepting transaction"
        );

        self.inner.lock().queue.push(transaction);
        Ok(self.run_if_possible())
    }

    /// Start a round if none is running and the duplicate-vote filter leaves
    /// enough transactions for a block.
    pub fn run_if_possible(&self) -> MiningStatus {
        let mut inner = self.inner.lock();
        if inner.round.is_some() {
            return MiningStatus::InProgress;
        }

        let selected_idx = self.select_for_block(&inner.queue);
        if selected_idx.len() < self.config.min_transactions {
            return MiningStatus::NotEnoughTransactions;
        }

        // pull the selection out of the queue, keep the rest in order
        let mut selected = Vec::with_capacity(selected_idx.len());
        let mut remaining = Vec::new();
        for (i, tx) in inner.queue.drain(..).enumerate() {
            if selected_idx.contains(&i) {
                selected.push(tx);
            } else {
                remaining.push(tx);
            }
        }
        inner.queue = remaining;

        info!(transactions = selected.len(), "starting mining round");

        let num_threads = if self.config.threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            self.config.threads
        };

        let start_nonce: u32 = rand::thread_rng().gen();
        let round = Arc::new(MiningRound {
            transactions: selected,
            prev_block_hash: self.chain.latest(),
            time_ms: unix_time_ms(),
            target: mining_target(self.config.leading_zero_bits),
            start_nonce,
            cursor: Mutex::new(start_nonce.wrapping_add(1)),
            found: Mutex::new(false),
            stop: AtomicBool::new(false),
            threads_done: Mutex::new(0),
            num_threads,
            batch: self.config.nonces_per_batch,
        });
        inner.round = Some(round.clone());
        drop(inner);

        for worker in 0..num_threads {
            let round = round.clone();
            let keypair = self.keypair.clone();
            let events = self.events.clone();
            let manager_inner = self.inner.clone();
            let _ = std::thread::Builder::new()
                .name(format!("miner-{}", worker))
                .spawn(move || mine_worker(round, keypair, events, manager_inner));
        }

        MiningStatus::Started
    }

    /// A new block was committed. Stop the running round, return the round's
    /// transactions that the block did not include to the front of the
    /// queue, and try to start over.
    pub fn on_new_block(&self, block: &Block) {
        let mut inner = self.inner.lock();
        if let Some(round) = inner.round.take() {
            round.stop.store(true, Ordering::SeqCst);

            let mined: BTreeSet<Uint256> =
                block.transactions.iter().map(|tx| tx.hash()).collect();
            let mut leftover: Vec<Transaction> = round
                .transactions
                .iter()
                .filter(|tx| !mined.contains(&tx.hash()))
                .cloned()
                .collect();
            debug!(requeued = leftover.len(), "mining round preempted");

            leftover.append(&mut inner.queue);
            inner.queue = leftover;
        }
        drop(inner);

        self.run_if_possible();
    }

    /// Stop any running round without requeueing.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        if let Some(round) = inner.round.take() {
            round.stop.store(true, Ordering::SeqCst);
        }
    }

    /// The per-block duplicate-vote filter: of several queued votes by the
    /// same voter for the same election, only the earliest goes into this
    /// block; later ones wait for a following block. Transactions that made
    /// it into the chain meanwhile are dropped.
    fn select_for_block(&self, queue: &[Transaction]) -> Vec<usize> {
        let mut selected: Vec<usize> = Vec::new();
        for (i, tx) in queue.iter().enumerate() {
            if self.chain.contains_transaction(&tx.hash()) {
                continue;
            }
            if let Transaction::Vote(vote) = tx {
                let duplicate = selected.iter().any(|&j| match &queue[j] {
                    Transaction::Vote(other) => {
                        other.body.election == vote.body.election
                            && other.public_key == vote.public_key
                    }
                    _ => false,
                });
                if duplicate {
                    continue;
                }
            }
            selected.push(i);
        }
        selected
    }
}

fn mine_worker(
    round: Arc<MiningRound>,
    keypair: SignKeyPair,
    events: Sender<NodeEvent>,
    manager_inner: Arc<Mutex<ManagerInner>>,
) {
    let mut block = Block::build(
        round.prev_block_hash,
        round.transactions.clone(),
        round.time_ms,
        keypair.public.clone(),
    );

    loop {
        if round.stop.load(Ordering::Relaxed) {
            return;
        }

        let (lower, upper) = round.consume_nonces();
        if lower == upper {
            // nonce space exhausted; the last worker returns the candidate
            // transactions and lets the manager try again
            let mut done = round.threads_done.lock();
            *done += 1;
            let all_done = *done == round.num_threads;
            drop(done);

            if all_done {
                debug!("all mining workers exhausted the nonce space");
                let mut inner = manager_inner.lock();
                if inner.round.as_ref().map(|r| Arc::ptr_eq(r, &round)) == Some(true) {
                    inner.round = None;
                    let mut queue = round.transactions.clone();
                    queue.append(&mut inner.queue);
                    inner.queue = queue;
                }
                drop(inner);
                let _ = events.send(NodeEvent::MinerFinished);
            }
            return;
        }

        let mut nonce = lower;
        while nonce != upper {
            if round.stop.load(Ordering::Relaxed) {
                return;
            }
            block.header.nonce = nonce;
            let hash = block.hash();
            if hash <= round.target {
                // only one worker may publish
                {
                    let mut found = round.found.lock();
                    if *found {
                        return;
                    }
                    *found = true;
                }
                round.stop.store(true, Ordering::SeqCst);

                info!(block = %hash, "found proof of work");
                let mut solved = block.clone();
                if solved.sign(&keypair).is_ok() {
                    let _ = events.send(NodeEvent::BlockFound(solved));
                }
                return;
            }
            nonce = nonce.wrapping_add(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::MemStore;
    use crate::paillier::encrypt_binary_with_proof;
    use crate::testutil::election_fixture;
    use crate::{EncryptedBallot, Role, Signed, TxElection, TxVote};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::mpsc::channel;
    use std::time::Duration;

    fn test_manager(
        chain: Arc<MemStore>,
        config: MiningConfig,
        rng: &mut StdRng,
    ) -> (MiningManager, std::sync::mpsc::Receiver<NodeEvent>) {
        let (tx, rx) = channel();
        let pair = SignKeyPair::generate(Role::Mining, rng);
        (MiningManager::new(chain, pair, tx, config), rx)
    }

    fn vote_tx(
        fixture: &crate::testutil::ElectionFixture,
        voter: usize,
        election: Uint256,
        rng: &mut StdRng,
    ) -> Transaction {
        let ballot = EncryptedBallot {
            question_id: fixture.election.questions[0].id,
            answer: encrypt_binary_with_proof(&fixture.election.enc_pub_key, 1, rng).unwrap(),
        };
        Transaction::Vote(
            Signed::sign(
                &fixture.voters[voter],
                TxVote {
                    election,
                    ballots: [ballot].into_iter().collect(),
                },
            )
            .unwrap(),
        )
    }

    #[test]
    fn duplicate_votes_wait_for_the_next_block() {
        let mut rng = StdRng::seed_from_u64(111);
        let chain = Arc::new(MemStore::new());
        let fixture = election_fixture(&mut rng, 2, 2, 2);

        let election_tx = Signed::sign(
            &fixture.creator,
            TxElection {
                election: fixture.election.clone(),
            },
        )
        .unwrap();
        let election_hash = election_tx.hash();
        chain
            .commit_unchecked(vec![Transaction::Election(election_tx)], &mut rng)
            .unwrap();

        let config = MiningConfig {
            min_transactions: 10, // never start a round in this test
            ..MiningConfig::default()
        };
        let (manager, _rx) = test_manager(chain.clone(), config, &mut rng);

        let v1 = vote_tx(&fixture, 0, election_hash, &mut rng);
        let v2 = vote_tx(&fixture, 0, election_hash, &mut rng); // same voter
        let v3 = vote_tx(&fixture, 1, election_hash, &mut rng); // other voter
        manager.add_transaction(v1.clone()).unwrap();
        manager.add_transaction(v2.clone()).unwrap();
        manager.add_transaction(v3.clone()).unwrap();

        let inner = manager.inner.lock();
        let selected = manager.select_for_block(&inner.queue);
        let hashes: Vec<Uint256> = selected.iter().map(|&i| inner.queue[i].hash()).collect();
        // the earliest vote of the duplicate pair and the other voter's vote
        assert_eq!(hashes, vec![v1.hash(), v3.hash()]);
    }

    #[test]
    fn mines_a_block_below_target() {
        let mut rng = StdRng::seed_from_u64(112);
        let chain = Arc::new(MemStore::new());
        let fixture = election_fixture(&mut rng, 1, 2, 2);

        let election_tx = Transaction::Election(
            Signed::sign(
                &fixture.creator,
                TxElection {
                    election: fixture.election.clone(),
                },
            )
            .unwrap(),
        );

        let config = MiningConfig {
            min_transactions: 1,
            leading_zero_bits: 4, // easy target so the test is instant
            nonces_per_batch: 100,
            threads: 2,
        };
        let (manager, rx) = test_manager(chain.clone(), config.clone(), &mut rng);
        let latest_at_start = chain.latest();
        manager.add_transaction(election_tx.clone()).unwrap();

        let block = loop {
            match rx.recv_timeout(Duration::from_secs(30)).unwrap() {
                NodeEvent::BlockFound(block) => break block,
                _ => continue,
            }
        };
        assert!(block.hash() <= mining_target(config.leading_zero_bits));
        assert_eq!(block.header.prev_block_hash, latest_at_start);
        assert!(block.contains_transaction(&election_tx.hash()));
        block.verify_signature().unwrap();
    }

    #[test]
    fn preemption_returns_unmined_transactions_in_order() {
        let mut rng = StdRng::seed_from_u64(113);
        let chain = Arc::new(MemStore::new());
        let fixture = election_fixture(&mut rng, 2, 2, 2);

        let election_tx = Signed::sign(
            &fixture.creator,
            TxElection {
                election: fixture.election.clone(),
            },
        )
        .unwrap();
        let election_hash = election_tx.hash();
        chain
            .commit_unchecked(vec![Transaction::Election(election_tx)], &mut rng)
            .unwrap();

        let t1 = vote_tx(&fixture, 0, election_hash, &mut rng);
        let t2 = vote_tx(&fixture, 1, election_hash, &mut rng);

        // an impossible target keeps the round running until preempted
        let config = MiningConfig {
            min_transactions: 2,
            leading_zero_bits: 255,
            nonces_per_batch: 10,
            threads: 1,
        };
        let (manager, _rx) = test_manager(chain.clone(), config, &mut rng);
        manager.add_transaction(t1.clone()).unwrap();
        assert_eq!(manager.add_transaction(t2.clone()).unwrap(), MiningStatus::Started);
        assert!(manager.is_mining());

        // a network block arrives carrying T2
        let external = chain
            .commit_unchecked(vec![t2.clone()], &mut rng)
            .unwrap();
        manager.on_new_block(&external);

        // T1 is back at the front of the queue, T2 is gone
        assert_eq!(manager.queue_hashes(), vec![t1.hash()]);
    }
}
