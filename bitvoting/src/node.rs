use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chain::ChainStore;
use crate::net::{
    BlockMessage, BlockRequestMessage, Connection, DuplicateList, Frame, Message, NetConfig,
    Network, PeerInfoMessage, PingMessage, TransactionMessage,
};
use crate::paillier::PaillierPartialKey;
use crate::{
    mining_target, unix_time_ms, Ballot, Block, Election, ElectionDb, ElectionPrivateKey,
    ElectionState, Error, Keyring, MiningConfig, MiningManager, SignKeyPair, Signed, Transaction,
    TxElection, TxTally, TxTrusteeTally, Uint256, VerifyError, CLIENT_VERSION,
};

/// Everything the node's event loop reacts to: frames from peer reader
/// threads, miner results, timer ticks and the shutdown request.
pub enum NodeEvent {
    Accepted(Arc<Connection>),
    Frame(Arc<Connection>, Frame),
    Disconnected(u64),
    BlockFound(Block),
    MinerFinished,
    PingTick,
    HeartbeatTick,
    Shutdown,
}

/// Notifications toward the embedding application (a UI, the daemon log).
pub trait NodeHooks: Send + Sync {
    /// A block was committed and election state may have changed.
    fn on_chain_updated(&self) {}

    /// A text message arrived from a direct peer.
    fn on_text(&self, _from: SocketAddr, _text: &str) {}
}

/// Hooks that do nothing; the daemon relies on logging alone.
pub struct NoHooks;

impl NodeHooks for NoHooks {}

#[derive(Debug, Clone, Default)]
pub struct NodeConfig {
    pub net: NetConfig,
    pub mining: MiningConfig,
    /// Peers to dial at startup, as "host:port".
    pub connect: Vec<String>,
}

/// The controller: owns the stores, the gossip mesh and the miner, and
/// drives every protocol from one event loop so handler code runs strictly
/// sequentially.
pub struct Node {
    config: NodeConfig,
    chain: Arc<dyn ChainStore>,
    keyring: Arc<Keyring>,
    elections: Arc<ElectionDb>,
    network: Network,
    mining: Arc<MiningManager>,
    events_tx: Sender<NodeEvent>,
    events_rx: Mutex<Receiver<NodeEvent>>,
    dup_transactions: DuplicateList,
    dup_blocks: DuplicateList,
    dup_pings: DuplicateList,
    shutdown: Arc<AtomicBool>,
    hooks: Box<dyn NodeHooks>,
}

impl Node {
    pub fn new(
        config: NodeConfig,
        chain: Arc<dyn ChainStore>,
        keyring: Arc<Keyring>,
        elections: Arc<ElectionDb>,
        hooks: Box<dyn NodeHooks>,
    ) -> Result<Arc<Node>, Error> {
        let (events_tx, events_rx) = channel();
        let shutdown = Arc::new(AtomicBool::new(false));

        let network = Network::new(
            Uuid::new_v4(),
            config.net.flood_ttl,
            events_tx.clone(),
            shutdown.clone(),
        );

        let mining_key = keyring.mining_key(&mut rand::thread_rng())?;
        let mining = Arc::new(MiningManager::new(
            chain.clone(),
            mining_key,
            events_tx.clone(),
            config.mining.clone(),
        ));

        let validity = config.net.duplicate_validity_ms;
        Ok(Arc::new(Node {
            config,
            chain,
            keyring,
            elections,
            network,
            mining,
            events_tx,
            events_rx: Mutex::new(events_rx),
            dup_transactions: DuplicateList::new(validity),
            dup_blocks: DuplicateList::new(validity),
            dup_pings: DuplicateList::new(validity),
            shutdown,
            hooks,
        }))
    }

    pub fn chain(&self) -> &Arc<dyn ChainStore> {
        &self.chain
    }

    pub fn keyring(&self) -> &Arc<Keyring> {
        &self.keyring
    }

    pub fn elections(&self) -> &Arc<ElectionDb> {
        &self.elections
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn mining(&self) -> &Arc<MiningManager> {
        &self.mining
    }

    /// Bind the listener, start the protocol timers and dial the configured
    /// peers. Returns the bound address.
    pub fn start(self: &Arc<Node>) -> Result<SocketAddr, Error> {
        let local = self.network.listen(self.config.net.port)?;

        spawn_timer(
            "ping-timer",
            self.config.net.ping_interval_ms,
            self.events_tx.clone(),
            self.shutdown.clone(),
            || NodeEvent::PingTick,
        );
        spawn_timer(
            "heartbeat-timer",
            self.config.net.heartbeat_interval_ms,
            self.events_tx.clone(),
            self.shutdown.clone(),
            || NodeEvent::HeartbeatTick,
        );

        for peer in &self.config.connect {
            match peer.to_socket_addrs().map(|mut addrs| addrs.next()) {
                Ok(Some(addr)) => {
                    if let Err(err) = self.network.connect(addr) {
                        warn!(%peer, %err, "could not reach configured peer");
                    }
                }
                _ => warn!(%peer, "could not parse configured peer address"),
            }
        }

        Ok(local)
    }

    /// Run the event loop until shutdown. Call on a dedicated thread.
    pub fn run(&self) {
        let events = self.events_rx.lock();
        while let Ok(event) = events.recv() {
            match event {
                NodeEvent::Accepted(conn) => self.handle_accepted(&conn),
                NodeEvent::Frame(conn, frame) => self.handle_frame(&conn, frame),
                NodeEvent::Disconnected(id) => {
                    self.network.peers().remove(id);
                }
                NodeEvent::BlockFound(block) => self.publish_block(block),
                NodeEvent::MinerFinished => {
                    self.mining.run_if_possible();
                }
                NodeEvent::PingTick => self.send_ping(),
                NodeEvent::HeartbeatTick => self.send_heartbeat(),
                NodeEvent::Shutdown => break,
            }
        }
        self.network.shutdown();
        self.mining.shutdown();
    }

    /// Spawn the event loop on a background thread.
    pub fn spawn(self: &Arc<Node>) -> std::thread::JoinHandle<()> {
        let node = self.clone();
        std::thread::Builder::new()
            .name("node-events".to_owned())
            .spawn(move || node.run())
            .expect("bitvoting: unable to spawn node thread")
    }

    /// Request a graceful stop.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.events_tx.send(NodeEvent::Shutdown);
    }

    // ----- gossip handlers ------------------------------------------------

    fn handle_accepted(&self, conn: &Arc<Connection>) {
        // both sides introduce themselves first
        let info = Message::PeerInfo(PeerInfoMessage {
            id: Uuid::new_v4(),
            guid: self.network.guid(),
            version: CLIENT_VERSION,
        });
        if conn.write(&Frame::for_message(info)).is_err() {
            conn.close();
            self.network.peers().remove(conn.id);
        }
    }

    fn handle_frame(&self, conn: &Arc<Connection>, frame: Frame) {
        match frame.message.clone() {
            Message::Text(text) => {
                info!(from = %conn.peer_addr, text = %text.text, "text message");
                self.hooks.on_text(conn.peer_addr, &text.text);
            }
            Message::Ping(ping) => self.handle_ping(conn, frame, ping),
            Message::Pong(_) => {}
            Message::PeerInfo(info) => self.handle_peer_info(conn, info),
            Message::Heartbeat(_) => {
                // nothing to do; receiving it already refreshed the peer
            }
            Message::Transaction(message) => {
                if self.dup_transactions.check_duplicate(message.id) {
                    return;
                }
                self.receive_transaction(message.transaction);
                self.network.flood(&frame, Some(conn.id));
            }
            Message::Block(message) => {
                if self.dup_blocks.check_duplicate(message.id) {
                    return;
                }
                self.receive_block(message.block);
                self.network.flood(&frame, Some(conn.id));
            }
            Message::BlockRequest(request) => self.handle_block_request(conn, request),
        }
    }

    /// Peer discovery: fill in the sender address on first hop, dial
    /// unknown advertised peers, pass the ping along.
    fn handle_ping(&self, conn: &Arc<Connection>, mut frame: Frame, mut ping: PingMessage) {
        if self.dup_pings.check_duplicate(ping.id) {
            return;
        }

        if ping.address.is_empty() {
            ping.address = conn.peer_addr.ip().to_string();
            frame.message = Message::Ping(ping.clone());
        } else if let Ok(addr) = format!("{}:{}", ping.address, ping.port).parse::<SocketAddr>() {
            if !self.network.peers().has_endpoint(&addr) {
                if let Err(err) = self.network.connect(addr) {
                    debug!(peer = %addr, %err, "could not dial advertised peer");
                }
            }
        }

        self.network.flood(&frame, Some(conn.id));
    }

    /// Connection initialization: reject self-connections and duplicate
    /// GUIDs, then ask the new peer for everything after our chain tip.
    fn handle_peer_info(&self, conn: &Arc<Connection>, info: PeerInfoMessage) {
        if info.guid == self.network.guid() || self.network.peers().has_guid(&info.guid) {
            debug!(peer = %conn.peer_addr, "rejecting duplicate or self connection");
            conn.close();
            self.network.peers().remove(conn.id);
            return;
        }

        conn.set_peer_info(info.guid, info.version);
        info!(peer = %conn.peer_addr, guid = %info.guid, "peer initialized");

        let request = Message::BlockRequest(BlockRequestMessage {
            id: Uuid::new_v4(),
            block: self.chain.latest(),
            following: true,
        });
        if conn.write(&Frame::for_message(request)).is_err() {
            conn.close();
            self.network.peers().remove(conn.id);
        }
    }

    /// Answer a block request with every block after the requested hash,
    /// to the requesting connection only.
    fn handle_block_request(&self, conn: &Arc<Connection>, request: BlockRequestMessage) {
        if request.block != self.chain.genesis() && !self.chain.contains_block(&request.block) {
            return;
        }

        let blocks = if request.following {
            match self.chain.blocks_after(&request.block) {
                Ok(blocks) => blocks,
                Err(_) => return,
            }
        } else {
            match self.chain.block(&request.block) {
                Ok(block) => vec![block],
                Err(_) => return,
            }
        };

        for block in blocks {
            let message = Message::Block(BlockMessage {
                id: Uuid::new_v4(),
                block,
            });
            // direct answer to the requester, not part of the block flood
            let mut frame = Frame::for_message(message);
            frame.header.ttl = 1;
            if conn.write(&frame).is_err() {
                return;
            }
        }
    }

    fn send_ping(&self) {
        if self.network.peers().len() >= self.config.net.max_connections {
            return;
        }
        let ping = Message::Ping(PingMessage {
            id: Uuid::new_v4(),
            address: String::new(),
            port: self.config.net.port,
        });
        self.dup_pings.register(ping.id());
        self.network.flood(&Frame::for_message(ping), None);
    }

    fn send_heartbeat(&self) {
        // peers silent for two heartbeat intervals are considered dead
        let deadline = unix_time_ms() - 2 * self.config.net.heartbeat_interval_ms as i64;
        for conn in self.network.peers().snapshot() {
            if conn.last_seen_ms() < deadline {
                info!(peer = %conn.peer_addr, "dropping idle peer");
                conn.close();
                self.network.peers().remove(conn.id);
            }
        }

        let heartbeat = Message::Heartbeat(crate::net::HeartbeatMessage { id: Uuid::new_v4() });
        self.network.flood(&Frame::for_message(heartbeat), None);
    }

    // ----- transaction / block intake -------------------------------------

    /// Gossip or locally published transaction: unknown ones go to the
    /// miner, which verifies them.
    fn receive_transaction(&self, transaction: Transaction) {
        if self.chain.contains_transaction(&transaction.hash()) {
            return;
        }
        debug!(
            tx_type = %transaction.tx_type(),
            hash = %transaction.hash(),
            "forwarding transaction to miner"
        );
        let _ = self.mining.add_transaction(transaction);
    }

    /// Full block validation and commit, for both network blocks and blocks
    /// mined locally (which loop back through the same path).
    fn receive_block(&self, block: Block) {
        let hash = block.hash();
        match self.verify_block(&block, &hash) {
            Ok(()) => {}
            Err(err) => {
                info!(block = %hash, %err, "rejecting block");
                return;
            }
        }

        if let Err(err) = self.chain.add_block(&block) {
            warn!(block = %hash, %err, "could not store block");
            return;
        }
        info!(block = %hash, transactions = block.transactions.len(), "block committed");

        // the miner drops any in-flight round that the new block obsoletes
        self.mining.on_new_block(&block);

        for tx in &block.transactions {
            self.process_transaction(tx);
        }
        self.hooks.on_chain_updated();
    }

    fn verify_block(&self, block: &Block, hash: &Uint256) -> Result<(), VerifyError> {
        if block.header.prev_block_hash != self.chain.latest() {
            return Err(VerifyError::ChainMismatch);
        }

        let last_time = self
            .chain
            .latest_block()
            .map(|b| b.header.time_ms)
            .unwrap_or(0);
        if block.header.time_ms > unix_time_ms() || block.header.time_ms < last_time {
            return Err(VerifyError::BadTimestamp);
        }

        if *hash > mining_target(self.config.mining.leading_zero_bits) {
            return Err(VerifyError::AboveTarget);
        }

        if self.chain.contains_block(hash) {
            return Err(VerifyError::AlreadyKnown);
        }

        block.verify_signature()?;

        let mut seen = std::collections::BTreeSet::new();
        for tx in &block.transactions {
            let tx_hash = tx.hash();
            if self.chain.contains_transaction(&tx_hash) || !seen.insert(tx_hash) {
                return Err(VerifyError::AlreadyKnown);
            }
            tx.verify(&*self.chain)?;
        }

        Ok(())
    }

    // ----- committed transaction processing --------------------------------

    fn process_transaction(&self, transaction: &Transaction) {
        match transaction {
            Transaction::Election(tx) => self.process_tx_election(tx),
            Transaction::Vote(tx) => self.process_tx_vote(tx),
            Transaction::Tally(tx) => self.process_tx_tally(tx),
            Transaction::TrusteeTally(tx) => self.process_tx_trustee_tally(tx),
        }
    }

    /// Keep state for elections this peer takes part in.
    fn process_tx_election(&self, tx: &Signed<TxElection>) {
        let state = ElectionState::new(tx.clone());
        if !state.am_i_involved(&self.keyring) {
            return;
        }
        info!(election = %state.hash(), name = %state.election().name, "tracking election");
        if let Err(err) = self.elections.save(state) {
            warn!(%err, "could not persist election state");
        }
    }

    fn process_tx_vote(&self, tx: &Signed<crate::TxVote>) {
        let mut state = match self.elections.get(&tx.body.election) {
            Some(state) => state,
            None => return,
        };

        let voter = tx.public_key.key_id();
        state.votes_registered.insert(voter);
        if self.keyring.contains_sign_key(&voter) {
            state.my_votes.insert(voter, tx.hash());
        }

        if let Err(err) = self.elections.save(state) {
            warn!(%err, "could not persist election state");
        }
    }

    /// A committed tally marks the election ended (when flagged) and makes
    /// every local trustee publish its partial decryption.
    fn process_tx_tally(&self, tx: &Signed<TxTally>) {
        let mut state = match self.elections.get(&tx.body.election) {
            Some(state) => state,
            None => return,
        };
        if state.ended {
            return;
        }

        state.ended = tx.body.end_election;
        let tally_hash = tx.hash();
        state.tallies.entry(tally_hash).or_default();
        if let Err(err) = self.elections.save(state.clone()) {
            warn!(%err, "could not persist election state");
        }

        if !state.am_i_trustee(&self.keyring) {
            return;
        }

        let keys = self.keyring.paillier_keys(&tx.body.election);
        info!(count = keys.len(), "creating trustee tallies");
        for private_key in keys {
            self.publish_trustee_tally(&state, tx, &private_key);
        }
    }

    fn publish_trustee_tally(
        &self,
        state: &ElectionState,
        tally: &Signed<TxTally>,
        private_key: &ElectionPrivateKey,
    ) {
        let signer = match self.keyring.sign_key(&private_key.signature_key) {
            Some(pair) => pair,
            None => {
                warn!("paillier share without matching signing key");
                return;
            }
        };
        if !state.is_trustee_eligible(&signer.public) {
            warn!("paillier share bound to an ineligible key");
            return;
        }

        let body = match state.create_trustee_tally(
            tally,
            &private_key.key,
            &*self.chain,
            &mut rand::thread_rng(),
        ) {
            Ok(body) => body,
            Err(err) => {
                warn!(%err, "could not create trustee tally");
                return;
            }
        };

        match Signed::sign(&signer, body) {
            Ok(signed) => {
                let _ = self.publish_transaction(Transaction::TrusteeTally(signed));
            }
            Err(err) => warn!(%err, "could not sign trustee tally"),
        }
    }

    /// Collect trustee tallies; once the threshold is reached, decrypt the
    /// results.
    fn process_tx_trustee_tally(&self, tx: &Signed<TxTrusteeTally>) {
        let tally_tx = match self.chain.get_tally(&tx.body.tally) {
            Ok(tally) => tally,
            Err(_) => return,
        };
        let mut state = match self.elections.get(&tally_tx.body.election) {
            Some(state) => state,
            None => return,
        };

        let tally_hash = tally_tx.hash();
        state
            .tallies
            .entry(tally_hash)
            .or_default()
            .insert(tx.hash());

        let threshold = state.election().enc_pub_key.threshold as usize;
        let enough = state
            .tallies
            .get(&tally_hash)
            .map(|set| set.len() >= threshold)
            .unwrap_or(false);

        if !state.results.contains_key(&tally_hash) && enough {
            info!(tally = %tally_hash, "threshold reached, combining results");
            if let Err(err) = state.tally(&tally_hash, &*self.chain) {
                warn!(%err, "tallying failed");
            }
        }

        if let Err(err) = self.elections.save(state) {
            warn!(%err, "could not persist election state");
        }
    }

    // ----- publishing ------------------------------------------------------

    /// Flood a signed transaction and deliver it to the local miner through
    /// the same path a network transaction takes.
    pub fn publish_transaction(&self, transaction: Transaction) -> Result<(), Error> {
        info!(
            tx_type = %transaction.tx_type(),
            hash = %transaction.hash(),
            "publishing transaction"
        );
        let message = Message::Transaction(TransactionMessage {
            id: Uuid::new_v4(),
            transaction: transaction.clone(),
        });
        self.dup_transactions.register(message.id());
        self.network.flood(&Frame::for_message(message), None);
        self.receive_transaction(transaction);
        Ok(())
    }

    /// Flood a freshly mined block and commit it locally.
    fn publish_block(&self, block: Block) {
        let message = Message::Block(BlockMessage {
            id: Uuid::new_v4(),
            block: block.clone(),
        });
        self.dup_blocks.register(message.id());
        self.network.flood(&Frame::for_message(message), None);
        self.receive_block(block);
    }

    // ----- operations invoked by the embedding application -----------------

    /// Create an election: export one Paillier share file per trustee into
    /// `export_dir`, then sign and publish the election transaction.
    /// Returns the election transaction hash.
    pub fn on_election_created(
        &self,
        election: Election,
        signer: &SignKeyPair,
        export_dir: &Path,
        partial_keys: Vec<PaillierPartialKey>,
    ) -> Result<Uint256, Error> {
        if election.trustees.len() != partial_keys.len()
            || election.trustees.len() != election.enc_pub_key.servers as usize
        {
            return Err(Error::Verify(VerifyError::ElectionInvalid));
        }

        let signed = Signed::sign(signer, TxElection { election })?;
        let hash = signed.hash();

        info!(election = %hash, "exporting paillier shares for trustees");
        let trustees: Vec<_> = signed.body.election.trustees.iter().cloned().collect();
        for (trustee, key) in trustees.iter().zip(partial_keys) {
            let private_key = ElectionPrivateKey {
                election: hash,
                key,
                signature_key: *trustee,
            };
            let file = export_dir.join(format!("trustee_{}", &trustee.to_hex()[..8]));
            private_key.save_to(&file)?;
        }

        self.publish_transaction(Transaction::Election(signed))?;
        Ok(hash)
    }

    /// Cast a vote in an election this peer is involved in.
    pub fn on_vote(
        &self,
        election: &Uint256,
        answers: &std::collections::BTreeSet<Ballot>,
        signer: &SignKeyPair,
    ) -> Result<(), Error> {
        let state = self.elections.get(election).ok_or(Error::ElectionUnknown)?;
        let body = state.create_vote(answers, &mut rand::thread_rng())?;
        let signed = Signed::sign(signer, body)?;
        self.publish_transaction(Transaction::Vote(signed))
    }

    /// Announce a tally over the chain up to `last_block`; requires the
    /// election creator's signing key in the local key ring.
    pub fn on_tally(
        &self,
        election: &Uint256,
        end_election: bool,
        last_block: Uint256,
    ) -> Result<(), Error> {
        let state = self.elections.get(election).ok_or(Error::ElectionUnknown)?;
        let creator = state.transaction.public_key.key_id();
        let signer = self.keyring.sign_key(&creator).ok_or(Error::SignKeyMissing)?;

        let signed = Signed::sign(
            &signer,
            TxTally {
                election: *election,
                last_block,
                end_election,
            },
        )?;
        self.publish_transaction(Transaction::Tally(signed))
    }

    /// Import a Paillier share. For every tally of the election that this
    /// trustee has not answered yet, a trustee tally is created and
    /// published.
    pub fn on_new_paillier_key(&self, private_key: ElectionPrivateKey) -> Result<(), Error> {
        let state = self
            .elections
            .get(&private_key.election)
            .ok_or(Error::ElectionUnknown)?;
        let signer = self
            .keyring
            .sign_key(&private_key.signature_key)
            .ok_or(Error::SignKeyMissing)?;
        if !state.is_trustee_eligible(&signer.public) {
            return Err(Error::Verify(VerifyError::Unauthorized));
        }

        self.keyring.add_paillier_key(private_key.clone())?;

        for (tally_hash, trustee_tallies) in &state.tallies {
            let already_answered = trustee_tallies.iter().any(|hash| {
                self.chain
                    .get_trustee_tally(hash)
                    .map(|tt| tt.public_key == signer.public)
                    .unwrap_or(false)
            });
            if already_answered {
                continue;
            }

            let tally_tx = match self.chain.get_tally(tally_hash) {
                Ok(tally) => tally,
                Err(_) => continue,
            };
            self.publish_trustee_tally(&state, &tally_tx, &private_key);
        }

        Ok(())
    }
}

fn spawn_timer(
    name: &str,
    interval_ms: u64,
    events: Sender<NodeEvent>,
    shutdown: Arc<AtomicBool>,
    make_event: fn() -> NodeEvent,
) {
    let name = name.to_owned();
    let _ = std::thread::Builder::new()
        .name(name)
        .spawn(move || loop {
            let mut waited = 0u64;
            while waited < interval_ms {
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }
                let step = 200.min(interval_ms - waited);
                std::thread::sleep(Duration::from_millis(step));
                waited += step;
            }
            if shutdown.load(Ordering::Relaxed) || events.send(make_event()).is_err() {
                return;
            }
        });
}
