//! Membership protocol state machine.
//!
//! A `Node` owns its table and reacts to two inputs: inbound datagrams
//! (`on_message`, usually via `drain_inbox`) and periodic ticks
//! (`on_tick`). Both must be called from one logical thread; the node is a
//! plain `&mut self` state machine and holds no locks.
//!
//! Lifecycle:
//!
//! ```text
//! Uninitialized --start--> Joining --JOINREP--> Active
//!                             \__(introducer)__/
//! any --fail--> Failed
//! ```

use crate::clock::Clock;
use crate::config::MembershipConfig;
use crate::events::{EventBus, MembershipEvent};
use crate::membership::{
    FailureDetector, FailureEvent, GossipDisseminator, MembershipEntry, MembershipTable,
};
use crate::protocol::{DecodeError, Message, decode, encode};
use crate::transport::Transport;
use crate::PeerId;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeState {
    /// Created, `start()` not called yet
    Uninitialized,
    /// Join request sent, waiting for the introducer's reply
    Joining,
    /// Member of the group: gossiping and detecting failures
    Active,
    /// Stopped; ignores every input
    Failed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error("Initialization failed: {0}")]
    InitializationFailure(String),

    #[error("No join reply from introducer {introducer} after {waited} clock units")]
    JoinTimeout { introducer: PeerId, waited: u64 },
}

/// A single member of the gossip group.
pub struct Node<T: Transport, C: Clock> {
    id: PeerId,
    config: MembershipConfig,
    transport: T,
    clock: C,
    state: NodeState,
    heartbeat: i64,
    table: MembershipTable,
    detector: FailureDetector,
    gossip: GossipDisseminator,
    rng: StdRng,
    events: Option<Arc<EventBus>>,
    /// Clock reading when the current join attempt was sent
    join_started: u64,
}

impl<T: Transport, C: Clock> Node<T, C> {
    pub fn new(id: PeerId, config: MembershipConfig, transport: T, clock: C) -> Self {
        Self {
            id,
            detector: FailureDetector::new(config.t_fail, config.t_remove),
            gossip: GossipDisseminator::new(config.gossip_fanout),
            config,
            transport,
            clock,
            state: NodeState::Uninitialized,
            heartbeat: 0,
            table: MembershipTable::new(id),
            rng: StdRng::seed_from_u64(rand::random()),
            events: None,
            join_started: 0,
        }
    }

    /// Publish membership changes to `events`.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Make gossip target selection reproducible.
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == NodeState::Active
    }

    pub fn heartbeat(&self) -> i64 {
        self.heartbeat
    }

    pub fn config(&self) -> &MembershipConfig {
        &self.config
    }

    pub fn table(&self) -> &MembershipTable {
        &self.table
    }

    /// Members this node currently believes alive, itself included, sorted.
    pub fn live_members(&self) -> Vec<PeerId> {
        let mut members: Vec<PeerId> = self
            .table
            .entries()
            .filter(|e| !e.suspect)
            .map(|e| e.peer)
            .collect();
        members.sort();
        members
    }

    // ==================== Lifecycle ====================

    /// Bind the local address and join the group.
    ///
    /// The configured introducer bootstraps the group on its own and becomes
    /// active immediately. Every other node sends a join request and stays
    /// `Joining` until the reply arrives.
    pub fn start(&mut self) -> Result<(), NodeError> {
        if self.state != NodeState::Uninitialized {
            return Err(NodeError::InitializationFailure(format!(
                "{} already started ({:?})",
                self.id, self.state
            )));
        }
        if self.id.is_null() {
            return Err(NodeError::InitializationFailure(
                "local address is the null address".into(),
            ));
        }
        self.config
            .validate()
            .map_err(|e| NodeError::InitializationFailure(e.to_string()))?;
        self.transport
            .bind(self.id)
            .map_err(|e| NodeError::InitializationFailure(e.to_string()))?;

        let now = self.clock.now();
        self.heartbeat = 0;
        self.table.clear();
        self.state = NodeState::Joining;
        self.join_started = now;

        if self.id == self.config.introducer {
            info!("{}: starting up group as introducer", self.id);
            self.table.insert_self(self.heartbeat, now);
            self.become_active(self.id, now);
        } else {
            info!("{}: joining via {}", self.id, self.config.introducer);
            self.send_join_req();
        }
        Ok(())
    }

    /// Stop the node. It ignores every later message and tick.
    pub fn fail(&mut self) {
        if self.state != NodeState::Failed {
            info!("{}: node failed", self.id);
            self.state = NodeState::Failed;
        }
    }

    /// Report a join that has been pending for at least `deadline`.
    pub fn check_join(&self, deadline: u64) -> Result<(), NodeError> {
        if self.state != NodeState::Joining {
            return Ok(());
        }
        let waited = self.clock.now().saturating_sub(self.join_started);
        if waited >= deadline {
            return Err(NodeError::JoinTimeout {
                introducer: self.config.introducer,
                waited,
            });
        }
        Ok(())
    }

    /// Resend the join request and restart the join timer.
    pub fn retry_join(&mut self) {
        if self.state != NodeState::Joining {
            return;
        }
        debug!("{}: retrying join via {}", self.id, self.config.introducer);
        self.join_started = self.clock.now();
        self.send_join_req();
    }

    fn become_active(&mut self, via: PeerId, now: u64) {
        self.state = NodeState::Active;
        info!("{}: joined the group via {}", self.id, via);
        self.emit(MembershipEvent::Joined {
            local: self.id,
            via,
            at: now,
        });
    }

    // ==================== Inbound ====================

    /// Process every datagram waiting in the transport.
    ///
    /// Malformed datagrams are logged and dropped. Returns how many
    /// datagrams were read.
    pub fn drain_inbox(&mut self) -> usize {
        let payloads = self.transport.receive(self.id);
        for payload in &payloads {
            if let Err(e) = self.on_message(payload) {
                debug!("{}: dropped {} byte message: {}", self.id, payload.len(), e);
            }
        }
        payloads.len()
    }

    /// Handle one raw datagram.
    ///
    /// A decode error leaves the node untouched, whatever its state.
    /// Messages that are not valid in the current state are ignored.
    pub fn on_message(&mut self, data: &[u8]) -> Result<(), DecodeError> {
        let message = decode(data)?;
        if matches!(self.state, NodeState::Uninitialized | NodeState::Failed) {
            return Ok(());
        }

        let now = self.clock.now();
        debug!(
            "{}: received {} from {}",
            self.id,
            message.kind().as_str(),
            message.sender()
        );

        match (self.state, message) {
            (NodeState::Active, Message::JoinReq { sender, .. }) => {
                self.handle_join_req(sender, now);
            }
            (NodeState::Joining | NodeState::Active, Message::JoinRep { sender, entries, .. }) => {
                if self.state == NodeState::Joining {
                    self.table.insert_self(self.heartbeat, now);
                    self.become_active(sender, now);
                }
                self.merge(&entries, now);
            }
            (NodeState::Active, Message::Ping { entries, .. }) => {
                self.merge(&entries, now);
            }
            (state, message) => {
                debug!(
                    "{}: ignoring {} from {} while {:?}",
                    self.id,
                    message.kind().as_str(),
                    message.sender(),
                    state
                );
            }
        }
        Ok(())
    }

    fn handle_join_req(&mut self, sender: PeerId, now: u64) {
        if self.table.refresh_direct(sender, now) {
            self.member_added(sender, now);
        }
        let reply = Message::join_rep(self.id, self.heartbeat, self.table.snapshot());
        self.send_message(sender, &reply);
    }

    fn merge(&mut self, entries: &[MembershipEntry], now: u64) {
        for peer in self.table.merge(entries, now) {
            self.member_added(peer, now);
        }
    }

    fn member_added(&self, peer: PeerId, now: u64) {
        info!("{}: member {} added", self.id, peer);
        self.emit(MembershipEvent::MemberAdded {
            local: self.id,
            peer,
            at: now,
        });
    }

    // ==================== Periodic ====================

    /// Run one protocol period: heartbeat, failure detection, gossip.
    ///
    /// Does nothing unless the node is active.
    pub fn on_tick(&mut self) {
        if self.state != NodeState::Active {
            return;
        }
        let now = self.clock.now();

        self.heartbeat += 1;
        self.table.refresh_self(self.heartbeat, now);

        for event in self.detector.scan(&mut self.table, now) {
            match event {
                FailureEvent::PeerSuspected { peer_id } => {
                    debug!("{}: suspecting {}", self.id, peer_id);
                    self.emit(MembershipEvent::MemberSuspected {
                        local: self.id,
                        peer: peer_id,
                        at: now,
                    });
                }
                FailureEvent::PeerRemoved { peer_id } => {
                    info!("{}: member {} removed", self.id, peer_id);
                    self.emit(MembershipEvent::MemberRemoved {
                        local: self.id,
                        peer: peer_id,
                        at: now,
                    });
                }
            }
        }

        let targets = self.gossip.select_targets(&self.table, &mut self.rng);
        if targets.is_empty() {
            return;
        }

        let ping = Message::ping(self.id, self.heartbeat, self.table.snapshot());
        let bytes = match encode(&ping) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("{}: failed to encode gossip: {}", self.id, e);
                return;
            }
        };
        debug!("{}: gossiping to {:?}", self.id, targets);
        for target in targets {
            self.send_bytes(target, &bytes);
        }
    }

    /// Drain the inbox, then tick.
    pub fn run_once(&mut self) {
        self.drain_inbox();
        self.on_tick();
    }

    // ==================== Outbound ====================

    fn send_join_req(&self) {
        let request = Message::join_req(self.id, self.heartbeat);
        self.send_message(self.config.introducer, &request);
    }

    fn send_message(&self, to: PeerId, message: &Message) {
        match encode(message) {
            Ok(bytes) => self.send_bytes(to, &bytes),
            Err(e) => warn!(
                "{}: failed to encode {} for {}: {}",
                self.id,
                message.kind().as_str(),
                to,
                e
            ),
        }
    }

    fn send_bytes(&self, to: PeerId, bytes: &[u8]) {
        if let Err(e) = self.transport.send(self.id, to, bytes) {
            warn!("{}: send to {} failed: {}", self.id, to, e);
        }
    }

    fn emit(&self, event: MembershipEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }
}
