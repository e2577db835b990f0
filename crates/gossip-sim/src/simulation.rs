//! Cluster simulation over the emulated network.
//!
//! All nodes live in one process and share one network and one clock. A
//! step advances the clock by one gossip interval, applies scheduled
//! failures, then gives every running node one `drain_inbox` + `on_tick`
//! pass in address order.

use crate::report::{ConvergenceReport, NodeReport};
use gossip_core::{
    Clock, EmulatedNetwork, EventBus, ManualClock, MembershipConfig, Node, NodeError, NodeState,
    PeerId, SystemClock,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("Invalid simulation options: {0}")]
    InvalidOptions(String),

    #[error(transparent)]
    Node(#[from] NodeError),
}

/// Time source of a simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ClockMode {
    /// Logical clock advanced by the driver, one gossip interval per step
    #[default]
    Manual,
    /// Milliseconds of wall time; pair with a tick period
    Wall,
}

/// Clock shared by every simulated node.
#[derive(Debug, Clone)]
pub enum SimClock {
    Manual(ManualClock),
    Wall(SystemClock),
}

impl Clock for SimClock {
    fn now(&self) -> u64 {
        match self {
            Self::Manual(clock) => clock.now(),
            Self::Wall(clock) => clock.now(),
        }
    }
}

pub type SimNode = Node<Arc<EmulatedNetwork>, SimClock>;

#[derive(Debug, Clone)]
pub struct SimulationOptions {
    /// Cluster size; nodes are `1:0` through `N:0`
    pub nodes: usize,
    pub membership: MembershipConfig,
    pub clock: ClockMode,
    /// Probability that any single datagram is lost
    pub drop_rate: f64,
    /// Seed for network loss and gossip target selection
    pub seed: u64,
    /// Step at which to fail nodes
    pub fail_at: Option<u64>,
    /// How many of the highest-numbered nodes fail at `fail_at`
    pub fail_count: usize,
    /// Clock units a node may wait for a join reply before retrying
    pub join_timeout: u64,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            nodes: 10,
            membership: MembershipConfig::default(),
            clock: ClockMode::Manual,
            drop_rate: 0.0,
            seed: 0,
            fail_at: None,
            fail_count: 1,
            join_timeout: 10,
        }
    }
}

impl SimulationOptions {
    /// Switch to wall time with one protocol period every `period_ms`.
    ///
    /// The membership timeouts and the join timeout are taken as counts of
    /// periods and converted to milliseconds, so settings tuned for the
    /// manual clock keep their meaning.
    pub fn with_wall_clock(mut self, period_ms: u64) -> Self {
        let membership = &mut self.membership;
        membership.t_fail = membership.t_fail.saturating_mul(period_ms);
        membership.t_remove = membership.t_remove.saturating_mul(period_ms);
        membership.gossip_interval = period_ms;
        self.join_timeout = self.join_timeout.saturating_mul(period_ms);
        self.clock = ClockMode::Wall;
        self
    }

    fn validate(&self) -> Result<(), SimulationError> {
        if self.nodes == 0 {
            return Err(SimulationError::InvalidOptions(
                "at least one node is required".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.drop_rate) {
            return Err(SimulationError::InvalidOptions(format!(
                "drop rate {} is not a probability",
                self.drop_rate
            )));
        }
        let introducer = self.membership.introducer;
        if introducer.port() != 0 || introducer.host() == 0 || introducer.host() as usize > self.nodes
        {
            return Err(SimulationError::InvalidOptions(format!(
                "introducer {} is not one of the {} simulated nodes",
                introducer, self.nodes
            )));
        }
        if self.fail_at.is_some() && self.fail_count > self.nodes {
            return Err(SimulationError::InvalidOptions(format!(
                "cannot fail {} of {} nodes",
                self.fail_count, self.nodes
            )));
        }
        Ok(())
    }
}

/// A whole cluster driven step by step.
pub struct Simulation {
    options: SimulationOptions,
    network: Arc<EmulatedNetwork>,
    clock: SimClock,
    events: Arc<EventBus>,
    nodes: Vec<SimNode>,
    step: u64,
}

impl Simulation {
    pub fn new(options: SimulationOptions) -> Result<Self, SimulationError> {
        options.validate()?;

        let network = Arc::new(EmulatedNetwork::with_drop_rate(
            options.drop_rate,
            options.seed,
        ));
        let clock = match options.clock {
            ClockMode::Manual => SimClock::Manual(ManualClock::default()),
            ClockMode::Wall => SimClock::Wall(SystemClock::new()),
        };
        let events = Arc::new(EventBus::new());

        let mut simulation = Self {
            options,
            network,
            clock,
            events,
            nodes: Vec::new(),
            step: 0,
        };
        for _ in 0..simulation.options.nodes {
            let node = simulation.build_node();
            simulation.nodes.push(node);
        }
        Ok(simulation)
    }

    fn build_node(&self) -> SimNode {
        let host = self.nodes.len() as u32 + 1;
        Node::new(
            PeerId::new(host, 0),
            self.options.membership.clone(),
            Arc::clone(&self.network),
            self.clock.clone(),
        )
        .with_events(Arc::clone(&self.events))
        .with_rng_seed(self.options.seed.wrapping_add(u64::from(host)))
    }

    /// Start every node, the introducer first.
    pub fn start(&mut self) -> Result<(), SimulationError> {
        let introducer = self.options.membership.introducer;
        if let Some(node) = self.nodes.iter_mut().find(|n| n.id() == introducer) {
            node.start()?;
        }
        for node in self.nodes.iter_mut().filter(|n| n.id() != introducer) {
            node.start()?;
        }
        info!(
            "Started {} nodes (introducer {})",
            self.nodes.len(),
            introducer
        );
        Ok(())
    }

    /// Add and start one more node. Returns its address.
    pub fn add_node(&mut self) -> Result<PeerId, SimulationError> {
        let mut node = self.build_node();
        node.start()?;
        let id = node.id();
        info!("Node {} joining late at step {}", id, self.step);
        self.nodes.push(node);
        Ok(id)
    }

    /// Crash a node: it stops, and its address drops off the network.
    pub fn fail_node(&mut self, id: PeerId) -> bool {
        match self.nodes.iter_mut().find(|n| n.id() == id) {
            Some(node) => {
                node.fail();
                self.network.disconnect(id);
                true
            }
            None => false,
        }
    }

    /// Run one protocol period on every running node.
    pub fn step(&mut self) {
        self.step += 1;
        if let SimClock::Manual(clock) = &self.clock {
            clock.advance(self.options.membership.gossip_interval);
        }

        if self.options.fail_at == Some(self.step) {
            let victims: Vec<PeerId> = self
                .nodes
                .iter()
                .rev()
                .take(self.options.fail_count)
                .map(|n| n.id())
                .collect();
            info!("Step {}: failing {:?}", self.step, victims);
            for id in victims {
                self.fail_node(id);
            }
        }

        let join_timeout = self.options.join_timeout;
        for node in &mut self.nodes {
            if node.state() == NodeState::Failed {
                continue;
            }
            node.drain_inbox();
            if let Err(e) = node.check_join(join_timeout) {
                debug!("{}: {}", node.id(), e);
                node.retry_join();
            }
            node.on_tick();
        }
    }

    /// Run `steps` steps back to back.
    pub fn run(&mut self, steps: u64) {
        for _ in 0..steps {
            self.step();
        }
    }

    /// Steps run so far.
    pub fn current_step(&self) -> u64 {
        self.step
    }

    pub fn nodes(&self) -> &[SimNode] {
        &self.nodes
    }

    pub fn node(&self, id: PeerId) -> Option<&SimNode> {
        self.nodes.iter().find(|n| n.id() == id)
    }

    pub fn network(&self) -> &EmulatedNetwork {
        &self.network
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Addresses of nodes that have not failed, sorted.
    pub fn live_nodes(&self) -> Vec<PeerId> {
        let mut live: Vec<PeerId> = self
            .nodes
            .iter()
            .filter(|n| n.state() != NodeState::Failed)
            .map(|n| n.id())
            .collect();
        live.sort();
        live
    }

    /// Check that every running node is active and sees exactly the
    /// running nodes as alive.
    pub fn converged(&self) -> bool {
        let live = self.live_nodes();
        self.nodes
            .iter()
            .filter(|n| n.state() != NodeState::Failed)
            .all(|n| n.is_active() && n.live_members() == live)
    }

    pub fn report(&self) -> ConvergenceReport {
        let live = self.live_nodes();
        let nodes: Vec<NodeReport> = self
            .nodes
            .iter()
            .map(|n| NodeReport::new(n, &live))
            .collect();
        let converged = self.converged();
        if !converged {
            for node in nodes.iter().filter(|n| !n.converged && n.state != NodeState::Failed) {
                warn!(
                    "{} has not converged: sees {:?}, suspects {:?}",
                    node.id, node.view, node.suspects
                );
            }
        }
        ConvergenceReport {
            step: self.step,
            converged,
            live_nodes: live,
            nodes,
            network: self.network.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_cluster() {
        let options = SimulationOptions {
            nodes: 0,
            ..Default::default()
        };
        assert!(matches!(
            Simulation::new(options),
            Err(SimulationError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_rejects_foreign_introducer() {
        let options = SimulationOptions {
            nodes: 3,
            membership: MembershipConfig::default().with_introducer(PeerId::new(9, 0)),
            ..Default::default()
        };
        assert!(matches!(
            Simulation::new(options),
            Err(SimulationError::InvalidOptions(_))
        ));
    }

    #[test]
    fn test_rejects_bad_drop_rate() {
        let options = SimulationOptions {
            drop_rate: 1.5,
            ..Default::default()
        };
        assert!(Simulation::new(options).is_err());
    }

    #[test]
    fn test_node_addresses() {
        let sim = Simulation::new(SimulationOptions {
            nodes: 3,
            ..Default::default()
        })
        .unwrap();

        let ids: Vec<PeerId> = sim.nodes().iter().map(|n| n.id()).collect();
        assert_eq!(ids, vec![PeerId::new(1, 0), PeerId::new(2, 0), PeerId::new(3, 0)]);
    }

    #[test]
    fn test_start_state() {
        let mut sim = Simulation::new(SimulationOptions {
            nodes: 3,
            ..Default::default()
        })
        .unwrap();
        sim.start().unwrap();

        assert!(sim.node(PeerId::new(1, 0)).unwrap().is_active());
        assert_eq!(
            sim.node(PeerId::new(2, 0)).unwrap().state(),
            NodeState::Joining
        );
        assert!(!sim.converged());
    }

    #[test]
    fn test_single_node_converges_immediately() {
        let mut sim = Simulation::new(SimulationOptions {
            nodes: 1,
            ..Default::default()
        })
        .unwrap();
        sim.start().unwrap();

        assert!(sim.converged());
    }

    #[test]
    fn test_wall_clock_scales_timeouts() {
        let options = SimulationOptions::default().with_wall_clock(100);

        assert_eq!(options.clock, ClockMode::Wall);
        assert_eq!(options.membership.t_fail, 500);
        assert_eq!(options.membership.t_remove, 2_000);
        assert_eq!(options.membership.gossip_interval, 100);
        assert_eq!(options.join_timeout, 1_000);
        assert!(options.membership.validate().is_ok());
    }

    #[test]
    fn test_wall_clock_cluster_converges() {
        let period = std::time::Duration::from_millis(20);
        let mut sim = Simulation::new(
            SimulationOptions {
                nodes: 4,
                ..Default::default()
            }
            .with_wall_clock(20),
        )
        .unwrap();
        sim.start().unwrap();

        for _ in 0..6 {
            std::thread::sleep(period);
            sim.step();
        }

        assert!(sim.converged());
        for node in sim.nodes() {
            assert_eq!(node.heartbeat(), 6);
            assert_eq!(node.table().len(), 4);
        }
    }

    #[test]
    fn test_fail_unknown_node() {
        let mut sim = Simulation::new(SimulationOptions::default()).unwrap();
        assert!(!sim.fail_node(PeerId::new(99, 0)));
    }
}
