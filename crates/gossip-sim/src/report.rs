//! End-of-run convergence report.

use crate::simulation::SimNode;
use gossip_core::{MembershipEntry, NetworkStats, NodeState, PeerId};
use serde::Serialize;
use tracing::info;

/// One node's final view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeReport {
    pub id: PeerId,
    pub state: NodeState,
    pub heartbeat: i64,
    /// Members the node believes alive, itself included
    pub view: Vec<PeerId>,
    /// Members the node currently suspects
    pub suspects: Vec<PeerId>,
    /// View matches the set of running nodes
    pub converged: bool,
    pub table: Vec<MembershipEntry>,
}

impl NodeReport {
    pub fn new(node: &SimNode, live: &[PeerId]) -> Self {
        let view = node.live_members();
        let mut suspects: Vec<PeerId> = node
            .table()
            .peers()
            .filter(|e| e.suspect)
            .map(|e| e.peer)
            .collect();
        suspects.sort();

        Self {
            id: node.id(),
            state: node.state(),
            heartbeat: node.heartbeat(),
            converged: node.is_active() && view == live,
            view,
            suspects,
            table: node.table().snapshot(),
        }
    }
}

/// Cluster-wide outcome of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvergenceReport {
    pub step: u64,
    pub converged: bool,
    pub live_nodes: Vec<PeerId>,
    pub nodes: Vec<NodeReport>,
    pub network: NetworkStats,
}

impl ConvergenceReport {
    /// Write the report through `tracing`.
    pub fn log(&self) {
        info!(
            "After {} steps: {} of {} nodes running, converged = {}",
            self.step,
            self.live_nodes.len(),
            self.nodes.len(),
            self.converged
        );
        for node in &self.nodes {
            info!(
                "  {} [{:?}] hb={} view={:?} suspects={:?}",
                node.id, node.state, node.heartbeat, node.view, node.suspects
            );
        }
        info!(
            "Network: {} sent, {} delivered, {} dropped",
            self.network.sent, self.network.delivered, self.network.dropped
        );
    }
}
