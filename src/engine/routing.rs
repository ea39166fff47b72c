//! Node identities and the status routing table.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::blackboard::Status;
use crate::errors::{EngineError, EngineResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeId {
    Draft,
    Guardian,
    Critic,
    Supervisor,
    HumanGate,
}

impl NodeId {
    /// Siblings run concurrently after every draft, in join order.
    pub const FAN_OUT: [NodeId; 2] = [Self::Guardian, Self::Critic];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Guardian => "guardian",
            Self::Critic => "critic",
            Self::Supervisor => "supervisor",
            Self::HumanGate => "human_gate",
        }
    }

    /// Nodes whose output status is looked up in the routing table.
    pub fn is_decision(&self) -> bool {
        matches!(self, Self::Supervisor | Self::HumanGate)
    }

    /// Statuses a decision node can leave behind.
    pub fn decision_outputs(&self) -> &'static [Status] {
        match self {
            Self::Supervisor => &[Status::Completed, Status::Failed, Status::RevisionNeeded],
            Self::HumanGate => &[Status::Approved, Status::RevisionNeeded, Status::Completed],
            _ => &[],
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "guardian" => Ok(Self::Guardian),
            "critic" => Ok(Self::Critic),
            "supervisor" => Ok(Self::Supervisor),
            "human_gate" => Ok(Self::HumanGate),
            _ => Err(format!("Invalid node: {}", s)),
        }
    }
}

/// Where control goes after a decision node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "route", content = "node")]
pub enum Route {
    Node(NodeId),
    /// Run ends.
    Terminal,
    /// Stay paused until an external decision arrives.
    Await,
}

#[derive(Debug, Clone)]
pub struct RoutingTable {
    entries: HashMap<(NodeId, Status), Route>,
}

impl RoutingTable {
    /// Build and validate a table.
    pub fn new(entries: impl IntoIterator<Item = ((NodeId, Status), Route)>) -> EngineResult<Self> {
        let table = Self {
            entries: entries.into_iter().collect(),
        };
        table.validate()?;
        Ok(table)
    }

    /// The review loop's routes.
    pub fn standard() -> Self {
        use NodeId::*;
        Self {
            entries: HashMap::from([
                ((Supervisor, Status::Completed), Route::Node(HumanGate)),
                ((Supervisor, Status::Failed), Route::Terminal),
                ((Supervisor, Status::RevisionNeeded), Route::Node(Draft)),
                ((HumanGate, Status::Approved), Route::Terminal),
                ((HumanGate, Status::RevisionNeeded), Route::Node(Draft)),
                ((HumanGate, Status::Completed), Route::Await),
            ]),
        }
    }

    /// Every decision output is mapped, only decision nodes have entries,
    /// targets re-enter the graph at the draft or the gate, and only the
    /// gate may wait.
    pub fn validate(&self) -> EngineResult<()> {
        for node in [NodeId::Supervisor, NodeId::HumanGate] {
            for status in node.decision_outputs() {
                if !self.entries.contains_key(&(node, *status)) {
                    return Err(EngineError::InvalidConfig(format!(
                        "no route from {} for status '{}'",
                        node, status
                    )));
                }
            }
        }
        for ((node, status), route) in &self.entries {
            if !node.is_decision() {
                return Err(EngineError::InvalidConfig(format!(
                    "{} is not a decision node (route for '{}')",
                    node, status
                )));
            }
            if let Route::Node(target) = route
                && !matches!(target, NodeId::Draft | NodeId::HumanGate)
            {
                return Err(EngineError::InvalidConfig(format!(
                    "route {} -> {} skips the draft step",
                    node, target
                )));
            }
            if *route == Route::Await && *node != NodeId::HumanGate {
                return Err(EngineError::InvalidConfig(format!(
                    "only the human gate can wait (route from {} for '{}')",
                    node, status
                )));
            }
        }
        Ok(())
    }

    pub fn route(&self, node: NodeId, status: Status) -> EngineResult<Route> {
        self.entries
            .get(&(node, status))
            .copied()
            .ok_or(EngineError::UnroutableStatus { node, status })
    }
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::standard()
    }
}
