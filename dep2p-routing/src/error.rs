// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use dep2p_protocol::NodeId;
use std::io;
use thiserror::Error;

pub(crate) type Result<T, E = RoutingError> = std::result::Result<T, E>;

/// Routing errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RoutingError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("No route to {0:?}")]
    RouteNotFound(NodeId),
    #[error("No path from {from:?} to {to:?}")]
    PathNotFound { from: NodeId, to: NodeId },
    #[error("No viable route among the candidates")]
    NoViablePath,

    #[error("Node {0:?} is not in the route table")]
    NodeNotFound(NodeId),
    #[error("Route table is full ({0} entries)")]
    TableFull(usize),

    #[error("Latency probe to {node:?} failed: {reason}")]
    ProbeFailed { node: NodeId, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(#[from] dep2p_protocol::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
