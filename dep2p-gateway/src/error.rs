// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use std::io;
use thiserror::Error;

pub(crate) type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Gateway and realm-auth errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ---------- Authentication
    #[error("Invalid auth proof")]
    InvalidProof,
    #[error("Proof timestamp outside the replay window")]
    TimestampExpired,
    #[error("Replayed proof detected")]
    ReplayAttack,
    #[error("Authenticator is closed")]
    AuthenticatorClosed,
    #[error("Peer failed authentication: {0}")]
    AuthenticationFailed(String),

    // ---------- Protocol gate
    #[error("Protocol is not served by this gateway")]
    InvalidProtocol,
    #[error("Protocol realm does not match the gateway realm")]
    RealmMismatch,

    // ---------- Relay execution
    #[error("Connection pool exhausted ({0} concurrent)")]
    PoolExhausted(usize),
    #[error("Bandwidth limit prevents the transfer")]
    BandwidthLimit,
    #[error("Relay session not found")]
    SessionNotFound,
    #[error("Relay session exceeded its maximum duration")]
    RelayDurationExceeded,

    #[error("Protocol error: {0}")]
    Protocol(#[from] dep2p_protocol::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
