// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use dep2p_protocol::messages::rendezvous::ResponseStatus;
use dep2p_protocol::NodeId;
use std::io;
use thiserror::Error;

pub(crate) type Result<T, E = DiscoveryError> = std::result::Result<T, E>;

/// Discovery errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DiscoveryError {
    // ---------- Lifecycle
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Service is not started")]
    NotStarted,
    #[error("Service is already started")]
    AlreadyStarted,
    #[error("Service is closed")]
    Closed,

    // ---------- Coordinator
    #[error("Recursive discovery of {0:?} detected")]
    RecursiveDiscovery(NodeId),
    #[error("Lookup of {0:?} timed out")]
    PeerLookupTimeout(NodeId),
    #[error("Lookup of {0:?} was cancelled")]
    LookupCancelled(NodeId),
    #[error("Peer {0:?} could not be found")]
    PeerNotFound(NodeId),

    // ---------- Bootstrap
    #[error("No bootstrap peers configured")]
    NoBootstrapPeers,

    // ---------- DNS
    #[error("Invalid dnsaddr record: {0}")]
    InvalidDnsAddr(String),
    #[error("Invalid domain name: {0}")]
    InvalidDomain(String),
    #[error("dnsaddr recursion exceeded {0} levels")]
    MaxDepthExceeded(usize),
    #[error("No dnsaddr records found for {0}")]
    NoRecordsFound(String),
    #[error("DNS lookup failed: {0}")]
    DnsLookup(String),

    // ---------- Rendezvous
    #[error("Namespace is empty or exceeds {max} characters")]
    InvalidNamespace { max: usize },
    #[error("Invalid TTL")]
    InvalidTtl,
    #[error("Invalid pagination cookie")]
    InvalidCookie,
    #[error("Registration quota exceeded: {0} registrations")]
    TooManyRegistrations(usize),
    #[error("Namespace quota exceeded: {0} namespaces")]
    TooManyNamespaces(usize),
    #[error("Per-namespace quota exceeded: {0} registrations")]
    TooManyRegistrationsPerNamespace(usize),
    #[error("Per-peer quota exceeded: {0} registrations")]
    TooManyRegistrationsPerPeer(usize),
    #[error("Peer must carry between 1 and {max} addresses")]
    InvalidAddressCount { max: usize },
    #[error("Malformed rendezvous message")]
    MalformedMessage,
    #[error("Rendezvous point returned {status:?}: {text}")]
    RendezvousStatus { status: ResponseStatus, text: String },
    #[error("No rendezvous points configured")]
    NoRendezvousPoints,

    // ---------- Plumbing
    #[error("Protocol error: {0}")]
    Protocol(#[from] dep2p_protocol::Error),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Could not serialise peer record: {0}")]
    RecordEncoding(String),
}

impl DiscoveryError {
    /// Status code a rendezvous point reports for this error.
    pub(crate) fn to_response_status(&self) -> ResponseStatus {
        match self {
            DiscoveryError::InvalidNamespace { .. } => ResponseStatus::EInvalidNamespace,
            DiscoveryError::InvalidTtl => ResponseStatus::EInvalidTtl,
            DiscoveryError::InvalidCookie => ResponseStatus::EInvalidCookie,
            DiscoveryError::TooManyRegistrations(_)
            | DiscoveryError::TooManyNamespaces(_)
            | DiscoveryError::TooManyRegistrationsPerNamespace(_)
            | DiscoveryError::TooManyRegistrationsPerPeer(_) => ResponseStatus::ENotAuthorized,
            DiscoveryError::Closed | DiscoveryError::NotStarted => ResponseStatus::EUnavailable,
            _ => ResponseStatus::EInternalError,
        }
    }
}
