// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

use thiserror::Error;

/// A specialised `Result` type for protocol crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error types for the dep2p protocol.
#[derive(Error, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    // ---------- Identity errors
    #[error("NodeId must be {expected} bytes, got {got}")]
    InvalidNodeIdLength { expected: usize, got: usize },
    #[error("Could not decode NodeId from text: {0}")]
    InvalidNodeIdEncoding(String),
    #[error("RealmId must be empty or 64 hex characters")]
    InvalidRealmId,

    // ---------- Multiaddr errors
    #[error("Invalid multiaddr: {0}")]
    InvalidMultiaddr(String),
    #[error("Multiaddr is missing the /p2p/<NodeId> segment")]
    MultiaddrMissingPeerId,
    #[error("Multiaddr /p2p segment does not match the expected NodeId")]
    MultiaddrPeerIdMismatch,
    #[error("A peer may carry at most {0} addresses")]
    TooManyAddresses(usize),

    // ---------- Wire frame errors
    #[error("Frame is truncated")]
    TruncatedFrame,
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),
    #[error("Frame of {got} bytes exceeds the {max} byte limit")]
    FrameTooLarge { got: usize, max: usize },
    #[error("Could not decode protobuf message: {0}")]
    ProtobufDecode(String),
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Error::ProtobufDecode(err.to_string())
    }
}
