// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Rendezvous wire protocol.
//!
//! Protobuf messages framed as `u32be length | body`, with a 1 MiB body cap.
//! The message structs are hand-derived with prost rather than generated, so
//! no protoc is needed on build systems.

use crate::error::{Error, Result};
use prost::Message as _;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a framed rendezvous message body.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum MessageType {
    Register = 0,
    Unregister = 1,
    Discover = 2,
    RegisterResponse = 3,
    DiscoverResponse = 4,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum ResponseStatus {
    Ok = 0,
    EInvalidNamespace = 100,
    EInvalidTtl = 101,
    EInvalidCookie = 102,
    ENotAuthorized = 200,
    EInternalError = 300,
    EUnavailable = 400,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Peer {
    /// Raw 32-byte NodeId.
    #[prost(bytes = "vec", tag = "1")]
    pub id: Vec<u8>,
    /// Multiaddrs in string form, 1..=16 of them.
    #[prost(string, repeated, tag = "2")]
    pub addrs: Vec<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Register {
    #[prost(string, tag = "1")]
    pub ns: String,
    #[prost(message, optional, tag = "2")]
    pub peer: Option<Peer>,
    /// Requested TTL in seconds; the point clamps it to its max.
    #[prost(uint64, tag = "3")]
    pub ttl: u64,
    /// Optional signed peer record carried opaquely.
    #[prost(bytes = "vec", tag = "4")]
    pub signed_record: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Unregister {
    #[prost(string, tag = "1")]
    pub ns: String,
    #[prost(bytes = "vec", tag = "2")]
    pub id: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Discover {
    #[prost(string, tag = "1")]
    pub ns: String,
    #[prost(uint64, tag = "2")]
    pub limit: u64,
    /// Opaque pagination cookie from a previous response.
    #[prost(bytes = "vec", tag = "3")]
    pub cookie: Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RegisterResponse {
    #[prost(enumeration = "ResponseStatus", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub status_text: String,
    /// The TTL actually granted, in seconds.
    #[prost(uint64, tag = "3")]
    pub ttl: u64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct DiscoverResponse {
    #[prost(enumeration = "ResponseStatus", tag = "1")]
    pub status: i32,
    #[prost(string, tag = "2")]
    pub status_text: String,
    #[prost(message, repeated, tag = "3")]
    pub registrations: Vec<Register>,
    /// Cookie to resume the listing; empty when exhausted.
    #[prost(bytes = "vec", tag = "4")]
    pub cookie: Vec<u8>,
}

/// Envelope for every rendezvous exchange.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RendezvousMessage {
    #[prost(enumeration = "MessageType", tag = "1")]
    pub r#type: i32,
    #[prost(message, optional, tag = "2")]
    pub register: Option<Register>,
    #[prost(message, optional, tag = "3")]
    pub unregister: Option<Unregister>,
    #[prost(message, optional, tag = "4")]
    pub discover: Option<Discover>,
    #[prost(message, optional, tag = "5")]
    pub register_response: Option<RegisterResponse>,
    #[prost(message, optional, tag = "6")]
    pub discover_response: Option<DiscoverResponse>,
}

impl RendezvousMessage {
    pub fn decode_body(body: &[u8]) -> Result<Self> {
        Ok(<Self as prost::Message>::decode(body)?)
    }

    pub fn encode_body(&self) -> Vec<u8> {
        self.encode_to_vec()
    }
}

/// Reads one framed message body. The length prefix is validated before any
/// allocation happens.
pub async fn read_frame<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let len = stream.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("rendezvous frame of {len} bytes exceeds {MAX_FRAME_LEN}"),
        ));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok(body)
}

/// Writes one framed message.
pub async fn write_frame<S: AsyncWrite + Unpin>(
    stream: &mut S,
    body: &[u8],
) -> std::io::Result<()> {
    if body.len() > MAX_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("rendezvous frame of {} bytes exceeds {MAX_FRAME_LEN}", body.len()),
        ));
    }
    stream.write_u32(body.len() as u32).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

/// Oversize frames map to the protocol error for callers that want one.
pub fn frame_len_guard(len: usize) -> Result<()> {
    if len > MAX_FRAME_LEN {
        return Err(Error::FrameTooLarge {
            got: len,
            max: MAX_FRAME_LEN,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_round_trips_through_protobuf() {
        let msg = RendezvousMessage {
            r#type: MessageType::Register as i32,
            register: Some(Register {
                ns: "chat".to_string(),
                peer: Some(Peer {
                    id: vec![1u8; 32],
                    addrs: vec!["/ip4/1.2.3.4/tcp/4001".to_string()],
                }),
                ttl: 7200,
                signed_record: Vec::new(),
            }),
            ..Default::default()
        };
        let decoded = RendezvousMessage::decode_body(&msg.encode_body()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[tokio::test]
    async fn framing_round_trips() {
        let body = vec![9u8; 100];
        let mut wire = Vec::new();
        write_frame(&mut wire, &body).await.unwrap();
        let mut cursor = std::io::Cursor::new(wire);
        let read = read_frame(&mut cursor).await.unwrap();
        assert_eq!(read, body);
    }

    #[tokio::test]
    async fn oversize_frames_are_rejected() {
        let mut wire = Vec::new();
        // Hand-craft an oversize header; the body never needs to exist.
        wire.extend_from_slice(&(MAX_FRAME_LEN as u32 + 1).to_be_bytes());
        let mut cursor = std::io::Cursor::new(wire);
        assert!(read_frame(&mut cursor).await.is_err());
        assert!(frame_len_guard(MAX_FRAME_LEN + 1).is_err());
    }
}
