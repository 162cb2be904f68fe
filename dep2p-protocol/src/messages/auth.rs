// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Challenge/response auth frames.
//!
//! Current frames open with the two magic bytes `0xCA 0x01` and a version
//! byte, followed by typed fields with u16 big-endian length prefixes.
//! Decoders also accept the legacy layout (no magic, no version, 1-byte
//! length prefixes), detected by the absence of the magic. The Result frame
//! never carried a magic and is identical in both generations.
//!
//! On a stream, each frame travels behind a u16 big-endian length prefix;
//! [`read_auth_frame`] and [`write_auth_frame`] own that outer framing.

use crate::error::{Error, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Leading magic of the current frame generation.
pub const AUTH_MAGIC: [u8; 2] = [0xCA, 0x01];
/// Version byte following the magic.
pub const AUTH_WIRE_VERSION: u8 = 1;
/// Challenge nonce length.
pub const NONCE_LEN: usize = 32;
/// Upper bound on a single auth frame on the wire.
pub const MAX_AUTH_FRAME_LEN: usize = 4096;

/// Opens the exchange: who is asking, for which realm, and when.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthRequest {
    pub peer_id: Vec<u8>,
    pub realm_id: String,
    pub timestamp: i64,
}

/// The verifier's nonce for the prover to bind its proof to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthChallenge {
    pub nonce: [u8; NONCE_LEN],
    pub timestamp: i64,
}

/// The prover's HMAC proof over the challenge nonce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthResponse {
    pub proof: Vec<u8>,
    pub timestamp: i64,
}

/// Closes the exchange. Carries no magic in either frame generation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthResult {
    pub success: bool,
    pub error: String,
}

fn has_magic(buf: &[u8]) -> bool {
    buf.len() >= 2 && buf[0..2] == AUTH_MAGIC
}

fn check_version(buf: &[u8]) -> Result<()> {
    match buf.get(2) {
        Some(&AUTH_WIRE_VERSION) => Ok(()),
        Some(v) => Err(Error::InvalidFrame(format!("unknown auth version {v}"))),
        None => Err(Error::TruncatedFrame),
    }
}

/// Incremental big-endian reader over a borrowed frame.
struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> FieldReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.buf.len() - self.pos < n {
            return Err(Error::TruncatedFrame);
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_be_bytes(arr))
    }

    fn finish(&self) -> Result<()> {
        if self.pos != self.buf.len() {
            return Err(Error::InvalidFrame("trailing bytes".to_string()));
        }
        Ok(())
    }
}

impl AuthRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + 2 + self.peer_id.len() + 2 + self.realm_id.len() + 8);
        out.extend_from_slice(&AUTH_MAGIC);
        out.push(AUTH_WIRE_VERSION);
        out.extend_from_slice(&(self.peer_id.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.peer_id);
        out.extend_from_slice(&(self.realm_id.len() as u16).to_be_bytes());
        out.extend_from_slice(self.realm_id.as_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if has_magic(buf) {
            check_version(buf)?;
            let mut r = FieldReader::new(&buf[3..]);
            let peer_len = r.u16()? as usize;
            let peer_id = r.take(peer_len)?.to_vec();
            let realm_len = r.u16()? as usize;
            let realm_id = String::from_utf8(r.take(realm_len)?.to_vec())
                .map_err(|_| Error::InvalidFrame("realm id is not utf-8".to_string()))?;
            let timestamp = r.i64()?;
            r.finish()?;
            Ok(Self {
                peer_id,
                realm_id,
                timestamp,
            })
        } else {
            // Legacy: 1-byte length prefixes, no version byte.
            trace!("Decoding legacy auth request of {} bytes", buf.len());
            let mut r = FieldReader::new(buf);
            let peer_len = r.u8()? as usize;
            let peer_id = r.take(peer_len)?.to_vec();
            let realm_len = r.u8()? as usize;
            let realm_id = String::from_utf8(r.take(realm_len)?.to_vec())
                .map_err(|_| Error::InvalidFrame("realm id is not utf-8".to_string()))?;
            let timestamp = r.i64()?;
            r.finish()?;
            Ok(Self {
                peer_id,
                realm_id,
                timestamp,
            })
        }
    }
}

impl AuthChallenge {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + NONCE_LEN + 8);
        out.extend_from_slice(&AUTH_MAGIC);
        out.push(AUTH_WIRE_VERSION);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = if has_magic(buf) {
            check_version(buf)?;
            FieldReader::new(&buf[3..])
        } else {
            FieldReader::new(buf)
        };
        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(r.take(NONCE_LEN)?);
        let timestamp = r.i64()?;
        r.finish()?;
        Ok(Self { nonce, timestamp })
    }
}

impl AuthResponse {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(3 + 2 + self.proof.len() + 8);
        out.extend_from_slice(&AUTH_MAGIC);
        out.push(AUTH_WIRE_VERSION);
        out.extend_from_slice(&(self.proof.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.proof);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if has_magic(buf) {
            check_version(buf)?;
            let mut r = FieldReader::new(&buf[3..]);
            let proof_len = r.u16()? as usize;
            let proof = r.take(proof_len)?.to_vec();
            let timestamp = r.i64()?;
            r.finish()?;
            Ok(Self { proof, timestamp })
        } else {
            let mut r = FieldReader::new(buf);
            let proof_len = r.u8()? as usize;
            let proof = r.take(proof_len)?.to_vec();
            let timestamp = r.i64()?;
            r.finish()?;
            Ok(Self { proof, timestamp })
        }
    }
}

impl AuthResult {
    pub fn encode(&self) -> Vec<u8> {
        // The error string is bounded by its u8 length prefix.
        let err = if self.error.len() > u8::MAX as usize {
            &self.error[..u8::MAX as usize]
        } else {
            &self.error[..]
        };
        let mut out = Vec::with_capacity(2 + err.len());
        out.push(u8::from(self.success));
        out.push(err.len() as u8);
        out.extend_from_slice(err.as_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = FieldReader::new(buf);
        let success = r.u8()? != 0;
        let err_len = r.u8()? as usize;
        let error = String::from_utf8(r.take(err_len)?.to_vec())
            .map_err(|_| Error::InvalidFrame("error text is not utf-8".to_string()))?;
        r.finish()?;
        Ok(Self { success, error })
    }
}

/// Reads one length-prefixed auth frame body from the stream.
pub async fn read_auth_frame<S: AsyncRead + Unpin>(stream: &mut S) -> std::io::Result<Vec<u8>> {
    let len = stream.read_u16().await? as usize;
    if len > MAX_AUTH_FRAME_LEN {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("auth frame of {len} bytes exceeds {MAX_AUTH_FRAME_LEN}"),
        ));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(buf)
}

/// Writes one length-prefixed auth frame body to the stream.
pub async fn write_auth_frame<S: AsyncWrite + Unpin>(
    stream: &mut S,
    frame: &[u8],
) -> std::io::Result<()> {
    debug_assert!(frame.len() <= MAX_AUTH_FRAME_LEN);
    stream.write_u16(frame.len() as u16).await?;
    stream.write_all(frame).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let req = AuthRequest {
            peer_id: b"peer123".to_vec(),
            realm_id: "ab".repeat(32),
            timestamp: 1_700_000_000_000,
        };
        let decoded = AuthRequest::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn legacy_request_is_accepted() {
        // 1-byte length prefixes and no magic.
        let mut buf = Vec::new();
        buf.push(4u8);
        buf.extend_from_slice(b"node");
        buf.push(2u8);
        buf.extend_from_slice(b"ab");
        buf.extend_from_slice(&42i64.to_be_bytes());
        let decoded = AuthRequest::decode(&buf).unwrap();
        assert_eq!(decoded.peer_id, b"node");
        assert_eq!(decoded.realm_id, "ab");
        assert_eq!(decoded.timestamp, 42);
    }

    #[test]
    fn challenge_and_response_round_trip() {
        let challenge = AuthChallenge {
            nonce: [7u8; NONCE_LEN],
            timestamp: -5,
        };
        assert_eq!(
            AuthChallenge::decode(&challenge.encode()).unwrap(),
            challenge
        );

        let response = AuthResponse {
            proof: vec![1, 2, 3],
            timestamp: 9,
        };
        assert_eq!(AuthResponse::decode(&response.encode()).unwrap(), response);
    }

    #[test]
    fn result_has_no_magic() {
        let result = AuthResult {
            success: false,
            error: "realm mismatch".to_string(),
        };
        let encoded = result.encode();
        assert_ne!(&encoded[0..2], &AUTH_MAGIC);
        assert_eq!(AuthResult::decode(&encoded).unwrap(), result);
    }

    #[test]
    fn truncated_frames_are_rejected() {
        let req = AuthRequest {
            peer_id: b"peer".to_vec(),
            realm_id: String::new(),
            timestamp: 1,
        };
        let encoded = req.encode();
        assert!(matches!(
            AuthRequest::decode(&encoded[..encoded.len() - 1]),
            Err(Error::TruncatedFrame)
        ));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut encoded = AuthChallenge {
            nonce: [0u8; NONCE_LEN],
            timestamp: 0,
        }
        .encode();
        encoded[2] = 9;
        assert!(matches!(
            AuthChallenge::decode(&encoded),
            Err(Error::InvalidFrame(_))
        ));
    }
}
