// Copyright 2024 MaidSafe.net limited.
//
// This SAFE Network Software is licensed to you under The General Public License (GPL), version 3.
// Unless required by applicable law or agreed to in writing, the SAFE Network Software distributed
// under the GPL Licence is distributed on an "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied. Please review the Licences for the specific language governing
// permissions and limitations relating to use of the SAFE Network Software.

//! Realm authentication.
//!
//! Proofs are `nonce(32) || timestamp(8, i64be millis) || HMAC-SHA256(AuthKey,
//! nonce || peer_id || timestamp)`. Replay defense keeps the last accepted
//! timestamp per peer and rejects anything at or before it; a sweep drops
//! entries older than twice the replay window. The four-message challenge
//! exchange binds a proof to a verifier-chosen nonce over a raw stream.

use crate::error::{GatewayError, Result};
use dep2p_protocol::endpoint::{Clock, RawStream, SystemClock};
use dep2p_protocol::messages::auth::{
    read_auth_frame, write_auth_frame, AuthChallenge, AuthRequest, AuthResponse, AuthResult,
    NONCE_LEN,
};
use dep2p_protocol::realm::MIN_PSK_LEN;
use dep2p_protocol::{derive_auth_key, derive_realm_id, AuthKey, RealmId};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, UNIX_EPOCH};
use tokio::sync::watch;

type HmacSha256 = Hmac<Sha256>;

/// Window within which a proof timestamp is considered live.
pub const DEFAULT_REPLAY_WINDOW: Duration = Duration::from_secs(5 * 60);
/// Proof layout: nonce, timestamp, HMAC tag.
pub const PROOF_LEN: usize = NONCE_LEN + 8 + 32;

/// Challenge/response authenticator for one realm.
pub struct RealmAuthenticator {
    auth_key: Mutex<AuthKey>,
    realm_id: RealmId,
    local_peer_id: Vec<u8>,
    replay_window: Duration,
    clock: Arc<dyn Clock>,
    /// Last accepted proof timestamp per peer.
    last_timestamps: Mutex<HashMap<Vec<u8>, i64>>,
    closed: AtomicBool,
    sweeper: Mutex<Option<watch::Sender<bool>>>,
}

impl RealmAuthenticator {
    /// Builds an authenticator from the realm PSK. The PSK must be at least
    /// 16 bytes.
    pub fn new(psk: &[u8], local_peer_id: Vec<u8>) -> Result<Arc<Self>> {
        Self::with_clock(psk, local_peer_id, Arc::new(SystemClock))
    }

    pub fn with_clock(
        psk: &[u8],
        local_peer_id: Vec<u8>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<Self>> {
        if psk.len() < MIN_PSK_LEN {
            return Err(GatewayError::InvalidConfig(format!(
                "PSK must be at least {MIN_PSK_LEN} bytes"
            )));
        }
        Ok(Arc::new(Self {
            auth_key: Mutex::new(derive_auth_key(psk)),
            realm_id: derive_realm_id(psk),
            local_peer_id,
            replay_window: DEFAULT_REPLAY_WINDOW,
            clock,
            last_timestamps: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            sweeper: Mutex::new(None),
        }))
    }

    /// The realm this authenticator serves.
    pub fn realm_id(&self) -> &RealmId {
        &self.realm_id
    }

    /// Produces a fresh proof bound to the local peer id.
    pub fn generate_proof(&self) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let timestamp = self.now_millis();
        let tag = self.proof_tag(&nonce, &self.local_peer_id, timestamp)?;

        let mut proof = Vec::with_capacity(PROOF_LEN);
        proof.extend_from_slice(&nonce);
        proof.extend_from_slice(&timestamp.to_be_bytes());
        proof.extend_from_slice(&tag);
        Ok(proof)
    }

    /// Verifies a proof claimed by `peer_id`. A valid proof authenticates
    /// exactly once; repeats fail with `ReplayAttack`.
    pub fn authenticate(&self, peer_id: &[u8], proof: &[u8]) -> Result<bool> {
        self.ensure_open()?;
        if proof.len() != PROOF_LEN {
            return Err(GatewayError::InvalidProof);
        }
        let nonce = &proof[..NONCE_LEN];
        let mut ts_bytes = [0u8; 8];
        ts_bytes.copy_from_slice(&proof[NONCE_LEN..NONCE_LEN + 8]);
        let timestamp = i64::from_be_bytes(ts_bytes);
        let tag = &proof[NONCE_LEN + 8..];

        self.verify_parts(peer_id, nonce, timestamp, tag)?;
        Ok(true)
    }

    /// Verifies the response half of a challenge exchange.
    pub fn authenticate_challenge(
        &self,
        peer_id: &[u8],
        nonce: &[u8; NONCE_LEN],
        proof: &[u8],
        timestamp: i64,
    ) -> Result<bool> {
        self.ensure_open()?;
        self.verify_parts(peer_id, nonce, timestamp, proof)?;
        Ok(true)
    }

    fn verify_parts(
        &self,
        peer_id: &[u8],
        nonce: &[u8],
        timestamp: i64,
        tag: &[u8],
    ) -> Result<()> {
        let now = self.now_millis();
        let window = self.replay_window.as_millis() as i64;
        if (now - timestamp).abs() > window {
            return Err(GatewayError::TimestampExpired);
        }
        {
            let last = self.last_timestamps.lock().expect("auth replay lock");
            if last.get(peer_id).is_some_and(|seen| timestamp <= *seen) {
                return Err(GatewayError::ReplayAttack);
            }
        }

        let key = self.auth_key.lock().expect("auth key lock");
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|_| GatewayError::InvalidProof)?;
        drop(key);
        mac.update(nonce);
        mac.update(peer_id);
        mac.update(&timestamp.to_be_bytes());
        // Constant-time comparison.
        mac.verify_slice(tag).map_err(|_| GatewayError::InvalidProof)?;

        let _ = self
            .last_timestamps
            .lock()
            .expect("auth replay lock")
            .insert(peer_id.to_vec(), timestamp);
        Ok(())
    }

    /// HMAC over `nonce || peer_id || timestamp`.
    fn proof_tag(&self, nonce: &[u8], peer_id: &[u8], timestamp: i64) -> Result<[u8; 32]> {
        let key = self.auth_key.lock().expect("auth key lock");
        if key.is_empty() {
            return Err(GatewayError::AuthenticatorClosed);
        }
        let mut mac = HmacSha256::new_from_slice(key.as_bytes())
            .map_err(|_| GatewayError::InvalidProof)?;
        drop(key);
        mac.update(nonce);
        mac.update(peer_id);
        mac.update(&timestamp.to_be_bytes());
        Ok(mac.finalize().into_bytes().into())
    }

    // --------------------------------------------
    // ---------- Challenge exchange --------------
    // --------------------------------------------

    /// Drives the prover side: request, receive the challenge, answer it,
    /// read the result.
    pub async fn prove_outbound<S: RawStream>(&self, stream: &mut S) -> Result<()> {
        self.ensure_open()?;
        let request = AuthRequest {
            peer_id: self.local_peer_id.clone(),
            realm_id: self.realm_id.as_str().to_string(),
            timestamp: self.now_millis(),
        };
        write_auth_frame(stream, &request.encode()).await?;

        let challenge = AuthChallenge::decode(&read_auth_frame(stream).await?)?;
        let timestamp = self.now_millis();
        let proof = self.proof_tag(&challenge.nonce, &self.local_peer_id, timestamp)?;
        let response = AuthResponse {
            proof: proof.to_vec(),
            timestamp,
        };
        write_auth_frame(stream, &response.encode()).await?;

        let result = AuthResult::decode(&read_auth_frame(stream).await?)?;
        if !result.success {
            return Err(GatewayError::AuthenticationFailed(result.error));
        }
        Ok(())
    }

    /// Drives the verifier side. Returns the authenticated peer id.
    pub async fn verify_inbound<S: RawStream>(&self, stream: &mut S) -> Result<Vec<u8>> {
        self.ensure_open()?;
        let request = AuthRequest::decode(&read_auth_frame(stream).await?)?;

        let outcome = self.run_challenge(stream, &request).await;
        let result = match &outcome {
            Ok(()) => AuthResult {
                success: true,
                error: String::new(),
            },
            Err(err) => AuthResult {
                success: false,
                error: err.to_string(),
            },
        };
        write_auth_frame(stream, &result.encode()).await?;
        outcome.map(|()| request.peer_id)
    }

    async fn run_challenge<S: RawStream>(
        &self,
        stream: &mut S,
        request: &AuthRequest,
    ) -> Result<()> {
        if request.realm_id != self.realm_id.as_str() {
            return Err(GatewayError::RealmMismatch);
        }

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let challenge = AuthChallenge {
            nonce,
            timestamp: self.now_millis(),
        };
        write_auth_frame(stream, &challenge.encode()).await?;

        let response = AuthResponse::decode(&read_auth_frame(stream).await?)?;
        let _ = self.authenticate_challenge(
            &request.peer_id,
            &nonce,
            &response.proof,
            response.timestamp,
        )?;
        Ok(())
    }

    // --------------------------------------------
    // ---------- Housekeeping --------------------
    // --------------------------------------------

    /// Starts the replay-table sweep loop. Idempotent.
    pub fn start_sweeper(self: &Arc<Self>) {
        let mut sweeper = self.sweeper.lock().expect("auth sweeper lock");
        if sweeper.is_some() {
            return;
        }
        let (tx, mut rx) = watch::channel(false);
        *sweeper = Some(tx);

        let this = Arc::clone(self);
        let _handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(this.replay_window);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let removed = this.sweep();
                        if removed > 0 {
                            trace!("Auth sweep dropped {removed} stale timestamps");
                        }
                    }
                    _ = rx.changed() => return,
                }
            }
        });
    }

    /// Drops replay entries older than twice the window. Returns the count
    /// removed.
    pub fn sweep(&self) -> usize {
        let cutoff = self.now_millis() - 2 * self.replay_window.as_millis() as i64;
        let mut last = self.last_timestamps.lock().expect("auth replay lock");
        let before = last.len();
        last.retain(|_, seen| *seen > cutoff);
        before - last.len()
    }

    /// Closes the authenticator and zeroizes the auth key. Idempotent.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(tx) = self.sweeper.lock().expect("auth sweeper lock").take() {
            let _ = tx.send(true);
        }
        // Replacing the key drops (and zeroizes) the real material.
        *self.auth_key.lock().expect("auth key lock") = AuthKey::empty();
        self.last_timestamps
            .lock()
            .expect("auth replay lock")
            .clear();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(GatewayError::AuthenticatorClosed);
        }
        Ok(())
    }

    fn now_millis(&self) -> i64 {
        self.clock
            .now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PSK: &[u8] = b"test-psk-key-123456";

    fn authenticator() -> Arc<RealmAuthenticator> {
        RealmAuthenticator::new(PSK, b"peer123".to_vec()).unwrap()
    }

    #[test]
    fn short_psks_are_rejected() {
        assert!(matches!(
            RealmAuthenticator::new(b"short", b"peer".to_vec()),
            Err(GatewayError::InvalidConfig(_))
        ));
    }

    #[test]
    fn proof_authenticates_exactly_once() {
        let auth = authenticator();
        let proof = auth.generate_proof().unwrap();
        assert!(auth.authenticate(b"peer123", &proof).unwrap());
        // The same proof replayed is rejected.
        assert!(matches!(
            auth.authenticate(b"peer123", &proof),
            Err(GatewayError::ReplayAttack)
        ));
    }

    #[test]
    fn proof_is_bound_to_the_peer_id() {
        let auth = authenticator();
        let proof = auth.generate_proof().unwrap();
        assert!(matches!(
            auth.authenticate(b"someone-else", &proof),
            Err(GatewayError::InvalidProof)
        ));
    }

    #[test]
    fn truncated_proofs_are_invalid() {
        let auth = authenticator();
        let proof = auth.generate_proof().unwrap();
        assert!(matches!(
            auth.authenticate(b"peer123", &proof[..PROOF_LEN - 1]),
            Err(GatewayError::InvalidProof)
        ));
    }

    #[test]
    fn stale_timestamps_are_expired() {
        let auth = authenticator();
        let mut proof = auth.generate_proof().unwrap();
        let old = (UNIX_EPOCH.elapsed().unwrap().as_millis() as i64)
            - 2 * DEFAULT_REPLAY_WINDOW.as_millis() as i64;
        proof[NONCE_LEN..NONCE_LEN + 8].copy_from_slice(&old.to_be_bytes());
        assert!(matches!(
            auth.authenticate(b"peer123", &proof),
            Err(GatewayError::TimestampExpired)
        ));
    }

    #[test]
    fn sweep_drops_old_entries() {
        let auth = authenticator();
        let proof = auth.generate_proof().unwrap();
        assert!(auth.authenticate(b"peer123", &proof).unwrap());
        assert_eq!(auth.sweep(), 0);
        // Entries age out only past twice the window; force one backwards.
        {
            let mut last = auth.last_timestamps.lock().unwrap();
            let stale = auth.now_millis() - 3 * DEFAULT_REPLAY_WINDOW.as_millis() as i64;
            let _ = last.insert(b"peer123".to_vec(), stale);
        }
        assert_eq!(auth.sweep(), 1);
    }

    #[test]
    fn closed_authenticator_fails_fast() {
        let auth = authenticator();
        auth.close();
        auth.close();
        assert!(matches!(
            auth.generate_proof(),
            Err(GatewayError::AuthenticatorClosed)
        ));
        assert!(matches!(
            auth.authenticate(b"peer123", &[0u8; PROOF_LEN]),
            Err(GatewayError::AuthenticatorClosed)
        ));
    }

    quickcheck::quickcheck! {
        fn any_valid_psk_yields_verifiable_proofs(psk: Vec<u8>, peer: Vec<u8>) -> bool {
            if psk.len() < MIN_PSK_LEN {
                return RealmAuthenticator::new(&psk, peer).is_err();
            }
            let auth = match RealmAuthenticator::new(&psk, peer.clone()) {
                Ok(auth) => auth,
                Err(_) => return false,
            };
            let proof = match auth.generate_proof() {
                Ok(proof) => proof,
                Err(_) => return false,
            };
            auth.authenticate(&peer, &proof).unwrap_or(false)
        }
    }

    #[tokio::test]
    async fn challenge_exchange_succeeds_for_shared_psk() {
        let verifier = authenticator();
        let prover = RealmAuthenticator::new(PSK, b"peer456".to_vec()).unwrap();

        let (mut client, mut server) = tokio::io::duplex(4096);
        let verify = tokio::spawn(async move { verifier.verify_inbound(&mut server).await });
        prover.prove_outbound(&mut client).await.unwrap();
        let peer_id = verify.await.unwrap().unwrap();
        assert_eq!(peer_id, b"peer456");
    }

    #[tokio::test]
    async fn challenge_exchange_rejects_wrong_realm() {
        let verifier = authenticator();
        let prover =
            RealmAuthenticator::new(b"another-psk-key-654321", b"peer456".to_vec()).unwrap();

        let (mut client, mut server) = tokio::io::duplex(4096);
        let verify = tokio::spawn(async move { verifier.verify_inbound(&mut server).await });
        let result = prover.prove_outbound(&mut client).await;
        assert!(matches!(
            result,
            Err(GatewayError::AuthenticationFailed(_))
        ));
        assert!(verify.await.unwrap().is_err());
    }
}
