// Wallet sign-in
//
// A wallet asks for a challenge, signs the challenge message with its
// account's ED25519 key and trades the signature for a bearer session.
// The key is read from the ledger, so only the account holder can sign in.
// Challenges are single use. Sessions live in memory and end on restart.

use crate::error::AppError;
use crate::ledger::{AccountKey, Ledger};
use crate::models::validate_wallet;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const CHALLENGE_TTL_SECS: i64 = 300;
const SESSION_TTL_SECS: i64 = 24 * 3600;
/// DER header Hedera puts in front of a raw ED25519 public key
const ED25519_DER_PREFIX: &str = "302a300506032b6570032100";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    pub wallet_address: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub wallet_address: String,
    pub nonce: String,
    /// The exact bytes to sign
    pub message: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub wallet_address: String,
    pub nonce: String,
    /// Hex-encoded ED25519 signature over the challenge message
    pub signature: String,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AuthSession {
    pub token: String,
    pub wallet_address: String,
    pub expires_at: DateTime<Utc>,
}

struct PendingChallenge {
    wallet: String,
    expires_at: DateTime<Utc>,
}

pub fn challenge_message(wallet: &str, nonce: &str) -> String {
    format!("rwa-backend login {} {}", wallet, nonce)
}

fn random_token() -> String {
    hex::encode(rand::random::<[u8; 32]>())
}

fn verifying_key(key: &AccountKey) -> Result<VerifyingKey, AppError> {
    if !key.key_type.eq_ignore_ascii_case("ED25519") {
        return Err(AppError::BadRequest(format!(
            "{} account keys cannot sign in",
            key.key_type
        )));
    }
    let lower = key.key.trim_start_matches("0x").to_ascii_lowercase();
    let raw = lower.strip_prefix(ED25519_DER_PREFIX).unwrap_or(&lower);
    let bytes = hex::decode(raw).map_err(|_| AppError::Ledger("account key is not hex".into()))?;
    let bytes: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| AppError::Ledger(format!("account key has {} bytes", bytes.len())))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| AppError::Ledger(format!("invalid account key: {}", e)))
}

pub struct AuthService {
    ledger: Arc<dyn Ledger>,
    challenges: RwLock<HashMap<String, PendingChallenge>>,
    sessions: RwLock<HashMap<String, AuthSession>>,
}

impl AuthService {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            challenges: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub async fn challenge(&self, wallet: &str, now: DateTime<Utc>) -> Result<Challenge, AppError> {
        validate_wallet(wallet)?;
        let nonce = random_token();
        let expires_at = now + Duration::seconds(CHALLENGE_TTL_SECS);

        let mut challenges = self.challenges.write().await;
        challenges.retain(|_, pending| pending.expires_at > now);
        challenges.insert(
            nonce.clone(),
            PendingChallenge {
                wallet: wallet.to_string(),
                expires_at,
            },
        );

        Ok(Challenge {
            wallet_address: wallet.to_string(),
            message: challenge_message(wallet, &nonce),
            nonce,
            expires_at,
        })
    }

    /// Checks the signature against the wallet's on-ledger key and opens a session.
    pub async fn verify(&self, req: VerifyRequest, now: DateTime<Utc>) -> Result<AuthSession, AppError> {
        validate_wallet(&req.wallet_address)?;
        let pending = self.challenges.write().await.remove(&req.nonce);
        let issued = pending
            .map(|p| p.wallet == req.wallet_address && p.expires_at > now)
            .unwrap_or(false);
        if !issued {
            warn!("Auth: unknown or expired challenge for {}", req.wallet_address);
            return Err(AppError::Unauthorized);
        }

        let signature = hex::decode(req.signature.trim_start_matches("0x"))
            .ok()
            .and_then(|bytes| Signature::from_slice(&bytes).ok())
            .ok_or_else(|| AppError::BadRequest("signature must be 64 hex-encoded bytes".into()))?;

        let key = self.ledger.account_public_key(&req.wallet_address).await?;
        let key = verifying_key(&key)?;
        let message = challenge_message(&req.wallet_address, &req.nonce);
        if key.verify_strict(message.as_bytes(), &signature).is_err() {
            warn!("Auth: bad signature from {}", req.wallet_address);
            return Err(AppError::Unauthorized);
        }

        Ok(self.issue_session(&req.wallet_address, now).await)
    }

    pub async fn issue_session(&self, wallet: &str, now: DateTime<Utc>) -> AuthSession {
        let session = AuthSession {
            token: random_token(),
            wallet_address: wallet.to_string(),
            expires_at: now + Duration::seconds(SESSION_TTL_SECS),
        };
        let mut sessions = self.sessions.write().await;
        sessions.retain(|_, s| s.expires_at > now);
        sessions.insert(session.token.clone(), session.clone());
        info!("Auth: {} signed in", wallet);
        session
    }

    /// Wallet behind a live session token.
    pub async fn session(&self, token: &str, now: DateTime<Utc>) -> Option<String> {
        self.sessions
            .read()
            .await
            .get(token)
            .filter(|s| s.expires_at > now)
            .map(|s| s.wallet_address.clone())
    }
}
