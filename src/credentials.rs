//! PIN verification against stored Argon2id hashes.
//!
//! Unknown and inactive principals burn a verification against a fixed dummy
//! hash so neither timing nor response shape reveals whether a principal
//! exists.

use anyhow::{Context, Result, anyhow};
use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use std::sync::Arc;
use uuid::Uuid;

use crate::directory::Directory;

// Syntactically valid Argon2id PHC string that matches no real PIN; used to
// equalize work for unknown principals.
const DUMMY_PIN_HASH: &str = "$argon2id$v=19$m=19456,t=2,p=1$AAAAAAAAAAAAAAAAAAAAAA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA";

/// Hash a PIN for provisioning or rotation. The salt is fresh per call; the
/// returned PHC string carries algorithm, parameters, and salt.
pub fn hash_pin(pin: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash pin: {err}"))?;
    Ok(hash.to_string())
}

/// Re-derive and compare. The `argon2` verifier compares in constant time.
fn verify_hash(pin: &str, phc_hash: &str) -> Result<bool> {
    let parsed = PasswordHash::new(phc_hash).map_err(|err| anyhow!("invalid pin hash: {err}"))?;
    match Argon2::default().verify_password(pin.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow!("pin verification error: {err}")),
    }
}

/// Read-only PIN verifier. Attempt logging is the caller's responsibility.
pub struct CredentialStore {
    directory: Arc<Directory>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(directory: Arc<Directory>) -> Self {
        Self { directory }
    }

    /// Verify a supplied PIN for a principal. Returns false on mismatch, on
    /// inactive principals, and on unknown principals alike. Hashing is
    /// CPU-bound and runs on the blocking pool.
    pub async fn verify_pin(&self, principal_id: Uuid, supplied_pin: &str) -> Result<bool> {
        let (hash, known) = match self.directory.principal(principal_id).await {
            Some(principal) if principal.active => (principal.pin_hash, true),
            _ => (DUMMY_PIN_HASH.to_string(), false),
        };
        let pin = supplied_pin.to_string();
        let matched = tokio::task::spawn_blocking(move || verify_hash(&pin, &hash))
            .await
            .context("pin verification task failed")??;
        Ok(matched && known)
    }
}
