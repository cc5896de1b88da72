//! Wire format for gate tokens: `v4.public`-style envelopes with JSON claims,
//! pre-authentication encoding, and a detached Ed25519 signature. The footer
//! carries the key id so verifiers can pin the signing key.

use base64ct::{Base64UrlUnpadded, Encoding};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::TokenError;

const HEADER: &str = "v4.public.";
const SIGNATURE_LENGTH: usize = 64;
const KEY_ID_LENGTH: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Override,
}

impl TokenKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh => "refresh",
            Self::Override => "override",
        }
    }
}

/// Claim set carried inside every gate token. Field order is the canonical
/// serialization order; do not reorder.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    pub jti: String,
    pub sub: String,
    pub kind: TokenKind,
    pub role: String,
    pub team: String,
    pub device: String,
    pub iat: String,
    pub exp: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenFooter {
    pub kid: String,
}

/// Generate a fresh Ed25519 signing key.
#[must_use]
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

/// Short identifier for a verifying key, derived from its bytes.
#[must_use]
pub fn key_id(verifying_key: &VerifyingKey) -> String {
    let digest = Sha256::digest(verifying_key.as_bytes());
    let encoded = Base64UrlUnpadded::encode_string(&digest);
    encoded.chars().take(KEY_ID_LENGTH).collect()
}

/// Sign a claim set into a complete token string.
///
/// # Errors
///
/// Returns an error if JSON encoding fails.
pub fn sign(
    claims: &TokenClaims,
    footer: &TokenFooter,
    signing_key: &SigningKey,
) -> Result<String, TokenError> {
    let payload = serde_json::to_vec(claims).map_err(|_| TokenError::Json)?;
    let footer_bytes = serde_json::to_vec(footer).map_err(|_| TokenError::Json)?;
    let pre_auth = pae(&[
        HEADER.as_bytes(),
        payload.as_slice(),
        footer_bytes.as_slice(),
        b"",
    ]);
    let signature = signing_key.sign(pre_auth.as_slice());

    let mut message = Vec::with_capacity(payload.len() + SIGNATURE_LENGTH);
    message.extend_from_slice(&payload);
    message.extend_from_slice(&signature.to_bytes());
    let body = Base64UrlUnpadded::encode_string(&message);
    let footer_b64 = Base64UrlUnpadded::encode_string(&footer_bytes);
    Ok(format!("{HEADER}{body}.{footer_b64}"))
}

/// Verify the signature and decode the claims. Expiry, kind, and revocation
/// checks live in the token service; this only proves authenticity.
///
/// # Errors
///
/// Returns an error if the token is malformed, the key id does not match, or
/// the signature fails.
pub fn verify(
    token: &str,
    verifying_key: &VerifyingKey,
    expected_kid: &str,
) -> Result<TokenClaims, TokenError> {
    let rest = token.strip_prefix(HEADER).ok_or(TokenError::Malformed)?;
    let (body_b64, footer_b64) = rest.split_once('.').ok_or(TokenError::Malformed)?;
    if footer_b64.contains('.') {
        return Err(TokenError::Malformed);
    }

    let footer_bytes = Base64UrlUnpadded::decode_vec(footer_b64).map_err(|_| TokenError::Base64)?;
    let footer: TokenFooter =
        serde_json::from_slice(&footer_bytes).map_err(|_| TokenError::Json)?;
    if footer.kid != expected_kid {
        return Err(TokenError::UnknownKid(footer.kid));
    }

    let message = Base64UrlUnpadded::decode_vec(body_b64).map_err(|_| TokenError::Base64)?;
    if message.len() <= SIGNATURE_LENGTH {
        return Err(TokenError::Malformed);
    }
    let (payload, signature_bytes) = message.split_at(message.len() - SIGNATURE_LENGTH);
    let signature =
        Signature::from_slice(signature_bytes).map_err(|_| TokenError::BadSignature)?;

    let pre_auth = pae(&[HEADER.as_bytes(), payload, footer_bytes.as_slice(), b""]);
    verifying_key
        .verify(pre_auth.as_slice(), &signature)
        .map_err(|_| TokenError::BadSignature)?;

    serde_json::from_slice(payload).map_err(|_| TokenError::Json)
}

/// Convert a unix timestamp to RFC3339 for claim fields.
///
/// # Errors
///
/// Returns an error if formatting fails.
pub fn rfc3339_from_unix(unix_seconds: i64) -> Result<String, TokenError> {
    let dt = OffsetDateTime::from_unix_timestamp(unix_seconds).map_err(|_| TokenError::Time)?;
    dt.format(&Rfc3339).map_err(|_| TokenError::Time)
}

/// Parse an RFC3339 claim field into unix seconds.
///
/// # Errors
///
/// Returns an error if parsing fails.
pub fn unix_from_rfc3339(value: &str) -> Result<i64, TokenError> {
    let dt = OffsetDateTime::parse(value, &Rfc3339).map_err(|_| TokenError::Time)?;
    Ok(dt.unix_timestamp())
}

// Pre-authentication encoding: length-prefixed concatenation so the signed
// message is unambiguous.
fn pae(pieces: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&le64(pieces.len() as u64));
    for piece in pieces {
        out.extend_from_slice(&le64(piece.len() as u64));
        out.extend_from_slice(piece);
    }
    out
}

fn le64(mut value: u64) -> [u8; 8] {
    let mut out = [0u8; 8];
    for (i, byte) in out.iter_mut().enumerate() {
        if i == 7 {
            value &= 0x7f;
        }
        *byte = (value & 0xff) as u8;
        value >>= 8;
    }
    out
}
