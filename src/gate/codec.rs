//! Compact HS256 session tokens.
//!
//! Layout: `base64url(header).base64url(claims).base64url(hmac)`, unpadded.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

use super::{
    claims::Claims,
    error::{CodecError, SigningError},
};

type HmacSha256 = Hmac<Sha256>;

pub const MIN_KEY_LEN: usize = 32;
const ALG: &str = "HS256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: ALG.to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Signs and verifies session tokens with a shared secret.
#[derive(Clone)]
pub struct TokenCodec {
    mac: HmacSha256,
    issuer: String,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("key", &"***")
            .field("issuer", &self.issuer)
            .finish()
    }
}

impl TokenCodec {
    /// # Errors
    /// Returns `SigningError::KeyTooShort` if `key` is shorter than [`MIN_KEY_LEN`].
    pub fn new(key: &[u8], issuer: impl Into<String>) -> Result<Self, SigningError> {
        if key.len() < MIN_KEY_LEN {
            return Err(SigningError::KeyTooShort {
                len: key.len(),
                min: MIN_KEY_LEN,
            });
        }
        let mac = HmacSha256::new_from_slice(key).map_err(|_| SigningError::KeyTooShort {
            len: key.len(),
            min: MIN_KEY_LEN,
        })?;
        Ok(Self {
            mac,
            issuer: issuer.into(),
        })
    }

    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Sign `claims` into a token. Deterministic for a given key and claims.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue(&self, claims: &Claims) -> Result<String, SigningError> {
        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac.clone();
        mac.update(signing_input.as_bytes());
        let signature = mac.finalize().into_bytes();
        let signature_b64 = Base64UrlUnpadded::encode_string(&signature);

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Sign a rotated copy of `claims`: same identity, fresh `jti`, valid
    /// from `now` for `lifetime_seconds`.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be encoded.
    pub fn issue_rotated(
        &self,
        claims: &Claims,
        now: i64,
        lifetime_seconds: i64,
    ) -> Result<(String, Claims), SigningError> {
        let rotated = claims.rotated(now, lifetime_seconds);
        let token = self.issue(&rotated)?;
        Ok((token, rotated))
    }

    /// Verify `token` at time `now` (unix seconds) and return its claims.
    ///
    /// Expiry is judged from the decoded payload before the signature is
    /// checked, so a structurally valid token past its `exp` always reports
    /// `Expired`.
    ///
    /// # Errors
    /// - `Malformed` if the token is not three base64url JSON segments,
    /// - `Expired` if `exp <= now`,
    /// - `SignatureInvalid` if the HMAC does not match,
    /// - `InvalidIssuer` if the issuer is not ours.
    pub fn verify(&self, token: &str, now: i64) -> Result<Claims, CodecError> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(CodecError::Malformed("missing header"))?;
        let claims_b64 = parts.next().ok_or(CodecError::Malformed("missing claims"))?;
        let sig_b64 = parts
            .next()
            .ok_or(CodecError::Malformed("missing signature"))?;
        if parts.next().is_some() {
            return Err(CodecError::Malformed("too many segments"));
        }

        let header: TokenHeader =
            b64d_json(header_b64).ok_or(CodecError::Malformed("invalid header"))?;
        if header.alg != ALG {
            return Err(CodecError::Malformed("unsupported algorithm"));
        }
        let claims: Claims = b64d_json(claims_b64).ok_or(CodecError::Malformed("invalid claims"))?;
        let signature = Base64UrlUnpadded::decode_vec(sig_b64)
            .map_err(|_| CodecError::Malformed("invalid signature encoding"))?;

        if claims.exp <= now {
            return Err(CodecError::Expired);
        }

        let mut mac = self.mac.clone();
        mac.update(header_b64.as_bytes());
        mac.update(b".");
        mac.update(claims_b64.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| CodecError::SignatureInvalid)?;

        if claims.iss != self.issuer {
            return Err(CodecError::InvalidIssuer);
        }

        Ok(claims)
    }
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, SigningError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Option<T> {
    let bytes = Base64UrlUnpadded::decode_vec(s).ok()?;
    serde_json::from_slice(&bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::claims::Identity;
    use uuid::Uuid;

    const KEY: &[u8] = b"0123456789abcdef0123456789abcdef";
    const NOW: i64 = 1_700_000_000;

    fn claims(lifetime: i64) -> Claims {
        let identity = Identity {
            principal_id: Uuid::new_v4(),
            username: "alice".to_string(),
            authority_id: 888,
        };
        Claims::new(&identity, "gatehouse", NOW, lifetime, 300)
    }

    fn codec() -> Result<TokenCodec, SigningError> {
        TokenCodec::new(KEY, "gatehouse")
    }

    #[test]
    fn rejects_short_key() {
        let result = TokenCodec::new(b"short", "gatehouse");
        assert!(matches!(
            result,
            Err(SigningError::KeyTooShort { len: 5, min: 32 })
        ));
    }

    #[test]
    fn verify_returns_issued_claims() -> anyhow::Result<()> {
        let codec = codec()?;
        let claims = claims(3600);
        let token = codec.issue(&claims)?;
        assert_eq!(codec.verify(&token, NOW)?, claims);
        assert_eq!(codec.verify(&token, NOW + 3599)?, claims);
        Ok(())
    }

    #[test]
    fn issue_is_deterministic() -> anyhow::Result<()> {
        let codec = codec()?;
        let claims = claims(3600);
        assert_eq!(codec.issue(&claims)?, codec.issue(&claims)?);
        Ok(())
    }

    #[test]
    fn expired_token_reports_expired() -> anyhow::Result<()> {
        let codec = codec()?;
        let token = codec.issue(&claims(60))?;
        assert_eq!(codec.verify(&token, NOW + 60), Err(CodecError::Expired));
        assert_eq!(codec.verify(&token, NOW + 3600), Err(CodecError::Expired));
        Ok(())
    }

    #[test]
    fn expired_token_signed_with_other_key_reports_expired() -> anyhow::Result<()> {
        let other = TokenCodec::new(b"ffffffffffffffffffffffffffffffff", "gatehouse")?;
        let token = other.issue(&claims(60))?;
        assert_eq!(codec()?.verify(&token, NOW + 61), Err(CodecError::Expired));
        Ok(())
    }

    #[test]
    fn foreign_signature_is_invalid() -> anyhow::Result<()> {
        let other = TokenCodec::new(b"ffffffffffffffffffffffffffffffff", "gatehouse")?;
        let token = other.issue(&claims(3600))?;
        assert_eq!(
            codec()?.verify(&token, NOW),
            Err(CodecError::SignatureInvalid)
        );
        Ok(())
    }

    #[test]
    fn tampered_claims_are_invalid() -> anyhow::Result<()> {
        let codec = codec()?;
        let token = codec.issue(&claims(3600))?;
        let mut forged = claims(3600);
        forged.authority_id = 1;
        let forged_b64 = b64e_json(&forged)?;
        let mut parts: Vec<&str> = token.split('.').collect();
        parts[1] = &forged_b64;
        let tampered = parts.join(".");
        assert_eq!(
            codec.verify(&tampered, NOW),
            Err(CodecError::SignatureInvalid)
        );
        Ok(())
    }

    #[test]
    fn rotated_token_keeps_identity_with_fresh_jti() -> anyhow::Result<()> {
        let codec = codec()?;
        let original = claims(3600);
        let (token, rotated) = codec.issue_rotated(&original, NOW + 3500, 3600)?;
        assert_eq!(codec.verify(&token, NOW + 3600)?, rotated);
        assert_eq!(rotated.identity(), original.identity());
        assert_eq!(rotated.exp, NOW + 3500 + 3600);
        assert_ne!(rotated.jti, original.jti);
        Ok(())
    }

    #[test]
    fn wrong_issuer_is_rejected() -> anyhow::Result<()> {
        let other = TokenCodec::new(KEY, "someone-else")?;
        let mut foreign = claims(3600);
        foreign.iss = "someone-else".to_string();
        let token = other.issue(&foreign)?;
        assert_eq!(codec()?.verify(&token, NOW), Err(CodecError::InvalidIssuer));
        Ok(())
    }

    #[test]
    fn malformed_tokens() -> anyhow::Result<()> {
        let codec = codec()?;
        for token in ["", "abc", "a.b", "a.b.c.d", "!!.??.**"] {
            assert!(
                matches!(codec.verify(token, NOW), Err(CodecError::Malformed(_))),
                "token {token:?} should be malformed"
            );
        }
        Ok(())
    }

    #[test]
    fn debug_hides_key() -> anyhow::Result<()> {
        let rendered = format!("{:?}", codec()?);
        assert!(rendered.contains("***"));
        assert!(!rendered.contains("0123456789abcdef"));
        Ok(())
    }
}
