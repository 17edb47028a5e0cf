//! Time-bounded download links.
//!
//! A link is a pure function of (container, object, ttl, now) and the signing key. Nothing
//! about a link is stored: the read path mints a fresh one on every request and the
//! download endpoint checks it with [`LinkSigner::verify`].

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Route prefix under which signed artifacts are served.
pub const ARTIFACT_ROUTE_PREFIX: &str = "/artifacts";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LinkError {
    #[error("link expired")]
    Expired,

    #[error("link signature does not match")]
    BadSignature,

    #[error("malformed link: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresignedLink {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Signs and verifies download links with a keyed BLAKE3 MAC.
#[derive(Clone)]
pub struct LinkSigner {
    base_url: String,
    key: [u8; 32],
}

impl LinkSigner {
    pub fn new(base_url: impl Into<String>, key: [u8; 32]) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            key,
        }
    }

    /// Signer with a key given as 64 hex characters.
    pub fn from_hex(base_url: impl Into<String>, key_hex: &str) -> Result<Self, LinkError> {
        let bytes = hex::decode(key_hex.trim()).map_err(|e| LinkError::Malformed(e.to_string()))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| LinkError::Malformed("signing key must be 32 bytes".to_string()))?;
        Ok(Self::new(base_url, key))
    }

    /// Signer with a fresh random key. Links do not survive a restart.
    pub fn random(base_url: impl Into<String>) -> Self {
        Self::new(base_url, rand::random::<[u8; 32]>())
    }

    pub fn presign(
        &self,
        container: &str,
        object: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> PresignedLink {
        let expires_at = now + chrono::Duration::seconds(ttl.as_secs() as i64);
        let expires = expires_at.timestamp();
        let signature = self.signature(container, object, expires);

        PresignedLink {
            url: format!(
                "{}{}/{}/{}?expires={}&signature={}",
                self.base_url,
                ARTIFACT_ROUTE_PREFIX,
                container,
                object,
                expires,
                signature.to_hex()
            ),
            expires_at,
        }
    }

    pub fn verify(
        &self,
        container: &str,
        object: &str,
        expires: i64,
        signature: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LinkError> {
        let provided =
            blake3::Hash::from_hex(signature).map_err(|e| LinkError::Malformed(e.to_string()))?;

        // blake3::Hash equality is constant-time.
        if provided != self.signature(container, object, expires) {
            return Err(LinkError::BadSignature);
        }
        if now.timestamp() > expires {
            return Err(LinkError::Expired);
        }

        Ok(())
    }

    fn signature(&self, container: &str, object: &str, expires: i64) -> blake3::Hash {
        let message = format!("{}/{}\n{}", container, object, expires);
        blake3::keyed_hash(&self.key, message.as_bytes())
    }
}

impl std::fmt::Debug for LinkSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkSigner")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
