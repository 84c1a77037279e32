//! Self-signed OIDC token minting.
//!
//! The emulator stands in for the Google token infrastructure: HTTP tasks
//! configured with an `oidc_token` get an `Authorization: Bearer` header
//! minted here, and target servers verify it against the emulator's own
//! JWKS endpoint. One RSA-2048 key pair is generated at process start and
//! lives for the process lifetime.
//!
//! The signer accepts any service-account email and audience the caller
//! supplies; it emulates the managed behavior without enforcing it.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Issuer used when none is configured.
pub const DEFAULT_ISSUER: &str = "http://cloud-tasks-emulator";

/// Lifetime of minted ID tokens.
pub const TOKEN_TTL_SECONDS: i64 = 3_600;

const KEY_BITS: usize = 2_048;

/// Claims carried by a minted ID token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// Issuer.
    pub iss: String,
    /// Subject: the service-account email.
    pub sub: String,
    /// Service-account email, duplicated from `sub`.
    pub email: String,
    /// Audience.
    pub aud: String,
    /// Issued-at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// A single RSA signing key in JWK form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jwk {
    /// Key type, always `RSA`.
    pub kty: String,
    /// Intended use, always `sig`.
    #[serde(rename = "use")]
    pub key_use: String,
    /// Signing algorithm, always `RS256`.
    pub alg: String,
    /// Key identifier.
    pub kid: String,
    /// Modulus, base64url without padding.
    pub n: String,
    /// Public exponent, base64url without padding.
    pub e: String,
}

/// The JWK set published at `/jwks`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwkSet {
    /// The emulator's single signing key.
    pub keys: Vec<Jwk>,
}

/// OpenID Connect discovery document served at
/// `/.well-known/openid-configuration`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryDocument {
    /// Token issuer.
    pub issuer: String,
    /// Where the JWK set lives.
    pub jwks_uri: String,
    /// Supported signing algorithms.
    pub id_token_signing_alg_values_supported: Vec<String>,
    /// Supported response types.
    pub response_types_supported: Vec<String>,
    /// Supported subject types.
    pub subject_types_supported: Vec<String>,
    /// Claims present in minted tokens.
    pub claims_supported: Vec<String>,
}

/// Process-lifetime OIDC signer.
///
/// Key material is generated once in [`OidcSigner::new`] and is read-only
/// afterwards, so the signer is freely shared across dispatch loops.
pub struct OidcSigner {
    issuer: String,
    kid: String,
    encoding_key: EncodingKey,
    jwks: JwkSet,
}

impl std::fmt::Debug for OidcSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OidcSigner")
            .field("issuer", &self.issuer)
            .field("kid", &self.kid)
            .field("encoding_key", &"<EncodingKey>")
            .finish()
    }
}

impl OidcSigner {
    /// Generates a fresh RSA-2048 key pair and derives the stable `kid`.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when key generation or encoding fails; this is
    /// unreachable in practice and treated as fatal at startup.
    pub fn new(issuer: Option<String>) -> Result<Self> {
        let mut rng = rand::thread_rng();
        let private_key = RsaPrivateKey::new(&mut rng, KEY_BITS)
            .map_err(|e| Error::internal(format!("rsa key generation failed: {e}")))?;
        let public_key = RsaPublicKey::from(&private_key);

        let spki = public_key
            .to_public_key_der()
            .map_err(|e| Error::internal(format!("public key encoding failed: {e}")))?;
        let digest = Sha256::digest(spki.as_bytes());
        let kid = URL_SAFE_NO_PAD.encode(&digest[..16]);

        let pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| Error::internal(format!("private key encoding failed: {e}")))?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| Error::internal(format!("signing key setup failed: {e}")))?;

        let jwks = JwkSet {
            keys: vec![Jwk {
                kty: "RSA".to_string(),
                key_use: "sig".to_string(),
                alg: "RS256".to_string(),
                kid: kid.clone(),
                n: URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be()),
                e: URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be()),
            }],
        };

        Ok(Self {
            issuer: issuer.unwrap_or_else(|| DEFAULT_ISSUER.to_string()),
            kid,
            encoding_key,
            jwks,
        })
    }

    /// Returns the configured issuer.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Mints a signed ID token for `email` and `audience`.
    ///
    /// The caller supplies `now` so token timestamps follow the emulator
    /// clock.
    ///
    /// # Errors
    ///
    /// Returns `Internal` when signing fails.
    pub fn sign(&self, email: &str, audience: &str, now: DateTime<Utc>) -> Result<String> {
        let claims = IdTokenClaims {
            iss: self.issuer.clone(),
            sub: email.to_string(),
            email: email.to_string(),
            aud: audience.to_string(),
            iat: now.timestamp(),
            exp: now.timestamp() + TOKEN_TTL_SECONDS,
        };

        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());

        jsonwebtoken::encode(&header, &claims, &self.encoding_key)
            .map_err(|e| Error::internal(format!("id token signing failed: {e}")))
    }

    /// Returns the public JWK set.
    #[must_use]
    pub fn jwks(&self) -> &JwkSet {
        &self.jwks
    }

    /// Builds the discovery document for the given base URL.
    #[must_use]
    pub fn discovery_document(&self, base_url: &str) -> DiscoveryDocument {
        DiscoveryDocument {
            issuer: self.issuer.clone(),
            jwks_uri: format!("{}/jwks", base_url.trim_end_matches('/')),
            id_token_signing_alg_values_supported: vec!["RS256".to_string()],
            response_types_supported: vec!["id_token".to_string()],
            subject_types_supported: vec!["public".to_string()],
            claims_supported: ["iss", "sub", "aud", "iat", "exp", "email"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}
