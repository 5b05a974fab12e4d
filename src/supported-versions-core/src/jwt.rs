//! Signed policy token verification.
//!
//! Policy tokens are compact JWS: `header.payload.signature`, RS256 only.
//!
//! ## Security Properties
//!
//! - The public key is compiled into the binary
//! - Any other algorithm is rejected before the signature is checked
//! - Tokens that fail verification never produce a [`PolicyDocument`]

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};

use crate::policy::PolicyDocument;

/// Vendor public key used to verify policy tokens from every source.
const EMBEDDED_PUBLIC_KEY: &str = include_str!("../resources/supported_versions_public.pem");

/// Verifier for signed policy tokens.
#[derive(Clone)]
pub struct PolicyVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl PolicyVerifier {
    /// Verifier bound to the embedded vendor key.
    ///
    /// # Errors
    ///
    /// Returns error if the embedded key cannot be parsed.
    pub fn embedded() -> Result<Self, JwtError> {
        Self::from_rsa_pem(EMBEDDED_PUBLIC_KEY.as_bytes())
    }

    /// Verifier bound to an arbitrary RSA public key (PEM).
    ///
    /// # Errors
    ///
    /// Returns error if the PEM is not an RSA public key.
    pub fn from_rsa_pem(pem: &[u8]) -> Result<Self, JwtError> {
        let key =
            DecodingKey::from_rsa_pem(pem).map_err(|e| JwtError::InvalidKey(e.to_string()))?;

        // Policy documents carry no registered claims.
        let mut validation = Validation::new(Algorithm::RS256);
        validation.required_spec_claims.clear();
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.validate_aud = false;

        Ok(Self { key, validation })
    }

    /// Verify a token and decode its payload.
    ///
    /// # Errors
    ///
    /// Returns error if the token is malformed, uses an algorithm other than
    /// RS256, or its signature does not match the key.
    pub fn decode(&self, token: &str) -> Result<PolicyDocument, JwtError> {
        let token = token.trim();

        let parts = token.split('.').count();
        if parts != 3 {
            return Err(JwtError::InvalidFormat(format!(
                "Expected 3 parts for policy token, got {}",
                parts
            )));
        }

        let header = jsonwebtoken::decode_header(token)?;
        if header.alg != Algorithm::RS256 {
            return Err(JwtError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
        }

        let data = jsonwebtoken::decode::<PolicyDocument>(token, &self.key, &self.validation)?;
        Ok(data.claims)
    }
}

impl std::fmt::Debug for PolicyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyVerifier")
            .field("algorithm", &Algorithm::RS256)
            .finish_non_exhaustive()
    }
}

/// Token verification errors.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Invalid token format.
    #[error("Invalid JWT format: {0}")]
    InvalidFormat(String),
    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Error(String),
    /// JSON parse error.
    #[error("JSON parse error: {0}")]
    JsonError(String),
    /// Algorithm other than RS256.
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    /// Verification key could not be loaded.
    #[error("Invalid verification key: {0}")]
    InvalidKey(String),
    /// Signature verification error.
    #[error("Verification error: {0}")]
    VerificationError(String),
}

impl From<jsonwebtoken::errors::Error> for JwtError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::InvalidToken => Self::InvalidFormat(err.to_string()),
            ErrorKind::Base64(e) => Self::Base64Error(e.to_string()),
            ErrorKind::Json(e) => Self::JsonError(e.to_string()),
            ErrorKind::Utf8(e) => Self::JsonError(e.to_string()),
            ErrorKind::InvalidAlgorithm | ErrorKind::InvalidAlgorithmName => {
                Self::UnsupportedAlgorithm(err.to_string())
            },
            ErrorKind::InvalidSignature => Self::VerificationError("signature mismatch".into()),
            _ => Self::VerificationError(err.to_string()),
        }
    }
}
