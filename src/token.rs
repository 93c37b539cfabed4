use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// Capability granted by a join token inside its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Publisher,
    Subscriber,
}

// ---------------------------------------------------------------------------
// Signer seam
// ---------------------------------------------------------------------------

/// Builds the authorization token a participant presents to the media
/// transport when joining `channel` as `uid`.
pub trait TokenSigner: Send + Sync + 'static {
    fn build_token(
        &self,
        channel: &str,
        uid: u32,
        role: Role,
        expires_at: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error>;
}

// ---------------------------------------------------------------------------
// JWT implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Application the token was minted for.
    pub iss: String,
    pub channel: String,
    pub uid: u32,
    pub role: Role,
    /// Expiration (unix timestamp).
    pub exp: i64,
    /// Issued-at (unix timestamp).
    pub iat: i64,
}

/// HS256 signer keyed by the application certificate.
#[derive(Clone)]
pub struct JwtTokenSigner {
    app_id: String,
    app_certificate: String,
}

impl JwtTokenSigner {
    pub fn new(app_id: impl Into<String>, app_certificate: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            app_certificate: app_certificate.into(),
        }
    }

    /// Verify and decode a token, returning the inner claims.
    pub fn verify(&self, token: &str) -> Result<TokenClaims, jsonwebtoken::errors::Error> {
        let mut validation = Validation::default(); // HS256 + exp validation
        validation.set_issuer(&[&self.app_id]);

        let token_data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.app_certificate.as_bytes()),
            &validation,
        )?;
        Ok(token_data.claims)
    }
}

impl TokenSigner for JwtTokenSigner {
    fn build_token(
        &self,
        channel: &str,
        uid: u32,
        role: Role,
        expires_at: DateTime<Utc>,
    ) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = TokenClaims {
            iss: self.app_id.clone(),
            channel: channel.to_string(),
            uid,
            role,
            exp: expires_at.timestamp(),
            iat: Utc::now().timestamp(),
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.app_certificate.as_bytes()),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
