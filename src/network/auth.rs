//! Token Authentication
//!
//! Turns the `token` query parameter of a connection request into an
//! [`Identity`]. Tokens are minted by the account service; the relay only
//! verifies them (HS256 shared secret or RS256 public key).

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::{Identity, UserId};

/// How tokens are verified.
#[derive(Clone, Debug, Default)]
pub struct AuthConfig {
    /// Required `iss` claim, if any.
    pub issuer: Option<String>,
    /// Required `aud` claim, if any.
    pub audience: Option<String>,
    /// RS256 public key (PEM). Takes precedence over `secret`.
    pub public_key_pem: Option<String>,
    /// HS256 shared secret.
    pub secret: Option<String>,
    /// Accept expired tokens. Tests only.
    pub skip_expiry: bool,
}

impl AuthConfig {
    /// Read `AUTH_ISSUER`, `AUTH_AUDIENCE`, `AUTH_PUBLIC_KEY_PEM`,
    /// `AUTH_SECRET` and `AUTH_SKIP_EXPIRY`.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            issuer: var("AUTH_ISSUER"),
            audience: var("AUTH_AUDIENCE"),
            public_key_pem: var("AUTH_PUBLIC_KEY_PEM"),
            secret: var("AUTH_SECRET"),
            skip_expiry: matches!(var("AUTH_SKIP_EXPIRY").as_deref(), Some("1" | "true")),
        }
    }

    /// Whether any verification key is set.
    pub fn is_configured(&self) -> bool {
        self.public_key_pem.is_some() || self.secret.is_some()
    }

    fn decoding_key(&self) -> Result<(Algorithm, DecodingKey), AuthError> {
        if let Some(pem) = &self.public_key_pem {
            let key = DecodingKey::from_rsa_pem(pem.as_bytes())
                .map_err(|e| AuthError::DecodeError(format!("invalid public key: {e}")))?;
            return Ok((Algorithm::RS256, key));
        }
        match &self.secret {
            Some(secret) => Ok((Algorithm::HS256, DecodingKey::from_secret(secret.as_bytes()))),
            None => Err(AuthError::NotConfigured),
        }
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = !self.skip_expiry;
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }
        if let Some(issuer) = &self.issuer {
            validation.set_issuer(&[issuer]);
        }
        validation
    }
}

/// Claims the relay reads from a token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Numeric account id. Zero means absent.
    #[serde(rename = "userId", default)]
    pub user_id: i64,
    /// Preferred label.
    #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Login name, used when no display name is set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Expiry (Unix seconds). Zero means no expiry.
    #[serde(default)]
    pub exp: u64,
    /// Issue time (Unix seconds).
    #[serde(default)]
    pub iat: u64,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    /// Audience, a string or a list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<serde_json::Value>,
}

impl TokenClaims {
    /// Identity these claims describe.
    pub fn identity(&self) -> Identity {
        Identity::from_names(
            UserId(self.user_id),
            self.display_name.as_deref(),
            self.username.as_deref(),
        )
    }

    fn is_expired(&self) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        self.exp > 0 && now > self.exp
    }
}

/// Why a token was refused. Every variant ends in a 401.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No `token` parameter.
    #[error("missing token")]
    MissingToken,
    /// Neither a secret nor a public key is configured.
    #[error("authentication not configured")]
    NotConfigured,
    /// Not a JWT.
    #[error("invalid token format")]
    InvalidFormat,
    /// Signed with a different key.
    #[error("invalid signature")]
    InvalidSignature,
    /// Past its `exp`.
    #[error("token expired")]
    Expired,
    /// `iss` differs from the configured issuer.
    #[error("invalid issuer")]
    InvalidIssuer,
    /// `aud` differs from the configured audience.
    #[error("invalid audience")]
    InvalidAudience,
    /// A claim the relay needs is absent.
    #[error("missing required claim: {0}")]
    MissingClaim(String),
    /// Anything else the JWT library reported.
    #[error("decode error: {0}")]
    DecodeError(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => AuthError::Expired,
            ErrorKind::InvalidSignature => AuthError::InvalidSignature,
            ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
            ErrorKind::InvalidAudience => AuthError::InvalidAudience,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) => AuthError::InvalidFormat,
            _ => AuthError::DecodeError(err.to_string()),
        }
    }
}

/// Verify `token` and return its claims.
pub fn validate_token(token: &str, config: &AuthConfig) -> Result<TokenClaims, AuthError> {
    if token.is_empty() {
        return Err(AuthError::MissingToken);
    }

    let (algorithm, key) = config.decoding_key()?;
    let claims = decode::<TokenClaims>(token, &key, &config.validation(algorithm))?.claims;

    if claims.user_id == 0 {
        return Err(AuthError::MissingClaim("userId".into()));
    }
    // The library allows some leeway; expiry here is exact.
    if !config.skip_expiry && claims.is_expired() {
        return Err(AuthError::Expired);
    }

    Ok(claims)
}

/// Resolves a connection token to the caller's identity.
pub trait IdentityResolver: Send + Sync {
    /// Resolve `token`, or say why it is refused.
    fn resolve(&self, token: &str) -> Result<Identity, AuthError>;
}

/// [`IdentityResolver`] for relay JWTs.
#[derive(Clone, Debug)]
pub struct JwtResolver {
    config: AuthConfig,
}

impl JwtResolver {
    /// Resolver verifying with `config`.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }
}

impl IdentityResolver for JwtResolver {
    fn resolve(&self, token: &str) -> Result<Identity, AuthError> {
        validate_token(token, &self.config).map(|claims| claims.identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "relay-unit-test-secret";

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn claims_for(user_id: i64) -> TokenClaims {
        TokenClaims {
            user_id,
            display_name: Some("Ada".into()),
            username: Some("ada99".into()),
            exp: now() + 600,
            iat: now(),
            iss: Some("dotbox-accounts".into()),
            aud: Some(serde_json::json!("dotbox")),
        }
    }

    fn sign(claims: &TokenClaims, secret: &str) -> String {
        encode(&Header::default(), claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn hs256() -> AuthConfig {
        AuthConfig {
            secret: Some(SECRET.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_accepts_signed_token() {
        let claims = validate_token(&sign(&claims_for(7), SECRET), &hs256()).unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.identity(), Identity::new(UserId(7), "Ada"));
    }

    #[test]
    fn test_rejections() {
        let mut expired = claims_for(7);
        expired.exp = 1;
        assert!(matches!(validate_token(&sign(&expired, SECRET), &hs256()), Err(AuthError::Expired)));

        let forged = sign(&claims_for(7), "some-other-secret");
        assert!(matches!(validate_token(&forged, &hs256()), Err(AuthError::InvalidSignature)));

        let anonymous = sign(&claims_for(0), SECRET);
        assert!(matches!(
            validate_token(&anonymous, &hs256()),
            Err(AuthError::MissingClaim(ref claim)) if claim == "userId"
        ));

        assert!(matches!(validate_token("", &hs256()), Err(AuthError::MissingToken)));
        assert!(validate_token("definitely-not-a-jwt", &hs256()).is_err());
    }

    #[test]
    fn test_issuer_and_audience() {
        let token = sign(&claims_for(7), SECRET);

        let strict = AuthConfig {
            issuer: Some("dotbox-accounts".into()),
            audience: Some("dotbox".into()),
            ..hs256()
        };
        assert!(validate_token(&token, &strict).is_ok());

        let wrong_issuer = AuthConfig {
            issuer: Some("elsewhere".into()),
            ..hs256()
        };
        assert!(matches!(validate_token(&token, &wrong_issuer), Err(AuthError::InvalidIssuer)));

        let wrong_audience = AuthConfig {
            audience: Some("elsewhere".into()),
            ..hs256()
        };
        assert!(matches!(validate_token(&token, &wrong_audience), Err(AuthError::InvalidAudience)));
    }

    #[test]
    fn test_unconfigured() {
        let config = AuthConfig::default();
        assert!(!config.is_configured());
        assert!(matches!(validate_token("a.b.c", &config), Err(AuthError::NotConfigured)));
    }

    #[test]
    fn test_skip_expiry() {
        let mut expired = claims_for(7);
        expired.exp = 1;
        let config = AuthConfig {
            skip_expiry: true,
            ..hs256()
        };
        assert!(validate_token(&sign(&expired, SECRET), &config).is_ok());
    }

    #[test]
    fn test_resolver_label_fallback() {
        let resolver = JwtResolver::new(hs256());
        let mut claims = claims_for(7);

        claims.display_name = None;
        assert_eq!(resolver.resolve(&sign(&claims, SECRET)).unwrap().display_name, "ada99");

        claims.username = None;
        assert_eq!(
            resolver.resolve(&sign(&claims, SECRET)).unwrap().display_name,
            crate::core::DEFAULT_DISPLAY_NAME
        );
    }
}
