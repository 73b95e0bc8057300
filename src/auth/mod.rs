/// Request authorization
///
/// Resolves the bearer token of a request into the database role and the
/// claim set the executor installs for the transaction. Row filtering is left
/// to the database's grants and row-level security policies.

use crate::config::{AuthConfig, InvalidTokenPolicy};
use crate::error::{PostgateError, Result};
use crate::watch::SchemaVersion;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{Map, Value as JsonValue};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

/// Claim naming the database role
pub const ROLE_CLAIM: &str = "role";

/// Claim compared with the configured token type
pub const TYPE_CLAIM: &str = "typ";

/// Outcome of authorization for one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAuth {
    pub role: String,
    /// Scalar claims as text, forwarded as `jwt.claims.<name>`
    pub claims: BTreeMap<String, String>,
    pub authenticated: bool,
}

impl ResolvedAuth {
    pub fn anonymous(role: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            claims: BTreeMap::new(),
            authenticated: false,
        }
    }
}

/// Per-request state: resolved authorization and the pinned schema version
#[derive(Clone)]
pub struct RequestContext {
    pub auth: ResolvedAuth,
    pub version: Arc<SchemaVersion>,
}

pub struct AuthContextBuilder {
    config: AuthConfig,
    key: Option<DecodingKey>,
    validation: Validation,
}

impl AuthContextBuilder {
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // exp and nbf are checked only when present
        validation.required_spec_claims = HashSet::new();
        validation.validate_exp = true;
        validation.validate_nbf = true;
        if config.jwt_audiences.is_empty() {
            validation.validate_aud = false;
        } else {
            validation.set_audience(&config.jwt_audiences);
        }

        Self {
            key: config
                .jwt_secret
                .as_ref()
                .map(|secret| DecodingKey::from_secret(secret.as_bytes())),
            config: config.clone(),
            validation,
        }
    }

    /// Resolve the bearer token (if any) into a role and claims
    pub fn resolve(&self, bearer: Option<&str>) -> Result<ResolvedAuth> {
        let Some(token) = bearer.map(str::trim).filter(|t| !t.is_empty()) else {
            if self.config.required {
                return Err(PostgateError::AuthenticationRequired);
            }
            return Ok(ResolvedAuth::anonymous(&self.config.default_role));
        };

        match self.verify(token) {
            Ok(auth) => Ok(auth),
            Err(err) if self.config.required => Err(err),
            Err(err) => match self.config.invalid_token {
                InvalidTokenPolicy::Reject => Err(err),
                InvalidTokenPolicy::Anonymous => {
                    tracing::debug!("Ignoring unusable token: {}", err);
                    Ok(ResolvedAuth::anonymous(&self.config.default_role))
                }
            },
        }
    }

    fn verify(&self, token: &str) -> Result<ResolvedAuth> {
        let key = self.key.as_ref().ok_or_else(|| {
            PostgateError::InvalidToken("no JWT secret is configured".to_string())
        })?;
        let data = decode::<Map<String, JsonValue>>(token, key, &self.validation)
            .map_err(|e| PostgateError::InvalidToken(e.to_string()))?;
        let claims = data.claims;

        if let Some(expected) = &self.config.jwt_token_type {
            let actual = claims.get(TYPE_CLAIM).and_then(JsonValue::as_str);
            if actual != Some(expected.as_str()) {
                return Err(PostgateError::InvalidToken(format!(
                    "token type must be '{}'",
                    expected
                )));
            }
        }

        let role = match claims.get(ROLE_CLAIM) {
            None | Some(JsonValue::Null) => self.config.default_role.clone(),
            Some(JsonValue::String(role)) if !role.is_empty() => role.clone(),
            Some(_) => {
                return Err(PostgateError::InvalidToken(
                    "role claim must be a non-empty string".to_string(),
                ))
            }
        };

        Ok(ResolvedAuth {
            role,
            claims: forwardable_claims(&claims),
            authenticated: true,
        })
    }
}

/// Scalar claims whose names are usable as setting names
fn forwardable_claims(claims: &Map<String, JsonValue>) -> BTreeMap<String, String> {
    claims
        .iter()
        .filter(|(name, _)| {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
        .filter_map(|(name, value)| {
            let text = match value {
                JsonValue::String(s) => s.clone(),
                JsonValue::Number(n) => n.to_string(),
                JsonValue::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((name.clone(), text))
        })
        .collect()
}

/// Extract the token of an `Authorization: Bearer <token>` header
pub fn bearer_token(header: Option<&str>) -> Option<&str> {
    let header = header?.trim();
    let (scheme, token) = header.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const SECRET: &str = "s3cret";

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: Some(SECRET.to_string()),
            ..AuthConfig::default()
        }
    }

    fn token(claims: JsonValue) -> String {
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    #[test]
    fn test_no_token_uses_default_role() {
        let auth = AuthContextBuilder::new(&config()).resolve(None).unwrap();
        assert_eq!(auth, ResolvedAuth::anonymous("anonymous"));
    }

    #[test]
    fn test_no_token_when_required() {
        let config = AuthConfig {
            required: true,
            ..config()
        };
        let err = AuthContextBuilder::new(&config).resolve(None).unwrap_err();
        assert!(matches!(err, PostgateError::AuthenticationRequired));
    }

    #[test]
    fn test_valid_token_role_and_claims() {
        let token = token(json!({
            "role": "app_user",
            "user_id": 42,
            "admin": false,
            "exp": now() + 600,
            "nested": {"a": 1},
            "bad-name": "x"
        }));
        let auth = AuthContextBuilder::new(&config()).resolve(Some(&token)).unwrap();
        assert!(auth.authenticated);
        assert_eq!(auth.role, "app_user");
        assert_eq!(auth.claims.get("user_id").map(String::as_str), Some("42"));
        assert_eq!(auth.claims.get("admin").map(String::as_str), Some("false"));
        assert!(!auth.claims.contains_key("nested"));
        assert!(!auth.claims.contains_key("bad-name"));
    }

    #[test]
    fn test_missing_role_claim_uses_default() {
        let token = token(json!({"sub": "abc"}));
        let auth = AuthContextBuilder::new(&config()).resolve(Some(&token)).unwrap();
        assert_eq!(auth.role, "anonymous");
        assert!(auth.authenticated);
    }

    #[test]
    fn test_expired_token_rejected() {
        let token = token(json!({"role": "app_user", "exp": now() - 3600}));
        let err = AuthContextBuilder::new(&config()).resolve(Some(&token)).unwrap_err();
        assert!(matches!(err, PostgateError::InvalidToken(_)));
    }

    #[test]
    fn test_invalid_token_anonymous_policy() {
        let config = AuthConfig {
            invalid_token: InvalidTokenPolicy::Anonymous,
            ..config()
        };
        let auth = AuthContextBuilder::new(&config)
            .resolve(Some("not.a.token"))
            .unwrap();
        assert_eq!(auth.role, "anonymous");
        assert!(!auth.authenticated);
    }

    #[test]
    fn test_required_overrides_anonymous_policy() {
        let config = AuthConfig {
            invalid_token: InvalidTokenPolicy::Anonymous,
            required: true,
            ..config()
        };
        let result = AuthContextBuilder::new(&config).resolve(Some("not.a.token"));
        assert!(matches!(result, Err(PostgateError::InvalidToken(_))));
    }

    #[test]
    fn test_token_type_checked() {
        let config = AuthConfig {
            jwt_token_type: Some("app.jwt_token".to_string()),
            ..config()
        };
        let builder = AuthContextBuilder::new(&config);
        assert!(builder
            .resolve(Some(&token(json!({"typ": "app.jwt_token"}))))
            .is_ok());
        assert!(builder
            .resolve(Some(&token(json!({"typ": "other"}))))
            .is_err());
    }

    #[test]
    fn test_audience_checked() {
        let config = AuthConfig {
            jwt_audiences: vec!["postgate".to_string()],
            ..config()
        };
        let builder = AuthContextBuilder::new(&config);
        assert!(builder.resolve(Some(&token(json!({"aud": "postgate"})))).is_ok());
        assert!(builder.resolve(Some(&token(json!({"aud": "elsewhere"})))).is_err());
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(Some("Bearer abc.def")), Some("abc.def"));
        assert_eq!(bearer_token(Some("bearer  abc ")), Some("abc"));
        assert_eq!(bearer_token(Some("Basic abc")), None);
        assert_eq!(bearer_token(None), None);
    }
}
