use axum::extract::Query;
use axum::http::{self, HeaderMap, Uri};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error};

use crate::error::{ClassroomError, ClassroomResult};
use crate::models::UserId;

const TOKEN_COOKIES: [&str; 2] = ["accessToken", "auth_token"];

/// Who a user credential belongs to
#[derive(Clone, Debug, PartialEq)]
pub struct Identity {
    pub user_id: UserId,
    pub display_name: String,
    pub email: Option<String>,
    /// Raw `role` claim, e.g. INSTRUCTOR / STUDENT / ADMIN
    pub role_claim: Option<String>,
}

impl Identity {
    pub fn is_admin(&self) -> bool {
        self.role_claim.as_deref().is_some_and(|r| r.eq_ignore_ascii_case("ADMIN"))
    }
}

/// Authenticated caller of the REST surface
#[derive(Clone, Debug)]
pub enum Principal {
    User(Identity),
    Service(String),
}

pub fn fallback_display_name(user_id: UserId) -> String {
    format!("User#{}", user_id)
}

// Get the auth token from a request
pub fn get_auth_token<B>(req: &http::Request<B>) -> Result<String, String> {
    get_auth_token_from(req.headers(), req.uri())
}

/// Bearer header first, then cookie, then `?token=`
pub fn get_auth_token_from(headers: &HeaderMap, uri: &Uri) -> Result<String, String> {
    // 1. Authorization header
    if let Some(auth_header) = headers.get(http::header::AUTHORIZATION) {
        let auth_str = auth_header.to_str().map_err(|_| "Invalid Authorization header".to_string())?;
        return Ok(auth_str.strip_prefix("Bearer ").unwrap_or(auth_str).trim().to_string());
    }

    // 2. Cookies
    if let Some(cookie_header) = headers.get(http::header::COOKIE) {
        let cookie_str = cookie_header.to_str().map_err(|_| "Invalid Cookie header".to_string())?;
        for c in cookie::Cookie::split_parse(cookie_str).flatten() {
            if TOKEN_COOKIES.contains(&c.name()) && !c.value().is_empty() {
                return Ok(c.value().to_string());
            }
        }
    }

    // 3. Query string, for clients that cannot set headers on an upgrade
    if let Ok(Query(params)) = Query::<HashMap<String, String>>::try_from_uri(uri) {
        if let Some(token) = params.get("token").filter(|t| !t.is_empty()) {
            return Ok(token.clone());
        }
    }

    Err("Missing Authorization header, cookie or token parameter".to_string())
}

// Validate a JWT token and return the token data
pub fn validate_jwt(token: &str, secret: &str) -> Result<TokenData<Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<Value>(token, &decoding_key, &validation)
}

#[derive(Debug, Serialize, Deserialize)]
struct ServiceClaims {
    sub: String,
    #[serde(rename = "type")]
    type_: String,
    exp: usize,
}

/// Mint a short-lived token identifying this service to a collaborator
pub fn generate_service_token(secret: &str, service_name: &str) -> Result<String, jsonwebtoken::errors::Error> {
    let claims = ServiceClaims {
        sub: service_name.to_string(),
        type_: "service".to_string(),
        exp: (Utc::now() + Duration::seconds(60)).timestamp() as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes()))
}

/// Identity collaborator: turns a bearer credential into a principal
#[derive(Clone, Debug)]
pub struct JwtAuthenticator {
    secret: Option<String>,
}

impl JwtAuthenticator {
    pub fn new(secret: Option<String>) -> Self {
        Self { secret }
    }

    pub fn verify(&self, token: &str) -> ClassroomResult<Principal> {
        let secret = self.secret.as_deref().ok_or_else(|| {
            error!("No JWT secret configured!");
            ClassroomError::Authentication("no JWT secret configured".to_string())
        })?;

        let token_data = validate_jwt(token, secret).map_err(|e| {
            debug!("JWT validation failed: {}", e);
            ClassroomError::Authentication(format!("invalid token: {}", e))
        })?;
        let claims = token_data.claims;

        let token_type = claims.get("type").and_then(Value::as_str).unwrap_or("user");
        let sub = claims.get("sub").ok_or_else(|| {
            ClassroomError::Authentication("token does not contain a 'sub' claim".to_string())
        })?;

        match token_type {
            "service" => {
                let name = sub.as_str().map(str::to_string).unwrap_or_else(|| sub.to_string());
                Ok(Principal::Service(name))
            }
            "user" => {
                let user_id = parse_user_id(sub).ok_or_else(|| {
                    ClassroomError::Authentication(format!("'sub' claim {} is not a user id", sub))
                })?;
                let claim = |name: &str| {
                    claims.get(name).and_then(Value::as_str).filter(|s| !s.trim().is_empty()).map(str::to_string)
                };
                Ok(Principal::User(Identity {
                    user_id,
                    display_name: claim("name").unwrap_or_else(|| fallback_display_name(user_id)),
                    email: claim("email"),
                    role_claim: claim("role"),
                }))
            }
            other => Err(ClassroomError::Authentication(format!("invalid token type '{}'", other))),
        }
    }

    /// Like `verify`, but only user credentials are acceptable
    pub fn authenticate_user(&self, token: &str) -> ClassroomResult<Identity> {
        match self.verify(token)? {
            Principal::User(identity) => Ok(identity),
            Principal::Service(name) => Err(ClassroomError::Authentication(format!(
                "service '{}' cannot open a user session",
                name
            ))),
        }
    }
}

fn parse_user_id(sub: &Value) -> Option<UserId> {
    match sub {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) const SECRET: &str = "test-secret";

    /// Mint a user token the way the identity service would
    pub(crate) fn user_token(user_id: UserId, name: &str, role: &str) -> String {
        let claims = json!({
            "sub": user_id.to_string(),
            "name": name,
            "role": role,
            "exp": (Utc::now() + Duration::hours(1)).timestamp(),
        });
        encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
    }

    #[test]
    fn user_tokens_map_to_identities() {
        let auth = JwtAuthenticator::new(Some(SECRET.to_string()));
        let identity = auth.authenticate_user(&user_token(42, "Ada", "INSTRUCTOR")).unwrap();
        assert_eq!(identity.user_id, 42);
        assert_eq!(identity.display_name, "Ada");
        assert_eq!(identity.role_claim.as_deref(), Some("INSTRUCTOR"));
        assert!(!identity.is_admin());
    }

    #[test]
    fn missing_name_falls_back_to_user_number() {
        let claims = json!({"sub": 7, "exp": (Utc::now() + Duration::hours(1)).timestamp()});
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap();
        let identity = JwtAuthenticator::new(Some(SECRET.to_string())).authenticate_user(&token).unwrap();
        assert_eq!(identity.display_name, "User#7");
    }

    #[test]
    fn bad_credentials_are_authentication_errors() {
        let auth = JwtAuthenticator::new(Some("other-secret".to_string()));
        let err = auth.verify(&user_token(1, "x", "STUDENT")).unwrap_err();
        assert!(matches!(err, ClassroomError::Authentication(_)));

        let unconfigured = JwtAuthenticator::new(None);
        assert!(unconfigured.verify("anything").is_err());
    }

    #[test]
    fn service_tokens_cannot_open_sessions() {
        let auth = JwtAuthenticator::new(Some(SECRET.to_string()));
        let token = generate_service_token(SECRET, "roster").unwrap();
        assert!(matches!(auth.verify(&token), Ok(Principal::Service(name)) if name == "roster"));
        assert!(auth.authenticate_user(&token).is_err());
    }

    #[test]
    fn token_sources_in_priority_order() {
        let uri: Uri = "/ws?token=from-query".parse().unwrap();
        let mut headers = HeaderMap::new();
        assert_eq!(get_auth_token_from(&headers, &uri).unwrap(), "from-query");

        headers.insert(http::header::COOKIE, "theme=dark; accessToken=from-cookie".parse().unwrap());
        assert_eq!(get_auth_token_from(&headers, &uri).unwrap(), "from-cookie");

        headers.insert(http::header::AUTHORIZATION, "Bearer from-header".parse().unwrap());
        assert_eq!(get_auth_token_from(&headers, &uri).unwrap(), "from-header");

        let bare: Uri = "/ws".parse().unwrap();
        assert!(get_auth_token_from(&HeaderMap::new(), &bare).is_err());
    }

    #[test]
    fn query_tokens_are_percent_decoded() {
        let uri: Uri = "/ws?classId=7&token=a%2Eb%3Dc&x=1".parse().unwrap();
        assert_eq!(get_auth_token_from(&HeaderMap::new(), &uri).unwrap(), "a.b=c");

        let empty: Uri = "/ws?token=".parse().unwrap();
        assert!(get_auth_token_from(&HeaderMap::new(), &empty).is_err());
    }
}
