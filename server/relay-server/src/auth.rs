use std::future::{ready, Ready};
use std::sync::Arc;

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use dashmap::DashMap;
use rand::Rng;
use relay_stores::UserRepo;
use relay_types::user::UserProfile;
use relay_types::{HostError, User};
use sha2::{Digest, Sha256};

use crate::state::AppState;

/// Bearer-token authentication backed by the user repo. Tokens live for
/// the process lifetime; a restart just means logging in again.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserRepo>,
    tokens: Arc<DashMap<String, String>>,
}

impl AuthService {
    pub fn new(users: Arc<dyn UserRepo>) -> Self {
        AuthService {
            users,
            tokens: Arc::new(DashMap::new()),
        }
    }

    pub async fn register(
        &self,
        email: &str,
        password: &str,
        name: &str,
        role: Option<String>,
        description: Option<String>,
        skills: Vec<String>,
        color: Option<String>,
    ) -> Result<UserProfile, HostError> {
        if email.is_empty() || password.is_empty() {
            return Err(HostError::Validation(
                "email and password are required".into(),
            ));
        }
        if self
            .users
            .get_by_email(email)
            .await
            .map_err(|e| HostError::Store(e.to_string()))?
            .is_some()
        {
            return Err(HostError::Conflict(format!(
                "user already exists: {email}"
            )));
        }

        let user = User {
            user_id: uuid::Uuid::new_v4().to_string(),
            email: email.to_string(),
            password_hash: hash_password(password),
            name: name.to_string(),
            role: role.unwrap_or_else(|| "member".to_string()),
            description: description.unwrap_or_default(),
            skills,
            color,
            created_at: chrono::Utc::now(),
            last_login: None,
        };
        let profile = UserProfile::from(&user);
        self.users
            .create(user)
            .await
            .map_err(|e| HostError::Store(e.to_string()))?;
        Ok(profile)
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(String, UserProfile), HostError> {
        let mut user = self
            .users
            .get_by_email(email)
            .await
            .map_err(|e| HostError::Store(e.to_string()))?
            .ok_or_else(|| HostError::Auth("invalid credentials".into()))?;
        if !verify_password(password, &user.password_hash) {
            return Err(HostError::Auth("invalid credentials".into()));
        }

        user.last_login = Some(chrono::Utc::now());
        let profile = UserProfile::from(&user);
        let user_id = user.user_id.clone();
        let _ = self.users.update(user).await;

        let token = format!("rly_{}", uuid::Uuid::new_v4().simple());
        self.tokens.insert(token.clone(), user_id);
        Ok((token, profile))
    }

    pub fn authenticate(&self, bearer: &str) -> Option<String> {
        self.tokens.get(bearer).map(|entry| entry.value().clone())
    }
}

pub fn hash_password(password: &str) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(rand::distributions::Alphanumeric)
        .take(16)
        .map(char::from)
        .collect();
    format!("sha256${salt}${}", digest(&salt, password))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("sha256"), Some(salt), Some(hash)) => digest(salt, password) == hash,
        _ => false,
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let out = hasher.finalize();
    out.iter().map(|b| format!("{b:02x}")).collect()
}

/// Extractor for handlers that require a valid bearer token.
pub struct AuthedUser {
    pub user_id: String,
}

impl FromRequest for AuthedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let token = req
            .headers()
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_string);

        let user_id = token.and_then(|token| {
            req.app_data::<web::Data<AppState>>()
                .and_then(|state| state.auth.authenticate(&token))
        });

        ready(match user_id {
            Some(user_id) => Ok(AuthedUser { user_id }),
            None => Err(actix_web::error::ErrorUnauthorized(
                serde_json::json!({ "success": false, "error": "AuthError: missing or invalid bearer token" }),
            )),
        })
    }
}

/// Extractor for the `X-Session-ID` header.
pub struct SessionHeader(pub String);

impl FromRequest for SessionHeader {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        let session = req
            .headers()
            .get("X-Session-ID")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(str::to_string);
        ready(match session {
            Some(session) => Ok(SessionHeader(session)),
            None => Err(actix_web::error::ErrorBadRequest(
                serde_json::json!({ "success": false, "error": "ValidationError: X-Session-ID header is required" }),
            )),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter2");
        assert!(hash.starts_with("sha256$"));
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn distinct_salts_for_same_password() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn malformed_hashes_never_verify() {
        assert!(!verify_password("x", "plaintext"));
        assert!(!verify_password("x", "sha256$onlysalt"));
    }
}
