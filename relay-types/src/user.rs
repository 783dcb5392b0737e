use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub user_id: String,
    pub email: String,
    /// `sha256$<salt>$<hex>`; never serialized to API responses.
    #[serde(default)]
    pub password_hash: String,
    pub name: String,
    #[serde(default = "default_role")]
    pub role: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub color: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub last_login: Option<DateTime<Utc>>,
}

fn default_role() -> String {
    "member".to_string()
}

/// API-facing projection without the credential material.
#[derive(Debug, Clone, Serialize)]
pub struct UserProfile {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub description: String,
    pub skills: Vec<String>,
    pub color: Option<String>,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        UserProfile {
            user_id: user.user_id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            description: user.description.clone(),
            skills: user.skills.clone(),
            color: user.color.clone(),
        }
    }
}
