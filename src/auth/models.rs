//! User/role/claims types shared by `jwt` and `middleware` (spec §1, §6).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// User account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // bcrypt hash - never serialize
    pub role: UserRole,
    pub api_key: Option<String>,
    pub created_at: String,
}

/// User roles for RBAC
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum UserRole {
    #[serde(rename = "admin")]
    Admin, // Full access to all endpoints
    #[serde(rename = "trader")]
    Trader, // Signal access + trading operations
    #[serde(rename = "viewer")]
    Viewer, // Read-only access
}

impl UserRole {
    pub fn as_str(&self) -> &str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Trader => "trader",
            UserRole::Viewer => "viewer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "admin" => Some(UserRole::Admin),
            "trader" => Some(UserRole::Trader),
            "viewer" => Some(UserRole::Viewer),
            _ => None,
        }
    }
}

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject (user_id)
    pub username: String,
    pub role: UserRole,
    pub exp: usize, // expiration timestamp
    /// Trading account ids this token's bearer may act on without a
    /// permission-service round trip (spec §6: "fast path uses JWT
    /// `acct_ids` claim if present").
    #[serde(default)]
    pub acct_ids: Option<Vec<i64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_role_serializes_to_lowercase_string() {
        let admin = UserRole::Admin;
        let json = serde_json::to_string(&admin).unwrap();
        assert_eq!(json, r#""admin""#);

        let trader: UserRole = serde_json::from_str(r#""trader""#).unwrap();
        assert_eq!(trader, UserRole::Trader);
    }

    #[test]
    fn user_role_string_conversion_is_case_insensitive() {
        assert_eq!(UserRole::Admin.as_str(), "admin");
        assert_eq!(UserRole::Trader.as_str(), "trader");
        assert_eq!(UserRole::Viewer.as_str(), "viewer");

        assert_eq!(UserRole::from_str("admin"), Some(UserRole::Admin));
        assert_eq!(UserRole::from_str("TRADER"), Some(UserRole::Trader));
        assert_eq!(UserRole::from_str("invalid"), None);
    }
}
