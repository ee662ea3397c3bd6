//! JWT claims and user roles.

use serde::{Deserialize, Serialize};

/// User role.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Regular user.
    #[default]
    User,
    /// Administrator.
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID).
    pub sub: String,

    /// Expiration time (as Unix timestamp).
    pub exp: i64,

    /// Issued at (as Unix timestamp).
    #[serde(default)]
    pub iat: Option<i64>,

    /// User's display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Custom role claim.
    #[serde(default)]
    pub role: Option<String>,
}

impl Claims {
    /// Get the effective role for the user.
    pub fn effective_role(&self) -> Role {
        if let Some(ref role) = self.role {
            if role.to_lowercase() == "admin" {
                return Role::Admin;
            }
        }
        Role::User
    }

    /// Get the display name for the user.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.sub)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display() {
        assert_eq!(Role::User.to_string(), "user");
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn test_role_from_str() {
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert!("invalid".parse::<Role>().is_err());
    }

    #[test]
    fn test_claims_effective_role() {
        let claims = Claims {
            sub: "user1".to_string(),
            exp: 0,
            iat: None,
            name: None,
            role: None,
        };
        assert_eq!(claims.effective_role(), Role::User);

        let admin_claims = Claims {
            role: Some("admin".to_string()),
            ..claims
        };
        assert_eq!(admin_claims.effective_role(), Role::Admin);
    }

    #[test]
    fn test_claims_display_name() {
        let claims = Claims {
            sub: "user123".to_string(),
            exp: 0,
            iat: None,
            name: Some("Ada".to_string()),
            role: None,
        };
        assert_eq!(claims.display_name(), "Ada");

        let claims_no_name = Claims {
            name: None,
            ..claims
        };
        assert_eq!(claims_no_name.display_name(), "user123");
    }
}
