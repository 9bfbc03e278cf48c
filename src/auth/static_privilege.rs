//! Static privilege store.
//!
//! [`StaticPrivilege`] keeps users loaded from configuration at startup.
//! Only `SHA1(SHA1(password))` is retained; the plaintext copy used for
//! hashing is zeroized when dropped.

use std::collections::HashMap;

use async_trait::async_trait;
use zeroize::Zeroizing;

use crate::config::Config;
use crate::error::Result;
use crate::protocol::mysql::{native_password_stage2, verify_native_password};

use super::Privilege;

struct UserEntry {
    /// `None` for accounts without a password
    stage2: Option<[u8; 20]>,
    /// Empty means every schema is allowed
    schemas: Vec<String>,
}

/// Privilege store backed by an in-memory user table.
///
/// # Example
///
/// ```
/// use ddal_gateway::auth::StaticPrivilege;
///
/// let privilege = StaticPrivilege::new()
///     .with_user("app", "secret", ["orders", "billing"])
///     .with_user("admin", "admin-secret", Vec::<String>::new());
/// assert_eq!(privilege.len(), 2);
/// ```
#[derive(Default)]
pub struct StaticPrivilege {
    users: HashMap<String, UserEntry>,
}

impl StaticPrivilege {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user. An empty `schemas` list grants every schema.
    pub fn with_user<I, S>(mut self, username: &str, password: &str, schemas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let password = Zeroizing::new(password.as_bytes().to_vec());
        let stage2 = if password.is_empty() {
            None
        } else {
            Some(native_password_stage2(&password))
        };
        self.users.insert(
            username.to_string(),
            UserEntry {
                stage2,
                schemas: schemas.into_iter().map(Into::into).collect(),
            },
        );
        self
    }

    /// Build the store from the `users` configuration section.
    pub fn from_config(config: &Config) -> Self {
        config.users.iter().fold(Self::new(), |store, user| {
            store.with_user(&user.username, &user.password, user.schemas.iter().cloned())
        })
    }

    /// Number of users
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether the store has no users
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl Privilege for StaticPrivilege {
    async fn user_exists(&self, user: &str) -> Result<bool> {
        Ok(self.users.contains_key(user))
    }

    async fn schema_exists(&self, user: &str, schema: &str) -> Result<bool> {
        Ok(self
            .users
            .get(user)
            .map(|entry| entry.schemas.is_empty() || entry.schemas.iter().any(|s| s == schema))
            .unwrap_or(false))
    }

    async fn check_password(
        &self,
        user: &str,
        auth_response: &[u8],
        challenge: &[u8],
    ) -> Result<bool> {
        let Some(entry) = self.users.get(user) else {
            return Ok(false);
        };
        Ok(match &entry.stage2 {
            None => auth_response.is_empty(),
            Some(stage2) => verify_native_password(auth_response, challenge, stage2),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_config_from_str;
    use crate::protocol::mysql::{compute_native_password, Challenge};

    fn store() -> StaticPrivilege {
        StaticPrivilege::new()
            .with_user("app", "secret", ["orders"])
            .with_user("admin", "root-pw", Vec::<String>::new())
            .with_user("guest", "", Vec::<String>::new())
    }

    #[tokio::test]
    async fn test_user_exists() {
        let store = store();
        assert!(store.user_exists("app").await.unwrap());
        assert!(!store.user_exists("mallory").await.unwrap());
    }

    #[tokio::test]
    async fn test_schema_restrictions() {
        let store = store();
        assert!(store.schema_exists("app", "orders").await.unwrap());
        assert!(!store.schema_exists("app", "billing").await.unwrap());
        assert!(store.schema_exists("admin", "anything").await.unwrap());
        assert!(!store.schema_exists("mallory", "orders").await.unwrap());
    }

    #[tokio::test]
    async fn test_check_password() {
        let store = store();
        let challenge = Challenge::from_parts(*b"AbCdEfGh", *b"IjKlMnOpQrSt").as_bytes();

        let good = compute_native_password("secret", &challenge);
        assert!(store.check_password("app", &good, &challenge).await.unwrap());

        let bad = compute_native_password("guess", &challenge);
        assert!(!store.check_password("app", &bad, &challenge).await.unwrap());

        assert!(!store.check_password("app", &[], &challenge).await.unwrap());
        assert!(!store.check_password("mallory", &good, &challenge).await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_password_requires_empty_response() {
        let store = store();
        let challenge = Challenge::generate().as_bytes();
        assert!(store.check_password("guest", &[], &challenge).await.unwrap());
        let some = compute_native_password("x", &challenge);
        assert!(!store.check_password("guest", &some, &challenge).await.unwrap());
    }

    #[tokio::test]
    async fn test_from_config() {
        let yaml = r#"
server:
  listen_port: 3307
users:
  - username: app
    password: secret
    schemas: [orders]
"#;
        let config = load_config_from_str(yaml).unwrap();
        let store = StaticPrivilege::from_config(&config);
        assert_eq!(store.len(), 1);
        assert!(store.schema_exists("app", "orders").await.unwrap());
    }
}
