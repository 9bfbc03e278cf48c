//! Privilege trait definition.

use async_trait::async_trait;

use crate::error::Result;

/// Pluggable privilege store consulted by the authentication task.
///
/// Implementations are stateless from the gateway's point of view and must
/// be `Send + Sync` so one instance can serve every connection.
///
/// An `Err` means the store itself failed (unreachable, corrupt); a denial is
/// reported as `Ok(false)`.
#[async_trait]
pub trait Privilege: Send + Sync {
    /// Whether a user with this name exists.
    async fn user_exists(&self, user: &str) -> Result<bool>;

    /// Whether `user` may use `schema`.
    async fn schema_exists(&self, user: &str, schema: &str) -> Result<bool>;

    /// Whether `auth_response` is the correct `mysql_native_password`
    /// response for `user` given the connection's 20-byte `challenge`.
    async fn check_password(&self, user: &str, auth_response: &[u8], challenge: &[u8])
        -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GatewayError;
    use std::sync::Arc;

    // Mock store for testing trait bounds
    struct FailingStore;

    #[async_trait]
    impl Privilege for FailingStore {
        async fn user_exists(&self, _user: &str) -> Result<bool> {
            Err(GatewayError::Internal("store offline".into()))
        }

        async fn schema_exists(&self, _user: &str, _schema: &str) -> Result<bool> {
            Ok(false)
        }

        async fn check_password(
            &self,
            _user: &str,
            _auth_response: &[u8],
            _challenge: &[u8],
        ) -> Result<bool> {
            Ok(false)
        }
    }

    #[tokio::test]
    async fn test_trait_object_usable_across_tasks() {
        let store: Arc<dyn Privilege> = Arc::new(FailingStore);
        let cloned = Arc::clone(&store);
        let result = tokio::spawn(async move { cloned.user_exists("bob").await })
            .await
            .unwrap();
        assert!(result.is_err());
        assert!(!store.schema_exists("bob", "x").await.unwrap());
    }
}
