use crate::{
    cache::{CacheError, TicketCache},
    ticket::AuthenticationTicket,
};
use async_trait::async_trait;
use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Fixed lifetime of a cached ticket. Not extended on reads.
pub const TICKET_LIFETIME_MINUTES: i64 = 20;

#[derive(Error, Debug)]
pub enum TicketStoreError {
    #[error("Ticket cache failed: {0}")]
    Cache(#[from] CacheError),
    #[error("Ticket serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Server side storage for session tickets, referenced by an opaque key.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TicketStore: Send + Sync {
    async fn store(&self, ticket: &AuthenticationTicket) -> Result<String, TicketStoreError>;

    async fn renew(&self, key: &str, ticket: &AuthenticationTicket)
        -> Result<(), TicketStoreError>;

    /// Absent or expired tickets are `Ok(None)`.
    async fn retrieve(&self, key: &str) -> Result<Option<AuthenticationTicket>, TicketStoreError>;

    async fn remove(&self, key: &str) -> Result<(), TicketStoreError>;
}

pub struct CacheTicketStore {
    cache: Arc<dyn TicketCache>,
}

impl CacheTicketStore {
    pub fn new(cache: Arc<dyn TicketCache>) -> Self {
        Self { cache }
    }

    fn lifetime() -> Duration {
        Duration::minutes(TICKET_LIFETIME_MINUTES)
    }
}

#[async_trait]
impl TicketStore for CacheTicketStore {
    async fn store(&self, ticket: &AuthenticationTicket) -> Result<String, TicketStoreError> {
        let key = Uuid::new_v4().to_string();
        let bytes = ticket.to_bytes()?;
        self.cache.set(&key, bytes, Self::lifetime()).await?;
        log::debug!("session ticket stored.");
        Ok(key)
    }

    async fn renew(
        &self,
        key: &str,
        ticket: &AuthenticationTicket,
    ) -> Result<(), TicketStoreError> {
        let bytes = ticket.to_bytes()?;
        self.cache.set(key, bytes, Self::lifetime()).await?;
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<AuthenticationTicket>, TicketStoreError> {
        match self.cache.get(key).await? {
            Some(bytes) => Ok(Some(AuthenticationTicket::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn remove(&self, key: &str) -> Result<(), TicketStoreError> {
        self.cache.remove(key).await?;
        log::debug!("session ticket removed.");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        cache::{test::TestClock, MemoryCache},
        identity::{Claim, ClaimsIdentity, ClaimsPrincipal},
        ticket::AuthenticationProperties,
    };

    fn ticket(sub: &str) -> AuthenticationTicket {
        AuthenticationTicket::new(
            ClaimsPrincipal::new(ClaimsIdentity::new("Cookies", vec![Claim::new("sub", sub)])),
            AuthenticationProperties::default(),
            "Cookies",
        )
    }

    fn store_with_clock() -> (CacheTicketStore, Arc<TestClock>) {
        let clock = TestClock::new();
        let cache = MemoryCache::with_clock(clock.clone());
        (CacheTicketStore::new(Arc::new(cache)), clock)
    }

    #[actix_web::test]
    async fn test_store_then_retrieve_returns_equal_ticket() {
        // Arrange
        let (store, _) = store_with_clock();
        let expected = ticket("42");

        // Act
        let key = store.store(&expected).await.unwrap();
        let retrieved = store.retrieve(&key).await.unwrap();

        // Assert
        assert_eq!(retrieved, Some(expected));
    }

    #[actix_web::test]
    async fn test_store_generates_distinct_keys() {
        // Arrange
        let (store, _) = store_with_clock();

        // Act
        let first = store.store(&ticket("42")).await.unwrap();
        let second = store.store(&ticket("42")).await.unwrap();

        // Assert
        assert_ne!(first, second);
    }

    #[actix_web::test]
    async fn test_given_twenty_minutes_elapsed_when_retrieve_then_absent() {
        // Arrange
        let (store, clock) = store_with_clock();
        let key = store.store(&ticket("42")).await.unwrap();

        // Act
        clock.advance(Duration::minutes(19));
        let before = store.retrieve(&key).await.unwrap();
        clock.advance(Duration::minutes(1));
        let after = store.retrieve(&key).await.unwrap();

        // Assert
        assert!(before.is_some());
        assert!(after.is_none());
    }

    #[actix_web::test]
    async fn test_renew_replaces_ticket_and_restarts_lifetime() {
        // Arrange
        let (store, clock) = store_with_clock();
        let key = store.store(&ticket("first")).await.unwrap();
        clock.advance(Duration::minutes(15));

        // Act
        store.renew(&key, &ticket("second")).await.unwrap();
        clock.advance(Duration::minutes(15));
        let retrieved = store.retrieve(&key).await.unwrap();

        // Assert
        assert_eq!(retrieved, Some(ticket("second")));
    }

    #[actix_web::test]
    async fn test_remove_then_retrieve_returns_absent() {
        // Arrange
        let (store, _) = store_with_clock();
        let key = store.store(&ticket("42")).await.unwrap();

        // Act
        store.remove(&key).await.unwrap();
        let retrieved = store.retrieve(&key).await.unwrap();

        // Assert
        assert!(retrieved.is_none());
    }

    #[actix_web::test]
    async fn test_remove_absent_key_is_noop() {
        // Arrange
        let (store, _) = store_with_clock();

        // Act
        let result = store.remove("missing").await;

        // Assert
        assert!(result.is_ok());
    }

    #[actix_web::test]
    async fn test_given_corrupt_bytes_when_retrieve_then_serialization_error() {
        // Arrange
        let cache = Arc::new(MemoryCache::new());
        cache
            .set("key", b"not a ticket".to_vec(), Duration::minutes(1))
            .await
            .unwrap();
        let store = CacheTicketStore::new(cache);

        // Act
        let result = store.retrieve("key").await;

        // Assert
        assert!(matches!(result, Err(TicketStoreError::Serialization(_))));
    }

    #[actix_web::test]
    async fn test_concurrent_renew_last_write_wins() {
        // Arrange
        let (store, _) = store_with_clock();
        let key = store.store(&ticket("0")).await.unwrap();
        let written: Vec<AuthenticationTicket> =
            (1..=8).map(|sub| ticket(&sub.to_string())).collect();

        // Act
        let results =
            futures_util::future::join_all(written.iter().map(|t| store.renew(&key, t))).await;
        let retrieved = store.retrieve(&key).await.unwrap().unwrap();

        // Assert
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(Some(&retrieved), written.last());
    }
}
