use crate::{
    authentication::{AuthenticateResult, AuthenticationScheme},
    crypto::{CookieProtector, CryptoError},
    identity::ClaimsPrincipal,
    ticket::{AuthenticationProperties, AuthenticationTicket},
    ticket_store::{TicketStore, TicketStoreError},
    SESSION_COOKIE_NAME,
};
use actix_web::{
    cookie::{
        time::{Duration as CookieDuration, OffsetDateTime},
        Cookie, SameSite,
    },
    HttpRequest,
};
use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;

pub const SESSION_PROTECTION_PURPOSE: &str = "bff.session";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("{0}")]
    Store(#[from] TicketStoreError),
    #[error("{0}")]
    Crypto(#[from] CryptoError),
}

/// Cookie session settings. Expiry is fixed from sign-in, never sliding.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub cookie_name: String,
    pub lifetime: Duration,
}

impl SessionOptions {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            cookie_name: SESSION_COOKIE_NAME.to_string(),
            lifetime,
        }
    }
}

/// Cookie authentication backed by a [`TicketStore`].
///
/// The cookie only carries the protected ticket key, the ticket itself stays
/// on the server.
pub struct SessionAuthenticator {
    store: Arc<dyn TicketStore>,
    protector: CookieProtector,
    options: SessionOptions,
}

impl SessionAuthenticator {
    pub fn new(
        store: Arc<dyn TicketStore>,
        protector: CookieProtector,
        options: SessionOptions,
    ) -> Self {
        Self {
            store,
            protector: protector.for_purpose(SESSION_PROTECTION_PURPOSE),
            options,
        }
    }

    /// Stores a ticket for the principal and returns the session cookie.
    pub async fn sign_in(
        &self,
        principal: ClaimsPrincipal,
        mut properties: AuthenticationProperties,
    ) -> Result<Cookie<'static>, SessionError> {
        let now = Utc::now();
        properties.set_issued_utc(now);
        properties.set_expires_utc(now + self.options.lifetime);

        let ticket = AuthenticationTicket::new(
            principal,
            properties,
            AuthenticationScheme::Cookies.as_str(),
        );
        let key = self.store.store(&ticket).await?;
        let value = self.protector.protect(&key)?;

        log::debug!("user signed in to cookie session.");

        let expires = OffsetDateTime::now_utc()
            .saturating_add(CookieDuration::seconds(self.options.lifetime.num_seconds()));
        Ok(Cookie::build(self.options.cookie_name.clone(), value)
            .http_only(true)
            .secure(true)
            .same_site(SameSite::None)
            .path("/")
            .expires(expires)
            .finish())
    }

    pub async fn authenticate(&self, req: &HttpRequest) -> AuthenticateResult {
        let Some(key) = self.ticket_key(req) else {
            return AuthenticateResult::NoResult;
        };
        let key = match key {
            Ok(key) => key,
            Err(err) => {
                log::debug!("session cookie could not be unprotected: {}", err);
                return AuthenticateResult::Fail("Unprotect ticket failed".to_string());
            }
        };

        let ticket = match self.store.retrieve(&key).await {
            Ok(Some(ticket)) => ticket,
            Ok(None) => {
                log::debug!("session ticket not found.");
                return AuthenticateResult::Fail("Ticket not found".to_string());
            }
            Err(err) => {
                log::error!("Not able to retrieve session ticket: {}", err);
                return AuthenticateResult::Fail(err.to_string());
            }
        };

        if ticket.properties.is_expired(Utc::now()) {
            log::debug!("session ticket expired.");
            if let Err(err) = self.store.remove(&key).await {
                log::error!("Not able to remove expired ticket: {}", err);
            }
            return AuthenticateResult::Fail("Ticket expired".to_string());
        }

        AuthenticateResult::Success(ticket)
    }

    /// Removes the ticket and returns a cookie clearing the session.
    pub async fn sign_out(&self, req: &HttpRequest) -> Result<Cookie<'static>, SessionError> {
        if let Some(Ok(key)) = self.ticket_key(req) {
            self.store.remove(&key).await?;
        }
        log::debug!("user signed out of cookie session.");

        let mut removal = Cookie::build(self.options.cookie_name.clone(), "")
            .http_only(true)
            .secure(true)
            .same_site(SameSite::None)
            .path("/")
            .finish();
        removal.make_removal();
        Ok(removal)
    }

    fn ticket_key(&self, req: &HttpRequest) -> Option<Result<String, CryptoError>> {
        req.cookie(&self.options.cookie_name)
            .map(|cookie| self.protector.unprotect(cookie.value()))
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::{
        cache::MemoryCache,
        identity::{Claim, ClaimsIdentity},
        ticket::{ACCESS_TOKEN, ID_TOKEN},
        ticket_store::{CacheTicketStore, MockTicketStore},
    };
    use actix_web::test::TestRequest;

    pub(crate) fn session_authenticator() -> SessionAuthenticator {
        SessionAuthenticator::new(
            Arc::new(CacheTicketStore::new(Arc::new(MemoryCache::new()))),
            CookieProtector::new(None).unwrap(),
            SessionOptions::new(Duration::minutes(5)),
        )
    }

    pub(crate) fn principal() -> ClaimsPrincipal {
        ClaimsPrincipal::new(ClaimsIdentity::new(
            "Cookies",
            vec![Claim::new("sub", "42"), Claim::new("name", "Marcel")],
        ))
    }

    pub(crate) fn token_properties() -> AuthenticationProperties {
        let mut properties = AuthenticationProperties::default();
        properties.store_tokens([(ACCESS_TOKEN, "accessToken"), (ID_TOKEN, "idToken")]);
        properties
    }

    #[actix_web::test]
    async fn test_sign_in_cookie_attributes() {
        // Arrange
        let session = session_authenticator();

        // Act
        let cookie = session
            .sign_in(principal(), token_properties())
            .await
            .unwrap();

        // Assert
        assert_eq!(cookie.name(), SESSION_COOKIE_NAME);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::None));
        assert_eq!(cookie.path(), Some("/"));
        assert!(cookie.expires_datetime().unwrap() > OffsetDateTime::now_utc());
    }

    #[actix_web::test]
    async fn test_given_signed_in_cookie_when_authenticate_then_success() {
        // Arrange
        let session = session_authenticator();
        let cookie = session
            .sign_in(principal(), token_properties())
            .await
            .unwrap();
        let req = TestRequest::default().cookie(cookie).to_http_request();

        // Act
        let result = session.authenticate(&req).await;

        // Assert
        let AuthenticateResult::Success(ticket) = result else {
            panic!("expected success");
        };
        assert_eq!(ticket.principal, principal());
        assert_eq!(ticket.scheme, "Cookies");
        assert_eq!(
            ticket.properties.get_token_value(ID_TOKEN),
            Some("idToken")
        );
    }

    #[actix_web::test]
    async fn test_given_no_cookie_when_authenticate_then_no_result() {
        // Arrange
        let session = session_authenticator();
        let req = TestRequest::default().to_http_request();

        // Act
        let result = session.authenticate(&req).await;

        // Assert
        assert!(matches!(result, AuthenticateResult::NoResult));
    }

    #[actix_web::test]
    async fn test_given_tampered_cookie_when_authenticate_then_fail() {
        // Arrange
        let session = session_authenticator();
        let req = TestRequest::default()
            .cookie(Cookie::new(SESSION_COOKIE_NAME, "not good"))
            .to_http_request();

        // Act
        let result = session.authenticate(&req).await;

        // Assert
        assert!(matches!(result, AuthenticateResult::Fail(_)));
    }

    #[actix_web::test]
    async fn test_given_expired_ticket_when_authenticate_then_fail_and_removed() {
        // Arrange
        let protector = CookieProtector::new(None).unwrap();
        let mut properties = token_properties();
        properties.set_expires_utc(Utc::now() - Duration::seconds(1));
        let ticket = AuthenticationTicket::new(principal(), properties, "Cookies");
        let ticket_clone = ticket.clone();

        let mut store = MockTicketStore::new();
        store
            .expect_retrieve()
            .withf(|key| key == "key")
            .times(1)
            .return_once(move |_| Ok(Some(ticket_clone)));
        store
            .expect_remove()
            .withf(|key| key == "key")
            .times(1)
            .return_once(|_| Ok(()));

        let session = SessionAuthenticator::new(
            Arc::new(store),
            protector.clone(),
            SessionOptions::new(Duration::minutes(5)),
        );
        let req = TestRequest::default()
            .cookie(Cookie::new(
                SESSION_COOKIE_NAME,
                protector
                    .for_purpose(SESSION_PROTECTION_PURPOSE)
                    .protect("key")
                    .unwrap(),
            ))
            .to_http_request();

        // Act
        let result = session.authenticate(&req).await;

        // Assert
        assert!(matches!(result, AuthenticateResult::Fail(_)));
    }

    #[actix_web::test]
    async fn test_sign_out_removes_ticket_and_expires_cookie() {
        // Arrange
        let session = session_authenticator();
        let cookie = session
            .sign_in(principal(), token_properties())
            .await
            .unwrap();
        let req = TestRequest::default().cookie(cookie).to_http_request();

        // Act
        let removal = session.sign_out(&req).await.unwrap();
        let result = session.authenticate(&req).await;

        // Assert
        assert_eq!(removal.name(), SESSION_COOKIE_NAME);
        assert_eq!(removal.value(), "");
        assert_eq!(removal.max_age(), Some(CookieDuration::ZERO));
        assert!(matches!(result, AuthenticateResult::Fail(_)));
    }
}
