use crate::{
    crypto::{CookieProtector, CryptoError},
    error::ProblemDetails,
    ANTIFORGERY_HEADER_NAME,
};
use actix_web::{
    cookie::{Cookie, SameSite},
    http::StatusCode,
    HttpMessage, HttpRequest, HttpResponse, ResponseError,
};
use thiserror::Error;
use uuid::Uuid;

/// HttpOnly cookie holding the protected cookie token.
pub const ANTIFORGERY_PROVIDER_COOKIE_NAME: &str = ".bff.antiforgery";
const COOKIE_TOKEN_PURPOSE: &str = "bff.antiforgery.cookie";
const REQUEST_TOKEN_PURPOSE: &str = "bff.antiforgery.request";

#[derive(Error, Debug)]
pub enum AntiforgeryError {
    #[error("The required antiforgery header \"{0}\" is not present.")]
    MissingHeader(&'static str),
    #[error("The required antiforgery cookie \"{0}\" is not present.")]
    MissingCookie(&'static str),
    #[error("The antiforgery token could not be decrypted.")]
    InvalidToken,
    #[error("The antiforgery cookie token and request token do not match.")]
    TokenMismatch,
    #[error("Not able to protect antiforgery token: {0}")]
    Protect(#[source] CryptoError),
}

impl ResponseError for AntiforgeryError {
    fn status_code(&self) -> StatusCode {
        match self {
            AntiforgeryError::Protect(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        ProblemDetails::response(self.status_code(), self.to_string())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AntiforgeryTokenSet {
    /// Echoed back by the client in the antiforgery header.
    pub request_token: String,
    pub cookie_token: String,
    pub header_name: &'static str,
}

/// Double submit token provider.
#[cfg_attr(test, mockall::automock)]
pub trait Antiforgery: Send + Sync {
    /// Returns the token set of the request, generating one when needed.
    ///
    /// A newly generated cookie token is kept as a pending cookie, see
    /// [`take_pending_cookie`].
    fn get_and_store_tokens(&self, req: &HttpRequest)
        -> Result<AntiforgeryTokenSet, AntiforgeryError>;

    fn validate_request(&self, req: &HttpRequest) -> Result<(), AntiforgeryError>;
}

struct PendingAntiforgeryCookie(Cookie<'static>);

/// Removes the provider cookie generated during this request, if any.
pub fn take_pending_cookie(req: &HttpRequest) -> Option<Cookie<'static>> {
    req.extensions_mut()
        .remove::<PendingAntiforgeryCookie>()
        .map(|pending| pending.0)
}

pub(crate) fn is_https(req: &HttpRequest) -> bool {
    req.connection_info().scheme() == "https"
}

/// [`Antiforgery`] where the request token is the protected cookie token.
#[derive(Clone)]
pub struct ProtectedAntiforgery {
    cookie_protector: CookieProtector,
    request_protector: CookieProtector,
}

impl ProtectedAntiforgery {
    pub fn new(protector: CookieProtector) -> Self {
        Self {
            cookie_protector: protector.for_purpose(COOKIE_TOKEN_PURPOSE),
            request_protector: protector.for_purpose(REQUEST_TOKEN_PURPOSE),
        }
    }

    fn cookie_token(&self, req: &HttpRequest) -> Option<String> {
        let cookie = req.cookie(ANTIFORGERY_PROVIDER_COOKIE_NAME)?;
        match self.cookie_protector.unprotect(cookie.value()) {
            Ok(token) => Some(token),
            Err(err) => {
                log::debug!("ignoring unreadable antiforgery cookie: {}", err);
                None
            }
        }
    }

    fn provider_cookie(&self, req: &HttpRequest, cookie_token: &str) -> Result<Cookie<'static>, AntiforgeryError> {
        let value = self
            .cookie_protector
            .protect(cookie_token)
            .map_err(AntiforgeryError::Protect)?;
        Ok(Cookie::build(ANTIFORGERY_PROVIDER_COOKIE_NAME, value)
            .http_only(true)
            .same_site(SameSite::Strict)
            .secure(is_https(req))
            .path("/")
            .finish())
    }
}

impl Antiforgery for ProtectedAntiforgery {
    fn get_and_store_tokens(
        &self,
        req: &HttpRequest,
    ) -> Result<AntiforgeryTokenSet, AntiforgeryError> {
        if let Some(tokens) = req.extensions().get::<AntiforgeryTokenSet>() {
            return Ok(tokens.clone());
        }

        let cookie_token = match self.cookie_token(req) {
            Some(token) => token,
            None => {
                let token = Uuid::new_v4().simple().to_string();
                let cookie = self.provider_cookie(req, &token)?;
                req.extensions_mut().insert(PendingAntiforgeryCookie(cookie));
                token
            }
        };

        let request_token = self
            .request_protector
            .protect(&cookie_token)
            .map_err(AntiforgeryError::Protect)?;

        let tokens = AntiforgeryTokenSet {
            request_token,
            cookie_token,
            header_name: ANTIFORGERY_HEADER_NAME,
        };
        req.extensions_mut().insert(tokens.clone());
        Ok(tokens)
    }

    fn validate_request(&self, req: &HttpRequest) -> Result<(), AntiforgeryError> {
        let cookie_token = req
            .cookie(ANTIFORGERY_PROVIDER_COOKIE_NAME)
            .ok_or(AntiforgeryError::MissingCookie(ANTIFORGERY_PROVIDER_COOKIE_NAME))?;
        let request_token = req
            .headers()
            .get(ANTIFORGERY_HEADER_NAME)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or(AntiforgeryError::MissingHeader(ANTIFORGERY_HEADER_NAME))?;

        let cookie_token = self
            .cookie_protector
            .unprotect(cookie_token.value())
            .map_err(|_| AntiforgeryError::InvalidToken)?;
        let request_token = self
            .request_protector
            .unprotect(request_token)
            .map_err(|_| AntiforgeryError::InvalidToken)?;

        if cookie_token != request_token {
            return Err(AntiforgeryError::TokenMismatch);
        }
        Ok(())
    }
}
