use crate::crypto::{CookieProtector, CryptoError};
use actix_web::{
    cookie::{Cookie, SameSite},
    HttpRequest,
};
use oauth2::{CsrfToken, PkceCodeVerifier};
use openidconnect::Nonce;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CHALLENGE_COOKIE_NAME: &str = "bff_challenge";
const CHALLENGE_PROTECTION_PURPOSE: &str = "bff.challenge";

#[derive(Error, Debug)]
pub enum ChallengeError {
    #[error("Challenge cookie is missing.")]
    MissingCookie,
    #[error("Challenge cookie is invalid: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Challenge state is invalid: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("CSRF token doesn't match.")]
    StateMismatch,
}

/// Login state kept between `/auth/login` and the callback.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub(crate) struct ChallengeState {
    pub(crate) pkce_verifier: String,
    pub(crate) csrf_token: String,
    pub(crate) nonce: String,
    pub(crate) return_url: String,
}

impl ChallengeState {
    pub(crate) fn new(
        pkce_verifier: PkceCodeVerifier,
        csrf_token: CsrfToken,
        nonce: Nonce,
        return_url: String,
    ) -> Self {
        Self {
            pkce_verifier: pkce_verifier.secret().to_owned(),
            csrf_token: csrf_token.secret().to_owned(),
            nonce: nonce.secret().to_owned(),
            return_url,
        }
    }

    /// Encrypted cookie only sent back to the callback path.
    pub(crate) fn to_cookie(
        &self,
        protector: &CookieProtector,
        callback_path: &str,
    ) -> Result<Cookie<'static>, ChallengeError> {
        let value = protector
            .for_purpose(CHALLENGE_PROTECTION_PURPOSE)
            .protect(&serde_json::to_string(self)?)?;
        Ok(Cookie::build(CHALLENGE_COOKIE_NAME, value)
            .http_only(true)
            .secure(true)
            .same_site(SameSite::Lax)
            .path(callback_path.to_string())
            .finish())
    }

    /// Reads the challenge cookie and checks it belongs to `state`.
    pub(crate) fn from_request(
        req: &HttpRequest,
        protector: &CookieProtector,
        state: &str,
    ) -> Result<Self, ChallengeError> {
        let cookie = req
            .cookie(CHALLENGE_COOKIE_NAME)
            .ok_or(ChallengeError::MissingCookie)?;
        let challenge: ChallengeState =
            serde_json::from_str(
                &protector
                    .for_purpose(CHALLENGE_PROTECTION_PURPOSE)
                    .unprotect(cookie.value())?,
            )?;

        if challenge.csrf_token != state {
            return Err(ChallengeError::StateMismatch);
        }
        Ok(challenge)
    }

    pub(crate) fn removal_cookie(callback_path: &str) -> Cookie<'static> {
        let mut cookie = Cookie::build(CHALLENGE_COOKIE_NAME, "")
            .path(callback_path.to_string())
            .finish();
        cookie.make_removal();
        cookie
    }
}

/// Where to send the user after login. Only targets on `origin` are kept,
/// anything else falls back to the origin root.
///
/// `requested` is the already decoded query value and is kept as is.
pub(crate) fn safe_return_url(requested: Option<&str>, origin: &str) -> String {
    let fallback = format!("{}/", origin);
    let Some(requested) = requested else {
        return fallback;
    };

    if requested.starts_with('/') && !requested.starts_with("//") && !requested.starts_with("/\\") {
        return format!("{}{}", origin, requested);
    }
    match requested.strip_prefix(origin) {
        Some("") => fallback,
        Some(rest) if rest.starts_with('/') || rest.starts_with('?') => requested.to_string(),
        _ => {
            log::warn!("ignoring login return url outside of {}.", origin);
            fallback
        }
    }
}
