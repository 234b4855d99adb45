use crate::{
    authentication::{AuthenticateResult, AuthenticationScheme},
    identity::{claims_from_payload, ClaimsIdentity, ClaimsPrincipal},
    oidc::{ConfigurationManager, OidcError},
    ticket::{AuthenticationProperties, AuthenticationTicket, ACCESS_TOKEN},
};
use actix_web::{http::header, HttpRequest};
use jsonwebtoken::{
    decode, decode_header,
    jwk::{Jwk, JwkSet},
    DecodingKey, Validation,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

pub const BEARER_PREFIX: &str = "Bearer";

#[derive(Error, Debug)]
pub enum BearerError {
    #[error("invalid token: {0}")]
    Decode(#[from] jsonwebtoken::errors::Error),
    #[error("signing keys unavailable: {0}")]
    Configuration(#[from] OidcError),
    #[error("token kid is required when multiple jwks keys are present")]
    MissingKid,
    #[error("jwks key not found for kid: {0}")]
    KeyNotFound(String),
}

/// Validates `Authorization: Bearer` JWTs against the identity provider keys.
///
/// Keys come from the discovery document, a token signed with an unknown
/// `kid` refreshes it once before failing.
#[derive(Clone)]
pub struct BearerAuthenticator {
    issuer: String,
    audience: String,
    configuration_manager: Arc<dyn ConfigurationManager>,
}

impl BearerAuthenticator {
    pub fn new(
        issuer: impl Into<String>,
        audience: impl Into<String>,
        configuration_manager: Arc<dyn ConfigurationManager>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            audience: audience.into(),
            configuration_manager,
        }
    }

    /// The raw token when the request carries a bearer authorization header.
    pub fn token_from_request(req: &HttpRequest) -> Option<&str> {
        req.headers()
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix(BEARER_PREFIX))
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }

    pub async fn authenticate(&self, req: &HttpRequest) -> AuthenticateResult {
        let Some(token) = Self::token_from_request(req) else {
            return AuthenticateResult::NoResult;
        };

        match self.validate(token).await {
            Ok(payload) => {
                let identity = ClaimsIdentity::new(
                    AuthenticationScheme::Bearer.as_str(),
                    claims_from_payload(&payload),
                );
                let mut properties = AuthenticationProperties::default();
                properties.store_tokens([(ACCESS_TOKEN, token)]);
                AuthenticateResult::Success(AuthenticationTicket::new(
                    ClaimsPrincipal::new(identity),
                    properties,
                    AuthenticationScheme::Bearer.as_str(),
                ))
            }
            Err(err) => {
                log::debug!("bearer token rejected: {}", err);
                AuthenticateResult::Fail(err.to_string())
            }
        }
    }

    async fn validate(&self, token: &str) -> Result<Map<String, Value>, BearerError> {
        let header = decode_header(token)?;
        let kid = header.kid.as_deref();

        let mut jwks = self.configuration_manager.get_configuration().await?.jwks;
        if let Some(unknown) = kid.filter(|kid| jwks.find(kid).is_none()) {
            log::info!("unknown signing key {}, refreshing discovery document.", unknown);
            jwks = self.configuration_manager.refresh_configuration().await?.jwks;
        }
        let key = DecodingKey::from_jwk(select_jwk(&jwks, kid)?)?;

        let mut validation = Validation::new(header.alg);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);

        let data = decode::<Map<String, Value>>(token, &key, &validation)?;
        Ok(data.claims)
    }
}

fn select_jwk<'a>(jwks: &'a JwkSet, kid: Option<&str>) -> Result<&'a Jwk, BearerError> {
    match kid {
        Some(kid) => jwks
            .find(kid)
            .ok_or_else(|| BearerError::KeyNotFound(kid.to_string())),
        None if jwks.keys.len() == 1 => Ok(&jwks.keys[0]),
        None => Err(BearerError::MissingKid),
    }
}
