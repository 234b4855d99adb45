use crate::{
    authentication::{AuthenticateResult, AuthenticationScheme, AuthenticationService},
    error::ProblemDetails,
    ticket::{ACCESS_TOKEN, ID_TOKEN},
};
use actix_web::{http::StatusCode, web::Data, HttpRequest, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
    pub access_token: String,
    pub id_token: String,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TokenError {
    #[error("Tokens not found.")]
    NotFound,
}

impl ResponseError for TokenError {
    fn status_code(&self) -> StatusCode {
        StatusCode::BAD_REQUEST
    }

    fn error_response(&self) -> HttpResponse {
        ProblemDetails::response(self.status_code(), self.to_string())
    }
}

/// Reads the tokens bound to the current authentication.
///
/// Tokens are never cached, each call authenticates again.
pub struct TokenBroker {
    authentication: Data<AuthenticationService>,
}

impl TokenBroker {
    pub fn new(authentication: Data<AuthenticationService>) -> Self {
        Self { authentication }
    }

    pub fn authentication(&self) -> &AuthenticationService {
        &self.authentication
    }

    pub async fn get_tokens(
        &self,
        ctx: Option<&HttpRequest>,
        scheme: AuthenticationScheme,
    ) -> Result<TokenPair, TokenError> {
        let Some(req) = ctx else {
            log::debug!("no request context, tokens not available.");
            return Err(TokenError::NotFound);
        };

        let ticket = match self.authentication.authenticate(req, scheme).await {
            AuthenticateResult::Success(ticket) => ticket,
            AuthenticateResult::NoResult => {
                log::debug!("no authentication result for scheme {}.", scheme);
                return Err(TokenError::NotFound);
            }
            AuthenticateResult::Fail(reason) => {
                log::debug!("authentication for scheme {} failed: {}", scheme, reason);
                return Err(TokenError::NotFound);
            }
        };

        let access_token = ticket.properties.get_token_value(ACCESS_TOKEN);
        let id_token = ticket.properties.get_token_value(ID_TOKEN);
        match (access_token, id_token) {
            (Some(access_token), Some(id_token)) => Ok(TokenPair {
                access_token: access_token.to_string(),
                id_token: id_token.to_string(),
            }),
            _ => {
                log::debug!("authentication result is missing tokens.");
                Err(TokenError::NotFound)
            }
        }
    }
}
