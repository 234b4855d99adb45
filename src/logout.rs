use crate::{
    authentication::AuthenticationScheme,
    error::ProblemDetails,
    oidc::{ConfigurationManager, OidcError},
    session::SessionError,
    tokens::{TokenBroker, TokenError},
};
use actix_web::{cookie::Cookie, http::StatusCode, HttpRequest, HttpResponse, ResponseError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LogoutError {
    #[error("{0}")]
    Tokens(#[from] TokenError),
    #[error("Not able to sign out: {0}")]
    Session(#[from] SessionError),
    #[error("OIDC Configuration Manager is not available.")]
    ConfigurationManagerUnavailable,
    #[error("{0}")]
    Discovery(#[from] OidcError),
    #[error("Discovery document has no end session endpoint.")]
    MissingEndSessionEndpoint,
}

impl ResponseError for LogoutError {
    fn status_code(&self) -> StatusCode {
        match self {
            LogoutError::Tokens(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        ProblemDetails::response(self.status_code(), self.to_string())
    }
}

#[derive(Debug)]
pub struct LogoutResult {
    /// Identity provider end session url the client navigates to.
    pub end_session_url: String,
    /// Clears the session cookie in the browser.
    pub removal_cookie: Cookie<'static>,
}

/// Ends the local session and builds the identity provider logout url.
pub struct LogoutOrchestrator {
    broker: TokenBroker,
    configuration_manager: Option<Arc<dyn ConfigurationManager>>,
}

impl LogoutOrchestrator {
    pub fn new(
        broker: TokenBroker,
        configuration_manager: Option<Arc<dyn ConfigurationManager>>,
    ) -> Self {
        Self {
            broker,
            configuration_manager,
        }
    }

    pub async fn logout(&self, req: &HttpRequest) -> Result<LogoutResult, LogoutError> {
        let tokens = self
            .broker
            .get_tokens(Some(req), AuthenticationScheme::OpenIdConnect)
            .await?;

        let removal_cookie = self.broker.authentication().session().sign_out(req).await?;

        let configuration_manager = self
            .configuration_manager
            .as_ref()
            .ok_or(LogoutError::ConfigurationManagerUnavailable)?;
        let configuration = configuration_manager.get_configuration().await?;
        let end_session_endpoint = configuration
            .end_session_endpoint
            .ok_or(LogoutError::MissingEndSessionEndpoint)?;

        let end_session_url = end_session_url(&end_session_endpoint, &tokens.id_token, &origin(req));
        log::debug!("user logged out, redirecting to end session endpoint.");

        Ok(LogoutResult {
            end_session_url,
            removal_cookie,
        })
    }
}

/// `{scheme}://{host}` of the current request.
pub(crate) fn origin(req: &HttpRequest) -> String {
    let connection_info = req.connection_info();
    format!("{}://{}", connection_info.scheme(), connection_info.host())
}

pub fn end_session_url(end_session_endpoint: &str, id_token: &str, origin: &str) -> String {
    format!(
        "{}?id_token_hint={}&post_logout_redirect_uri={}/",
        end_session_endpoint, id_token, origin
    )
}
