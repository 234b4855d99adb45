use crate::{
    bearer::BearerAuthenticator, identity::ClaimsPrincipal, session::SessionAuthenticator,
    ticket::AuthenticationTicket,
};
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    web::Data,
    Error, HttpMessage, HttpRequest, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use std::{
    fmt,
    future::{ready, Ready},
    rc::Rc,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthenticationScheme {
    /// Server side cookie session.
    Cookies,
    /// Sign-in scheme. Authenticates through the cookie session it signed into.
    OpenIdConnect,
    /// `Authorization: Bearer` tokens issued by the identity provider.
    Bearer,
}

impl AuthenticationScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthenticationScheme::Cookies => "Cookies",
            AuthenticationScheme::OpenIdConnect => "OpenIdConnect",
            AuthenticationScheme::Bearer => "Bearer",
        }
    }
}

impl fmt::Display for AuthenticationScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub enum AuthenticateResult {
    Success(AuthenticationTicket),
    /// The scheme found nothing to authenticate, e.g. no cookie.
    NoResult,
    Fail(String),
}

impl AuthenticateResult {
    pub fn succeeded(&self) -> bool {
        matches!(self, AuthenticateResult::Success(_))
    }
}

/// Dispatches authenticate calls to the configured schemes.
pub struct AuthenticationService {
    session: Data<SessionAuthenticator>,
    bearer: Option<BearerAuthenticator>,
}

impl AuthenticationService {
    pub fn new(session: Data<SessionAuthenticator>, bearer: Option<BearerAuthenticator>) -> Self {
        Self { session, bearer }
    }

    pub fn session(&self) -> &SessionAuthenticator {
        &self.session
    }

    /// Re-reads authentication state for `scheme`. Safe to call repeatedly
    /// within a request.
    pub async fn authenticate(
        &self,
        req: &HttpRequest,
        scheme: AuthenticationScheme,
    ) -> AuthenticateResult {
        match scheme {
            AuthenticationScheme::Cookies | AuthenticationScheme::OpenIdConnect => {
                self.session.authenticate(req).await
            }
            AuthenticationScheme::Bearer => match &self.bearer {
                Some(bearer) => bearer.authenticate(req).await,
                None => AuthenticateResult::Fail("Bearer scheme is not configured".to_string()),
            },
        }
    }

    /// Default policy: a bearer header selects the bearer scheme, otherwise
    /// the cookie session.
    pub async fn authenticate_request(&self, req: &HttpRequest) -> AuthenticateResult {
        let scheme = if BearerAuthenticator::token_from_request(req).is_some() {
            AuthenticationScheme::Bearer
        } else {
            AuthenticationScheme::Cookies
        };
        self.authenticate(req, scheme).await
    }
}

/// Authenticates every request and stores the resulting [`ClaimsPrincipal`]
/// in the request extensions. Never rejects, challenges are handled by
/// [`crate::redirect::OidcChallenge`].
#[derive(Default)]
pub struct BffAuthentication;

impl BffAuthentication {
    pub fn new() -> Self {
        Self
    }
}

impl<S, B> Transform<S, ServiceRequest> for BffAuthentication
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = BffAuthenticationMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(BffAuthenticationMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct BffAuthenticationMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for BffAuthenticationMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let service = Rc::clone(&self.service);

        let Some(authentication) = req.app_data::<Data<AuthenticationService>>().cloned() else {
            log::error!("Missing authentication configuration.");
            return Box::pin(ready(Ok(req
                .into_response(
                    HttpResponse::InternalServerError().body("Missing authentication configuration"),
                )
                .map_into_right_body())));
        };

        Box::pin(async move {
            match authentication.authenticate_request(req.request()).await {
                AuthenticateResult::Success(ticket) => {
                    req.extensions_mut().insert(ticket.principal);
                }
                AuthenticateResult::Fail(reason) => {
                    log::debug!("authentication failed: {}", reason);
                }
                AuthenticateResult::NoResult => {}
            }

            let res = service.call(req).await?;
            Ok(res.map_into_left_body())
        })
    }
}

/// Principal from the request extensions, anonymous when absent.
pub(crate) fn request_principal(req: &HttpRequest) -> ClaimsPrincipal {
    req.extensions()
        .get::<ClaimsPrincipal>()
        .cloned()
        .unwrap_or_else(ClaimsPrincipal::anonymous)
}
