use crate::{authentication::request_principal, route::AUTH_LOGIN_PATH, API_PREFIX};
use actix_web::{
    body::EitherBody,
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::{header, StatusCode},
    Error, HttpRequest, HttpResponse,
};
use futures_util::future::LocalBoxFuture;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use std::{
    future::{ready, Ready},
    rc::Rc,
};

pub const HEALTH_PATH: &str = "/health";
pub const FAVICON_PATH: &str = "/favicon.ico";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RedirectDecision {
    /// Answer with the status and an empty body instead of challenging.
    Suppress(StatusCode),
    /// Send the browser to the login flow.
    Redirect,
}

/// Decides how an unauthenticated request is challenged.
#[derive(Clone, Debug)]
pub struct RedirectPolicy {
    anonymous_routes: Vec<String>,
    api_prefix: String,
}

impl RedirectPolicy {
    pub fn new(callback_path: &str) -> Self {
        Self {
            anonymous_routes: vec![
                HEALTH_PATH.to_string(),
                FAVICON_PATH.to_string(),
                callback_path.to_string(),
            ],
            api_prefix: API_PREFIX.to_string(),
        }
    }

    pub fn is_anonymous(&self, path: &str) -> bool {
        self.anonymous_routes
            .iter()
            .any(|route| starts_with_segments(path, route))
    }

    /// First match wins: anonymous routes, then the api prefix.
    pub fn decide(&self, path: &str) -> RedirectDecision {
        if self.is_anonymous(path) {
            return RedirectDecision::Suppress(StatusCode::OK);
        }
        if starts_with_segments(path, &self.api_prefix) {
            return RedirectDecision::Suppress(StatusCode::UNAUTHORIZED);
        }
        RedirectDecision::Redirect
    }
}

/// Case insensitive match of whole path segments, `/api` matches `/api` and
/// `/api/x` but not `/apix`.
pub(crate) fn starts_with_segments(path: &str, prefix: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    let Some(head) = path.get(..prefix.len()) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(prefix) {
        return false;
    }
    path.len() == prefix.len() || path[prefix.len()..].starts_with('/')
}

/// `{scheme}://{host}/auth/login?path={current url}`.
pub(crate) fn create_auth_path(req: &HttpRequest) -> String {
    let connection_info = req.connection_info();
    let domain = format!("{}://{}", connection_info.scheme(), connection_info.host());

    let path = req.uri().path();
    let full_url = match req.uri().query() {
        Some(query) if !query.is_empty() => format!("{}{}?{}", domain, path, query),
        _ => format!("{}{}", domain, path),
    };
    let full_url = utf8_percent_encode(&full_url, NON_ALPHANUMERIC).to_string();
    format!("{}{}?path={}", domain, AUTH_LOGIN_PATH, full_url)
}

/// Requires an authenticated principal, challenging according to the
/// [`RedirectPolicy`] otherwise.
pub struct OidcChallenge {
    policy: Rc<RedirectPolicy>,
}

impl OidcChallenge {
    pub fn new(policy: RedirectPolicy) -> Self {
        Self {
            policy: Rc::new(policy),
        }
    }
}

impl<S, B> Transform<S, ServiceRequest> for OidcChallenge
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = OidcChallengeMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(OidcChallengeMiddleware {
            service,
            policy: Rc::clone(&self.policy),
        }))
    }
}

pub struct OidcChallengeMiddleware<S> {
    service: S,
    policy: Rc<RedirectPolicy>,
}

impl<S, B> Service<ServiceRequest> for OidcChallengeMiddleware<S>
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
        if request_principal(req.request()).is_authenticated() {
            let fut = self.service.call(req);
            return Box::pin(async move { Ok(fut.await?.map_into_left_body()) });
        }

        let response = match self.policy.decide(req.path()) {
            RedirectDecision::Suppress(status) => {
                log::debug!("challenge suppressed for {} with {}.", req.path(), status);
                HttpResponse::build(status).finish()
            }
            RedirectDecision::Redirect => {
                log::debug!("redirecting {} to login.", req.path());
                HttpResponse::TemporaryRedirect()
                    .insert_header((header::LOCATION, create_auth_path(req.request())))
                    .finish()
            }
        };
        Box::pin(ready(Ok(req.into_response(response).map_into_right_body())))
    }
}
