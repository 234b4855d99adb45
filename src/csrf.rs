use crate::{
    antiforgery::{is_https, take_pending_cookie, Antiforgery},
    authentication::{request_principal, AuthenticationScheme},
    identity::ClaimsPrincipal,
    ANTIFORGERY_COOKIE_NAME,
};
use actix_web::{
    body::EitherBody,
    cookie::{Cookie, SameSite},
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::Method,
    web::Data,
    Error, HttpResponse, ResponseError,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    rc::Rc,
};

/// Only unsafe methods of an authenticated browser session are checked.
/// Principals authenticated from a bearer token are exempt, a bare
/// `Authorization: Bearer` header next to a session cookie is not.
pub fn requires_antiforgery_validation(method: &Method, principal: &ClaimsPrincipal) -> bool {
    if !principal.is_authenticated()
        || principal.identity().authentication_type() == Some(AuthenticationScheme::Bearer.as_str())
    {
        return false;
    }
    matches!(
        *method,
        Method::POST | Method::PUT | Method::DELETE | Method::PATCH
    )
}

fn missing_antiforgery<B>(req: ServiceRequest) -> ServiceResponse<EitherBody<B>> {
    log::error!("Missing antiforgery configuration.");
    req.into_response(HttpResponse::InternalServerError().body("Missing antiforgery configuration"))
        .map_into_right_body()
}

/// Sets the readable antiforgery cookie on GET requests that do not carry it
/// yet, and flushes the provider cookie generated while handling the request.
#[derive(Default)]
pub struct AntiforgeryCookieIssuer;

impl AntiforgeryCookieIssuer {
    pub fn new() -> Self {
        Self
    }
}

impl<S, B> Transform<S, ServiceRequest> for AntiforgeryCookieIssuer
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AntiforgeryCookieIssuerMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AntiforgeryCookieIssuerMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct AntiforgeryCookieIssuerMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for AntiforgeryCookieIssuerMiddleware<S>
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

        let Some(antiforgery) = req.app_data::<Data<dyn Antiforgery>>().cloned() else {
            return Box::pin(ready(Ok(missing_antiforgery(req))));
        };

        let mut visible_cookie = None;
        if req.method() == Method::GET && req.cookie(ANTIFORGERY_COOKIE_NAME).is_none() {
            match antiforgery.get_and_store_tokens(req.request()) {
                Ok(tokens) => {
                    log::debug!("issuing antiforgery cookie.");
                    visible_cookie = Some(
                        Cookie::build(ANTIFORGERY_COOKIE_NAME, tokens.request_token)
                            .http_only(false)
                            .same_site(SameSite::Strict)
                            .secure(is_https(req.request()))
                            .path("/")
                            .finish(),
                    );
                }
                Err(err) => {
                    log::error!("Not able to issue antiforgery tokens: {}", err);
                    let response = err.error_response();
                    return Box::pin(ready(Ok(req.into_response(response).map_into_right_body())));
                }
            }
        }

        Box::pin(async move {
            let mut res = service.call(req).await?;

            let pending = take_pending_cookie(res.request());
            for cookie in visible_cookie.iter().chain(pending.iter()) {
                if let Err(err) = res.response_mut().add_cookie(cookie) {
                    return Ok(res
                        .into_response(HttpResponse::InternalServerError().body(err.to_string()))
                        .map_into_right_body());
                }
            }

            Ok(res.map_into_left_body())
        })
    }
}

/// Validates the antiforgery header before the handler runs, see
/// [`requires_antiforgery_validation`].
#[derive(Default)]
pub struct AntiforgeryAndBearerFilter;

impl AntiforgeryAndBearerFilter {
    pub fn new() -> Self {
        Self
    }
}

impl<S, B> Transform<S, ServiceRequest> for AntiforgeryAndBearerFilter
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<EitherBody<B>>;
    type Error = Error;
    type InitError = ();
    type Transform = AntiforgeryAndBearerFilterMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(AntiforgeryAndBearerFilterMiddleware { service }))
    }
}

pub struct AntiforgeryAndBearerFilterMiddleware<S> {
    service: S,
}

impl<S, B> Service<ServiceRequest> for AntiforgeryAndBearerFilterMiddleware<S>
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
        let principal = request_principal(req.request());

        if requires_antiforgery_validation(req.method(), &principal) {
            let Some(antiforgery) = req.app_data::<Data<dyn Antiforgery>>().cloned() else {
                return Box::pin(ready(Ok(missing_antiforgery(req))));
            };
            if let Err(err) = antiforgery.validate_request(req.request()) {
                log::warn!("antiforgery validation failed for {}: {}", req.path(), err);
                let response = err.error_response();
                return Box::pin(ready(Ok(req.into_response(response).map_into_right_body())));
            }
        }

        let fut = self.service.call(req);
        Box::pin(async move { Ok(fut.await?.map_into_left_body()) })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        antiforgery::{
            test::antiforgery, AntiforgeryError, AntiforgeryTokenSet, MockAntiforgery,
        },
        identity::{Claim, ClaimsIdentity, ClaimsPrincipal},
        ANTIFORGERY_HEADER_NAME,
    };
    use actix_web::{
        http::{header, StatusCode},
        test::{self, TestRequest},
        web, App, HttpMessage,
    };
    use std::sync::Arc;

    fn antiforgery_data(antiforgery: impl Antiforgery + 'static) -> Data<dyn Antiforgery> {
        Data::from(Arc::new(antiforgery) as Arc<dyn Antiforgery>)
    }

    fn signed_in() -> ClaimsPrincipal {
        ClaimsPrincipal::new(ClaimsIdentity::new("Cookies", vec![Claim::new("sub", "42")]))
    }

    fn bearer_client() -> ClaimsPrincipal {
        ClaimsPrincipal::new(ClaimsIdentity::new(
            "Bearer",
            vec![Claim::new("sub", "api-client")],
        ))
    }

    #[test]
    fn test_requires_antiforgery_validation() {
        let cookie_user = |method: Method| requires_antiforgery_validation(&method, &signed_in());

        assert!(cookie_user(Method::POST));
        assert!(cookie_user(Method::PUT));
        assert!(cookie_user(Method::PATCH));
        assert!(cookie_user(Method::DELETE));
        assert!(!cookie_user(Method::GET));
        assert!(!cookie_user(Method::HEAD));
        assert!(!requires_antiforgery_validation(
            &Method::POST,
            &ClaimsPrincipal::anonymous()
        ));
        assert!(!requires_antiforgery_validation(&Method::POST, &bearer_client()));
    }

    #[actix_web::test]
    async fn test_given_get_without_cookie_when_issuer_then_cookie_set() {
        // Arrange
        let app = test::init_service(
            App::new()
                .app_data(antiforgery_data(antiforgery()))
                .wrap(AntiforgeryCookieIssuer::new())
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;
        let req = TestRequest::get()
            .uri("/")
            .insert_header(("x-forwarded-proto", "https"))
            .to_request();

        // Act
        let res = test::call_service(&app, req).await;

        // Assert
        let set_cookies: Vec<String> = res
            .headers()
            .get_all(header::SET_COOKIE)
            .map(|value| value.to_str().unwrap().to_string())
            .collect();
        let visible = set_cookies
            .iter()
            .find(|c| c.starts_with(&format!("{}=", ANTIFORGERY_COOKIE_NAME)))
            .unwrap();
        assert!(visible.contains("Path=/"));
        assert!(visible.contains("Secure"));
        assert!(visible.contains("SameSite=Strict"));
        assert!(!visible.contains("HttpOnly"));
        assert!(set_cookies
            .iter()
            .any(|c| c.starts_with(".bff.antiforgery=") && c.contains("HttpOnly")));
    }

    #[actix_web::test]
    async fn test_given_get_with_cookie_when_issuer_then_nothing_set() {
        // Arrange
        let mut mock = MockAntiforgery::new();
        mock.expect_get_and_store_tokens().never();
        let app = test::init_service(
            App::new()
                .app_data(antiforgery_data(mock))
                .wrap(AntiforgeryCookieIssuer::new())
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;
        let req = TestRequest::get()
            .uri("/")
            .cookie(Cookie::new(ANTIFORGERY_COOKIE_NAME, "existing"))
            .to_request();

        // Act
        let res = test::call_service(&app, req).await;

        // Assert
        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(header::SET_COOKIE).is_none());
    }

    #[actix_web::test]
    async fn test_given_post_when_issuer_then_nothing_set() {
        // Arrange
        let mut mock = MockAntiforgery::new();
        mock.expect_get_and_store_tokens().never();
        let app = test::init_service(
            App::new()
                .app_data(antiforgery_data(mock))
                .wrap(AntiforgeryCookieIssuer::new())
                .route("/", web::post().to(HttpResponse::Ok)),
        )
        .await;

        // Act
        let res = test::call_service(&app, TestRequest::post().uri("/").to_request()).await;

        // Assert
        assert!(res.headers().get(header::SET_COOKIE).is_none());
    }

    #[actix_web::test]
    async fn test_given_bearer_post_when_filter_then_validation_skipped() {
        // Arrange
        let mut mock = MockAntiforgery::new();
        mock.expect_validate_request().never();
        let app = test::init_service(
            App::new()
                .app_data(antiforgery_data(mock))
                .wrap(AntiforgeryAndBearerFilter::new())
                .wrap_fn(|req, srv| {
                    req.extensions_mut().insert(bearer_client());
                    srv.call(req)
                })
                .route("/", web::post().to(HttpResponse::Ok)),
        )
        .await;
        let req = TestRequest::post()
            .uri("/")
            .insert_header((header::AUTHORIZATION, "Bearer token"))
            .to_request();

        // Act
        let res = test::call_service(&app, req).await;

        // Assert
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_given_cookie_session_with_empty_bearer_header_when_filter_then_bad_request() {
        // Arrange
        let app = test::init_service(
            App::new()
                .app_data(antiforgery_data(antiforgery()))
                .wrap(AntiforgeryAndBearerFilter::new())
                .wrap_fn(|req, srv| {
                    req.extensions_mut().insert(signed_in());
                    srv.call(req)
                })
                .route("/", web::post().to(HttpResponse::Ok)),
        )
        .await;
        let req = TestRequest::post()
            .uri("/")
            .insert_header((header::AUTHORIZATION, "Bearer"))
            .to_request();

        // Act
        let res = test::call_service(&app, req).await;

        // Assert
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_given_cookie_post_without_token_when_filter_then_bad_request() {
        // Arrange
        let app = test::init_service(
            App::new()
                .app_data(antiforgery_data(antiforgery()))
                .wrap(AntiforgeryAndBearerFilter::new())
                .wrap_fn(|req, srv| {
                    req.extensions_mut().insert(signed_in());
                    srv.call(req)
                })
                .route("/", web::post().to(HttpResponse::Ok)),
        )
        .await;

        // Act
        let res = test::call_service(&app, TestRequest::post().uri("/").to_request()).await;

        // Assert
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_given_cookie_post_with_valid_token_when_filter_then_handler_called() {
        // Arrange
        let mut mock = MockAntiforgery::new();
        mock.expect_validate_request().times(1).returning(|_| Ok(()));
        let app = test::init_service(
            App::new()
                .app_data(antiforgery_data(mock))
                .wrap(AntiforgeryAndBearerFilter::new())
                .wrap_fn(|req, srv| {
                    req.extensions_mut().insert(signed_in());
                    srv.call(req)
                })
                .route("/", web::post().to(HttpResponse::Ok)),
        )
        .await;
        let req = TestRequest::post()
            .uri("/")
            .insert_header((ANTIFORGERY_HEADER_NAME, "token"))
            .to_request();

        // Act
        let res = test::call_service(&app, req).await;

        // Assert
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_given_anonymous_post_when_filter_then_validation_skipped() {
        // Arrange
        let mut mock = MockAntiforgery::new();
        mock.expect_validate_request().never();
        let app = test::init_service(
            App::new()
                .app_data(antiforgery_data(mock))
                .wrap(AntiforgeryAndBearerFilter::new())
                .route("/", web::post().to(HttpResponse::Ok)),
        )
        .await;

        // Act
        let res = test::call_service(&app, TestRequest::post().uri("/").to_request()).await;

        // Assert
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_given_failing_provider_when_issuer_then_error_response() {
        // Arrange
        let mut mock = MockAntiforgery::new();
        mock.expect_get_and_store_tokens()
            .returning(|_| Err(AntiforgeryError::InvalidToken));
        let app = test::init_service(
            App::new()
                .app_data(antiforgery_data(mock))
                .wrap(AntiforgeryCookieIssuer::new())
                .route("/", web::get().to(HttpResponse::Ok)),
        )
        .await;

        // Act
        let res = test::call_service(&app, TestRequest::get().uri("/").to_request()).await;

        // Assert
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_token_set_header_name() {
        let tokens = AntiforgeryTokenSet {
            request_token: "r".to_string(),
            cookie_token: "c".to_string(),
            header_name: ANTIFORGERY_HEADER_NAME,
        };
        assert_eq!(tokens.header_name, "RequestVerificationToken");
    }
}
