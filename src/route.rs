use actix_web::{
    get,
    http::{header, StatusCode},
    web, HttpRequest, HttpResponse, Responder,
};
use openidconnect::PkceCodeChallenge;
use serde::{Deserialize, Serialize};

use crate::{
    antiforgery::{Antiforgery, AntiforgeryError},
    authentication::AuthenticationScheme,
    challenge::{safe_return_url, ChallengeState},
    claims::augment_from_access_token,
    config::BffConfig,
    crypto::CookieProtector,
    error::ProblemDetails,
    identity::{Claim, ClaimsPrincipal},
    logout::{origin, LogoutError, LogoutOrchestrator},
    oidc::OidcBffClientTrait,
    session::SessionAuthenticator,
    ticket::{AuthenticationProperties, ACCESS_TOKEN, EXPIRES_AT, ID_TOKEN, REFRESH_TOKEN},
    tokens::{TokenBroker, TokenError, TokenPair},
    user::UserModel,
};

pub(crate) const AUTH_SCOPE: &str = "/auth";
pub(crate) const AUTH_LOGIN_PATH: &str = "/auth/login";

#[derive(Deserialize)]
pub(crate) struct AuthLoginParams {
    pub(crate) path: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct AuthCallbackParams {
    pub(crate) code: Option<String>,
    pub(crate) state: Option<String>,
    pub(crate) error: Option<String>,
    pub(crate) error_description: Option<String>,
}

#[derive(Serialize)]
pub(crate) struct FullInfo {
    name: Option<String>,
    claims: Vec<Claim>,
}

#[get("/login")]
pub(crate) async fn auth_login(
    req: HttpRequest,
    params: web::Query<AuthLoginParams>,
    client: web::Data<dyn OidcBffClientTrait>,
    protector: web::Data<CookieProtector>,
    config: web::Data<BffConfig>,
) -> impl Responder {
    let return_url = safe_return_url(params.path.as_deref(), &origin(&req));

    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (auth_url, state, nonce) = client.authorize_url(pkce_challenge);

    let challenge = ChallengeState::new(pkce_verifier, state, nonce, return_url);
    let cookie = match challenge.to_cookie(&protector, &config.callback_path) {
        Ok(cookie) => cookie,
        Err(err) => return HttpResponse::InternalServerError().body(err.to_string()),
    };

    HttpResponse::TemporaryRedirect()
        .cookie(cookie)
        .append_header((header::LOCATION, auth_url.to_string()))
        .finish()
}

/// Registered on the configured callback path, see [`crate::app::BffApp`].
pub(crate) async fn auth_callback(
    req: HttpRequest,
    params: web::Query<AuthCallbackParams>,
    client: web::Data<dyn OidcBffClientTrait>,
    protector: web::Data<CookieProtector>,
    config: web::Data<BffConfig>,
    session: web::Data<SessionAuthenticator>,
) -> impl Responder {
    if let Some(error) = &params.error {
        if let Some(description) = &params.error_description {
            return HttpResponse::InternalServerError().body(description.clone());
        }
        return HttpResponse::InternalServerError().body(error.to_owned());
    }
    let (Some(code), Some(state)) = (&params.code, &params.state) else {
        return HttpResponse::BadRequest().body("Missing authorization code or state.");
    };

    let challenge = match ChallengeState::from_request(&req, &protector, state) {
        Ok(challenge) => challenge,
        Err(err) => {
            log::warn!("callback rejected: {}", err);
            return HttpResponse::InternalServerError().body(err.to_string());
        }
    };

    let sign_in = match client
        .sign_in(code.to_owned(), challenge.pkce_verifier, challenge.nonce)
        .await
    {
        Ok(sign_in) => sign_in,
        Err(err) => {
            log::error!("{}", err);
            return HttpResponse::InternalServerError().body(err.to_string());
        }
    };

    let mut identity = sign_in.identity;
    augment_from_access_token(Some(&sign_in.access_token), &config.authority, &mut identity);

    let mut saved = vec![
        (ACCESS_TOKEN, sign_in.access_token),
        (ID_TOKEN, sign_in.id_token),
    ];
    if let Some(refresh_token) = sign_in.refresh_token {
        saved.push((REFRESH_TOKEN, refresh_token));
    }
    if let Some(expires_at) = sign_in.expires_at {
        saved.push((EXPIRES_AT, expires_at.to_rfc3339()));
    }
    let mut properties = AuthenticationProperties::default();
    properties.store_tokens(saved);

    let session_cookie = match session
        .sign_in(ClaimsPrincipal::new(identity), properties)
        .await
    {
        Ok(cookie) => cookie,
        Err(err) => {
            log::error!("Not able to sign in: {}", err);
            return HttpResponse::InternalServerError().body(err.to_string());
        }
    };

    HttpResponse::TemporaryRedirect()
        .cookie(session_cookie)
        .cookie(ChallengeState::removal_cookie(&config.callback_path))
        .append_header((header::LOCATION, challenge.return_url))
        .finish()
}

#[get("/logout")]
pub(crate) async fn logout(
    req: HttpRequest,
    orchestrator: web::Data<LogoutOrchestrator>,
) -> Result<HttpResponse, LogoutError> {
    let result = orchestrator.logout(&req).await?;
    Ok(HttpResponse::Ok()
        .cookie(result.removal_cookie)
        .json(result.end_session_url))
}

#[get("/tokens")]
pub(crate) async fn tokens(
    req: HttpRequest,
    broker: web::Data<TokenBroker>,
) -> Result<web::Json<TokenPair>, TokenError> {
    let pair = broker
        .get_tokens(Some(&req), AuthenticationScheme::OpenIdConnect)
        .await?;
    Ok(web::Json(pair))
}

#[get("/userinfo")]
pub(crate) async fn userinfo(user: UserModel) -> impl Responder {
    web::Json(user)
}

#[get("/fullinfo")]
pub(crate) async fn fullinfo(principal: ClaimsPrincipal) -> impl Responder {
    web::Json(FullInfo {
        name: principal.name().map(str::to_string),
        claims: principal.claims().to_vec(),
    })
}

#[get("/csrf-token")]
pub(crate) async fn csrf_token(
    req: HttpRequest,
    antiforgery: web::Data<dyn Antiforgery>,
) -> Result<web::Json<String>, AntiforgeryError> {
    let set = antiforgery.get_and_store_tokens(&req)?;
    Ok(web::Json(set.request_token))
}

#[get("/favicon.ico")]
pub(crate) async fn favicon() -> impl Responder {
    HttpResponse::NoContent().finish()
}

#[get("/health")]
pub(crate) async fn health() -> impl Responder {
    HttpResponse::Ok().body("Healthy")
}

/// Authenticated fallback for everything else. Assets are not served here.
pub(crate) async fn not_found(req: HttpRequest) -> impl Responder {
    log::debug!("no route for {}.", req.path());
    ProblemDetails::response(
        StatusCode::NOT_FOUND,
        format!("No route for {}.", req.path()),
    )
}
