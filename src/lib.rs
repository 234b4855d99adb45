#![allow(rustdoc::invalid_rust_codeblocks)]
#![doc = r#"
# bff-session-guard

An OIDC Backend For Frontend (BFF) for the [Actix web framework](https://actix.rs), keeping tokens on the server and giving the browser a session cookie only.

The browser never sees an access token. After the OIDC login the authentication state is stored server side as a session ticket, the `dudu` cookie only carries the encrypted ticket key. API calls from the SPA go through the BFF which relays the tokens, enforces antiforgery tokens on unsafe methods and answers unauthenticated API calls with `401` instead of a login redirect.

OIDC is handled by the [openidconnect](https://docs.rs/openidconnect) crate.

# Getting started

```rust,ignore
use actix_web::{App, HttpServer};
use bff_session_guard::{
    app::BffApp, authentication::BffAuthentication, cache::MemoryCache, config::BffConfig,
    csrf::AntiforgeryCookieIssuer, oidc::{discover_metadata, OidcBffClient},
};
use std::sync::Arc;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    let config = BffConfig::from_env().map_err(std::io::Error::other)?;
    let metadata = discover_metadata(&config.authority).await.map_err(std::io::Error::other)?;
    let client = OidcBffClient::from_metadata(metadata, &config).map_err(std::io::Error::other)?;

    let bff = BffApp::new(config, Arc::new(client), None, None, Arc::new(MemoryCache::new()))
        .map_err(std::io::Error::other)?;

    HttpServer::new(move || {
        let bff = bff.clone();
        App::new()
            // Register app data and routes
            .configure(|cfg| bff.web_configurations(cfg))
            // Issue antiforgery cookies on GET requests
            .wrap(AntiforgeryCookieIssuer::new())
            // Authenticate every request from the session cookie or a bearer token
            .wrap(BffAuthentication::new())
    })
    .bind(("127.0.0.1", 5050))?
    .run()
    .await
}
```

## Routes

| Route | |
|---|---|
| `GET /auth/login?path=` | Starts the authorization code flow with PKCE. |
| `GET {CALLBACK_PATH}` | Completes the login, stores the ticket and sets the session cookie. |
| `GET /api/auth/logout` | Ends the session, returns the identity provider end session url. |
| `GET /api/auth/tokens` | `{ accessToken, idToken }` of the session. |
| `GET /api/auth/userinfo` | Profile built from the claims. |
| `GET /api/auth/fullinfo` | `{ name, claims }`. |
| `GET /api/auth/csrf-token` | Request token to echo in the `RequestVerificationToken` header. |
| `GET /health`, `GET /favicon.ico` | Anonymous. |

## Unauthenticated requests

- Anonymous routes pass.
- `/api/*` gets an empty `401`.
- Everything else is redirected to `/auth/login?path={current url}`.

## Antiforgery

Authenticated cookie sessions must send the `RequestVerificationToken` header on `POST`, `PUT`, `PATCH` and `DELETE`. Callers authenticated by a valid `Authorization: Bearer` token are exempt, an empty or invalid bearer header next to a session cookie is not. The readable `RequestVerificationToken` cookie is set on the first `GET`.

## Configuration

See [`config::BffConfig`] for the environment variables.

`ENCRYPTION_KEY` (64 hex chars) is required in production. Without it a random key is generated per process, so sessions and antiforgery cookies do not survive a restart and are not shared between instances. The key protects the session, antiforgery and login challenge cookies, each under its own purpose.
"#]

pub mod antiforgery;
pub mod app;
pub mod authentication;
pub mod bearer;
pub mod cache;
pub(crate) mod challenge;
pub mod claims;
pub mod config;
pub mod crypto;
pub mod csrf;
pub(crate) mod env_var;
pub mod error;
pub mod identity;
pub mod logout;
pub mod oidc;
pub mod redirect;
pub(crate) mod route;
pub mod session;
pub mod ticket;
pub mod ticket_store;
pub mod tokens;
pub mod trace;
pub mod user;

/// Session cookie, carries the protected ticket key.
pub const SESSION_COOKIE_NAME: &str = "dudu";
/// Readable cookie holding the antiforgery request token.
pub const ANTIFORGERY_COOKIE_NAME: &str = "RequestVerificationToken";
pub const ANTIFORGERY_HEADER_NAME: &str = "RequestVerificationToken";
pub const API_PREFIX: &str = "/api";
