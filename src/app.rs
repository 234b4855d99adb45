use crate::{
    antiforgery::{Antiforgery, ProtectedAntiforgery},
    authentication::AuthenticationService,
    bearer::BearerAuthenticator,
    cache::TicketCache,
    config::BffConfig,
    crypto::{CookieProtector, CryptoError},
    csrf::AntiforgeryAndBearerFilter,
    logout::LogoutOrchestrator,
    oidc::{ConfigurationManager, OidcBffClientTrait},
    redirect::{OidcChallenge, RedirectPolicy},
    route,
    session::{SessionAuthenticator, SessionOptions},
    ticket_store::CacheTicketStore,
    tokens::TokenBroker,
    trace::TraceRequests,
    API_PREFIX,
};
use actix_cors::Cors;
use actix_web::web::{self, Data};
use std::sync::Arc;

/// Everything the BFF registers on an actix `App`.
///
/// Built once at startup and cloned into every worker. The authentication
/// middleware ([`crate::authentication::BffAuthentication`]) and the
/// antiforgery cookie issuer ([`crate::csrf::AntiforgeryCookieIssuer`]) are
/// wrapped around the whole app by the caller.
#[derive(Clone)]
pub struct BffApp {
    config: Data<BffConfig>,
    client: Data<dyn OidcBffClientTrait>,
    protector: Data<CookieProtector>,
    session: Data<SessionAuthenticator>,
    authentication: Data<AuthenticationService>,
    antiforgery: Data<dyn Antiforgery>,
    broker: Data<TokenBroker>,
    logout: Data<LogoutOrchestrator>,
}

impl BffApp {
    pub fn new(
        config: BffConfig,
        client: Arc<dyn OidcBffClientTrait>,
        configuration_manager: Option<Arc<dyn ConfigurationManager>>,
        bearer: Option<BearerAuthenticator>,
        cache: Arc<dyn TicketCache>,
    ) -> Result<Self, CryptoError> {
        let protector = CookieProtector::new(config.encryption_key.as_deref())?;

        let session = Data::new(SessionAuthenticator::new(
            Arc::new(CacheTicketStore::new(cache)),
            protector.clone(),
            SessionOptions::new(config.session_lifetime),
        ));
        let authentication = Data::new(AuthenticationService::new(session.clone(), bearer));
        let antiforgery: Arc<dyn Antiforgery> =
            Arc::new(ProtectedAntiforgery::new(protector.clone()));
        let logout = LogoutOrchestrator::new(
            TokenBroker::new(authentication.clone()),
            configuration_manager,
        );

        Ok(Self {
            config: Data::new(config),
            client: Data::from(client),
            protector: Data::new(protector),
            session,
            broker: Data::new(TokenBroker::new(authentication.clone())),
            authentication,
            antiforgery: Data::from(antiforgery),
            logout: Data::new(logout),
        })
    }

    pub fn session(&self) -> &SessionAuthenticator {
        &self.session
    }

    /// Allows the configured origins with credentials, any method and header.
    pub fn cors(&self) -> Cors {
        self.config
            .cors_origins
            .iter()
            .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
            .allow_any_method()
            .allow_any_header()
            .supports_credentials()
    }

    /// Registers app data, the anonymous routes, the login flow and the
    /// `/api` endpoints. Everything else requires an authenticated user.
    pub fn web_configurations(&self, cfg: &mut web::ServiceConfig) {
        let policy = RedirectPolicy::new(&self.config.callback_path);

        cfg.app_data(self.config.clone())
            .app_data(self.client.clone())
            .app_data(self.protector.clone())
            .app_data(self.session.clone())
            .app_data(self.authentication.clone())
            .app_data(self.antiforgery.clone())
            .app_data(self.broker.clone())
            .app_data(self.logout.clone())
            .service(route::favicon)
            .service(route::health)
            .service(web::scope(route::AUTH_SCOPE).service(route::auth_login))
            .service(
                web::resource(self.config.callback_path.as_str())
                    .route(web::get().to(route::auth_callback)),
            )
            .service(
                web::scope(API_PREFIX)
                    .wrap(TraceRequests::new())
                    .wrap(AntiforgeryAndBearerFilter::new())
                    .wrap(OidcChallenge::new(policy.clone()))
                    .service(
                        web::scope(route::AUTH_SCOPE)
                            .service(route::logout)
                            .service(route::tokens)
                            .service(route::userinfo)
                            .service(route::fullinfo)
                            .service(route::csrf_token),
                    ),
            )
            .service(
                web::scope("")
                    .wrap(OidcChallenge::new(policy))
                    .default_service(web::to(route::not_found)),
            );
    }
}
