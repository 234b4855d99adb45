use actix_web::{middleware::Logger, App, HttpServer};
use bff_session_guard::{
    app::BffApp,
    authentication::BffAuthentication,
    bearer::BearerAuthenticator,
    cache::MemoryCache,
    config::BffConfig,
    csrf::AntiforgeryCookieIssuer,
    oidc::{
        discover_metadata, ConfigurationManager, DiscoveryConfigurationManager, OidcBffClient,
        OidcConfiguration,
    },
};
use dotenv::dotenv;
use env_logger::Env;
use std::{io, sync::Arc};

#[actix_web::main]
async fn main() -> io::Result<()> {
    dotenv().ok();

    env_logger::init_from_env(Env::default().default_filter_or("info"));

    let config = BffConfig::from_env().map_err(|err| {
        log::error!("{}", err);
        io::Error::other(err.to_string())
    })?;

    let metadata = discover_metadata(&config.authority)
        .await
        .map_err(|err| io::Error::other(err.to_string()))?;

    let configuration_manager: Arc<dyn ConfigurationManager> = Arc::new(
        DiscoveryConfigurationManager::new(config.authority.clone())
            .with_configuration(OidcConfiguration::from_metadata(&metadata)),
    );
    let bearer = BearerAuthenticator::new(
        config.authority.clone(),
        config.audience.clone(),
        configuration_manager.clone(),
    );
    let client = OidcBffClient::from_metadata(metadata, &config)
        .map_err(|err| io::Error::other(err.to_string()))?;

    let bind_address = config.bind_address.clone();
    let bff = BffApp::new(
        config,
        Arc::new(client),
        Some(configuration_manager),
        Some(bearer),
        Arc::new(MemoryCache::new()),
    )
    .map_err(|err| io::Error::other(err.to_string()))?;

    log::info!("listening on {}", bind_address);

    HttpServer::new(move || {
        let bff = bff.clone();
        App::new()
            .configure(|cfg| bff.web_configurations(cfg))
            // Registered last runs first: authentication, then the antiforgery cookie.
            .wrap(AntiforgeryCookieIssuer::new())
            .wrap(BffAuthentication::new())
            .wrap(bff.cors())
            .wrap(Logger::default())
    })
    .bind(bind_address)?
    .run()
    .await
}
