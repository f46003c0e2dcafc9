use std::{process, sync::Arc};

use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

use veduta::{
    application::{
        codec::TokenCodec, delivery::DeliveryService, error::AppError, pipeline::GenerateService,
        pool::SessionPool, store::ArtifactStore,
    },
    config,
    infra::{browser::ChromiumLauncher, error::InfraError, http, telemetry},
};

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (_cli_args, settings) = config::load_with_cli()
        .map_err(|err| InfraError::configuration(format!("failed to load configuration: {err}")))?;

    telemetry::init(&settings.logging).map_err(AppError::from)?;

    serve(settings).await
}

async fn serve(settings: config::Settings) -> Result<(), AppError> {
    let store = Arc::new(ArtifactStore::new(settings.store.dump_dir.clone())?);
    let codec = TokenCodec::new(settings.security.secret_key);
    let launcher = ChromiumLauncher::new(
        settings.rendering.browser_path.clone(),
        settings.rendering.sandbox,
        settings.rendering.navigation_timeout,
    );
    let pool = SessionPool::new(Arc::new(launcher));

    let generate = Arc::new(GenerateService::new(
        pool,
        Arc::clone(&store),
        codec.clone(),
        settings.store.generate_ttl,
        settings.rendering.navigation_timeout,
        settings.rendering.capture_timeout,
    ));
    let delivery = Arc::new(DeliveryService::new(
        Arc::clone(&store),
        codec,
        Arc::clone(&generate),
        settings.store.serve_ttl,
    ));

    let router = http::build_router(http::HttpState {
        generate,
        delivery,
        public_url: settings.server.public_url.clone(),
    });

    let listener = tokio::net::TcpListener::bind(settings.server.addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    info!(
        target: "veduta::server",
        addr = %settings.server.addr,
        public_url = settings.server.public_url,
        "listening"
    );

    axum::serve(listener, router.into_make_service())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    Ok(())
}
