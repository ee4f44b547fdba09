use std::{error::Error as StdError, process};

use clubhouse::{
    application::error::AppError,
    cache::{CacheConfig, CacheState, CacheWarmer, StoreClient},
    config::{self, CacheArgs, CacheCommand},
    domain::catalog::Catalog,
    infra::{
        error::InfraError,
        http::{self, AdminState, HttpState},
        telemetry,
    },
};
use tokio::{sync::watch, task::JoinHandle, try_join};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    let mut chain = error.to_string();
    let mut cause = StdError::source(error);
    while let Some(inner) = cause {
        chain.push_str(": ");
        chain.push_str(&inner.to_string());
        cause = inner.source();
    }

    if dispatcher::has_been_set() {
        error!(error = %chain, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %chain, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging).map_err(AppError::from)?;
    for ignored in &settings.ignored_env {
        warn!(
            variable = ignored.name,
            value = %ignored.value,
            "ignoring malformed environment variable, keeping configured value"
        );
    }

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Cache(args) => run_cache(settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let catalog = Catalog::seeded().await?;
    let cache_config = CacheConfig::from(&settings.cache);
    info!(
        enabled = cache_config.enabled,
        warming = cache_config.should_warm(),
        stats = cache_config.stats_enabled,
        prefix = %cache_config.prefix,
        "response cache configured"
    );

    let (store, connect_handle) = StoreClient::connect_in_background(&settings.store);
    let cache = CacheState::new(cache_config, store);

    let warm_handle =
        CacheWarmer::new(cache.clone(), http::warming_descriptors(&catalog)).spawn();

    let http_state = HttpState {
        catalog,
        cache: cache.clone(),
    };
    let admin_state = AdminState { cache };

    let result = serve_http(&settings, http_state, admin_state).await;

    stop_task(connect_handle).await;
    if let Some(handle) = warm_handle {
        stop_task(handle).await;
    }

    result
}

async fn stop_task(handle: JoinHandle<()>) {
    handle.abort();
    let _ = handle.await;
}

async fn run_cache(settings: config::Settings, args: CacheArgs) -> Result<(), AppError> {
    let cache_config = CacheConfig::from(&settings.cache);
    let store = StoreClient::connect(&settings.store).await;

    match args.command {
        CacheCommand::Keys(keys) => {
            let keys = store.keys(&cache_config.namespaced_pattern(&keys.pattern)).await?;
            for key in keys {
                println!("{key}");
            }
        }
        CacheCommand::Flush => {
            let deleted = store.flush(&cache_config.prefix).await?;
            println!("deleted {deleted} keys under `{}`", cache_config.prefix);
        }
    }

    Ok(())
}

async fn serve_http(
    settings: &config::Settings,
    http_state: HttpState,
    admin_state: AdminState,
) -> Result<(), AppError> {
    let public_router = http::build_router(http_state);
    let admin_router = http::build_admin_router(admin_state);

    let public_addr = settings.server.public_addr;
    let public_listener = tokio::net::TcpListener::bind(public_addr)
        .await
        .map_err(|err| InfraError::bind("public", public_addr, err))?;
    let admin_addr = settings.server.admin_addr;
    let admin_listener = tokio::net::TcpListener::bind(admin_addr)
        .await
        .map_err(|err| InfraError::bind("admin", admin_addr, err))?;

    info!(
        public = %settings.server.public_addr,
        admin = %settings.server.admin_addr,
        "listening"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let signal_handle = tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutdown signal received"),
            Err(err) => error!(error = %err, "failed to listen for shutdown signal"),
        }
        let _ = stop_tx.send(true);
    });

    let public_server = axum::serve(public_listener, public_router.into_make_service())
        .with_graceful_shutdown(stopped(stop_rx.clone()));
    let admin_server = axum::serve(admin_listener, admin_router.into_make_service())
        .with_graceful_shutdown(stopped(stop_rx.clone()));

    let grace = settings.server.graceful_shutdown;
    let deadline = async move {
        stopped(stop_rx).await;
        tokio::time::sleep(grace).await;
    };

    let result = tokio::select! {
        result = async { try_join!(public_server, admin_server) } => result
            .map(|_| ())
            .map_err(|err| AppError::from(InfraError::Serve(err))),
        () = deadline => {
            warn!(
                grace_secs = grace.as_secs(),
                "graceful shutdown timed out, dropping open connections"
            );
            Ok(())
        }
    };

    signal_handle.abort();
    result
}

/// Resolves once the shutdown flag is raised.
async fn stopped(mut stop: watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}
