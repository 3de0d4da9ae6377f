use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use connbroker::api::{self, AppState};
use connbroker::config;
use connbroker::models::{ConnectionDescriptor, ConnectionUrlResponse, RequestContext, RewriteContext};
use connbroker::plugins;
use connbroker::services::settings::IS_APP_STREAM_ENABLED;
use connbroker::services::StaticSettings;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env feeds clap's env-backed args too
    dotenvy::dotenv().ok();
    let args = cli::Cli::parse();

    let cfg = config::load()?;
    init_tracing(cfg.log_json);

    if !cfg.aws.has_credentials() {
        tracing::warn!("AWS credentials are not set. SSH connections will fail to resolve instance addresses.");
    }

    let result = match args.command {
        Some(cli::Commands::Serve { port }) => {
            let port = port.unwrap_or(cfg.port);
            run_server(cfg, port).await
        }
        Some(cli::Commands::Rewrite {
            env_id,
            file,
            enable_gateway,
            principal_id,
            token,
        }) => {
            let raw = match file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    std::io::stdin()
                        .read_to_string(&mut buf)
                        .context("failed to read connection from stdin")?;
                    buf
                }
            };
            let connection: ConnectionDescriptor =
                serde_json::from_str(&raw).context("invalid connection JSON")?;

            let mut settings = StaticSettings::from_config(&cfg);
            if enable_gateway {
                settings = settings.with(IS_APP_STREAM_ENABLED, true);
            }
            let pipeline = plugins::default_pipeline(&cfg, Arc::new(settings))?;

            let ctx = RewriteContext::new(env_id, RequestContext::new(principal_id, token));
            let connection = pipeline.create_connection_url(&ctx, connection).await?;

            let out = ConnectionUrlResponse {
                env_id: ctx.environment_id,
                connection,
            };
            println!("{}", serde_json::to_string_pretty(&out)?);
            Ok(())
        }
        None => {
            let port = cfg.port;
            run_server(cfg, port).await
        }
    };

    if let Err(ref e) = result {
        eprintln!("Error: {:?}", e);
    }
    result
}

fn init_tracing(json: bool) {
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::{trace as sdktrace, Resource};

    // Export spans over OTLP only when an endpoint is configured
    let telemetry_layer = if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic())
            .with_trace_config(sdktrace::config().with_resource(Resource::new(vec![
                KeyValue::new("service.name", "connbroker"),
            ])))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => Some(tracing_opentelemetry::layer().with_tracer(tracer)),
            Err(e) => {
                eprintln!("failed to install OpenTelemetry tracer: {}", e);
                None
            }
        }
    } else {
        None
    };

    let (json_layer, text_layer) = if json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "connbroker=debug,tower_http=debug".into()),
        ))
        .with(json_layer)
        .with(text_layer)
        .with(telemetry_layer)
        .init();
}

async fn run_server(cfg: config::Config, port: u16) -> anyhow::Result<()> {
    let settings = Arc::new(StaticSettings::from_config(&cfg));
    let pipeline = plugins::default_pipeline(&cfg, settings)?;

    tracing::info!(
        plugins = ?pipeline.plugin_names(),
        appstream_enabled = cfg.appstream_enabled,
        environment_roles = cfg.aws.environment_roles.len(),
        "Connection pipeline ready"
    );
    if cfg.api_key.is_none() {
        tracing::warn!("BROKER_API_KEY is not set; the API accepts unauthenticated requests");
    }

    let state = Arc::new(AppState {
        pipeline,
        api_key: cfg.api_key.clone(),
    });

    let app = api::app_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("connbroker listening on {}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
