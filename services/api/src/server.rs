use crate::cli::ServeArgs;
use crate::infra::{AppState, InMemoryAdapters};
use crate::routes::with_verification_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use docverify::config::AppConfig;
use docverify::error::AppError;
use docverify::telemetry;
use docverify::workflows::verification::{
    spawn_sweeper, InMemorySlotRepository, VerificationService,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let adapters = InMemoryAdapters::new();
    let repository = Arc::new(InMemorySlotRepository::default());
    let verification_service = Arc::new(VerificationService::new(
        repository,
        adapters.collaborators(),
        &config.workflow,
    ));

    let sweep_every = Duration::from_secs(config.workflow.sweep_interval_secs);
    let sweeper = spawn_sweeper(verification_service.extraction().clone(), sweep_every);
    if sweeper.is_none() {
        info!("extraction sweeper disabled");
    }

    let app = with_verification_routes(verification_service, config.workflow.max_upload_bytes)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        sweep_interval_secs = config.workflow.sweep_interval_secs,
        "document verification service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
