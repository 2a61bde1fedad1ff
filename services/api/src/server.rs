use crate::cli::ServeArgs;
use crate::infra::{load_fee_structures, AppState, InMemoryApplicationRepository};
use crate::routes::with_admission_routes;
use admissions::config::AppConfig;
use admissions::error::AppError;
use admissions::telemetry;
use admissions::workflows::admissions::AdmissionsService;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
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

    let structures = load_fee_structures(args.fee_structures.as_deref(), Utc::now())?;
    info!(count = structures.len(), "fee structures loaded");

    let repository = Arc::new(InMemoryApplicationRepository::default());
    let admissions_service = Arc::new(AdmissionsService::new(
        repository,
        Arc::new(structures),
        config.workflow.clone(),
    ));

    let app = with_admission_routes(admissions_service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        max_in_flight = config.workflow.batch.max_in_flight,
        "admissions orchestrator ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
