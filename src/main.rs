use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Json, Router};
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use Mimokids_backend::api::{orders, payments, webhooks};
use Mimokids_backend::config::AppConfig;
use Mimokids_backend::database::{self, order_repository::OrderRepository,
    payment_repository::PaymentRepository};
use Mimokids_backend::health::{HealthChecker, HealthState, HealthStatus};
use Mimokids_backend::logging::init_tracing;
use Mimokids_backend::middleware::logging::{request_logging_middleware, UuidRequestId};
use Mimokids_backend::payments::gateway::PaymentGateway;
use Mimokids_backend::payments::mercadopago::MercadoPagoGateway;
use Mimokids_backend::services::mailer::{OrderMailer, ResendMailer};
use Mimokids_backend::services::reconciliation::{ReconciliationEngine, ReconciliationStore};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env()?;
    config.validate()?;

    // Initialize advanced tracing
    init_tracing(&config.logging);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "🚀 Starting Mimo Kids backend service"
    );

    info!(
        host = %config.server.host,
        port = config.server.port,
        public_url = %config.server.public_url,
        "Server configuration loaded"
    );

    // Initialize database connection pool
    info!("📊 Initializing database connection pool...");
    let db_pool = database::init_pool_from_config(&config.database)
        .await
        .map_err(|e| {
            error!("Failed to initialize database pool: {}", e);
            e
        })?;
    info!(
        max_connections = config.database.max_connections,
        "✅ Database connection pool initialized"
    );

    // Payment gateway client
    info!("💳 Initializing MercadoPago gateway client...");
    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(MercadoPagoGateway::new(config.gateway.clone()).map_err(|e| {
            error!("❌ Failed to initialize payment gateway: {}", e);
            e
        })?);
    info!(gateway = gateway.name(), "✅ Payment gateway initialized");

    // Transactional mailer
    info!("📧 Initializing mailer...");
    let mailer: Arc<dyn OrderMailer> =
        Arc::new(ResendMailer::new(config.email.clone()).map_err(|e| {
            error!("❌ Failed to initialize mailer: {}", e);
            e
        })?);
    info!("✅ Mailer initialized");

    // Repositories and reconciliation engine
    let order_repository = OrderRepository::new(db_pool.clone());
    let payment_repository = PaymentRepository::new(db_pool.clone());
    let store: Arc<dyn ReconciliationStore> = Arc::new(payment_repository.clone());
    let engine = Arc::new(ReconciliationEngine::new(gateway.clone(), store, mailer));
    info!("✅ Reconciliation engine initialized");

    // Initialize health checker
    let health_checker = HealthChecker::new(db_pool.clone());
    info!("✅ Health checker initialized");

    // Create the application router with logging middleware
    info!("🛣️  Setting up application routes...");

    let webhook_routes = webhooks::routes(webhooks::WebhookState { engine });
    let order_routes = orders::routes(orders::OrdersState {
        orders: order_repository.clone(),
        payments: payment_repository.clone(),
    });
    let payment_routes = payments::routes(payments::PaymentsState {
        orders: order_repository,
        payments: payment_repository,
        gateway,
        public_url: config.server.public_url.clone(),
        public_key: config.gateway.public_key.clone(),
        statement_descriptor: config.gateway.statement_descriptor.clone(),
    });

    let app = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(readiness))
        .route("/health/live", get(liveness))
        .with_state(AppState { health_checker })
        .merge(webhook_routes)
        .merge(order_routes)
        .merge(payment_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    info!("✅ Routes configured");

    // Run the server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("❌ Failed to bind to address {}: {}", addr, e);
        e
    })?;

    // Print a prominent banner with server information
    println!("\n╔══════════════════════════════════════════════════════════════╗");
    println!("║                                                              ║");
    println!("║         🚀 MIMO KIDS BACKEND SERVER IS RUNNING 🚀           ║");
    println!("║                                                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║                                                              ║");
    println!(
        "║  🌐 Server Address:  http://{}                    ║",
        addr
    );
    println!("║                                                              ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  📡 AVAILABLE ENDPOINTS:                                     ║");
    println!("║                                                              ║");
    println!("║  GET  /                            - Service banner          ║");
    println!("║  GET  /health                      - Health check            ║");
    println!("║  GET  /health/ready                - Readiness probe         ║");
    println!("║  GET  /health/live                 - Liveness probe          ║");
    println!("║  POST /api/orders                  - Create order            ║");
    println!("║  GET  /api/orders                  - List orders             ║");
    println!("║  GET  /api/orders/{{id}}             - Order detail            ║");
    println!("║  POST /api/payments/checkout       - Checkout preference     ║");
    println!("║  GET  /api/payments/status/{{id}}    - Payment status          ║");
    println!("║  POST /api/webhooks/mercadopago    - Gateway notifications   ║");
    println!("║                                                              ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    info!(address = %addr, "🚀 Server listening on http://{}", addr);
    info!("✅ Server is ready to accept connections");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("👋 Server shutdown complete");

    Ok(())
}

// Application state
#[derive(Clone)]
struct AppState {
    health_checker: HealthChecker,
}

// Handlers
async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "Mimo Kids Backend API",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": [
            "GET /health",
            "GET /health/live",
            "GET /health/ready",
            "POST /api/orders",
            "GET /api/orders",
            "GET /api/orders/{id}",
            "POST /api/payments/checkout",
            "GET /api/payments/status/{external_id}",
            "POST /api/webhooks/mercadopago",
        ],
    }))
}

async fn health(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    let health_status = state.health_checker.check_health().await;

    // Return 503 if any component is unhealthy
    if matches!(health_status.status, HealthState::Unhealthy) {
        error!("❌ Health check failed - service unhealthy");
        Err((
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "Service Unavailable".to_string(),
        ))
    } else {
        Ok(Json(health_status))
    }
}

/// Readiness probe - checks if the service is ready to accept traffic
async fn readiness(
    state: axum::extract::State<AppState>,
) -> Result<Json<HealthStatus>, (axum::http::StatusCode, String)> {
    // Readiness checks all dependencies
    health(state).await
}

/// Liveness probe - checks if the service is alive (basic check)
async fn liveness() -> &'static str {
    "OK"
}
