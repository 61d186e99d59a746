//! Hydroloop controller service
//!
//! Runs the control loop for one hydroponic system and serves the HTTP /
//! WebSocket API alongside it.

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hydroloop::config::{Settings, SourceKind};
use hydroloop::controller::Controller;
use hydroloop::handlers::{self, ApiState};
use hydroloop::sensor::{ReplaySource, SensorSource, SimulatedSource};
use hydroloop::system::SystemConfig;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenv::dotenv().ok();

    // Logging
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,hydroloop=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();

    // Load configuration
    let settings = Settings::from_env().context("Failed to load configuration")?;
    let bind_address = format!("{}:{}", settings.server.host, settings.server.port);

    let system = SystemConfig::provision(settings.system.clone())
        .context("Invalid system definition")?;
    info!(
        system_id = %system.system_id,
        system_type = %system.system_type,
        source = ?settings.controller.source,
        "Starting hydroloop controller"
    );

    let (source, feed): (Box<dyn SensorSource>, _) = match settings.controller.source {
        SourceKind::Simulated => (
            Box::new(
                SimulatedSource::new(&system, settings.controller.simulation_seed)
                    .with_efficacy(settings.controller.simulation_efficacy)
                    .with_failure_rate(settings.controller.simulation_failure_rate),
            ),
            None,
        ),
        SourceKind::Ingest => {
            let (source, feed) = ReplaySource::channel();
            (Box::new(source), Some(feed))
        }
    };

    let controller = Controller::builder(system, source)
        .options(settings.controller_options())
        .build()
        .context("Failed to build controller")?;

    if settings.controller.autostart {
        controller.start();
    }

    let api_state = ApiState {
        controller: controller.clone(),
        feed,
    };

    info!("Binding server to {}", bind_address);

    HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(api_state.clone()))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .wrap(tracing_actix_web::TracingLogger::default())
            .configure(handlers::configure_routes)
    })
    .bind(&bind_address)?
    .run()
    .await?;

    // Server is down: stop ticking and let in-flight doses resolve
    controller.stop().await;
    controller.wait_for_dosing().await;
    info!("Shutdown complete");

    Ok(())
}
