// src/main.rs
use actix_web::{App, HttpServer, middleware, web};
use anyhow::Context;
use log::info;
use std::sync::Arc;

use quipcraft::config::AppConfig;
use quipcraft::handlers::{AppState, process_image};
use quipcraft::pipeline::Pipeline;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting Quipcraft service...");

    let config = AppConfig::from_env().context("invalid configuration")?;
    let pipeline = Pipeline::with_openai(&config).context("failed to initialize AI clients")?;

    let app_state = AppState {
        pipeline: Arc::new(pipeline),
    };
    let bind_addr = (config.server.host.clone(), config.server.port);
    info!("Starting HTTP server on {}:{}", bind_addr.0, bind_addr.1);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .service(web::scope("/api/v1").route("/process", web::post().to(process_image)))
    })
    .bind(bind_addr)
    .with_context(|| format!("failed to bind {}:{}", config.server.host, config.server.port))?
    .run()
    .await?;

    Ok(())
}
