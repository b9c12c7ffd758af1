// src/main.rs
use actix_web::{App, HttpServer, middleware, web};
use anyhow::Context;
use log::{info, warn};
use std::sync::Arc;

use stylemorph::AppState;
use stylemorph::config::AppConfig;
use stylemorph::handlers;
use stylemorph::services::{
    AuthSession, FavoritesService, HuggingFaceBackend, ImageProcessor, ImageSynthesizer,
    KeyValueStore, MemoryStore, OpenRouterAnalyzer, PocketBaseClient, RedisStore,
    ResultAggregator, ShareService, StyleOrchestrator,
};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    info!("Starting StyleMorph service...");

    let config = AppConfig::from_env().context("Invalid configuration")?;

    let store: Arc<dyn KeyValueStore> = match RedisStore::new(&config.redis_url).await {
        Ok(store) => Arc::new(store),
        Err(e) => {
            warn!("Redis unavailable ({}); favorites will not survive restarts", e);
            Arc::new(MemoryStore::new())
        }
    };

    // Initialize services
    let analyzer = Arc::new(OpenRouterAnalyzer::new(config.analysis.clone())?);
    let backend = Arc::new(HuggingFaceBackend::new(&config.generation)?);
    let synthesizer = Arc::new(ImageSynthesizer::new(backend, &config.generation));
    let orchestrator = Arc::new(StyleOrchestrator::new(
        analyzer,
        synthesizer,
        Arc::new(ResultAggregator::new()),
        config.fan_out.clone(),
    ));

    let auth_backend = Arc::new(PocketBaseClient::new(&config.pocketbase_url)?);
    let auth = Arc::new(AuthSession::restore(auth_backend, store.clone()).await?);

    std::fs::create_dir_all(&config.share_dir)
        .with_context(|| format!("Cannot create {}", config.share_dir.display()))?;

    let app_state = AppState {
        orchestrator,
        favorites: Arc::new(FavoritesService::new(store)),
        auth,
        image_processor: Arc::new(ImageProcessor::new()),
        share: Arc::new(ShareService::new(config.share_dir.clone())),
    };

    info!("Starting HTTP server on {}", config.bind_addr);

    let share_dir = config.share_dir.clone();
    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(handlers::configure)
            .service(actix_files::Files::new("/shared", share_dir.clone()))
    })
    .bind(&config.bind_addr)?
    .run()
    .await?;

    Ok(())
}
