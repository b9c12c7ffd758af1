// src/services/mod.rs
pub mod aggregator;
pub mod analysis_client;
pub mod auth;
pub mod favorites;
pub mod image_processor;
pub mod image_synthesizer;
pub mod kv_store;
pub mod orchestrator;
pub mod sharing;

pub use aggregator::ResultAggregator;
pub use analysis_client::{OpenRouterAnalyzer, StyleAnalyzer};
pub use auth::{AuthBackend, AuthSession, PocketBaseClient};
pub use favorites::FavoritesService;
pub use image_processor::ImageProcessor;
pub use image_synthesizer::{
    ClothingImageGenerator, HuggingFaceBackend, ImageBackend, ImageSynthesizer,
};
pub use kv_store::{KeyValueStore, MemoryStore, RedisStore};
pub use orchestrator::StyleOrchestrator;
pub use sharing::ShareService;
