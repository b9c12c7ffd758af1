// src/lib.rs
pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod services;

use std::sync::Arc;

use crate::services::{
    AuthSession, FavoritesService, ImageProcessor, ShareService, StyleOrchestrator,
};

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<StyleOrchestrator>,
    pub favorites: Arc<FavoritesService>,
    pub auth: Arc<AuthSession>,
    pub image_processor: Arc<ImageProcessor>,
    pub share: Arc<ShareService>,
}
