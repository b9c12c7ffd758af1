// src/handlers.rs
use crate::services::auth::{AuthUser, RegistrationForm};
use crate::{AppState, errors::StyleError, models::*};
use actix_multipart::Multipart;
use actix_web::{Error, HttpRequest, HttpResponse, http::header, web};
use futures_util::TryStreamExt;
use serde::Deserialize;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/auth/register", web::post().to(register))
            .route("/auth/login", web::post().to(login))
            .route("/auth/logout", web::post().to(logout))
            .route("/auth/me", web::get().to(current_user))
            .route("/analyze", web::post().to(analyze_photo))
            .route("/session", web::get().to(get_session))
            .route("/session", web::delete().to(cancel_session))
            .route("/favorites", web::get().to(list_favorites))
            .route("/favorites", web::post().to(add_favorite))
            .route("/favorites", web::delete().to(clear_favorites))
            .route("/favorites/{id}", web::delete().to(remove_favorite))
            .route("/favorites/{id}/share", web::post().to(share_favorite)),
    )
    .route("/health", web::get().to(health_check));
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// The caller must present the token handed out by login or register.
fn require_auth(req: &HttpRequest, data: &AppState) -> Result<AuthUser, StyleError> {
    Ok(data.auth.authorize(bearer_token(req))?)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn register(
    data: web::Data<AppState>,
    body: web::Json<RegistrationForm>,
) -> Result<HttpResponse, Error> {
    let state = data.auth.register(&body).await?;
    Ok(HttpResponse::Created().json(state))
}

pub async fn login(
    data: web::Data<AppState>,
    body: web::Json<LoginRequest>,
) -> Result<HttpResponse, Error> {
    let state = data.auth.login(&body.email, &body.password).await?;
    Ok(HttpResponse::Ok().json(state))
}

pub async fn logout(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    require_auth(&req, &data)?;
    data.auth.logout().await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn current_user(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    let user = require_auth(&req, &data)?;
    Ok(HttpResponse::Ok().json(user))
}

/// Accepts one photo, preprocesses it, and starts a new session in the background.
pub async fn analyze_photo(
    req: HttpRequest,
    mut payload: Multipart,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    require_auth(&req, &data)?;

    let mut image_data = Vec::new();
    if let Some(mut field) = payload.try_next().await? {
        while let Some(chunk) = field.try_next().await? {
            if image_data.len() + chunk.len() > MAX_UPLOAD_BYTES {
                return Err(StyleError::Validation("Photo exceeds 20 MB".to_string()).into());
            }
            image_data.extend_from_slice(&chunk);
        }
    }

    if image_data.is_empty() {
        return Err(StyleError::Validation("No photo provided".to_string()).into());
    }

    let processor = data.image_processor.clone();
    let prepared = web::block(move || -> Result<Vec<u8>, StyleError> {
        processor.validate_image(&image_data)?;
        processor.prepare_for_analysis(&image_data)
    })
    .await??;

    let session_id = data.orchestrator.start_analysis(prepared);

    Ok(HttpResponse::Accepted().json(serde_json::json!({
        "session_id": session_id
    })))
}

pub async fn get_session(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    require_auth(&req, &data)?;
    Ok(HttpResponse::Ok().json(data.orchestrator.aggregator().snapshot()))
}

pub async fn cancel_session(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    require_auth(&req, &data)?;
    let cancelled = data.orchestrator.cancel();
    Ok(HttpResponse::Ok().json(serde_json::json!({ "cancelled": cancelled })))
}

pub async fn list_favorites(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    require_auth(&req, &data)?;
    let favorites = data.favorites.list().await?;
    Ok(HttpResponse::Ok().json(favorites))
}

#[derive(Debug, Deserialize)]
pub struct AddFavoriteRequest {
    pub item_index: usize,
}

/// Saves a completed item of the current session.
pub async fn add_favorite(
    req: HttpRequest,
    data: web::Data<AppState>,
    body: web::Json<AddFavoriteRequest>,
) -> Result<HttpResponse, Error> {
    require_auth(&req, &data)?;

    let snapshot = data.orchestrator.aggregator().snapshot();
    let index = body.item_index;

    let item = snapshot
        .analysis
        .as_ref()
        .and_then(|a| a.items.get(index))
        .ok_or_else(|| StyleError::NotFound(format!("No recommended item {}", index)))?;

    let image_ref = snapshot
        .outcomes
        .get(index)
        .and_then(GenerationOutcome::image_ref)
        .ok_or_else(|| {
            StyleError::Validation(format!("Item {} has no generated image", index))
        })?;

    let added = data
        .favorites
        .add(FavoriteEntry::from_outcome(item, image_ref.clone()))
        .await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "added": added })))
}

pub async fn remove_favorite(
    req: HttpRequest,
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    require_auth(&req, &data)?;
    let id = path.into_inner();

    if !data.favorites.remove(&id).await? {
        return Err(StyleError::NotFound(format!("Favorite {}", id)).into());
    }
    Ok(HttpResponse::NoContent().finish())
}

pub async fn clear_favorites(
    req: HttpRequest,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    require_auth(&req, &data)?;
    data.favorites.clear().await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn share_favorite(
    req: HttpRequest,
    path: web::Path<String>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    require_auth(&req, &data)?;
    let id = path.into_inner();

    let favorite = data
        .favorites
        .get(&id)
        .await?
        .ok_or_else(|| StyleError::NotFound(format!("Favorite {}", id)))?;

    let file_name = data.share.export(&favorite.image_ref).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "file": file_name,
        "url": format!("/shared/{}", file_name)
    })))
}

pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "service": "stylemorph",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
