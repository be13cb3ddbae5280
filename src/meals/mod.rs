pub mod dto;
pub mod events;
pub mod handlers;
mod repo;
pub mod repo_types;
pub mod services;
mod stream;

use crate::config::ImageConfig;
use crate::state::AppState;
use axum::Router;

pub fn router(images: &ImageConfig) -> Router<AppState> {
    handlers::meal_routes(images)
}
