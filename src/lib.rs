pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod mailer;
pub mod models;
pub mod routes;
pub mod store;
pub mod sync;
pub mod testing;
pub mod tmdb;

use std::sync::Arc;

use crate::{cache::ResponseCache, config::Config, mailer::Mailer, store::CatalogStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: CatalogStore,
    pub cache: ResponseCache,
    pub mailer: Mailer,
}
