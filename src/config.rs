use std::{net::SocketAddr, time::Duration};

use anyhow::Context;

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: SocketAddr,
    pub database_url: String,
    pub tmdb_access_token: String,
    pub tmdb_base_url: String,
    pub tmdb_image_base_url: String,
    pub tmdb_rps: u32,
    pub sync_pages: u32,
    pub sync_threshold: u64,
    pub sync_retry_base_delay: Duration,
    pub ttl: CacheTtls,
    pub email_from: String,
}

#[derive(Clone, Debug)]
pub struct CacheTtls {
    pub popular: Duration,
    pub top_rated: Duration,
    pub upcoming: Duration,
    pub now_playing: Duration,
    pub recent: Duration,
    pub trending: Duration,
    pub detail: Duration,
    pub search: Duration,
    pub list: Duration,
    pub genres: Duration,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            popular: Duration::from_secs(15 * 60),
            top_rated: Duration::from_secs(60 * 60),
            upcoming: Duration::from_secs(60 * 60),
            now_playing: Duration::from_secs(15 * 60),
            recent: Duration::from_secs(10 * 60),
            trending: Duration::from_secs(5 * 60),
            detail: Duration::from_secs(30 * 60),
            search: Duration::from_secs(10 * 60),
            list: Duration::from_secs(10 * 60),
            genres: Duration::from_secs(60 * 60),
        }
    }
}

impl CacheTtls {
    fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            popular: env_secs("CACHE_TTL_POPULAR_SECS", defaults.popular),
            top_rated: env_secs("CACHE_TTL_TOP_RATED_SECS", defaults.top_rated),
            upcoming: env_secs("CACHE_TTL_UPCOMING_SECS", defaults.upcoming),
            now_playing: env_secs("CACHE_TTL_NOW_PLAYING_SECS", defaults.now_playing),
            recent: env_secs("CACHE_TTL_RECENT_SECS", defaults.recent),
            trending: env_secs("CACHE_TTL_TRENDING_SECS", defaults.trending),
            detail: env_secs("CACHE_TTL_DETAIL_SECS", defaults.detail),
            search: env_secs("CACHE_TTL_SEARCH_SECS", defaults.search),
            list: env_secs("CACHE_TTL_LIST_SECS", defaults.list),
            genres: env_secs("CACHE_TTL_GENRES_SECS", defaults.genres),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port: u16 =
            std::env::var("PORT").unwrap_or_else(|_| "3000".to_string()).parse().context("PORT")?;

        let tmdb_access_token =
            std::env::var("TMDB_ACCESS_TOKEN").unwrap_or_else(|_| "".to_string());
        let tmdb_base_url = std::env::var("TMDB_BASE_URL")
            .unwrap_or_else(|_| "https://api.themoviedb.org/3".to_string());
        let tmdb_image_base_url = std::env::var("TMDB_IMAGE_BASE_URL")
            .unwrap_or_else(|_| "https://image.tmdb.org/t/p".to_string());

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://cinedex.db?mode=rwc".to_string());

        let tmdb_rps: u32 =
            std::env::var("TMDB_RPS").ok().and_then(|s| s.parse().ok()).unwrap_or(4);

        let sync_pages: u32 =
            std::env::var("SYNC_PAGES").ok().and_then(|s| s.parse().ok()).unwrap_or(5).max(1);

        let sync_threshold: u64 =
            std::env::var("SYNC_THRESHOLD").ok().and_then(|s| s.parse().ok()).unwrap_or(500);

        let sync_retry_base_delay = Duration::from_millis(
            std::env::var("SYNC_RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(500),
        );

        let email_from = std::env::var("EMAIL_FROM")
            .unwrap_or_else(|_| "noreply@cinedex.local".to_string());

        Ok(Self {
            addr: format!("{host}:{port}").parse().context("HOST/PORT")?,
            database_url,
            tmdb_access_token,
            tmdb_base_url,
            tmdb_image_base_url,
            tmdb_rps,
            sync_pages,
            sync_threshold,
            sync_retry_base_delay,
            ttl: CacheTtls::from_env(),
            email_from,
        })
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}
