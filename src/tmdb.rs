use std::{collections::HashMap, num::NonZeroU32, sync::Arc};

use async_trait::async_trait;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use serde::Deserialize;

use crate::models::TrendingPeriod;

#[derive(Clone, Debug, thiserror::Error)]
pub enum TmdbError {
    #[error("rate limited by upstream")]
    RateLimited,
    #[error("transient upstream failure: {0}")]
    Transient(String),
    #[error("upstream rejected request: {0}")]
    NotFound(String),
    #[error("malformed upstream payload: {0}")]
    Malformed(String),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Category {
    Popular,
    TopRated,
    Upcoming,
    NowPlaying,
    TrendingDay,
    TrendingWeek,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Popular,
        Category::TopRated,
        Category::Upcoming,
        Category::NowPlaying,
        Category::TrendingDay,
        Category::TrendingWeek,
    ];

    pub fn path(self) -> &'static str {
        match self {
            Category::Popular => "movie/popular",
            Category::TopRated => "movie/top_rated",
            Category::Upcoming => "movie/upcoming",
            Category::NowPlaying => "movie/now_playing",
            Category::TrendingDay => "trending/movie/day",
            Category::TrendingWeek => "trending/movie/week",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Category::Popular => "popular",
            Category::TopRated => "top_rated",
            Category::Upcoming => "upcoming",
            Category::NowPlaying => "now_playing",
            Category::TrendingDay => "trending_day",
            Category::TrendingWeek => "trending_week",
        }
    }

    pub fn trending_period(self) -> Option<TrendingPeriod> {
        match self {
            Category::TrendingDay => Some(TrendingPeriod::Day),
            Category::TrendingWeek => Some(TrendingPeriod::Week),
            _ => None,
        }
    }
}

/// One upstream page. Items stay raw JSON so a single undecodable entry can
/// be skipped without losing the rest of the page.
#[derive(Clone, Debug, Default)]
pub struct MoviePage {
    pub items: Vec<serde_json::Value>,
    pub total_pages: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RawMovie {
    pub id: i32,
    pub title: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub vote_count: i32,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default)]
    pub genre_ids: Vec<i32>,
}

#[async_trait]
pub trait MovieSource: Send + Sync {
    async fn fetch_category_page(
        &self,
        category: Category,
        page: u32,
    ) -> Result<MoviePage, TmdbError>;

    async fn fetch_genre_index(&self) -> Result<HashMap<i32, String>, TmdbError>;
}

#[async_trait]
impl<T: MovieSource + ?Sized> MovieSource for Arc<T> {
    async fn fetch_category_page(
        &self,
        category: Category,
        page: u32,
    ) -> Result<MoviePage, TmdbError> {
        (**self).fetch_category_page(category, page).await
    }

    async fn fetch_genre_index(&self) -> Result<HashMap<i32, String>, TmdbError> {
        (**self).fetch_genre_index().await
    }
}

pub struct TmdbClient {
    client: reqwest::Client,
    access_token: String,
    base_url: String,
    limiter: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

impl TmdbClient {
    pub fn new(client: reqwest::Client, access_token: String, base_url: String, rps: u32) -> Self {
        if access_token.trim().is_empty() {
            tracing::warn!("no TMDB_ACCESS_TOKEN configured, upstream requests will be rejected");
        }

        let limiter =
            Arc::new(RateLimiter::direct(Quota::per_second(NonZeroU32::new(rps.max(1)).unwrap())));
        Self { client, access_token, base_url, limiter }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        extra: &[(&str, String)],
    ) -> Result<T, TmdbError> {
        self.limiter.until_ready().await;

        let url = format!("{}/{path}", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.access_token)
            .query(&[("language", "en-US")])
            .query(extra)
            .send()
            .await
            .map_err(|err| request_error(path, err))?;

        let status = resp.status();
        if status.as_u16() == 429 {
            return Err(TmdbError::RateLimited);
        }
        if status.is_client_error() {
            return Err(TmdbError::NotFound(format!("{path}: HTTP {status}")));
        }
        if !status.is_success() {
            return Err(TmdbError::Transient(format!("{path}: HTTP {status}")));
        }

        resp.json::<T>().await.map_err(|err| TmdbError::Malformed(format!("{path}: {err}")))
    }
}

#[async_trait]
impl MovieSource for TmdbClient {
    async fn fetch_category_page(
        &self,
        category: Category,
        page: u32,
    ) -> Result<MoviePage, TmdbError> {
        let body: PageResponse =
            self.get_json(category.path(), &[("page", page.to_string())]).await?;
        Ok(MoviePage { items: body.results, total_pages: body.total_pages })
    }

    async fn fetch_genre_index(&self) -> Result<HashMap<i32, String>, TmdbError> {
        let body: GenreListResponse = self.get_json("genre/movie/list", &[]).await?;
        Ok(body.genres.into_iter().map(|g| (g.id, g.name)).collect())
    }
}

fn request_error(path: &str, err: reqwest::Error) -> TmdbError {
    if err.is_decode() {
        TmdbError::Malformed(format!("{path}: {err}"))
    } else {
        TmdbError::Transient(format!("{path}: {err}"))
    }
}

#[derive(Debug, Deserialize)]
struct PageResponse {
    #[serde(default)]
    results: Vec<serde_json::Value>,
    #[serde(default = "default_total_pages")]
    total_pages: u32,
}

fn default_total_pages() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct GenreListResponse {
    #[serde(default)]
    genres: Vec<GenreEntry>,
}

#[derive(Debug, Deserialize)]
struct GenreEntry {
    id: i32,
    name: String,
}
