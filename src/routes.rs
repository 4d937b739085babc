use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::{
    AppState,
    auth::{self, AuthUser},
    cache,
    entities::{genre, movie, user},
    error::{AppError, AppResult},
    mailer::WelcomeEmail,
    models::{GenreOut, Listing, MovieDetail, MovieSummary, TrendingPeriod},
    store::{CatalogStore, MovieQuery, SearchQuery},
};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/genres", get(genre_list))
        .route("/api/genres/{id}", get(genre_detail))
        .route("/api/movies", get(movie_list))
        .route("/api/movies/popular", get(popular))
        .route("/api/movies/top-rated", get(top_rated))
        .route("/api/movies/upcoming", get(upcoming))
        .route("/api/movies/now-playing", get(now_playing))
        .route("/api/movies/recent", get(recent))
        .route("/api/movies/search", get(search))
        .route("/api/movies/trending/{period}", get(trending))
        .route("/api/movies/{id}", get(movie_detail))
        .route("/api/favorites", get(favorites_list))
        .route("/api/favorites/{movie_id}", post(favorites_add).delete(favorites_remove))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/logout", post(logout))
        .route("/api/auth/me", get(me))
        .with_state(state)
}

fn summaries(rows: &[(movie::Model, Vec<genre::Model>)], image_base: &str) -> Vec<MovieSummary> {
    rows.iter().map(|(m, genres)| MovieSummary::new(m, genres, image_base)).collect()
}

/// Shared shape of the cached category endpoints: one key, one TTL, one
/// store query producing movie rows.
async fn cached_summaries<F, Fut>(
    state: &Arc<AppState>,
    key: String,
    ttl: Duration,
    fetch: F,
) -> AppResult<Json<Value>>
where
    F: FnOnce(CatalogStore) -> Fut,
    Fut: Future<Output = AppResult<Vec<(movie::Model, Vec<genre::Model>)>>>,
{
    let store = state.store.clone();
    let image_base = state.config.tmdb_image_base_url.clone();
    let value = state
        .cache
        .get_or_compute(&key, ttl, || async move {
            let rows = fetch(store).await?;
            Ok(serde_json::to_value(summaries(&rows, &image_base))?)
        })
        .await?;
    Ok(Json(value))
}

async fn genre_list(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let key = cache::request_key("genres:list", &[]);
    let store = state.store.clone();
    let value = state
        .cache
        .get_or_compute(&key, state.config.ttl.genres, || async move {
            let genres = store.genres_with_counts().await?;
            let out: Vec<GenreOut> =
                genres.iter().map(|(g, count)| GenreOut::from_parts(g, *count)).collect();
            Ok(serde_json::to_value(out)?)
        })
        .await?;
    Ok(Json(value))
}

async fn genre_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<GenreOut>> {
    let (found, count) =
        state.store.genre_with_count(id).await?.ok_or(AppError::NotFound("genre"))?;
    Ok(Json(GenreOut::from_parts(&found, count)))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    search: Option<String>,
    genre: Option<i32>,
    min_rating: Option<f64>,
    max_rating: Option<f64>,
    year: Option<i32>,
    ordering: Option<String>,
    page: Option<u64>,
    page_size: Option<u64>,
}

async fn movie_list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> AppResult<Json<Value>> {
    let query = MovieQuery {
        search: params.search,
        genre: params.genre,
        min_rating: params.min_rating,
        max_rating: params.max_rating,
        year: params.year,
        ordering: params.ordering,
        page: params.page.unwrap_or(1).max(1),
        page_size: params.page_size.unwrap_or(20).clamp(1, 100),
    };

    let mut key_params: Vec<(&str, String)> =
        vec![("page", query.page.to_string()), ("page_size", query.page_size.to_string())];
    if let Some(v) = &query.search {
        key_params.push(("search", v.clone()));
    }
    if let Some(v) = query.genre {
        key_params.push(("genre", v.to_string()));
    }
    if let Some(v) = query.min_rating {
        key_params.push(("min_rating", v.to_string()));
    }
    if let Some(v) = query.max_rating {
        key_params.push(("max_rating", v.to_string()));
    }
    if let Some(v) = query.year {
        key_params.push(("year", v.to_string()));
    }
    if let Some(v) = &query.ordering {
        key_params.push(("ordering", v.clone()));
    }
    let key = cache::request_key("movies:list", &key_params);

    let store = state.store.clone();
    let image_base = state.config.tmdb_image_base_url.clone();
    let page = query.page;
    let page_size = query.page_size;
    let value = state
        .cache
        .get_or_compute(&key, state.config.ttl.list, || async move {
            let (count, rows) = store.list_movies(&query).await?;
            Ok(serde_json::to_value(Listing {
                count,
                page,
                page_size,
                results: summaries(&rows, &image_base),
            })?)
        })
        .await?;
    Ok(Json(value))
}

async fn movie_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> AppResult<Json<Value>> {
    let key = cache::request_key("movies:detail", &[("id", id.to_string())]);
    let store = state.store.clone();
    let image_base = state.config.tmdb_image_base_url.clone();
    let value = state
        .cache
        .get_or_compute(&key, state.config.ttl.detail, || async move {
            let (found, genres) =
                store.movie_detail(id).await?.ok_or(AppError::NotFound("movie"))?;
            Ok(serde_json::to_value(MovieDetail::new(&found, &genres, &image_base))?)
        })
        .await?;
    Ok(Json(value))
}

async fn popular(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let key = cache::request_key("movies:popular", &[]);
    let ttl = state.config.ttl.popular;
    cached_summaries(&state, key, ttl, |store| async move { store.popular().await }).await
}

async fn top_rated(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let key = cache::request_key("movies:top-rated", &[]);
    let ttl = state.config.ttl.top_rated;
    cached_summaries(&state, key, ttl, |store| async move { store.top_rated().await }).await
}

async fn upcoming(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let key = cache::request_key("movies:upcoming", &[]);
    let ttl = state.config.ttl.upcoming;
    cached_summaries(&state, key, ttl, |store| async move { store.upcoming().await }).await
}

async fn now_playing(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let key = cache::request_key("movies:now-playing", &[]);
    let ttl = state.config.ttl.now_playing;
    cached_summaries(&state, key, ttl, |store| async move { store.now_playing().await }).await
}

async fn recent(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let key = cache::request_key("movies:recent", &[]);
    let ttl = state.config.ttl.recent;
    cached_summaries(&state, key, ttl, |store| async move { store.recent().await }).await
}

async fn trending(
    State(state): State<Arc<AppState>>,
    Path(period): Path<String>,
) -> AppResult<Json<Value>> {
    let period = TrendingPeriod::parse(&period).ok_or(AppError::NotFound("trending period"))?;
    let key = cache::request_key("movies:trending", &[("period", period.as_str().to_string())]);
    let ttl = state.config.ttl.trending;
    cached_summaries(&state, key, ttl, move |store| async move { store.trending(period).await })
        .await
}

#[derive(Debug, Deserialize)]
struct SearchParams {
    q: Option<String>,
    genre: Option<i32>,
    min_rating: Option<f64>,
    year: Option<i32>,
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> AppResult<Json<Value>> {
    let query = SearchQuery {
        q: params.q,
        genre: params.genre,
        min_rating: params.min_rating,
        year: params.year,
    };

    let mut key_params: Vec<(&str, String)> = Vec::new();
    if let Some(v) = &query.q {
        key_params.push(("q", v.clone()));
    }
    if let Some(v) = query.genre {
        key_params.push(("genre", v.to_string()));
    }
    if let Some(v) = query.min_rating {
        key_params.push(("min_rating", v.to_string()));
    }
    if let Some(v) = query.year {
        key_params.push(("year", v.to_string()));
    }
    let key = cache::request_key("movies:search", &key_params);

    let store = state.store.clone();
    let image_base = state.config.tmdb_image_base_url.clone();
    let value = state
        .cache
        .get_or_compute(&key, state.config.ttl.search, || async move {
            let rows = store.search(&query).await?;
            let results = summaries(&rows, &image_base);
            Ok(json!({ "count": results.len(), "results": results }))
        })
        .await?;
    Ok(Json(value))
}

async fn favorites_list(
    State(state): State<Arc<AppState>>,
    AuthUser(current): AuthUser,
) -> AppResult<Json<Value>> {
    // Per-user data is never cached.
    let rows = state.store.list_favorites(current.id).await?;
    Ok(Json(serde_json::to_value(summaries(&rows, &state.config.tmdb_image_base_url))?))
}

async fn favorites_add(
    State(state): State<Arc<AppState>>,
    AuthUser(current): AuthUser,
    Path(movie_id): Path<i32>,
) -> AppResult<impl IntoResponse> {
    state.store.add_favorite(current.id, movie_id).await?;
    Ok((StatusCode::CREATED, Json(json!({ "message": "movie added to favorites" }))))
}

async fn favorites_remove(
    State(state): State<Arc<AppState>>,
    AuthUser(current): AuthUser,
    Path(movie_id): Path<i32>,
) -> AppResult<Json<Value>> {
    state.store.remove_favorite(current.id, movie_id).await?;
    Ok(Json(json!({ "message": "movie removed from favorites" })))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    username: String,
    email: String,
    password: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> AppResult<impl IntoResponse> {
    let username = req.username.trim().to_string();
    let email = req.email.trim().to_string();

    if username.is_empty() {
        return Err(AppError::Validation("username is required".to_string()));
    }
    if !email.contains('@') {
        return Err(AppError::Validation("a valid email is required".to_string()));
    }
    if req.password.chars().count() < 8 {
        return Err(AppError::Validation("password must be at least 8 characters".to_string()));
    }

    let password_hash = auth::hash_password(&req.password)?;
    let created = state.store.create_user(&username, &email, &password_hash).await?;

    let token = auth::generate_token_key();
    state.store.create_token(created.id, &token).await?;

    // Dispatched to the mail worker; registration never waits on delivery.
    state
        .mailer
        .enqueue(WelcomeEmail { to: created.email.clone(), username: created.username.clone() });

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "user": user_payload(&created),
            "token": token,
            "message": "user created successfully"
        })),
    ))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> AppResult<Json<Value>> {
    let found = state
        .store
        .find_user_by_username(req.username.trim())
        .await?
        .ok_or(AppError::InvalidCredentials)?;
    if !auth::verify_password(&req.password, &found.password_hash) {
        return Err(AppError::InvalidCredentials);
    }

    let token = auth::generate_token_key();
    state.store.create_token(found.id, &token).await?;

    Ok(Json(json!({
        "user": user_payload(&found),
        "token": token,
        "message": "login successful"
    })))
}

async fn logout(
    State(state): State<Arc<AppState>>,
    AuthUser(_current): AuthUser,
    headers: HeaderMap,
) -> AppResult<Json<Value>> {
    if let Some(key) = auth::token_from_headers(&headers) {
        state.store.delete_token(key).await?;
    }
    Ok(Json(json!({ "message": "logout successful" })))
}

async fn me(
    State(_state): State<Arc<AppState>>,
    AuthUser(current): AuthUser,
) -> AppResult<Json<Value>> {
    Ok(Json(json!({ "user": user_payload(&current) })))
}

fn user_payload(user: &user::Model) -> Value {
    json!({
        "id": user.id,
        "username": user.username,
        "email": user.email,
        "created_at": user.created_at,
    })
}
