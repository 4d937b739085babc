use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tempfile::NamedTempFile;
use tower::ServiceExt;

use cinedex::{
    AppState,
    cache::ResponseCache,
    config::{CacheTtls, Config},
    db,
    mailer::{LogTransport, Mailer, MailerOptions},
    models::TrendingPeriod,
    routes,
    store::{CatalogStore, MovieRecord},
};

async fn test_app() -> (Router, CatalogStore, NamedTempFile) {
    let db_file = NamedTempFile::new().expect("temp db file");
    let url = format!("sqlite://{}?mode=rwc", db_file.path().display());
    let db = db::connect_and_migrate(&url).await.expect("migrate test db");

    let store = CatalogStore::new(db.clone());
    let cache = ResponseCache::new(db);
    let mailer = Mailer::spawn(
        Arc::new(LogTransport),
        "noreply@example.com".to_string(),
        MailerOptions::default(),
    );

    let config = Arc::new(Config {
        addr: "127.0.0.1:0".parse().unwrap(),
        database_url: url,
        tmdb_access_token: String::new(),
        tmdb_base_url: "https://api.themoviedb.org/3".to_string(),
        tmdb_image_base_url: "https://image.tmdb.org/t/p".to_string(),
        tmdb_rps: 4,
        sync_pages: 5,
        sync_threshold: 500,
        sync_retry_base_delay: Duration::from_millis(1),
        ttl: CacheTtls::default(),
        email_from: "noreply@example.com".to_string(),
    });

    let state = Arc::new(AppState { config, store: store.clone(), cache, mailer });
    (routes::router(state), store, db_file)
}

fn movie(tmdb_id: i32, title: &str, vote_average: f64, vote_count: i32) -> MovieRecord {
    MovieRecord {
        tmdb_id,
        title: title.to_string(),
        overview: format!("Overview for {title}"),
        release_date: Some("2024-06-01".to_string()),
        poster_path: Some(format!("/poster-{tmdb_id}.jpg")),
        backdrop_path: None,
        vote_average,
        vote_count,
        popularity: 12.0,
    }
}

async fn response_json(body: Body) -> Value {
    let bytes = body.collect().await.expect("read body").to_bytes();
    serde_json::from_slice(&bytes).expect("parse JSON body")
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    (status, response_json(response.into_body()).await)
}

async fn get_with_token(app: &Router, uri: &str, token: &str) -> (StatusCode, Value) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header("Authorization", format!("Token {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    (status, response_json(response.into_body()).await)
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Token {token}"));
    }
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    (status, response_json(response.into_body()).await)
}

async fn register_user(app: &Router, username: &str) -> String {
    let (status, body) = send(
        app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "username": username,
            "email": format!("{username}@example.com"),
            "password": "long enough password",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    body["token"].as_str().expect("token in register response").to_string()
}

#[tokio::test]
async fn movie_list_supports_filters() {
    let (app, store, _db_file) = test_app().await;

    let (a, _) = store.upsert_movie(&movie(1, "Alpha", 8.2, 900)).await.unwrap();
    let (b, _) = store.upsert_movie(&movie(2, "Beta", 6.1, 150)).await.unwrap();
    let action = store.upsert_genre(28, "Action").await.unwrap();
    store.replace_movie_genres(a, &[action]).await.unwrap();
    store.replace_movie_genres(b, &[]).await.unwrap();

    let (status, body) = get(&app, "/api/movies").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(2));
    assert_eq!(body["results"][0]["title"], json!("Alpha"));
    assert_eq!(
        body["results"][0]["poster_url"],
        json!("https://image.tmdb.org/t/p/w500/poster-1.jpg")
    );

    let (status, body) = get(&app, &format!("/api/movies?genre={action}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["results"][0]["title"], json!("Alpha"));
    assert_eq!(body["results"][0]["genres"], json!(["Action"]));
}

#[tokio::test]
async fn reordered_query_parameters_hit_the_same_cache_entry() {
    let (app, store, _db_file) = test_app().await;

    let (id, _) = store.upsert_movie(&movie(1, "Original title", 7.0, 100)).await.unwrap();
    let genre = store.upsert_genre(28, "Action").await.unwrap();
    store.replace_movie_genres(id, &[genre]).await.unwrap();

    let (status, first) = get(&app, &format!("/api/movies?genre={genre}&page=1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["results"][0]["title"], json!("Original title"));

    // The row changes underneath, but the reordered request must resolve to
    // the same key and serve the cached payload.
    store.upsert_movie(&movie(1, "Renamed title", 7.0, 100)).await.unwrap();

    let (status, second) = get(&app, &format!("/api/movies?page=1&genre={genre}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second, first);
}

#[tokio::test]
async fn movie_detail_includes_genres_and_missing_rows_are_404() {
    let (app, store, _db_file) = test_app().await;

    let (id, _) = store.upsert_movie(&movie(42, "The Answer", 7.9, 400)).await.unwrap();
    let drama = store.upsert_genre(18, "Drama").await.unwrap();
    store.replace_movie_genres(id, &[drama]).await.unwrap();

    let (status, body) = get(&app, &format!("/api/movies/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tmdb_id"], json!(42));
    assert_eq!(body["genres"][0]["name"], json!("Drama"));

    let (status, body) = get(&app, "/api/movies/999999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("movie not found"));
}

#[tokio::test]
async fn search_filters_by_text_and_year() {
    let (app, store, _db_file) = test_app().await;

    store.upsert_movie(&movie(1, "Space Odyssey", 8.0, 500)).await.unwrap();
    let mut older = movie(2, "Garden Story", 7.0, 300);
    older.release_date = Some("1999-03-01".to_string());
    store.upsert_movie(&older).await.unwrap();

    let (status, body) = get(&app, "/api/movies/search?q=space").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["results"][0]["title"], json!("Space Odyssey"));

    let (status, body) = get(&app, "/api/movies/search?year=1999").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["count"], json!(1));
    assert_eq!(body["results"][0]["title"], json!("Garden Story"));
}

#[tokio::test]
async fn trending_serves_the_latest_snapshot_in_rank_order() {
    let (app, store, _db_file) = test_app().await;

    let (first, _) = store.upsert_movie(&movie(1, "First", 7.0, 100)).await.unwrap();
    let (second, _) = store.upsert_movie(&movie(2, "Second", 6.0, 90)).await.unwrap();
    store
        .replace_trending_snapshot(TrendingPeriod::Day, "2026-08-06", &[second, first])
        .await
        .unwrap();

    let (status, body) = get(&app, "/api/movies/trending/day").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["title"], json!("Second"));
    assert_eq!(body[1]["title"], json!("First"));

    let (status, _) = get(&app, "/api/movies/trending/month").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn favorites_require_authentication() {
    let (app, store, _db_file) = test_app().await;
    store.upsert_movie(&movie(1, "Movie", 7.0, 100)).await.unwrap();

    let (status, _) = get(&app, "/api/favorites").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, "POST", "/api/favorites/1", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn favorites_flow_round_trips() {
    let (app, store, _db_file) = test_app().await;

    let (movie_id, _) = store.upsert_movie(&movie(1, "Favorite me", 7.0, 100)).await.unwrap();
    let token = register_user(&app, "alice").await;

    let uri = format!("/api/favorites/{movie_id}");
    let (status, _) = send(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(&app, "POST", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], json!("movie already in favorites"));

    let (status, body) = get_with_token(&app, "/api/favorites", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["title"], json!("Favorite me"));

    let (status, _) = send(&app, "DELETE", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(&app, "DELETE", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], json!("movie not in favorites"));

    let (status, _) = send(&app, "POST", "/api/favorites/424242", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn registration_validates_input() {
    let (app, _store, _db_file) = test_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "username": "bob", "email": "bob@example.com", "password": "short" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("password must be at least 8 characters"));

    register_user(&app, "bob").await;
    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({
            "username": "bob",
            "email": "other@example.com",
            "password": "long enough password",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], json!("username already taken"));
}

#[tokio::test]
async fn login_and_logout_manage_tokens() {
    let (app, _store, _db_file) = test_app().await;
    register_user(&app, "carol").await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "username": "carol", "password": "wrong password!" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "username": "carol", "password": "long enough password" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = get_with_token(&app, "/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["username"], json!("carol"));

    let (status, _) = send(&app, "POST", "/api/auth/logout", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get_with_token(&app, "/api/auth/me", &token).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn genre_listing_reports_movie_counts() {
    let (app, store, _db_file) = test_app().await;

    let (a, _) = store.upsert_movie(&movie(1, "Alpha", 7.0, 100)).await.unwrap();
    let (b, _) = store.upsert_movie(&movie(2, "Beta", 6.5, 80)).await.unwrap();
    let action = store.upsert_genre(28, "Action").await.unwrap();
    let drama = store.upsert_genre(18, "Drama").await.unwrap();
    store.replace_movie_genres(a, &[action, drama]).await.unwrap();
    store.replace_movie_genres(b, &[action]).await.unwrap();

    let (status, body) = get(&app, "/api/genres").await;
    assert_eq!(status, StatusCode::OK);
    let genres = body.as_array().unwrap();
    assert_eq!(genres.len(), 2);
    // Ordered by name: Action first.
    assert_eq!(genres[0]["name"], json!("Action"));
    assert_eq!(genres[0]["movie_count"], json!(2));
    assert_eq!(genres[1]["movie_count"], json!(1));

    let (status, body) = get(&app, &format!("/api/genres/{drama}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], json!("Drama"));
    assert_eq!(body["movie_count"], json!(1));
}
