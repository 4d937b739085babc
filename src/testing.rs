//! Test doubles shared across the crate's test modules.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::tmdb::{Category, MoviePage, MovieSource, TmdbError};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecordedFetch {
    pub category: Category,
    pub page: u32,
}

/// Scriptable stand-in for the TMDb client. Each `(category, page)` holds a
/// queue of results; the last result is repeated once the queue drains, and
/// unscripted pages resolve to an empty page.
#[derive(Default)]
pub struct MockMovieSource {
    pages: Mutex<HashMap<(Category, u32), VecDeque<Result<MoviePage, TmdbError>>>>,
    genre_index: Mutex<HashMap<i32, String>>,
    genre_index_error: Mutex<Option<TmdbError>>,
    fetches: Mutex<Vec<RecordedFetch>>,
}

impl MockMovieSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_genre(&self, tmdb_id: i32, name: &str) {
        self.genre_index.lock().unwrap().insert(tmdb_id, name.to_string());
    }

    pub fn fail_genre_index(&self, err: TmdbError) {
        *self.genre_index_error.lock().unwrap() = Some(err);
    }

    pub fn push_page(&self, category: Category, page: u32, result: Result<MoviePage, TmdbError>) {
        self.pages.lock().unwrap().entry((category, page)).or_default().push_back(result);
    }

    pub fn page_of(items: Vec<Value>, total_pages: u32) -> MoviePage {
        MoviePage { items, total_pages }
    }

    pub fn fetch_count(&self, category: Category) -> usize {
        self.fetches.lock().unwrap().iter().filter(|f| f.category == category).count()
    }

    pub fn fetches(&self) -> Vec<RecordedFetch> {
        self.fetches.lock().unwrap().clone()
    }
}

#[async_trait]
impl MovieSource for MockMovieSource {
    async fn fetch_category_page(
        &self,
        category: Category,
        page: u32,
    ) -> Result<MoviePage, TmdbError> {
        self.fetches.lock().unwrap().push(RecordedFetch { category, page });

        let mut pages = self.pages.lock().unwrap();
        match pages.get_mut(&(category, page)) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) => queue.front().cloned().unwrap_or_else(|| Ok(MoviePage::default())),
            None => Ok(MoviePage::default()),
        }
    }

    async fn fetch_genre_index(&self) -> Result<HashMap<i32, String>, TmdbError> {
        if let Some(err) = self.genre_index_error.lock().unwrap().take() {
            return Err(err);
        }
        Ok(self.genre_index.lock().unwrap().clone())
    }
}

/// A well-formed upstream movie payload that tests can tweak field by field.
pub fn raw_movie(tmdb_id: i32, title: &str) -> Value {
    json!({
        "id": tmdb_id,
        "title": title,
        "overview": format!("Overview for {title}"),
        "release_date": "2024-06-01",
        "poster_path": format!("/poster-{tmdb_id}.jpg"),
        "backdrop_path": format!("/backdrop-{tmdb_id}.jpg"),
        "vote_average": 7.1,
        "vote_count": 321,
        "popularity": 48.5,
        "genre_ids": [28, 12]
    })
}

#[cfg(test)]
pub(crate) async fn temp_store() -> (crate::store::CatalogStore, tempfile::NamedTempFile) {
    let file = tempfile::NamedTempFile::new().expect("temp db file");
    let url = format!("sqlite://{}?mode=rwc", file.path().display());
    let db = crate::db::connect_and_migrate(&url).await.expect("connect test db");
    (crate::store::CatalogStore::new(db), file)
}
