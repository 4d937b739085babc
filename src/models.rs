use serde::Serialize;

use crate::entities::{genre, movie};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendingPeriod {
    Day,
    Week,
}

impl TrendingPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            TrendingPeriod::Day => "day",
            TrendingPeriod::Week => "week",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "day" => Some(TrendingPeriod::Day),
            "week" => Some(TrendingPeriod::Week),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GenreOut {
    pub id: i32,
    pub tmdb_id: i32,
    pub name: String,
    pub movie_count: i64,
}

impl GenreOut {
    pub fn from_parts(genre: &genre::Model, movie_count: i64) -> Self {
        Self { id: genre.id, tmdb_id: genre.tmdb_id, name: genre.name.clone(), movie_count }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct GenreRef {
    pub id: i32,
    pub tmdb_id: i32,
    pub name: String,
}

impl From<&genre::Model> for GenreRef {
    fn from(genre: &genre::Model) -> Self {
        Self { id: genre.id, tmdb_id: genre.tmdb_id, name: genre.name.clone() }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MovieSummary {
    pub id: i32,
    pub tmdb_id: i32,
    pub title: String,
    pub release_date: Option<String>,
    pub poster_url: Option<String>,
    pub vote_average: f64,
    pub vote_count: i32,
    pub genres: Vec<String>,
}

impl MovieSummary {
    pub fn new(movie: &movie::Model, genres: &[genre::Model], image_base: &str) -> Self {
        Self {
            id: movie.id,
            tmdb_id: movie.tmdb_id,
            title: movie.title.clone(),
            release_date: movie.release_date.clone(),
            poster_url: image_url(image_base, "w500", movie.poster_path.as_deref()),
            vote_average: movie.vote_average,
            vote_count: movie.vote_count,
            genres: genres.iter().map(|g| g.name.clone()).collect(),
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MovieDetail {
    pub id: i32,
    pub tmdb_id: i32,
    pub title: String,
    pub overview: String,
    pub release_date: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub poster_url: Option<String>,
    pub backdrop_url: Option<String>,
    pub vote_average: f64,
    pub vote_count: i32,
    pub popularity: f64,
    pub genres: Vec<GenreRef>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl MovieDetail {
    pub fn new(movie: &movie::Model, genres: &[genre::Model], image_base: &str) -> Self {
        Self {
            id: movie.id,
            tmdb_id: movie.tmdb_id,
            title: movie.title.clone(),
            overview: movie.overview.clone(),
            release_date: movie.release_date.clone(),
            poster_path: movie.poster_path.clone(),
            backdrop_path: movie.backdrop_path.clone(),
            poster_url: image_url(image_base, "w500", movie.poster_path.as_deref()),
            backdrop_url: image_url(image_base, "w1280", movie.backdrop_path.as_deref()),
            vote_average: movie.vote_average,
            vote_count: movie.vote_count,
            popularity: movie.popularity,
            genres: genres.iter().map(GenreRef::from).collect(),
            created_at: movie.created_at,
            updated_at: movie.updated_at,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Listing<T> {
    pub count: u64,
    pub page: u64,
    pub page_size: u64,
    pub results: Vec<T>,
}

pub fn image_url(base: &str, size: &str, path: Option<&str>) -> Option<String> {
    path.map(|p| format!("{}/{size}{p}", base.trim_end_matches('/')))
}
