pub mod api_cache;
pub mod auth_token;
pub mod favorite_movie;
pub mod genre;
pub mod movie;
pub mod movie_genre;
pub mod trending_movie;
pub mod user;
