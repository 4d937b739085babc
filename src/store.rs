use std::collections::{HashMap, HashSet};

use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, FromQueryResult,
    JoinType, LoaderTrait, PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, RelationTrait,
    Select, Set, TransactionTrait,
    sea_query::OnConflict,
};

use crate::{
    entities::{auth_token, favorite_movie, genre, movie, movie_genre, trending_movie, user},
    error::{AppError, AppResult},
    models::TrendingPeriod,
};

/// A movie row with its genre rows attached.
pub type MovieRow = (movie::Model, Vec<genre::Model>);

#[derive(Clone, Debug)]
pub struct MovieRecord {
    pub tmdb_id: i32,
    pub title: String,
    pub overview: String,
    pub release_date: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    pub vote_average: f64,
    pub vote_count: i32,
    pub popularity: f64,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

#[derive(Clone, Debug, Default)]
pub struct MovieQuery {
    pub search: Option<String>,
    pub genre: Option<i32>,
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
    pub year: Option<i32>,
    pub ordering: Option<String>,
    pub page: u64,
    pub page_size: u64,
}

#[derive(Clone, Debug, Default)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub genre: Option<i32>,
    pub min_rating: Option<f64>,
    pub year: Option<i32>,
}

#[derive(Clone)]
pub struct CatalogStore {
    db: DatabaseConnection,
}

impl CatalogStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }

    pub async fn movie_count(&self) -> AppResult<u64> {
        Ok(movie::Entity::find().count(&self.db).await?)
    }

    /// Create-or-update keyed by the upstream id. The upstream id itself is
    /// never rewritten once a row exists.
    pub async fn upsert_movie(&self, rec: &MovieRecord) -> AppResult<(i32, UpsertOutcome)> {
        let now = now_sec();

        match movie::Entity::find()
            .filter(movie::Column::TmdbId.eq(rec.tmdb_id))
            .one(&self.db)
            .await?
        {
            Some(existing) => {
                let id = existing.id;
                let mut active: movie::ActiveModel = existing.into();
                active.title = Set(rec.title.clone());
                active.overview = Set(rec.overview.clone());
                active.release_date = Set(rec.release_date.clone());
                active.poster_path = Set(rec.poster_path.clone());
                active.backdrop_path = Set(rec.backdrop_path.clone());
                active.vote_average = Set(rec.vote_average);
                active.vote_count = Set(rec.vote_count);
                active.popularity = Set(rec.popularity);
                active.updated_at = Set(now);
                active.update(&self.db).await?;
                Ok((id, UpsertOutcome::Updated))
            },
            None => {
                let model = movie::ActiveModel {
                    id: Default::default(),
                    tmdb_id: Set(rec.tmdb_id),
                    title: Set(rec.title.clone()),
                    overview: Set(rec.overview.clone()),
                    release_date: Set(rec.release_date.clone()),
                    poster_path: Set(rec.poster_path.clone()),
                    backdrop_path: Set(rec.backdrop_path.clone()),
                    vote_average: Set(rec.vote_average),
                    vote_count: Set(rec.vote_count),
                    popularity: Set(rec.popularity),
                    created_at: Set(now),
                    updated_at: Set(now),
                };
                let inserted = model.insert(&self.db).await?;
                Ok((inserted.id, UpsertOutcome::Created))
            },
        }
    }

    pub async fn upsert_genre(&self, tmdb_id: i32, name: &str) -> AppResult<i32> {
        let model = genre::ActiveModel {
            id: Default::default(),
            tmdb_id: Set(tmdb_id),
            name: Set(name.to_string()),
        };

        genre::Entity::insert(model)
            .on_conflict(
                OnConflict::column(genre::Column::TmdbId)
                    .update_column(genre::Column::Name)
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;

        let row = genre::Entity::find()
            .filter(genre::Column::TmdbId.eq(tmdb_id))
            .one(&self.db)
            .await?;
        row.map(|g| g.id)
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("genre row missing after upsert")))
    }

    /// Make the association set equal to `genre_ids`: stale rows are removed,
    /// missing rows are added, all within one transaction.
    pub async fn replace_movie_genres(&self, movie_id: i32, genre_ids: &[i32]) -> AppResult<()> {
        let desired: HashSet<i32> = genre_ids.iter().copied().collect();

        let txn = self.db.begin().await?;

        let existing = movie_genre::Entity::find()
            .filter(movie_genre::Column::MovieId.eq(movie_id))
            .all(&txn)
            .await?;
        let current: HashSet<i32> = existing.iter().map(|row| row.genre_id).collect();

        for row in &existing {
            if !desired.contains(&row.genre_id) {
                movie_genre::Entity::delete_by_id(row.id).exec(&txn).await?;
            }
        }

        for genre_id in desired.difference(&current) {
            let model = movie_genre::ActiveModel {
                id: Default::default(),
                movie_id: Set(movie_id),
                genre_id: Set(*genre_id),
            };
            movie_genre::Entity::insert(model).exec(&txn).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    /// Replace the snapshot for one (period, date). Ranks are assigned from
    /// the caller's ordering, so they always form 1..=N.
    pub async fn replace_trending_snapshot(
        &self,
        period: TrendingPeriod,
        snapshot_date: &str,
        movie_ids: &[i32],
    ) -> AppResult<()> {
        let txn = self.db.begin().await?;

        trending_movie::Entity::delete_many()
            .filter(trending_movie::Column::Period.eq(period.as_str()))
            .filter(trending_movie::Column::SnapshotDate.eq(snapshot_date))
            .exec(&txn)
            .await?;

        for (idx, movie_id) in movie_ids.iter().enumerate() {
            let model = trending_movie::ActiveModel {
                id: Default::default(),
                movie_id: Set(*movie_id),
                period: Set(period.as_str().to_string()),
                snapshot_date: Set(snapshot_date.to_string()),
                rank: Set(idx as i32 + 1),
            };
            trending_movie::Entity::insert(model).exec(&txn).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    pub async fn find_movie_by_tmdb_id(&self, tmdb_id: i32) -> AppResult<Option<movie::Model>> {
        Ok(movie::Entity::find()
            .filter(movie::Column::TmdbId.eq(tmdb_id))
            .one(&self.db)
            .await?)
    }

    pub async fn movie_detail(&self, id: i32) -> AppResult<Option<MovieRow>> {
        let Some(found) = movie::Entity::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let mut rows = self.attach_genres(vec![found]).await?;
        Ok(rows.pop())
    }

    pub async fn list_movies(&self, q: &MovieQuery) -> AppResult<(u64, Vec<MovieRow>)> {
        let mut query = movie::Entity::find();

        if let Some(term) = q.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(
                Condition::any()
                    .add(movie::Column::Title.contains(term))
                    .add(movie::Column::Overview.contains(term)),
            );
        }
        if let Some(genre_id) = q.genre {
            query = query
                .join(JoinType::InnerJoin, movie::Relation::MovieGenre.def())
                .filter(movie_genre::Column::GenreId.eq(genre_id))
                .distinct();
        }
        if let Some(min) = q.min_rating {
            query = query.filter(movie::Column::VoteAverage.gte(min));
        }
        if let Some(max) = q.max_rating {
            query = query.filter(movie::Column::VoteAverage.lte(max));
        }
        if let Some(year) = q.year {
            query = query.filter(
                movie::Column::ReleaseDate
                    .between(format!("{year}-01-01"), format!("{year}-12-31")),
            );
        }

        query = apply_ordering(query, q.ordering.as_deref());

        let page_size = q.page_size.clamp(1, 100);
        let page = q.page.max(1);
        let paginator = query.paginate(&self.db, page_size);
        let count = paginator.num_items().await?;
        let movies = paginator.fetch_page(page - 1).await?;

        Ok((count, self.attach_genres(movies).await?))
    }

    pub async fn popular(&self) -> AppResult<Vec<MovieRow>> {
        let movies = movie::Entity::find()
            .filter(movie::Column::VoteCount.gte(100))
            .filter(movie::Column::VoteAverage.gte(6.0))
            .order_by_desc(movie::Column::VoteAverage)
            .order_by_desc(movie::Column::VoteCount)
            .limit(20)
            .all(&self.db)
            .await?;
        self.attach_genres(movies).await
    }

    pub async fn top_rated(&self) -> AppResult<Vec<MovieRow>> {
        let movies = movie::Entity::find()
            .filter(movie::Column::VoteCount.gte(50))
            .order_by_desc(movie::Column::VoteAverage)
            .order_by_desc(movie::Column::VoteCount)
            .limit(20)
            .all(&self.db)
            .await?;
        self.attach_genres(movies).await
    }

    pub async fn upcoming(&self) -> AppResult<Vec<MovieRow>> {
        let today = jiff::Zoned::now().date().to_string();
        let movies = movie::Entity::find()
            .filter(movie::Column::ReleaseDate.is_not_null())
            .filter(movie::Column::ReleaseDate.gte(today))
            .order_by_asc(movie::Column::ReleaseDate)
            .limit(20)
            .all(&self.db)
            .await?;
        self.attach_genres(movies).await
    }

    pub async fn now_playing(&self) -> AppResult<Vec<MovieRow>> {
        let today = jiff::Zoned::now().date();
        let cutoff = today - jiff::Span::new().days(180);
        let movies = movie::Entity::find()
            .filter(movie::Column::ReleaseDate.between(cutoff.to_string(), today.to_string()))
            .order_by_desc(movie::Column::ReleaseDate)
            .limit(20)
            .all(&self.db)
            .await?;
        self.attach_genres(movies).await
    }

    pub async fn recent(&self) -> AppResult<Vec<MovieRow>> {
        let movies = movie::Entity::find()
            .order_by_desc(movie::Column::CreatedAt)
            .order_by_desc(movie::Column::Id)
            .limit(20)
            .all(&self.db)
            .await?;
        self.attach_genres(movies).await
    }

    /// Movies from the most recent recorded snapshot for the period, in rank
    /// order. Empty when no snapshot has been recorded yet.
    pub async fn trending(&self, period: TrendingPeriod) -> AppResult<Vec<MovieRow>> {
        let latest = trending_movie::Entity::find()
            .filter(trending_movie::Column::Period.eq(period.as_str()))
            .order_by_desc(trending_movie::Column::SnapshotDate)
            .one(&self.db)
            .await?;
        let Some(latest) = latest else {
            return Ok(Vec::new());
        };

        let rows = trending_movie::Entity::find()
            .filter(trending_movie::Column::Period.eq(period.as_str()))
            .filter(trending_movie::Column::SnapshotDate.eq(latest.snapshot_date))
            .order_by_asc(trending_movie::Column::Rank)
            .find_also_related(movie::Entity)
            .all(&self.db)
            .await?;

        let movies: Vec<movie::Model> = rows.into_iter().filter_map(|(_, m)| m).collect();
        self.attach_genres(movies).await
    }

    pub async fn search(&self, q: &SearchQuery) -> AppResult<Vec<MovieRow>> {
        let mut query = movie::Entity::find();

        if let Some(term) = q.q.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            query = query.filter(
                Condition::any()
                    .add(movie::Column::Title.contains(term))
                    .add(movie::Column::Overview.contains(term)),
            );
        }
        if let Some(genre_id) = q.genre {
            query = query
                .join(JoinType::InnerJoin, movie::Relation::MovieGenre.def())
                .filter(movie_genre::Column::GenreId.eq(genre_id))
                .distinct();
        }
        if let Some(min) = q.min_rating {
            query = query.filter(movie::Column::VoteAverage.gte(min));
        }
        if let Some(year) = q.year {
            query = query.filter(
                movie::Column::ReleaseDate
                    .between(format!("{year}-01-01"), format!("{year}-12-31")),
            );
        }

        let movies = query
            .order_by_desc(movie::Column::VoteAverage)
            .order_by_desc(movie::Column::VoteCount)
            .limit(50)
            .all(&self.db)
            .await?;
        self.attach_genres(movies).await
    }

    pub async fn genres_with_counts(&self) -> AppResult<Vec<(genre::Model, i64)>> {
        let genres =
            genre::Entity::find().order_by_asc(genre::Column::Name).all(&self.db).await?;

        let counts: Vec<GenreMovieCount> = movie_genre::Entity::find()
            .select_only()
            .column(movie_genre::Column::GenreId)
            .column_as(movie_genre::Column::Id.count(), "movie_count")
            .group_by(movie_genre::Column::GenreId)
            .into_model::<GenreMovieCount>()
            .all(&self.db)
            .await?;
        let by_genre: HashMap<i32, i64> =
            counts.into_iter().map(|c| (c.genre_id, c.movie_count)).collect();

        Ok(genres
            .into_iter()
            .map(|g| {
                let count = by_genre.get(&g.id).copied().unwrap_or(0);
                (g, count)
            })
            .collect())
    }

    pub async fn genre_with_count(&self, id: i32) -> AppResult<Option<(genre::Model, i64)>> {
        let Some(found) = genre::Entity::find_by_id(id).one(&self.db).await? else {
            return Ok(None);
        };
        let count = movie_genre::Entity::find()
            .filter(movie_genre::Column::GenreId.eq(id))
            .count(&self.db)
            .await?;
        Ok(Some((found, count as i64)))
    }

    pub async fn add_favorite(&self, user_id: i32, movie_id: i32) -> AppResult<()> {
        if movie::Entity::find_by_id(movie_id).one(&self.db).await?.is_none() {
            return Err(AppError::NotFound("movie"));
        }

        let existing = favorite_movie::Entity::find()
            .filter(favorite_movie::Column::UserId.eq(user_id))
            .filter(favorite_movie::Column::MovieId.eq(movie_id))
            .one(&self.db)
            .await?;
        if existing.is_some() {
            return Err(AppError::AlreadyFavorited);
        }

        let model = favorite_movie::ActiveModel {
            id: Default::default(),
            user_id: Set(user_id),
            movie_id: Set(movie_id),
            created_at: Set(now_sec()),
        };
        favorite_movie::Entity::insert(model).exec(&self.db).await?;
        Ok(())
    }

    pub async fn remove_favorite(&self, user_id: i32, movie_id: i32) -> AppResult<()> {
        let result = favorite_movie::Entity::delete_many()
            .filter(favorite_movie::Column::UserId.eq(user_id))
            .filter(favorite_movie::Column::MovieId.eq(movie_id))
            .exec(&self.db)
            .await?;
        if result.rows_affected == 0 {
            return Err(AppError::NotFavorited);
        }
        Ok(())
    }

    pub async fn list_favorites(&self, user_id: i32) -> AppResult<Vec<MovieRow>> {
        let rows = favorite_movie::Entity::find()
            .filter(favorite_movie::Column::UserId.eq(user_id))
            .order_by_desc(favorite_movie::Column::CreatedAt)
            .order_by_desc(favorite_movie::Column::Id)
            .find_also_related(movie::Entity)
            .all(&self.db)
            .await?;
        let movies: Vec<movie::Model> = rows.into_iter().filter_map(|(_, m)| m).collect();
        self.attach_genres(movies).await
    }

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: &str,
    ) -> AppResult<user::Model> {
        if self.find_user_by_username(username).await?.is_some() {
            return Err(AppError::Validation("username already taken".to_string()));
        }

        let model = user::ActiveModel {
            id: Default::default(),
            username: Set(username.to_string()),
            email: Set(email.to_string()),
            password_hash: Set(password_hash.to_string()),
            created_at: Set(now_sec()),
        };
        Ok(model.insert(&self.db).await?)
    }

    pub async fn find_user_by_username(&self, username: &str) -> AppResult<Option<user::Model>> {
        Ok(user::Entity::find()
            .filter(user::Column::Username.eq(username))
            .one(&self.db)
            .await?)
    }

    pub async fn create_token(&self, user_id: i32, key: &str) -> AppResult<()> {
        let model = auth_token::ActiveModel {
            token_key: Set(key.to_string()),
            user_id: Set(user_id),
            created_at: Set(now_sec()),
        };
        auth_token::Entity::insert(model).exec(&self.db).await?;
        Ok(())
    }

    pub async fn user_by_token(&self, key: &str) -> AppResult<Option<user::Model>> {
        let Some(token) = auth_token::Entity::find_by_id(key.to_string()).one(&self.db).await?
        else {
            return Ok(None);
        };
        Ok(user::Entity::find_by_id(token.user_id).one(&self.db).await?)
    }

    pub async fn delete_token(&self, key: &str) -> AppResult<()> {
        auth_token::Entity::delete_by_id(key.to_string()).exec(&self.db).await?;
        Ok(())
    }

    async fn attach_genres(&self, movies: Vec<movie::Model>) -> AppResult<Vec<MovieRow>> {
        let genres =
            movies.load_many_to_many(genre::Entity, movie_genre::Entity, &self.db).await?;
        Ok(movies.into_iter().zip(genres).collect())
    }
}

fn apply_ordering(
    mut query: Select<movie::Entity>,
    ordering: Option<&str>,
) -> Select<movie::Entity> {
    let requested = ordering.unwrap_or("-vote_average,-vote_count");
    let mut applied = false;

    for field in requested.split(',') {
        let field = field.trim();
        let (name, descending) = match field.strip_prefix('-') {
            Some(stripped) => (stripped, true),
            None => (field, false),
        };
        let column = match name {
            "release_date" => movie::Column::ReleaseDate,
            "vote_average" => movie::Column::VoteAverage,
            "vote_count" => movie::Column::VoteCount,
            "popularity" => movie::Column::Popularity,
            "created_at" => movie::Column::CreatedAt,
            _ => continue,
        };
        query = if descending { query.order_by_desc(column) } else { query.order_by_asc(column) };
        applied = true;
    }

    if applied {
        query
    } else {
        query
            .order_by_desc(movie::Column::VoteAverage)
            .order_by_desc(movie::Column::VoteCount)
    }
}

#[derive(Debug, FromQueryResult)]
struct GenreMovieCount {
    genre_id: i32,
    movie_count: i64,
}

pub(crate) fn now_sec() -> i64 {
    jiff::Timestamp::now().as_second()
}
