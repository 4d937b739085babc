use std::{
    collections::{BTreeMap, HashMap, HashSet},
    time::Duration,
};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    error::AppResult,
    store::{CatalogStore, MovieRecord, UpsertOutcome},
    tmdb::{Category, MoviePage, MovieSource, RawMovie, TmdbError},
};

#[derive(Clone, Debug)]
pub struct SyncOptions {
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub max_page_retries: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            retry_base_delay: Duration::from_millis(500),
            retry_max_delay: Duration::from_secs(8),
            max_page_retries: 3,
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct SyncSummary {
    pub created: u64,
    pub updated: u64,
    pub skipped: u64,
    pub category_errors: BTreeMap<String, Vec<CategoryError>>,
}

#[derive(Debug, Serialize)]
pub struct CategoryError {
    pub page: Option<u32>,
    pub message: String,
    pub fatal: bool,
}

impl SyncSummary {
    /// True when some category could not be synced at all. Page and item
    /// level skips do not count.
    pub fn has_fatal_errors(&self) -> bool {
        self.category_errors.values().flatten().any(|e| e.fatal)
    }

    fn record(&mut self, category: &str, page: Option<u32>, err: &TmdbError, fatal: bool) {
        self.category_errors.entry(category.to_string()).or_default().push(CategoryError {
            page,
            message: err.to_string(),
            fatal,
        });
    }
}

/// Walks the fixed category list, reconciles every upstream page into the
/// store, and reports what happened. Partial failures are absorbed into the
/// summary; only store failures abort the run.
pub struct SyncJob<S> {
    store: CatalogStore,
    source: S,
    opts: SyncOptions,
}

impl<S: MovieSource> SyncJob<S> {
    pub fn new(store: CatalogStore, source: S, opts: SyncOptions) -> Self {
        Self { store, source, opts }
    }

    pub async fn run(&self, pages_per_category: u32) -> AppResult<SyncSummary> {
        let pages_per_category = pages_per_category.max(1);
        let snapshot_date = jiff::Zoned::now().date().to_string();
        let mut summary = SyncSummary::default();

        let genre_names = match self.source.fetch_genre_index().await {
            Ok(index) => {
                debug!(genres = index.len(), "fetched genre index");
                index
            },
            Err(err) => {
                warn!(error = %err, "genre index unavailable, using placeholder names");
                HashMap::new()
            },
        };
        let mut genre_ids: HashMap<i32, i32> = HashMap::new();

        for category in Category::ALL {
            self.sync_category(
                category,
                pages_per_category,
                &genre_names,
                &mut genre_ids,
                &snapshot_date,
                &mut summary,
            )
            .await?;
        }

        info!(
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            "sync finished"
        );
        Ok(summary)
    }

    async fn sync_category(
        &self,
        category: Category,
        pages: u32,
        genre_names: &HashMap<i32, String>,
        genre_ids: &mut HashMap<i32, i32>,
        snapshot_date: &str,
        summary: &mut SyncSummary,
    ) -> AppResult<()> {
        let label = category.slug();
        debug!(category = label, pages, "syncing category");

        let trending = category.trending_period();
        let mut ranked: Vec<i32> = Vec::new();
        let mut seen: HashSet<i32> = HashSet::new();

        for page in 1..=pages {
            let movie_page = match self.fetch_page(category, page).await {
                Ok(p) => p,
                Err(err) => {
                    let fatal = matches!(err, TmdbError::NotFound(_));
                    warn!(category = label, page, error = %err, fatal, "page fetch failed");
                    summary.record(label, Some(page), &err, fatal);
                    if fatal {
                        break;
                    }
                    continue;
                },
            };

            for item in &movie_page.items {
                match self.reconcile_item(item, genre_names, genre_ids).await? {
                    None => summary.skipped += 1,
                    Some((movie_id, outcome)) => {
                        match outcome {
                            UpsertOutcome::Created => summary.created += 1,
                            UpsertOutcome::Updated => summary.updated += 1,
                        }
                        if trending.is_some() && seen.insert(movie_id) {
                            ranked.push(movie_id);
                        }
                    },
                }
            }

            if page >= movie_page.total_pages {
                break;
            }
        }

        if let Some(period) = trending {
            // Nothing reconciled means nothing to rank; the previous
            // snapshot stays the latest served.
            if !ranked.is_empty() {
                self.store.replace_trending_snapshot(period, snapshot_date, &ranked).await?;
                debug!(category = label, entries = ranked.len(), "recorded trending snapshot");
            }
        }

        Ok(())
    }

    /// One page fetch with the retry policy: a transient failure is retried
    /// once immediately, then rate-limit and transient failures back off
    /// with doubling delays up to the retry budget.
    async fn fetch_page(&self, category: Category, page: u32) -> Result<MoviePage, TmdbError> {
        let first = match self.source.fetch_category_page(category, page).await {
            Ok(p) => return Ok(p),
            Err(TmdbError::Transient(reason)) => {
                debug!(category = category.slug(), page, %reason, "transient failure, retrying");
                match self.source.fetch_category_page(category, page).await {
                    Ok(p) => return Ok(p),
                    Err(err) => err,
                }
            },
            Err(err) => err,
        };

        let mut last = first;
        let mut delay = self.opts.retry_base_delay;
        for attempt in 1..=self.opts.max_page_retries {
            if !matches!(last, TmdbError::RateLimited | TmdbError::Transient(_)) {
                break;
            }
            debug!(category = category.slug(), page, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.opts.retry_max_delay);

            match self.source.fetch_category_page(category, page).await {
                Ok(p) => return Ok(p),
                Err(err) => last = err,
            }
        }
        Err(last)
    }

    async fn reconcile_item(
        &self,
        item: &serde_json::Value,
        genre_names: &HashMap<i32, String>,
        genre_ids: &mut HashMap<i32, i32>,
    ) -> AppResult<Option<(i32, UpsertOutcome)>> {
        let raw: RawMovie = match serde_json::from_value(item.clone()) {
            Ok(raw) => raw,
            Err(err) => {
                debug!(error = %err, "skipping undecodable item");
                return Ok(None);
            },
        };

        let record = match canonical_record(&raw) {
            Ok(record) => record,
            Err(reason) => {
                debug!(tmdb_id = raw.id, reason, "skipping invalid item");
                return Ok(None);
            },
        };

        let (movie_id, outcome) = self.store.upsert_movie(&record).await?;

        let mut local_genres = Vec::with_capacity(raw.genre_ids.len());
        for tmdb_genre_id in &raw.genre_ids {
            let local = match genre_ids.get(tmdb_genre_id) {
                Some(id) => *id,
                None => {
                    let name = genre_names
                        .get(tmdb_genre_id)
                        .cloned()
                        .unwrap_or_else(|| tmdb_genre_id.to_string());
                    let id = self.store.upsert_genre(*tmdb_genre_id, &name).await?;
                    genre_ids.insert(*tmdb_genre_id, id);
                    id
                },
            };
            local_genres.push(local);
        }
        self.store.replace_movie_genres(movie_id, &local_genres).await?;

        Ok(Some((movie_id, outcome)))
    }
}

fn canonical_record(raw: &RawMovie) -> Result<MovieRecord, &'static str> {
    if !raw.vote_average.is_finite() || !(0.0..=10.0).contains(&raw.vote_average) {
        return Err("vote_average out of range");
    }
    if !raw.popularity.is_finite() || raw.popularity < 0.0 {
        return Err("popularity out of range");
    }
    if raw.vote_count < 0 {
        return Err("negative vote_count");
    }

    let release_date = raw
        .release_date
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    Ok(MovieRecord {
        tmdb_id: raw.id,
        title: raw.title.clone(),
        overview: raw.overview.clone(),
        release_date,
        poster_path: raw.poster_path.clone(),
        backdrop_path: raw.backdrop_path.clone(),
        vote_average: raw.vote_average,
        vote_count: raw.vote_count,
        popularity: raw.popularity,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
    use serde_json::json;

    use super::*;
    use crate::{
        entities::trending_movie,
        testing::{MockMovieSource, raw_movie, temp_store},
    };

    fn fast_opts() -> SyncOptions {
        SyncOptions {
            retry_base_delay: Duration::from_millis(1),
            retry_max_delay: Duration::from_millis(4),
            max_page_retries: 3,
        }
    }

    async fn job_with(
        source: Arc<MockMovieSource>,
    ) -> (SyncJob<Arc<MockMovieSource>>, CatalogStore, tempfile::NamedTempFile) {
        let (store, file) = temp_store().await;
        (SyncJob::new(store.clone(), source, fast_opts()), store, file)
    }

    #[tokio::test]
    async fn repeat_run_creates_nothing_new() {
        let source = Arc::new(MockMovieSource::new());
        source.set_genre(28, "Action");
        source.set_genre(12, "Adventure");
        source.push_page(
            Category::Popular,
            1,
            Ok(MockMovieSource::page_of(vec![raw_movie(1, "One"), raw_movie(2, "Two")], 1)),
        );

        let (job, store, _db_file) = job_with(source).await;

        let first = job.run(1).await.unwrap();
        assert_eq!(first.created, 2);
        assert_eq!(first.updated, 0);

        let second = job.run(1).await.unwrap();
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 2);
        assert_eq!(store.movie_count().await.unwrap(), 2);

        let movie = store.find_movie_by_tmdb_id(1).await.unwrap().unwrap();
        let (_, genres) = store.movie_detail(movie.id).await.unwrap().unwrap();
        let mut names: Vec<String> = genres.iter().map(|g| g.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["Action".to_string(), "Adventure".to_string()]);
    }

    #[tokio::test]
    async fn removed_upstream_genre_is_removed_locally() {
        let source = Arc::new(MockMovieSource::new());
        source.set_genre(28, "Action");
        source.set_genre(12, "Adventure");

        let mut shrunk = raw_movie(1, "One");
        shrunk["genre_ids"] = json!([28]);
        source.push_page(
            Category::Popular,
            1,
            Ok(MockMovieSource::page_of(vec![raw_movie(1, "One")], 1)),
        );
        source.push_page(Category::Popular, 1, Ok(MockMovieSource::page_of(vec![shrunk], 1)));

        let (job, store, _db_file) = job_with(source).await;
        job.run(1).await.unwrap();
        job.run(1).await.unwrap();

        let movie = store.find_movie_by_tmdb_id(1).await.unwrap().unwrap();
        let (_, genres) = store.movie_detail(movie.id).await.unwrap().unwrap();
        assert_eq!(genres.len(), 1);
        assert_eq!(genres[0].name, "Action");
    }

    #[tokio::test]
    async fn malformed_item_is_skipped_without_failing_the_page() {
        let source = Arc::new(MockMovieSource::new());
        source.set_genre(28, "Action");
        source.set_genre(12, "Adventure");
        source.push_page(
            Category::Popular,
            1,
            Ok(MockMovieSource::page_of(
                vec![
                    raw_movie(1, "One"),
                    json!({ "title": "No id here" }),
                    raw_movie(2, "Two"),
                ],
                1,
            )),
        );

        let (job, store, _db_file) = job_with(source).await;
        let summary = job.run(1).await.unwrap();

        assert_eq!(summary.created, 2);
        assert_eq!(summary.skipped, 1);
        assert!(summary.category_errors.is_empty());
        assert!(!summary.has_fatal_errors());
        assert_eq!(store.movie_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn out_of_range_votes_are_skipped() {
        let source = Arc::new(MockMovieSource::new());
        let mut bad = raw_movie(3, "Impossible rating");
        bad["vote_average"] = json!(14.2);
        source
            .push_page(Category::Popular, 1, Ok(MockMovieSource::page_of(vec![bad], 1)));

        let (job, store, _db_file) = job_with(source).await;
        let summary = job.run(1).await.unwrap();

        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped, 1);
        assert_eq!(store.movie_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn rate_limited_page_is_retried_with_backoff() {
        let source = Arc::new(MockMovieSource::new());
        source.push_page(Category::Popular, 1, Err(TmdbError::RateLimited));
        source.push_page(Category::Popular, 1, Err(TmdbError::RateLimited));
        source.push_page(
            Category::Popular,
            1,
            Ok(MockMovieSource::page_of(vec![raw_movie(1, "One")], 1)),
        );

        let (job, store, _db_file) = job_with(source.clone()).await;
        let summary = job.run(1).await.unwrap();

        assert_eq!(summary.created, 1);
        assert!(summary.category_errors.is_empty());
        assert_eq!(store.movie_count().await.unwrap(), 1);
        assert_eq!(source.fetch_count(Category::Popular), 3);
    }

    #[tokio::test]
    async fn rate_limit_beyond_budget_is_recorded_and_run_continues() {
        let source = Arc::new(MockMovieSource::new());
        source.push_page(Category::Popular, 1, Err(TmdbError::RateLimited));
        source.push_page(
            Category::TopRated,
            1,
            Ok(MockMovieSource::page_of(vec![raw_movie(5, "Five")], 1)),
        );

        let (job, store, _db_file) = job_with(source.clone()).await;
        let summary = job.run(1).await.unwrap();

        assert_eq!(summary.created, 1);
        let errors = &summary.category_errors["popular"];
        assert_eq!(errors.len(), 1);
        assert!(!errors[0].fatal);
        assert!(!summary.has_fatal_errors());
        assert_eq!(store.movie_count().await.unwrap(), 1);
        // initial attempt + the full backoff budget
        assert_eq!(source.fetch_count(Category::Popular), 4);
    }

    #[tokio::test]
    async fn transient_failure_is_retried_immediately() {
        let source = Arc::new(MockMovieSource::new());
        source
            .push_page(Category::Popular, 1, Err(TmdbError::Transient("boom".to_string())));
        source.push_page(
            Category::Popular,
            1,
            Ok(MockMovieSource::page_of(vec![raw_movie(1, "One")], 1)),
        );

        let (job, _store, _db_file) = job_with(source.clone()).await;
        let summary = job.run(1).await.unwrap();

        assert_eq!(summary.created, 1);
        assert_eq!(source.fetch_count(Category::Popular), 2);
    }

    #[tokio::test]
    async fn not_found_aborts_the_category_but_not_the_run() {
        let source = Arc::new(MockMovieSource::new());
        source.push_page(
            Category::Popular,
            1,
            Err(TmdbError::NotFound("movie/popular: HTTP 404".to_string())),
        );
        source.push_page(
            Category::TopRated,
            1,
            Ok(MockMovieSource::page_of(vec![raw_movie(9, "Nine")], 1)),
        );

        let (job, store, _db_file) = job_with(source.clone()).await;
        let summary = job.run(2).await.unwrap();

        assert_eq!(summary.created, 1);
        assert!(summary.has_fatal_errors());
        assert!(summary.category_errors["popular"][0].fatal);
        assert_eq!(store.movie_count().await.unwrap(), 1);
        // no second page after a category-fatal error
        assert_eq!(source.fetch_count(Category::Popular), 1);
    }

    #[tokio::test]
    async fn trending_ranks_are_contiguous_and_deduplicated() {
        let source = Arc::new(MockMovieSource::new());
        source.push_page(
            Category::TrendingDay,
            1,
            Ok(MockMovieSource::page_of(
                vec![raw_movie(1, "One"), raw_movie(2, "Two"), raw_movie(1, "One")],
                1,
            )),
        );

        let (job, store, _db_file) = job_with(source).await;
        job.run(1).await.unwrap();

        let rows = trending_movie::Entity::find()
            .filter(trending_movie::Column::Period.eq("day"))
            .order_by_asc(trending_movie::Column::Rank)
            .all(store.db())
            .await
            .unwrap();
        let ranks: Vec<i32> = rows.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2]);

        let first = store.find_movie_by_tmdb_id(1).await.unwrap().unwrap();
        assert_eq!(rows[0].movie_id, first.id);
    }

    #[tokio::test]
    async fn trending_ranks_continue_across_pages() {
        let source = Arc::new(MockMovieSource::new());
        source.push_page(
            Category::TrendingWeek,
            1,
            Ok(MockMovieSource::page_of(vec![raw_movie(1, "One"), raw_movie(2, "Two")], 2)),
        );
        source.push_page(
            Category::TrendingWeek,
            2,
            Ok(MockMovieSource::page_of(vec![raw_movie(3, "Three")], 2)),
        );

        let (job, store, _db_file) = job_with(source).await;
        job.run(2).await.unwrap();

        let rows = trending_movie::Entity::find()
            .filter(trending_movie::Column::Period.eq("week"))
            .order_by_asc(trending_movie::Column::Rank)
            .all(store.db())
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows.iter().map(|r| r.rank).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn paging_stops_at_total_pages() {
        let source = Arc::new(MockMovieSource::new());
        source.push_page(
            Category::Popular,
            1,
            Ok(MockMovieSource::page_of(vec![raw_movie(1, "One")], 1)),
        );

        let (job, _store, _db_file) = job_with(source.clone()).await;
        job.run(5).await.unwrap();

        assert_eq!(source.fetch_count(Category::Popular), 1);
    }

    #[tokio::test]
    async fn missing_genre_index_falls_back_to_placeholder_names() {
        let source = Arc::new(MockMovieSource::new());
        source.fail_genre_index(TmdbError::Transient("offline".to_string()));
        source.push_page(
            Category::Popular,
            1,
            Ok(MockMovieSource::page_of(vec![raw_movie(1, "One")], 1)),
        );

        let (job, store, _db_file) = job_with(source).await;
        let summary = job.run(1).await.unwrap();
        assert_eq!(summary.created, 1);

        let movie = store.find_movie_by_tmdb_id(1).await.unwrap().unwrap();
        let (_, genres) = store.movie_detail(movie.id).await.unwrap().unwrap();
        let mut names: Vec<String> = genres.iter().map(|g| g.name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["12".to_string(), "28".to_string()]);
    }
}
