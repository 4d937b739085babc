use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Movies::Table)
                    .if_not_exists()
                    .col(pk_auto(Movies::Id))
                    .col(integer(Movies::TmdbId))
                    .col(string(Movies::Title))
                    .col(text(Movies::Overview))
                    .col(string_null(Movies::ReleaseDate))
                    .col(string_null(Movies::PosterPath))
                    .col(string_null(Movies::BackdropPath))
                    .col(double(Movies::VoteAverage))
                    .col(integer(Movies::VoteCount))
                    .col(double(Movies::Popularity))
                    .col(big_integer(Movies::CreatedAt))
                    .col(big_integer(Movies::UpdatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movies_tmdb_id")
                    .table(Movies::Table)
                    .col(Movies::TmdbId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movies_release_date")
                    .table(Movies::Table)
                    .col(Movies::ReleaseDate)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movies_vote_average")
                    .table(Movies::Table)
                    .col(Movies::VoteAverage)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Genres::Table)
                    .if_not_exists()
                    .col(pk_auto(Genres::Id))
                    .col(integer(Genres::TmdbId))
                    .col(string(Genres::Name))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_genres_tmdb_id")
                    .table(Genres::Table)
                    .col(Genres::TmdbId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(MovieGenres::Table)
                    .if_not_exists()
                    .col(pk_auto(MovieGenres::Id))
                    .col(integer(MovieGenres::MovieId))
                    .col(integer(MovieGenres::GenreId))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movie_genres_unique")
                    .table(MovieGenres::Table)
                    .col(MovieGenres::MovieId)
                    .col(MovieGenres::GenreId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_movie_genres_genre_id")
                    .table(MovieGenres::Table)
                    .col(MovieGenres::GenreId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(TrendingMovies::Table)
                    .if_not_exists()
                    .col(pk_auto(TrendingMovies::Id))
                    .col(integer(TrendingMovies::MovieId))
                    .col(string(TrendingMovies::Period))
                    .col(string(TrendingMovies::SnapshotDate))
                    .col(integer(TrendingMovies::Rank))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trending_movies_unique_rank")
                    .table(TrendingMovies::Table)
                    .col(TrendingMovies::Period)
                    .col(TrendingMovies::SnapshotDate)
                    .col(TrendingMovies::Rank)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trending_movies_period_date")
                    .table(TrendingMovies::Table)
                    .col(TrendingMovies::Period)
                    .col(TrendingMovies::SnapshotDate)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(TrendingMovies::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(MovieGenres::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Genres::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Movies::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Movies {
    Table,
    Id,
    TmdbId,
    Title,
    Overview,
    ReleaseDate,
    PosterPath,
    BackdropPath,
    VoteAverage,
    VoteCount,
    Popularity,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Genres {
    Table,
    Id,
    TmdbId,
    Name,
}

#[derive(DeriveIden)]
enum MovieGenres {
    Table,
    Id,
    MovieId,
    GenreId,
}

#[derive(DeriveIden)]
enum TrendingMovies {
    Table,
    Id,
    MovieId,
    Period,
    SnapshotDate,
    Rank,
}
