use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Users::Table)
                    .if_not_exists()
                    .col(pk_auto(Users::Id))
                    .col(string(Users::Username))
                    .col(string(Users::Email))
                    .col(string(Users::PasswordHash))
                    .col(big_integer(Users::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_users_username")
                    .table(Users::Table)
                    .col(Users::Username)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AuthTokens::Table)
                    .if_not_exists()
                    .col(string(AuthTokens::TokenKey).primary_key())
                    .col(integer(AuthTokens::UserId))
                    .col(big_integer(AuthTokens::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_auth_tokens_user_id")
                    .table(AuthTokens::Table)
                    .col(AuthTokens::UserId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(FavoriteMovies::Table)
                    .if_not_exists()
                    .col(pk_auto(FavoriteMovies::Id))
                    .col(integer(FavoriteMovies::UserId))
                    .col(integer(FavoriteMovies::MovieId))
                    .col(big_integer(FavoriteMovies::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_favorite_movies_unique")
                    .table(FavoriteMovies::Table)
                    .col(FavoriteMovies::UserId)
                    .col(FavoriteMovies::MovieId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_favorite_movies_user_id")
                    .table(FavoriteMovies::Table)
                    .col(FavoriteMovies::UserId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager.drop_table(Table::drop().table(FavoriteMovies::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(AuthTokens::Table).to_owned()).await?;
        manager.drop_table(Table::drop().table(Users::Table).to_owned()).await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Users {
    Table,
    Id,
    Username,
    Email,
    PasswordHash,
    CreatedAt,
}

#[derive(DeriveIden)]
enum AuthTokens {
    Table,
    TokenKey,
    UserId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum FavoriteMovies {
    Table,
    Id,
    UserId,
    MovieId,
    CreatedAt,
}
