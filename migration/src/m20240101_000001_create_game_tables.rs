use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Games::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Games::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Games::Code).string().not_null().unique_key())
                    .col(ColumnDef::new(Games::HostId).uuid().not_null())
                    .col(
                        ColumnDef::new(Games::Status)
                            .string()
                            .not_null()
                            .default("waiting"),
                    )
                    .col(ColumnDef::new(Games::MaxPlayers).integer().not_null())
                    .col(ColumnDef::new(Games::RoundTimeLimitMs).big_integer().not_null())
                    .col(ColumnDef::new(Games::TotalRounds).integer().not_null())
                    .col(ColumnDef::new(Games::CityDifficulty).string().not_null())
                    .col(ColumnDef::new(Games::FinalResults).text().null())
                    .col(ColumnDef::new(Games::CreatedAt).big_integer().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Players::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Players::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Players::GameId).uuid().not_null())
                    .col(ColumnDef::new(Players::Seat).integer().not_null())
                    .col(ColumnDef::new(Players::Name).string().not_null())
                    .col(
                        ColumnDef::new(Players::IsComputer)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Players::Accuracy).double().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_players_game")
                            .from(Players::Table, Players::GameId)
                            .to(Games::Table, Games::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_players_game_seat")
                    .table(Players::Table)
                    .col(Players::GameId)
                    .col(Players::Seat)
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Rounds::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Rounds::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Rounds::GameId).uuid().not_null())
                    .col(ColumnDef::new(Rounds::RoundNumber).integer().not_null())
                    .col(ColumnDef::new(Rounds::CityName).string().not_null())
                    .col(ColumnDef::new(Rounds::CityCountry).string().not_null())
                    .col(ColumnDef::new(Rounds::CityLat).double().not_null())
                    .col(ColumnDef::new(Rounds::CityLng).double().not_null())
                    .col(ColumnDef::new(Rounds::CityDifficulty).string().not_null())
                    .col(
                        ColumnDef::new(Rounds::Completed)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Rounds::StartTime).big_integer().not_null())
                    .col(ColumnDef::new(Rounds::EndTime).big_integer().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_rounds_game")
                            .from(Rounds::Table, Rounds::GameId)
                            .to(Games::Table, Games::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_rounds_game_number")
                    .table(Rounds::Table)
                    .col(Rounds::GameId)
                    .col(Rounds::RoundNumber)
                    .unique()
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Guesses::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Guesses::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Guesses::RoundId).uuid().not_null())
                    .col(ColumnDef::new(Guesses::PlayerId).uuid().not_null())
                    .col(ColumnDef::new(Guesses::Lat).double().not_null())
                    .col(ColumnDef::new(Guesses::Lng).double().not_null())
                    .col(ColumnDef::new(Guesses::Distance).double().not_null())
                    .col(
                        ColumnDef::new(Guesses::PlacementPoints)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Guesses::BonusPoints)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Guesses::TotalPoints)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Guesses::Placement)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Guesses::Timestamp).big_integer().not_null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_guesses_round")
                            .from(Guesses::Table, Guesses::RoundId)
                            .to(Rounds::Table, Rounds::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        // One guess per player per round
        manager
            .create_index(
                Index::create()
                    .name("idx_guesses_round_player")
                    .table(Guesses::Table)
                    .col(Guesses::RoundId)
                    .col(Guesses::PlayerId)
                    .unique()
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Guesses::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Rounds::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Players::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Games::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
enum Games {
    Table,
    Id,
    Code,
    HostId,
    Status,
    MaxPlayers,
    RoundTimeLimitMs,
    TotalRounds,
    CityDifficulty,
    FinalResults,
    CreatedAt,
}

#[derive(DeriveIden)]
enum Players {
    Table,
    Id,
    GameId,
    Seat,
    Name,
    IsComputer,
    Accuracy,
}

#[derive(DeriveIden)]
enum Rounds {
    Table,
    Id,
    GameId,
    RoundNumber,
    CityName,
    CityCountry,
    CityLat,
    CityLng,
    CityDifficulty,
    Completed,
    StartTime,
    EndTime,
}

#[derive(DeriveIden)]
enum Guesses {
    Table,
    Id,
    RoundId,
    PlayerId,
    Lat,
    Lng,
    Distance,
    PlacementPoints,
    BonusPoints,
    TotalPoints,
    Placement,
    Timestamp,
}
