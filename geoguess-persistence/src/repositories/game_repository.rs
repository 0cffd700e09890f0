use anyhow::{Result, anyhow};
use async_trait::async_trait;
use sea_orm::{
    ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, sea_query::Expr,
};
use std::collections::HashMap;
use uuid::Uuid;

use crate::GameStore;
use crate::entities::{games, guesses, players, prelude::*, rounds};
use geoguess_types::{
    City, CityDifficulty, FinalResults, Game, GameId, GameRound, GameSettings, GameStatus, Guess,
    Player, PlayerId, RoundId,
};

pub struct GameRepository {
    db: DatabaseConnection,
}

impl GameRepository {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    fn model_to_player(model: players::Model) -> Player {
        Player {
            id: model.id,
            name: model.name,
            is_computer: model.is_computer,
            score: 0,
            accuracy: model.accuracy,
        }
    }

    fn model_to_guess(model: guesses::Model) -> Guess {
        Guess {
            player_id: model.player_id,
            lat: model.lat,
            lng: model.lng,
            distance: model.distance,
            placement_points: model.placement_points,
            bonus_points: model.bonus_points,
            total_points: model.total_points,
            placement: model.placement.max(0) as u32,
            timestamp: model.timestamp,
        }
    }

    fn model_to_round(model: rounds::Model, guesses: Vec<Guess>) -> Result<GameRound> {
        let difficulty = CityDifficulty::parse(&model.city_difficulty)
            .ok_or_else(|| anyhow!("Unknown city difficulty {}", model.city_difficulty))?;

        Ok(GameRound {
            id: model.id,
            city: City {
                name: model.city_name,
                country: model.city_country,
                lat: model.city_lat,
                lng: model.city_lng,
                difficulty,
            },
            guesses,
            completed: model.completed,
            start_time: model.start_time,
            end_time: model.end_time,
        })
    }

    /// Assemble the full aggregate for a stored game row.
    async fn load_game(&self, model: games::Model) -> Result<Game> {
        let players = Players::find()
            .filter(players::Column::GameId.eq(model.id))
            .order_by_asc(players::Column::Seat)
            .all(&self.db)
            .await?
            .into_iter()
            .map(Self::model_to_player)
            .collect();

        let round_models = Rounds::find()
            .filter(rounds::Column::GameId.eq(model.id))
            .order_by_asc(rounds::Column::RoundNumber)
            .all(&self.db)
            .await?;

        let mut guesses_by_round: HashMap<Uuid, Vec<Guess>> = HashMap::new();
        if !round_models.is_empty() {
            let round_ids: Vec<Uuid> = round_models.iter().map(|r| r.id).collect();
            let guess_models = Guesses::find()
                .filter(guesses::Column::RoundId.is_in(round_ids))
                .order_by_asc(guesses::Column::Id)
                .all(&self.db)
                .await?;
            for guess in guess_models {
                guesses_by_round
                    .entry(guess.round_id)
                    .or_default()
                    .push(Self::model_to_guess(guess));
            }
        }

        let rounds = round_models
            .into_iter()
            .map(|round| {
                let guesses = guesses_by_round.remove(&round.id).unwrap_or_default();
                Self::model_to_round(round, guesses)
            })
            .collect::<Result<Vec<_>>>()?;

        let status = GameStatus::parse(&model.status)
            .ok_or_else(|| anyhow!("Unknown game status {}", model.status))?;
        let city_difficulty = CityDifficulty::parse(&model.city_difficulty)
            .ok_or_else(|| anyhow!("Unknown city difficulty {}", model.city_difficulty))?;
        let final_results = model
            .final_results
            .as_deref()
            .map(serde_json::from_str::<FinalResults>)
            .transpose()?;

        Ok(Game {
            id: model.id,
            code: model.code,
            host_id: model.host_id,
            players,
            rounds,
            status,
            settings: GameSettings {
                max_players: model.max_players.max(0) as u32,
                round_time_limit_ms: model.round_time_limit_ms.max(0) as u64,
                total_rounds: model.total_rounds.max(0) as u32,
                city_difficulty,
            },
            final_results,
            created_at: model.created_at,
        })
    }

    async fn insert_player(&self, game_id: GameId, seat: i32, player: &Player) -> Result<()> {
        let model = players::ActiveModel {
            id: Set(player.id),
            game_id: Set(game_id),
            seat: Set(seat),
            name: Set(player.name.clone()),
            is_computer: Set(player.is_computer),
            accuracy: Set(player.accuracy),
        };
        Players::insert(model).exec_without_returning(&self.db).await?;
        Ok(())
    }

    async fn insert_round(
        &self,
        game_id: GameId,
        round_number: i32,
        round: &GameRound,
    ) -> Result<()> {
        let model = rounds::ActiveModel {
            id: Set(round.id),
            game_id: Set(game_id),
            round_number: Set(round_number),
            city_name: Set(round.city.name.clone()),
            city_country: Set(round.city.country.clone()),
            city_lat: Set(round.city.lat),
            city_lng: Set(round.city.lng),
            city_difficulty: Set(round.city.difficulty.as_str().to_string()),
            completed: Set(round.completed),
            start_time: Set(round.start_time),
            end_time: Set(round.end_time),
        };
        Rounds::insert(model).exec_without_returning(&self.db).await?;

        for guess in &round.guesses {
            self.insert_guess(round.id, guess).await?;
        }
        Ok(())
    }

    async fn insert_guess(&self, round_id: RoundId, guess: &Guess) -> Result<()> {
        let model = guesses::ActiveModel {
            round_id: Set(round_id),
            player_id: Set(guess.player_id),
            lat: Set(guess.lat),
            lng: Set(guess.lng),
            distance: Set(guess.distance),
            placement_points: Set(guess.placement_points),
            bonus_points: Set(guess.bonus_points),
            total_points: Set(guess.total_points),
            placement: Set(guess.placement as i32),
            timestamp: Set(guess.timestamp),
            ..Default::default()
        };
        Guesses::insert(model).exec_without_returning(&self.db).await?;
        Ok(())
    }

    async fn game_exists(&self, game_id: GameId) -> Result<bool> {
        let count = Games::find()
            .filter(games::Column::Id.eq(game_id))
            .count(&self.db)
            .await?;
        Ok(count > 0)
    }

    async fn game_for_round(&self, round_id: RoundId) -> Result<Option<GameId>> {
        let round = Rounds::find_by_id(round_id).one(&self.db).await?;
        Ok(round.map(|r| r.game_id))
    }

    /// Reload after an update that touched `rows_affected` rows.
    async fn reload_if(&self, rows_affected: u64, game_id: GameId) -> Result<Option<Game>> {
        if rows_affected == 0 {
            return Ok(None);
        }
        self.get_game_by_id(game_id).await
    }
}

#[async_trait]
impl GameStore for GameRepository {
    async fn create_game(&self, game: &Game) -> Result<Game> {
        let model = games::ActiveModel {
            id: Set(game.id),
            code: Set(game.code.clone()),
            host_id: Set(game.host_id),
            status: Set(game.status.as_str().to_string()),
            max_players: Set(game.settings.max_players as i32),
            round_time_limit_ms: Set(game.settings.round_time_limit_ms as i64),
            total_rounds: Set(game.settings.total_rounds as i32),
            city_difficulty: Set(game.settings.city_difficulty.as_str().to_string()),
            final_results: Set(game
                .final_results
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?),
            created_at: Set(game.created_at),
        };
        Games::insert(model).exec_without_returning(&self.db).await?;

        for (seat, player) in game.players.iter().enumerate() {
            self.insert_player(game.id, seat as i32, player).await?;
        }
        for (index, round) in game.rounds.iter().enumerate() {
            self.insert_round(game.id, index as i32 + 1, round).await?;
        }

        self.get_game_by_id(game.id)
            .await?
            .ok_or_else(|| anyhow!("Failed to retrieve created game"))
    }

    async fn get_game_by_id(&self, game_id: GameId) -> Result<Option<Game>> {
        match Games::find_by_id(game_id).one(&self.db).await? {
            Some(model) => Ok(Some(self.load_game(model).await?)),
            None => Ok(None),
        }
    }

    async fn get_game_by_code(&self, code: &str) -> Result<Option<Game>> {
        let model = Games::find()
            .filter(games::Column::Code.eq(code))
            .one(&self.db)
            .await?;

        match model {
            Some(model) => Ok(Some(self.load_game(model).await?)),
            None => Ok(None),
        }
    }

    async fn add_player(&self, game_id: GameId, player: &Player) -> Result<Option<Game>> {
        if !self.game_exists(game_id).await? {
            return Ok(None);
        }

        let next_seat = Players::find()
            .filter(players::Column::GameId.eq(game_id))
            .order_by_desc(players::Column::Seat)
            .one(&self.db)
            .await?
            .map_or(0, |last| last.seat + 1);

        self.insert_player(game_id, next_seat, player).await?;
        self.get_game_by_id(game_id).await
    }

    async fn remove_player(&self, game_id: GameId, player_id: PlayerId) -> Result<Option<Game>> {
        let result = Players::delete_many()
            .filter(players::Column::GameId.eq(game_id))
            .filter(players::Column::Id.eq(player_id))
            .exec(&self.db)
            .await?;

        self.reload_if(result.rows_affected, game_id).await
    }

    async fn update_game_status(
        &self,
        game_id: GameId,
        status: GameStatus,
    ) -> Result<Option<Game>> {
        let result = Games::update_many()
            .col_expr(games::Column::Status, Expr::value(status.as_str()))
            .filter(games::Column::Id.eq(game_id))
            .exec(&self.db)
            .await?;

        self.reload_if(result.rows_affected, game_id).await
    }

    async fn update_game_settings(
        &self,
        game_id: GameId,
        settings: &GameSettings,
    ) -> Result<Option<Game>> {
        let result = Games::update_many()
            .col_expr(
                games::Column::MaxPlayers,
                Expr::value(settings.max_players as i32),
            )
            .col_expr(
                games::Column::RoundTimeLimitMs,
                Expr::value(settings.round_time_limit_ms as i64),
            )
            .col_expr(
                games::Column::TotalRounds,
                Expr::value(settings.total_rounds as i32),
            )
            .col_expr(
                games::Column::CityDifficulty,
                Expr::value(settings.city_difficulty.as_str()),
            )
            .filter(games::Column::Id.eq(game_id))
            .exec(&self.db)
            .await?;

        self.reload_if(result.rows_affected, game_id).await
    }

    async fn create_round(&self, game_id: GameId, round: &GameRound) -> Result<Option<Game>> {
        if !self.game_exists(game_id).await? {
            return Ok(None);
        }

        let existing = Rounds::find()
            .filter(rounds::Column::GameId.eq(game_id))
            .count(&self.db)
            .await?;

        self.insert_round(game_id, existing as i32 + 1, round).await?;
        self.get_game_by_id(game_id).await
    }

    async fn complete_round(&self, round_id: RoundId, end_time: i64) -> Result<Option<Game>> {
        let Some(game_id) = self.game_for_round(round_id).await? else {
            return Ok(None);
        };

        let result = Rounds::update_many()
            .col_expr(rounds::Column::Completed, Expr::value(true))
            .col_expr(rounds::Column::EndTime, Expr::value(Some(end_time)))
            .filter(rounds::Column::Id.eq(round_id))
            .exec(&self.db)
            .await?;

        self.reload_if(result.rows_affected, game_id).await
    }

    async fn add_guess(&self, round_id: RoundId, guess: &Guess) -> Result<Option<Game>> {
        let Some(game_id) = self.game_for_round(round_id).await? else {
            return Ok(None);
        };

        self.insert_guess(round_id, guess).await?;
        self.get_game_by_id(game_id).await
    }

    async fn update_guess(&self, round_id: RoundId, guess: &Guess) -> Result<Option<Game>> {
        let Some(game_id) = self.game_for_round(round_id).await? else {
            return Ok(None);
        };

        let result = Guesses::update_many()
            .col_expr(
                guesses::Column::PlacementPoints,
                Expr::value(guess.placement_points),
            )
            .col_expr(guesses::Column::BonusPoints, Expr::value(guess.bonus_points))
            .col_expr(guesses::Column::TotalPoints, Expr::value(guess.total_points))
            .col_expr(guesses::Column::Placement, Expr::value(guess.placement as i32))
            .filter(guesses::Column::RoundId.eq(round_id))
            .filter(guesses::Column::PlayerId.eq(guess.player_id))
            .exec(&self.db)
            .await?;

        self.reload_if(result.rows_affected, game_id).await
    }

    async fn update_game_final_results(
        &self,
        game_id: GameId,
        results: &FinalResults,
    ) -> Result<Option<Game>> {
        let json = serde_json::to_string(results)?;
        let result = Games::update_many()
            .col_expr(games::Column::FinalResults, Expr::value(Some(json)))
            .filter(games::Column::Id.eq(game_id))
            .exec(&self.db)
            .await?;

        self.reload_if(result.rows_affected, game_id).await
    }
}
