use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "games")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub host_id: Uuid,
    pub status: String,
    pub max_players: i32,
    pub round_time_limit_ms: i64,
    pub total_rounds: i32,
    pub city_difficulty: String,
    /// `FinalResults` as JSON, set once the game finishes.
    #[sea_orm(column_type = "Text", nullable)]
    pub final_results: Option<String>,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::players::Entity")]
    Players,
    #[sea_orm(has_many = "super::rounds::Entity")]
    Rounds,
}

impl Related<super::players::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Players.def()
    }
}

impl Related<super::rounds::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Rounds.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
