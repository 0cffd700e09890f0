use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "rounds")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub game_id: Uuid,
    pub round_number: i32,
    pub city_name: String,
    pub city_country: String,
    pub city_lat: f64,
    pub city_lng: f64,
    pub city_difficulty: String,
    pub completed: bool,
    pub start_time: i64,
    pub end_time: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::games::Entity",
        from = "Column::GameId",
        to = "super::games::Column::Id"
    )]
    Game,
    #[sea_orm(has_many = "super::guesses::Entity")]
    Guesses,
}

impl Related<super::games::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Game.def()
    }
}

impl Related<super::guesses::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Guesses.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
