use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "guesses")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub round_id: Uuid,
    pub player_id: Uuid,
    pub lat: f64,
    pub lng: f64,
    pub distance: f64,
    pub placement_points: i32,
    pub bonus_points: i32,
    pub total_points: i32,
    pub placement: i32,
    pub timestamp: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::rounds::Entity",
        from = "Column::RoundId",
        to = "super::rounds::Column::Id"
    )]
    Round,
}

impl Related<super::rounds::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Round.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
