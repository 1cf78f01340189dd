use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "users")]
pub struct Model {
    /// Autoincrement key, never reused after a delete.
    #[sea_orm(primary_key)]
    pub id: i32,

    #[sea_orm(unique)]
    pub username: String,

    /// Password digest (PHC string or legacy bcrypt), set under the password scheme.
    pub hashed_password: Option<String>,

    /// Opaque bearer token, set under the token scheme.
    #[sea_orm(unique)]
    pub token: Option<String>,

    #[sea_orm(default_value = true)]
    pub is_active: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
