//! Generic data access shared by every entity.
//!
//! [`Repository<E>`] is written once against sea-orm's `EntityTrait` and
//! instantiated per entity (`Repository<users::Entity>`, ...). Domain services
//! hold a repository instead of reaching for `DatabaseConnection` directly.
//!
//! Filters are exact-match conjunctions built with [`Fields`]. Projections name
//! columns; a projected row comes back as a JSON object keyed by column name.
//! An empty projection selects every column.

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelBehavior, ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, DbErr,
    EntityTrait, IdenStatic, IntoActiveModel, PrimaryKeyTrait, QueryFilter, QuerySelect, Select,
    SqlErr, TransactionTrait, Value,
};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

/// A projected row, keyed by column name.
pub type Record = Map<String, JsonValue>;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Record not found")]
    NotFound,

    #[error("Filter matched more than one record")]
    MultipleMatches,

    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("Database error: {0}")]
    Database(DbErr),
}

impl From<DbErr> for RepositoryError {
    fn from(err: DbErr) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(detail)) => Self::UniqueViolation(detail),
            _ => Self::Database(err),
        }
    }
}

/// Column/value pairs, used both as exact-match filters and as update values.
pub struct Fields<E: EntityTrait> {
    pairs: Vec<(E::Column, Value)>,
}

impl<E: EntityTrait> Fields<E> {
    #[must_use]
    pub const fn new() -> Self {
        Self { pairs: Vec::new() }
    }

    #[must_use]
    pub fn with(mut self, column: E::Column, value: impl Into<Value>) -> Self {
        self.pairs.push((column, value.into()));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    fn condition(&self) -> Condition {
        self.pairs
            .iter()
            .fold(Condition::all(), |cond, (column, value)| {
                cond.add(column.eq(value.clone()))
            })
    }
}

impl<E: EntityTrait> Default for Fields<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: EntityTrait> Clone for Fields<E> {
    fn clone(&self) -> Self {
        Self {
            pairs: self.pairs.clone(),
        }
    }
}

impl<E: EntityTrait> fmt::Debug for Fields<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.pairs.iter().map(|(c, v)| (c.as_str(), v)))
            .finish()
    }
}

pub struct Repository<E> {
    conn: DatabaseConnection,
    _entity: PhantomData<E>,
}

impl<E> Clone for Repository<E> {
    fn clone(&self) -> Self {
        Self {
            conn: self.conn.clone(),
            _entity: PhantomData,
        }
    }
}

type PrimaryKeyOf<E> = <<E as EntityTrait>::PrimaryKey as PrimaryKeyTrait>::ValueType;

impl<E> Repository<E>
where
    E: EntityTrait,
    E::Model: IntoActiveModel<E::ActiveModel>,
    E::ActiveModel: ActiveModelTrait<Entity = E> + ActiveModelBehavior + Send,
{
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self {
            conn,
            _entity: PhantomData,
        }
    }

    /// Insert a new record and return it with its generated key populated.
    pub async fn create(&self, attributes: E::ActiveModel) -> Result<E::Model, RepositoryError> {
        let txn = self.conn.begin().await?;
        let model = attributes.insert(&txn).await?;
        txn.commit().await?;
        Ok(model)
    }

    /// First record matching `filters`, projected to `projection`.
    pub async fn get(
        &self,
        projection: &[E::Column],
        filters: &Fields<E>,
    ) -> Result<Option<Record>, RepositoryError> {
        let row = project(E::find(), projection)
            .filter(filters.condition())
            .into_json()
            .one(&self.conn)
            .await?;

        Ok(row.map(into_record))
    }

    pub async fn get_by_key<K>(&self, key: K) -> Result<E::Model, RepositoryError>
    where
        K: Into<PrimaryKeyOf<E>>,
    {
        E::find_by_id(key)
            .one(&self.conn)
            .await?
            .ok_or(RepositoryError::NotFound)
    }

    /// The single record matching `filters`, if any.
    ///
    /// # Errors
    ///
    /// [`RepositoryError::MultipleMatches`] when the filter is ambiguous.
    pub async fn get_if_exists(
        &self,
        filters: &Fields<E>,
    ) -> Result<Option<E::Model>, RepositoryError> {
        let mut matches = E::find()
            .filter(filters.condition())
            .limit(2_u64)
            .all(&self.conn)
            .await?;

        if matches.len() > 1 {
            return Err(RepositoryError::MultipleMatches);
        }

        Ok(matches.pop())
    }

    pub async fn list(
        &self,
        projection: &[E::Column],
        filters: &Fields<E>,
    ) -> Result<Vec<Record>, RepositoryError> {
        let rows = project(E::find(), projection)
            .filter(filters.condition())
            .into_json()
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().map(into_record).collect())
    }

    /// All matches aggregated under `object_name`, each renamed per `mapping`
    /// (`(output_key, column)` pairs). `singleton_filters` carries conditions
    /// that aren't plain equality.
    pub async fn list_as_json(
        &self,
        object_name: &str,
        mapping: &[(&str, E::Column)],
        singleton_filters: Option<Condition>,
        filters: &Fields<E>,
    ) -> Result<JsonValue, RepositoryError> {
        let columns: Vec<E::Column> = mapping.iter().map(|(_, column)| *column).collect();

        let mut query = project(E::find(), &columns).filter(filters.condition());
        if let Some(condition) = singleton_filters {
            query = query.filter(condition);
        }

        let rows = query.into_json().all(&self.conn).await?;
        let items = rows
            .into_iter()
            .map(|row| rename_fields(&into_record(row), mapping))
            .collect();

        let mut aggregate = Record::new();
        aggregate.insert(object_name.to_string(), JsonValue::Array(items));
        Ok(JsonValue::Object(aggregate))
    }

    /// Single-record analogue of [`Self::list_as_json`].
    pub async fn get_as_json(
        &self,
        mapping: &[(&str, E::Column)],
        filters: &Fields<E>,
    ) -> Result<Option<JsonValue>, RepositoryError> {
        let columns: Vec<E::Column> = mapping.iter().map(|(_, column)| *column).collect();

        let mut rows = project(E::find(), &columns)
            .filter(filters.condition())
            .limit(2_u64)
            .into_json()
            .all(&self.conn)
            .await?;

        if rows.len() > 1 {
            return Err(RepositoryError::MultipleMatches);
        }

        Ok(rows.pop().map(|row| rename_fields(&into_record(row), mapping)))
    }

    /// Apply `values` to every record matching `filters`; returns the count.
    pub async fn update(
        &self,
        filters: &Fields<E>,
        values: Fields<E>,
    ) -> Result<u64, RepositoryError> {
        if values.is_empty() {
            return Ok(0);
        }

        let mut update = E::update_many().filter(filters.condition());
        for (column, value) in values.pairs {
            update = update.col_expr(column, Expr::value(value));
        }

        let txn = self.conn.begin().await?;
        let result = update.exec(&txn).await?;
        txn.commit().await?;

        Ok(result.rows_affected)
    }

    /// Idempotent: deleting an absent key is not an error.
    pub async fn delete_by_key<K>(&self, key: K) -> Result<(), RepositoryError>
    where
        K: Into<PrimaryKeyOf<E>>,
    {
        let txn = self.conn.begin().await?;
        E::delete_by_id(key).exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }
}

fn project<E: EntityTrait>(select: Select<E>, projection: &[E::Column]) -> Select<E> {
    if projection.is_empty() {
        select
    } else {
        select.select_only().columns(projection.iter().copied())
    }
}

fn into_record(row: JsonValue) -> Record {
    match row {
        JsonValue::Object(map) => map,
        _ => Record::new(),
    }
}

fn rename_fields<C: ColumnTrait>(row: &Record, mapping: &[(&str, C)]) -> JsonValue {
    let renamed = mapping
        .iter()
        .map(|(key, column)| {
            let value = row.get(column.as_str()).cloned().unwrap_or(JsonValue::Null);
            ((*key).to_string(), value)
        })
        .collect::<Record>();

    JsonValue::Object(renamed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Store;
    use crate::entities::users;
    use sea_orm::Set;

    async fn repo() -> Repository<users::Entity> {
        let store = Store::with_pool_options("sqlite::memory:", 1, 1)
            .await
            .expect("in-memory store");
        store.users()
    }

    fn user(username: &str, token: Option<&str>) -> users::ActiveModel {
        users::ActiveModel {
            username: Set(username.to_string()),
            hashed_password: Set(None),
            token: Set(token.map(ToString::to_string)),
            is_active: Set(true),
            ..Default::default()
        }
    }

    fn by_username(username: &str) -> Fields<users::Entity> {
        Fields::new().with(users::Column::Username, username)
    }

    #[tokio::test]
    async fn create_populates_generated_key() {
        let repo = repo().await;

        let alice = repo.create(user("alice", None)).await.unwrap();
        let bob = repo.create(user("bob", None)).await.unwrap();

        assert!(alice.id > 0);
        assert!(bob.id > alice.id);
        assert_eq!(repo.get_by_key(alice.id).await.unwrap(), alice);
    }

    #[tokio::test]
    async fn create_reports_unique_violation() {
        let repo = repo().await;
        repo.create(user("alice", None)).await.unwrap();

        let err = repo.create(user("alice", None)).await.unwrap_err();
        assert!(matches!(err, RepositoryError::UniqueViolation(ref d) if d.contains("username")));

        let rows = repo.list(&[], &by_username("alice")).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn get_projects_requested_fields_only() {
        let repo = repo().await;
        repo.create(user("alice", Some("tok"))).await.unwrap();

        let record = repo
            .get(&[users::Column::Id, users::Column::Username], &by_username("alice"))
            .await
            .unwrap()
            .expect("alice exists");

        assert_eq!(record.len(), 2);
        assert_eq!(record["username"], "alice");
        assert!(record.contains_key("id"));
        assert!(!record.contains_key("token"));

        let missing = repo
            .get(&[users::Column::Id], &by_username("nobody"))
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn get_by_key_reports_not_found() {
        let repo = repo().await;
        assert!(matches!(
            repo.get_by_key(42).await,
            Err(RepositoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn get_if_exists_rejects_ambiguous_filters() {
        let repo = repo().await;
        repo.create(user("alice", None)).await.unwrap();
        repo.create(user("bob", None)).await.unwrap();

        let active: Fields<users::Entity> = Fields::new().with(users::Column::IsActive, true);
        assert!(matches!(
            repo.get_if_exists(&active).await,
            Err(RepositoryError::MultipleMatches)
        ));

        let alice = repo.get_if_exists(&by_username("alice")).await.unwrap();
        assert_eq!(alice.map(|u| u.username).as_deref(), Some("alice"));

        assert!(repo.get_if_exists(&by_username("carol")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_as_json_renames_and_aggregates() {
        let repo = repo().await;
        let alice = repo.create(user("alice", None)).await.unwrap();
        repo.create(user("bob", None)).await.unwrap();

        let mapping = [("user_id", users::Column::Id), ("name", users::Column::Username)];
        let after_alice = Expr::col(users::Column::Id).gt(alice.id);

        let value = repo
            .list_as_json("users", &mapping, Some(Condition::all().add(after_alice)), &Fields::new())
            .await
            .unwrap();

        let items = value["users"].as_array().expect("array under object name");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["name"], "bob");
        assert!(items[0].get("username").is_none());

        let empty = repo
            .list_as_json("users", &mapping, None, &by_username("nobody"))
            .await
            .unwrap();
        assert_eq!(empty["users"], JsonValue::Array(vec![]));
    }

    #[tokio::test]
    async fn get_as_json_single_record() {
        let repo = repo().await;
        repo.create(user("alice", None)).await.unwrap();

        let mapping = [("login", users::Column::Username)];
        let value = repo
            .get_as_json(&mapping, &by_username("alice"))
            .await
            .unwrap()
            .expect("alice exists");
        assert_eq!(value, serde_json::json!({ "login": "alice" }));

        assert!(repo.get_as_json(&mapping, &by_username("bob")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_counts_matches_and_zero_is_fine() {
        let repo = repo().await;
        let alice = repo.create(user("alice", None)).await.unwrap();

        let deactivate: Fields<users::Entity> = Fields::new().with(users::Column::IsActive, false);

        let count = repo
            .update(&by_username("nobody"), deactivate.clone())
            .await
            .unwrap();
        assert_eq!(count, 0);
        assert!(repo.get_by_key(alice.id).await.unwrap().is_active);

        let count = repo.update(&by_username("alice"), deactivate).await.unwrap();
        assert_eq!(count, 1);
        assert!(!repo.get_by_key(alice.id).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn delete_by_key_is_idempotent_and_keys_are_not_reused() {
        let repo = repo().await;
        repo.create(user("alice", None)).await.unwrap();
        let bob = repo.create(user("bob", None)).await.unwrap();

        repo.delete_by_key(bob.id).await.unwrap();
        repo.delete_by_key(bob.id).await.unwrap();
        assert!(matches!(
            repo.get_by_key(bob.id).await,
            Err(RepositoryError::NotFound)
        ));

        let carol = repo.create(user("carol", None)).await.unwrap();
        assert!(carol.id > bob.id);
    }
}
