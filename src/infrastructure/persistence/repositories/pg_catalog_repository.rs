use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::instrument;

use super::{corrupt, query_failed};
use crate::application::ports::{CatalogRepository, RepositoryError};
use crate::domain::{CatalogEntity, CatalogEntityId, EntityKind};

const ENTITY_COLUMNS: &str =
    "id, kind, name, description, content_hash, created_at, updated_at";

pub struct PgCatalogRepository {
    pool: PgPool,
}

impl PgCatalogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_entity(row: &PgRow) -> Result<CatalogEntity, RepositoryError> {
    let kind: String = row.try_get("kind").map_err(corrupt)?;
    Ok(CatalogEntity {
        id: CatalogEntityId::from_uuid(row.try_get("id").map_err(corrupt)?),
        kind: kind
            .parse::<EntityKind>()
            .map_err(RepositoryError::CorruptRecord)?,
        name: row.try_get("name").map_err(corrupt)?,
        description: row.try_get("description").map_err(corrupt)?,
        content_hash: row.try_get("content_hash").map_err(corrupt)?,
        created_at: row.try_get("created_at").map_err(corrupt)?,
        updated_at: row.try_get("updated_at").map_err(corrupt)?,
    })
}

#[async_trait]
impl CatalogRepository for PgCatalogRepository {
    #[instrument(skip(self), fields(entity_id = %id))]
    async fn get(&self, id: CatalogEntityId) -> Result<Option<CatalogEntity>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM catalog_entities WHERE id = $1",
            ENTITY_COLUMNS
        ))
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        row.as_ref().map(map_entity).transpose()
    }

    #[instrument(skip(self), fields(kind = %kind))]
    async fn find_by_name(
        &self,
        kind: EntityKind,
        normalized_name: &str,
    ) -> Result<Option<CatalogEntity>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM catalog_entities WHERE kind = $1 AND normalized_name = $2",
            ENTITY_COLUMNS
        ))
        .bind(kind.as_str())
        .bind(normalized_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        row.as_ref().map(map_entity).transpose()
    }

    /// The unique `(kind, normalized_name)` constraint arbitrates races: the
    /// losing insert does nothing and reads the winner's row.
    #[instrument(skip(self, entity), fields(kind = %entity.kind, entity_id = %entity.id))]
    async fn create_or_get(
        &self,
        entity: &CatalogEntity,
    ) -> Result<(CatalogEntity, bool), RepositoryError> {
        let normalized = entity.normalized_name();
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO catalog_entities
                (id, kind, name, normalized_name, description, content_hash, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (kind, normalized_name) DO NOTHING
            RETURNING {}
            "#,
            ENTITY_COLUMNS
        ))
        .bind(entity.id.as_uuid())
        .bind(entity.kind.as_str())
        .bind(&entity.name)
        .bind(&normalized)
        .bind(&entity.description)
        .bind(&entity.content_hash)
        .bind(entity.created_at)
        .bind(entity.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(query_failed)?;

        if let Some(row) = inserted {
            return Ok((map_entity(&row)?, true));
        }

        let existing = self
            .find_by_name(entity.kind, &normalized)
            .await?
            .ok_or_else(|| {
                RepositoryError::ConstraintViolation(format!(
                    "{} '{}' conflicted but could not be read back",
                    entity.kind, normalized
                ))
            })?;
        Ok((existing, false))
    }

    #[instrument(skip(self, entity), fields(entity_id = %entity.id))]
    async fn update(&self, entity: &CatalogEntity) -> Result<(), RepositoryError> {
        let outcome = sqlx::query(
            r#"
            UPDATE catalog_entities
            SET name = $2, normalized_name = $3, description = $4, content_hash = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(entity.id.as_uuid())
        .bind(&entity.name)
        .bind(entity.normalized_name())
        .bind(&entity.description)
        .bind(&entity.content_hash)
        .bind(entity.updated_at)
        .execute(&self.pool)
        .await
        .map_err(query_failed)?;

        if outcome.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("catalog entity {}", entity.id)));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(kind = %kind))]
    async fn list(&self, kind: EntityKind) -> Result<Vec<CatalogEntity>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM catalog_entities WHERE kind = $1 ORDER BY name",
            ENTITY_COLUMNS
        ))
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(query_failed)?;

        rows.iter().map(map_entity).collect()
    }
}
