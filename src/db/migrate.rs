//! Additive, idempotent schema patching.
//!
//! For every catalog entity the migrator reads the physical column list,
//! creates the table if it is missing, and otherwise adds each missing field
//! as a nullable column. Columns are never dropped, renamed or retyped.
//! Each table creation and each column addition runs in its own transaction,
//! so a failure leaves that change fully applied or not applied at all.

use serde::Serialize;
use sqlx::{Connection, FromRow, SqliteConnection};
use std::fmt;
use tracing::{info, warn};

use crate::db::catalog::{CATALOG, Entity, EntitySchema, FieldDef, schema_of};
use crate::db::store::{BEGIN_IMMEDIATE, SqlitePool};
use crate::error::TapError;

/// One column as reported by `pragma_table_info`.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct PhysicalColumn {
    pub name: String,
    #[sqlx(rename = "type")]
    pub decl_type: String,
    #[sqlx(rename = "notnull")]
    pub not_null: bool,
    #[sqlx(rename = "dflt_value")]
    pub default: Option<String>,
    #[sqlx(rename = "pk")]
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationFailure {
    pub entity: Entity,
    pub field: String,
    pub reason: String,
}

impl fmt::Display for MigrationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}: {}", self.entity.table(), self.field, self.reason)
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    pub created_tables: Vec<Entity>,
    pub added_columns: Vec<(Entity, String)>,
    pub failures: Vec<MigrationFailure>,
}

impl MigrationReport {
    pub fn is_noop(&self) -> bool {
        self.created_tables.is_empty() && self.added_columns.is_empty() && self.failures.is_empty()
    }

    pub fn failed_entities(&self) -> Vec<Entity> {
        let mut out: Vec<Entity> = Vec::new();
        for failure in &self.failures {
            if !out.contains(&failure.entity) {
                out.push(failure.entity);
            }
        }
        out
    }

    pub fn into_result(self) -> Result<Self, TapError> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(TapError::MigrationFailed(self.failures))
        }
    }
}

/// Read the physical column list of `table`. An empty list means the table
/// does not exist.
pub async fn describe_table(
    conn: &mut SqliteConnection,
    table: &str,
) -> Result<Vec<PhysicalColumn>, TapError> {
    let cols = sqlx::query_as::<_, PhysicalColumn>(
        r#"SELECT name, type, "notnull", dflt_value, pk FROM pragma_table_info(?) ORDER BY cid"#,
    )
    .bind(table)
    .fetch_all(&mut *conn)
    .await?;
    Ok(cols)
}

/// Catalog fields that have no physical column yet.
pub fn missing_fields(schema: &'static EntitySchema, physical: &[PhysicalColumn]) -> Vec<&'static FieldDef> {
    schema
        .fields
        .iter()
        .filter(|f| !physical.iter().any(|c| c.name.eq_ignore_ascii_case(f.name)))
        .collect()
}

pub(crate) async fn create_table(
    conn: &mut SqliteConnection,
    schema: &EntitySchema,
) -> Result<(), TapError> {
    sqlx::query(&schema.create_table_sql())
        .execute(&mut *conn)
        .await?;
    Ok(())
}

enum ColumnOutcome {
    Added,
    AlreadyPresent,
}

pub struct Migrator<'a> {
    pool: &'a SqlitePool,
}

impl<'a> Migrator<'a> {
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Physical columns for `entity`, or `None` when its table is absent.
    pub async fn describe_physical_schema(
        &self,
        entity: Entity,
    ) -> Result<Option<Vec<PhysicalColumn>>, TapError> {
        let mut conn = self.pool.acquire().await?;
        let cols = describe_table(&mut conn, entity.table()).await?;
        Ok((!cols.is_empty()).then_some(cols))
    }

    /// Catalog fields of `entity` the physical table lacks. A missing table
    /// yields every field.
    pub async fn diff(&self, entity: Entity) -> Result<Vec<&'static FieldDef>, TapError> {
        let physical = self.describe_physical_schema(entity).await?.unwrap_or_default();
        Ok(missing_fields(schema_of(entity), &physical))
    }

    /// Reconcile every catalog entity. Per-field failures are collected in
    /// the report; only an unusable store aborts the run.
    pub async fn run(&self) -> Result<MigrationReport, TapError> {
        let mut report = MigrationReport::default();
        let mut conn = self.pool.acquire().await?;

        for schema in CATALOG {
            if let Err(e) = self.migrate_entity(&mut conn, schema, &mut report).await {
                if matches!(e, TapError::StorageUnavailable(_)) {
                    return Err(e);
                }
                warn!(entity = %schema.entity, error = %e, "could not inspect table");
                report.failures.push(MigrationFailure {
                    entity: schema.entity,
                    field: "*".to_string(),
                    reason: e.to_string(),
                });
            }
        }

        if report.is_noop() {
            info!("schema up to date");
        } else {
            info!(
                created_tables = report.created_tables.len(),
                added_columns = report.added_columns.len(),
                failures = report.failures.len(),
                "schema migration finished"
            );
        }
        Ok(report)
    }

    async fn migrate_entity(
        &self,
        conn: &mut SqliteConnection,
        schema: &'static EntitySchema,
        report: &mut MigrationReport,
    ) -> Result<(), TapError> {
        let physical = describe_table(conn, schema.table).await?;
        if physical.is_empty() {
            let mut tx = conn.begin_with(BEGIN_IMMEDIATE).await?;
            create_table(&mut tx, schema).await?;
            tx.commit().await?;
            info!(table = schema.table, "created missing table");
            report.created_tables.push(schema.entity);
            return Ok(());
        }

        for field in missing_fields(schema, &physical) {
            if field.primary_key {
                warn!(table = schema.table, field = field.name, "primary key missing from table");
                report.failures.push(MigrationFailure {
                    entity: schema.entity,
                    field: field.name.to_string(),
                    reason: "primary key columns cannot be added to an existing table".to_string(),
                });
                continue;
            }
            match add_column(conn, schema, field).await {
                Ok(ColumnOutcome::Added) => {
                    info!(table = schema.table, field = field.name, "added column");
                    report.added_columns.push((schema.entity, field.name.to_string()));
                }
                Ok(ColumnOutcome::AlreadyPresent) => {}
                Err(e) if matches!(e, TapError::StorageUnavailable(_)) => return Err(e),
                Err(e) => {
                    warn!(table = schema.table, field = field.name, error = %e, "could not add column");
                    report.failures.push(MigrationFailure {
                        entity: schema.entity,
                        field: field.name.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Add one column inside its own write transaction. The column list is
/// re-read under the lock, so a migrator that lost the race to another
/// process sees the column and skips it.
async fn add_column(
    conn: &mut SqliteConnection,
    schema: &EntitySchema,
    field: &FieldDef,
) -> Result<ColumnOutcome, TapError> {
    let mut tx = conn.begin_with(BEGIN_IMMEDIATE).await?;
    let physical = describe_table(&mut tx, schema.table).await?;
    if physical.iter().any(|c| c.name.eq_ignore_ascii_case(field.name)) {
        return Ok(ColumnOutcome::AlreadyPresent);
    }
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {}",
        schema.table,
        field.add_column_sql()
    );
    sqlx::query(&sql).execute(&mut *tx).await?;
    tx.commit().await?;
    Ok(ColumnOutcome::Added)
}
