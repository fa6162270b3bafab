//! Versioned schema of the vivid_worker queue store.

pub mod pg_version;
pub mod sql;

use indoc::formatdoc;
use pg_version::fetch_and_check_postgres_version;
use sql::{VividMigration, VIVID_WORKER_MIGRATIONS};
use sqlx::{query, query_as, Acquire, FromRow, PgExecutor, Postgres};
use thiserror::Error;
use tracing::{debug, info};

/// SQLSTATE raised when the `migrations` table does not exist yet.
const UNDEFINED_TABLE: &str = "42P01";

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error("Could not parse the PostgreSQL server version: {0}")]
    ParseVersionError(#[from] std::num::ParseIntError),
    #[error("PostgreSQL 12 or later is required, the server reports version {0}")]
    IncompatibleVersion(u32),
    #[error("Schema revision {applied} includes breaking migration {breaking}, this build only knows revisions up to {known}")]
    IncompatibleRevision { applied: u32, breaking: u32, known: u32 },
    #[error("Migration query failed: {0}")]
    SqlError(#[from] sqlx::Error),
}

/// What the `migrations` table says about the installed schema.
#[derive(FromRow, Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SchemaRevision {
    applied: Option<i32>,
    breaking: Option<i32>,
}

impl SchemaRevision {
    fn applied(&self) -> u32 {
        self.applied
            .and_then(|id| u32::try_from(id).ok())
            .unwrap_or(0)
    }

    /// Migrations still to run, oldest first.
    fn pending(&self) -> impl Iterator<Item = &'static VividMigration> {
        let applied = self.applied();
        VIVID_WORKER_MIGRATIONS
            .iter()
            .filter(move |migration| migration.migration_number() > applied)
    }

    /// A breaking migration newer than `known` changed the tables under us.
    fn ensure_compatible(&self, known: u32) -> Result<(), MigrateError> {
        match self.breaking.and_then(|id| u32::try_from(id).ok()) {
            Some(breaking) if breaking > known => Err(MigrateError::IncompatibleRevision {
                applied: self.applied(),
                breaking,
                known,
            }),
            _ => Ok(()),
        }
    }
}

fn latest_known_revision() -> u32 {
    VIVID_WORKER_MIGRATIONS
        .iter()
        .map(VividMigration::migration_number)
        .max()
        .unwrap_or(0)
}

/// Reads the installed revision. `None` when the schema was never installed.
async fn read_revision<'e, E>(
    executor: E,
    escaped_schema: &str,
) -> Result<Option<SchemaRevision>, MigrateError>
where
    E: PgExecutor<'e>,
{
    let sql = formatdoc!(
        r#"
            select
                max(id) as applied,
                max(id) filter (where breaking) as breaking
            from {escaped_schema}.migrations
        "#
    );

    match query_as::<_, SchemaRevision>(&sql).fetch_one(executor).await {
        Ok(revision) => Ok(Some(revision)),
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some(UNDEFINED_TABLE) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Creates the schema and its `migrations` bookkeeping table.
async fn install_schema<'e, E>(executor: E, escaped_schema: &str) -> Result<(), MigrateError>
where
    E: Acquire<'e, Database = Postgres>,
{
    let create_schema = format!("create schema if not exists {escaped_schema}");
    let create_migrations = formatdoc!(
        r#"
            create table if not exists {escaped_schema}.migrations (
                id int primary key,
                ts timestamptz not null default now(),
                breaking boolean not null default false
            )
        "#
    );

    let mut tx = executor.begin().await?;
    query(&create_schema).execute(tx.as_mut()).await?;
    query(&create_migrations).execute(tx.as_mut()).await?;
    tx.commit().await?;

    Ok(())
}

/// Brings the queue schema up to the latest revision known to this build.
///
/// Each migration commits together with its bookkeeping row, so a crash
/// leaves the schema at a consistent revision.
pub async fn migrate<'e, E>(executor: E, escaped_schema: &str) -> Result<(), MigrateError>
where
    E: PgExecutor<'e> + Acquire<'e, Database = Postgres> + Send + Sync + Clone,
{
    let pg_version = fetch_and_check_postgres_version(executor.clone()).await?;

    let revision = match read_revision(executor.clone(), escaped_schema).await? {
        Some(revision) => revision,
        None => {
            info!(pg_version, schema = escaped_schema, "Installing vivid_worker schema");
            install_schema(executor.clone(), escaped_schema).await?;
            SchemaRevision::default()
        }
    };
    revision.ensure_compatible(latest_known_revision())?;

    let record = format!("insert into {escaped_schema}.migrations (id, breaking) values ($1, $2)");
    for migration in revision.pending() {
        info!(
            migration = migration.name(),
            breaking = migration.is_breaking(),
            "Running migration"
        );

        let mut tx = executor.clone().begin().await?;
        migration.execute(&mut tx, escaped_schema).await?;
        query(&record)
            .bind(migration.migration_number() as i32)
            .bind(migration.is_breaking())
            .execute(tx.as_mut())
            .await?;
        tx.commit().await?;
    }

    debug!(schema = escaped_schema, "Queue schema is up to date");
    Ok(())
}
