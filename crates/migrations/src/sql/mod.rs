use sqlx::{Postgres, Transaction};

pub mod m000001;
pub mod m000002;

/// Placeholder replaced by the escaped schema name in every statement.
const SCHEMA_PLACEHOLDER: &str = ":VIVID_WORKER_SCHEMA";

pub struct VividMigration {
    name: &'static str,
    is_breaking: bool,
    pub(crate) stmts: &'static [&'static str],
}

impl VividMigration {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_breaking(&self) -> bool {
        self.is_breaking
    }

    /// Numeric id recorded in the `migrations` table, `m000002` is 2.
    pub fn migration_number(&self) -> u32 {
        self.name
            .trim_start_matches('m')
            .parse()
            .unwrap_or_default()
    }

    pub fn statements(&self, escaped_schema: &str) -> Vec<String> {
        self.stmts
            .iter()
            .map(|stmt| stmt.replace(SCHEMA_PLACEHOLDER, escaped_schema))
            .collect()
    }

    pub async fn execute<'e>(
        &self,
        tx: &mut Transaction<'e, Postgres>,
        escaped_schema: &str,
    ) -> Result<(), sqlx::Error> {
        for stmt in self.statements(escaped_schema) {
            sqlx::query(&stmt).execute(tx.as_mut()).await?;
        }

        Ok(())
    }
}

pub const VIVID_WORKER_MIGRATIONS: &[VividMigration] =
    &[m000001::M000001_MIGRATION, m000002::M000002_MIGRATION];
