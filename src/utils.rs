use sqlx::{query_scalar, Executor, Postgres};

use crate::errors::Result;

/// Quotes `identifier` the way Postgres would, so it can be spliced into
/// queries as a schema name.
pub async fn escape_identifier<'e, E: Executor<'e, Database = Postgres>>(
    executor: E,
    identifier: &str,
) -> Result<String> {
    let escaped_identifier: String = query_scalar("select format('%I', $1::text)")
        .bind(identifier)
        .fetch_one(executor)
        .await?;

    Ok(escaped_identifier)
}
