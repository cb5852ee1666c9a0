use sqlx::{PgPool, Row};

/// Insert or replace a record
pub async fn put_record(
    pool: &PgPool,
    table: &str,
    key: &str,
    fields: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO records (table_name, record_key, fields)
        VALUES ($1, $2, $3)
        ON CONFLICT (table_name, record_key)
        DO UPDATE SET fields = EXCLUDED.fields, updated_at = NOW()
        "#,
    )
    .bind(table)
    .bind(key)
    .bind(fields)
    .execute(pool)
    .await?;

    Ok(())
}

/// Get a record's fields by key
pub async fn get_record(
    pool: &PgPool,
    table: &str,
    key: &str,
) -> Result<Option<serde_json::Value>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT fields
        FROM records
        WHERE table_name = $1 AND record_key = $2
        "#,
    )
    .bind(table)
    .bind(key)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(Some(r.try_get("fields")?)),
        None => Ok(None),
    }
}

/// Merge fields into a record, creating it when missing
pub async fn update_record(
    pool: &PgPool,
    table: &str,
    key: &str,
    fields: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO records (table_name, record_key, fields)
        VALUES ($1, $2, $3)
        ON CONFLICT (table_name, record_key)
        DO UPDATE SET fields = records.fields || EXCLUDED.fields, updated_at = NOW()
        "#,
    )
    .bind(table)
    .bind(key)
    .bind(fields)
    .execute(pool)
    .await?;

    Ok(())
}
