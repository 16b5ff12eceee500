use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime};
use futures::TryStreamExt;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool, ValueRef};
use strata_llm::BoxFuture;
use tokio_util::sync::CancellationToken;

use super::{DataSource, Discovery, DiscoverySender};
use crate::document::{Document, keys};
use crate::error::{RagError, Result};

const DRIVER: &str = "sqlite";

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// One table exposed as documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqlTableConfig {
    pub table: String,
    /// Concatenated, in order, to form the document content.
    pub columns: Vec<String>,
    pub id_column: String,
    /// Enables incremental indexing for this table.
    #[serde(default)]
    pub updated_column: Option<String>,
    /// Raw SQL appended after `WHERE`.
    #[serde(default)]
    pub where_clause: Option<String>,
    #[serde(default)]
    pub metadata_columns: Vec<String>,
}

impl SqlTableConfig {
    fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(RagError::Config(format!(
                "table {}: at least one content column is required",
                self.table
            )));
        }
        let names = std::iter::once(&self.table)
            .chain(std::iter::once(&self.id_column))
            .chain(&self.columns)
            .chain(self.updated_column.iter())
            .chain(&self.metadata_columns);
        for name in names {
            if !IDENTIFIER_RE.is_match(name) {
                return Err(RagError::Config(format!("invalid SQL identifier: {name:?}")));
            }
        }
        Ok(())
    }

    /// Selected columns: content, id, updated, metadata.
    fn select_list(&self) -> Vec<&str> {
        self.columns
            .iter()
            .map(String::as_str)
            .chain(std::iter::once(self.id_column.as_str()))
            .chain(self.updated_column.as_deref())
            .chain(self.metadata_columns.iter().map(String::as_str))
            .collect()
    }

    fn select_sql(&self, max_rows: usize) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.select_list().join(", "), self.table);
        if let Some(clause) = self.where_clause.as_deref().filter(|c| !c.trim().is_empty()) {
            sql.push_str(" WHERE ");
            sql.push_str(clause);
        }
        if max_rows > 0 {
            sql.push_str(&format!(" LIMIT {max_rows}"));
        }
        sql
    }

    fn select_one_sql(&self) -> String {
        format!(
            "SELECT {} FROM {} WHERE {} = ?",
            self.select_list().join(", "),
            self.table,
            self.id_column
        )
    }
}

/// Rows of SQLite tables as documents with ids `sqlite:{table}:{id}`.
#[derive(Debug, Clone)]
pub struct SqlSource {
    pool: SqlitePool,
    tables: Vec<SqlTableConfig>,
    max_rows: usize,
}

impl SqlSource {
    /// `max_rows` caps rows per table; zero means unlimited.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when no tables are given or any
    /// identifier is invalid.
    pub fn new(pool: SqlitePool, tables: Vec<SqlTableConfig>, max_rows: usize) -> Result<Self> {
        if tables.is_empty() {
            return Err(RagError::Config(
                "at least one table configuration is required".into(),
            ));
        }
        for table in &tables {
            table.validate()?;
        }
        Ok(Self {
            pool,
            tables,
            max_rows,
        })
    }
}

fn value_at(row: &SqliteRow, idx: usize) -> Result<Option<Value>> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(None);
    }
    if let Ok(s) = row.try_get::<String, _>(idx) {
        return Ok(Some(Value::String(s)));
    }
    if let Ok(i) = row.try_get::<i64, _>(idx) {
        return Ok(Some(json!(i)));
    }
    if let Ok(f) = row.try_get::<f64, _>(idx) {
        return Ok(Some(json!(f)));
    }
    let bytes: Vec<u8> = row.try_get(idx)?;
    Ok(Some(Value::String(String::from_utf8_lossy(&bytes).into_owned())))
}

fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// RFC 3339, SQLite's `YYYY-MM-DD HH:MM:SS`, or unix seconds.
fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|d| d.timestamp())
            .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").map(|d| d.and_utc().timestamp()))
            .ok(),
        _ => None,
    }
}

fn row_document(table: &SqlTableConfig, row: &SqliteRow) -> Result<Document> {
    let n = table.columns.len();
    let id = value_at(row, n)?
        .map(|v| display(&v))
        .ok_or_else(|| RagError::Other(format!("table {}: NULL in {}", table.table, table.id_column)))?;

    let mut parts = Vec::with_capacity(n);
    for idx in 0..n {
        if let Some(value) = value_at(row, idx)? {
            let text = display(&value);
            if !text.is_empty() {
                parts.push(text);
            }
        }
    }
    let content = parts.join("\n\n");

    let mut doc = Document::new(format!("{DRIVER}:{}:{id}", table.table))
        .with_source_path(format!("{}/{id}", table.table))
        .with_metadata("table", table.table.clone())
        .with_metadata("id", id);

    let mut next = n + 1;
    if table.updated_column.is_some() {
        if let Some(ts) = value_at(row, next)?.as_ref().and_then(parse_timestamp) {
            doc.metadata.insert(keys::LAST_MODIFIED.into(), json!(ts));
        }
        next += 1;
    }
    for (offset, column) in table.metadata_columns.iter().enumerate() {
        if let Some(value) = value_at(row, next + offset)? {
            doc.metadata.insert(column.clone(), value);
        }
    }

    doc.size = content.len() as u64;
    doc.mime_type = "text/plain".into();
    doc.content = content;
    Ok(doc)
}

async fn scan_table(
    pool: &SqlitePool,
    table: &SqlTableConfig,
    max_rows: usize,
    tx: &DiscoverySender,
    token: &CancellationToken,
) -> Result<()> {
    let sql = table.select_sql(max_rows);
    let mut rows = sqlx::query(&sql).fetch(pool);
    loop {
        let row = tokio::select! {
            () = token.cancelled() => return Err(RagError::Cancelled),
            row = rows.try_next() => row?,
        };
        let Some(row) = row else {
            return Ok(());
        };
        match row_document(table, &row) {
            Ok(doc) => {
                if tx.documents.send(doc).await.is_err() {
                    return Ok(());
                }
            }
            Err(e) => {
                if tx.errors.send(e).await.is_err() {
                    return Ok(());
                }
            }
        }
    }
}

impl DataSource for SqlSource {
    #[allow(clippy::unnecessary_literal_bound)]
    fn source_type(&self) -> &str {
        "sql"
    }

    fn discover(&self, token: CancellationToken) -> Result<Discovery> {
        let (tx, discovery) = Discovery::channel();
        let source = self.clone();
        tokio::spawn(async move {
            for table in &source.tables {
                match scan_table(&source.pool, table, source.max_rows, &tx, &token).await {
                    Ok(()) => {}
                    Err(e) if e.is_cancelled() => return,
                    Err(e) => {
                        let err = RagError::Other(format!("failed to index table {}: {e}", table.table));
                        if tx.errors.send(err).await.is_err() {
                            return;
                        }
                    }
                }
            }
        });
        Ok(discovery)
    }

    fn read_document<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Document>> {
        Box::pin(async move {
            let mut parts = id.splitn(3, ':');
            let (Some(_driver), Some(table_name), Some(row_id)) = (parts.next(), parts.next(), parts.next())
            else {
                return Err(RagError::Other(format!("invalid document ID format: {id}")));
            };
            let table = self
                .tables
                .iter()
                .find(|t| t.table == table_name)
                .ok_or_else(|| RagError::Other(format!("table {table_name} not found in configuration")))?;

            let sql = table.select_one_sql();
            let row = sqlx::query(&sql)
                .bind(row_id)
                .fetch_optional(&self.pool)
                .await?
                .ok_or_else(|| RagError::NotFound(id.to_owned()))?;
            let mut doc = row_document(table, &row)?;
            doc.id = id.to_owned();
            Ok(doc)
        })
    }

    fn supports_incremental(&self) -> bool {
        self.tables.iter().any(|t| t.updated_column.is_some())
    }

    fn last_modified<'a>(&'a self, id: &'a str) -> BoxFuture<'a, Result<Option<i64>>> {
        Box::pin(async move { Ok(self.read_document(id).await?.last_modified()) })
    }
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::query(
            "CREATE TABLE articles (
                id INTEGER PRIMARY KEY,
                title TEXT,
                body TEXT,
                author TEXT,
                updated_at TEXT,
                published INTEGER
            )",
        )
        .execute(&pool)
        .await
        .unwrap();
        for (id, title, body, published) in [
            (1, "Rust", "Ownership explained", 1),
            (2, "Go", "Goroutines", 0),
            (3, "Zig", "", 1),
        ] {
            sqlx::query("INSERT INTO articles VALUES (?, ?, ?, 'ann', '2024-01-01 00:00:00', ?)")
                .bind(id)
                .bind(title)
                .bind(body)
                .bind(published)
                .execute(&pool)
                .await
                .unwrap();
        }
        pool
    }

    fn articles() -> SqlTableConfig {
        SqlTableConfig {
            table: "articles".into(),
            columns: vec!["title".into(), "body".into()],
            id_column: "id".into(),
            updated_column: Some("updated_at".into()),
            where_clause: None,
            metadata_columns: vec!["author".into(), "published".into()],
        }
    }

    #[tokio::test]
    async fn rejects_bad_configuration() {
        let pool = pool().await;
        assert!(SqlSource::new(pool.clone(), vec![], 0).is_err());
        let bad = SqlTableConfig {
            table: "articles; DROP TABLE x".into(),
            ..articles()
        };
        assert!(matches!(SqlSource::new(pool.clone(), vec![bad], 0), Err(RagError::Config(_))));
        let no_columns = SqlTableConfig {
            columns: vec![],
            ..articles()
        };
        assert!(SqlSource::new(pool, vec![no_columns], 0).is_err());
    }

    #[tokio::test]
    async fn discovers_rows_as_documents() {
        let source = SqlSource::new(pool().await, vec![articles()], 0).unwrap();
        let mut discovery = source.discover(CancellationToken::new()).unwrap();
        let mut docs = Vec::new();
        while let Some(doc) = discovery.documents.recv().await {
            docs.push(doc);
        }
        assert_eq!(docs.len(), 3);
        let first = &docs[0];
        assert_eq!(first.id, "sqlite:articles:1");
        assert_eq!(first.source_path, "articles/1");
        assert_eq!(first.content, "Rust\n\nOwnership explained");
        assert_eq!(first.metadata["author"], json!("ann"));
        assert_eq!(first.metadata["published"], json!(1));
        assert_eq!(first.last_modified(), Some(1_704_067_200));
        assert_eq!(docs[2].content, "Zig");
        assert!(discovery.errors.recv().await.is_none());
    }

    #[tokio::test]
    async fn where_clause_and_row_limit() {
        let table = SqlTableConfig {
            where_clause: Some("published = 1".into()),
            ..articles()
        };
        let source = SqlSource::new(pool().await, vec![table], 1).unwrap();
        let mut discovery = source.discover(CancellationToken::new()).unwrap();
        let mut count = 0;
        while discovery.documents.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn query_errors_go_to_error_channel() {
        let table = SqlTableConfig {
            table: "missing".into(),
            ..articles()
        };
        let source = SqlSource::new(pool().await, vec![table], 0).unwrap();
        let mut discovery = source.discover(CancellationToken::new()).unwrap();
        assert!(discovery.documents.recv().await.is_none());
        let err = discovery.errors.recv().await.unwrap();
        assert!(err.to_string().contains("failed to index table missing"));
    }

    #[tokio::test]
    async fn read_document_by_id() {
        let source = SqlSource::new(pool().await, vec![articles()], 0).unwrap();
        let doc = source.read_document("sqlite:articles:2").await.unwrap();
        assert_eq!(doc.content, "Go\n\nGoroutines");
        assert_eq!(
            source.last_modified("sqlite:articles:2").await.unwrap(),
            Some(1_704_067_200)
        );
        assert!(matches!(
            source.read_document("sqlite:articles:99").await,
            Err(RagError::NotFound(_))
        ));
        assert!(source.read_document("garbage").await.is_err());
        assert!(source.supports_incremental());
    }
}
