use std::collections::HashSet;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{
    Article, ArticleDetail, BatchKind, BatchLabel, Bookmark, BookmarkEntry, NewArticle,
    SearchHit, SourceKind, Summary,
};

use super::schema::MIGRATIONS;
use super::Inserted;

const ARTICLE_COLUMNS: &str = "id, source, url, source_url, title, content, created_at";
const SUMMARY_COLUMNS: &str = "id, article_id, summary_text, batch, kind, created_at";

/// System of record for articles, summaries, bookmarks, settings and the run
/// lease. All statements go through one background connection, so writes from
/// this process are serialized; WAL keeps readers in other processes unblocked.
#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

/// Result of persisting one canonical item.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub article: Article,
    pub article_created: bool,
    pub summary: Option<Inserted<Summary>>,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path).await?;

        let mode = conn.call(|conn| {
            conn.busy_timeout(Duration::from_secs(5))?;
            let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            migrate(conn)?;
            Ok(mode)
        })
        .await?;
        if !mode.eq_ignore_ascii_case("wal") {
            tracing::warn!(db_path, journal_mode = %mode, "WAL unavailable, readers may block on writes");
        }

        Ok(Self { conn })
    }

    // Article operations

    /// Insert the article if its URL is new, otherwise return the existing
    /// row untouched. Content is never overwritten.
    pub async fn upsert_article(&self, article: NewArticle) -> Result<Article> {
        let article = self
            .conn
            .call(move |conn| Ok(upsert_article_row(conn, &article)?.0))
            .await?;
        Ok(article)
    }

    /// Upsert the article and, when given, its summary for `label` in one
    /// transaction, so an article never references a half-written summary.
    pub async fn store_item(
        &self,
        article: NewArticle,
        summary: Option<(BatchLabel, String)>,
    ) -> Result<StoredItem> {
        let stored = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let (article, article_created) = upsert_article_row(&tx, &article)?;
                let summary = match summary {
                    Some((label, text)) => {
                        Some(insert_summary_row(&tx, article.id, &label, &text)?)
                    }
                    None => None,
                };
                tx.commit()?;
                Ok(StoredItem {
                    article,
                    article_created,
                    summary,
                })
            })
            .await?;
        Ok(stored)
    }

    pub async fn get_article(&self, id: i64) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let article = conn
                    .query_row(
                        &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?1"),
                        params![id],
                        article_from_row,
                    )
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn find_article_by_url(&self, url: String) -> Result<Option<Article>> {
        let article = self
            .conn
            .call(move |conn| {
                let article = conn
                    .query_row(
                        &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?1"),
                        params![url],
                        article_from_row,
                    )
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn article_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM articles").await
    }

    // Related links

    /// Cross-reference two articles in both directions. Idempotent.
    pub async fn link_related(&self, a: i64, b: i64) -> Result<()> {
        if a == b {
            return Ok(());
        }
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let now = timestamp(&Utc::now());
                for (from, to) in [(a, b), (b, a)] {
                    tx.execute(
                        "INSERT OR IGNORE INTO article_links (article_id, related_id, created_at) VALUES (?1, ?2, ?3)",
                        params![from, to, now],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn related_articles(&self, article_id: i64) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT a.id, a.source, a.url, a.source_url, a.title, a.content, a.created_at
                       FROM article_links l
                       JOIN articles a ON a.id = l.related_id
                       WHERE l.article_id = ?1
                       ORDER BY a.id"#,
                )?;
                let articles = stmt
                    .query_map(params![article_id], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    // Summary operations

    pub async fn insert_summary_if_absent(
        &self,
        article_id: i64,
        label: BatchLabel,
        text: String,
    ) -> Result<Inserted<Summary>> {
        let inserted = self
            .conn
            .call(move |conn| Ok(insert_summary_row(conn, article_id, &label, &text)?))
            .await?;
        Ok(inserted)
    }

    pub async fn latest_summary(&self, article_id: i64) -> Result<Option<Summary>> {
        let summary = self
            .conn
            .call(move |conn| {
                let summary = conn
                    .query_row(
                        &format!(
                            "SELECT {SUMMARY_COLUMNS} FROM summaries WHERE article_id = ?1 ORDER BY id DESC LIMIT 1"
                        ),
                        params![article_id],
                        summary_from_row,
                    )
                    .optional()?;
                Ok(summary)
            })
            .await?;
        Ok(summary)
    }

    pub async fn summary_count(&self) -> Result<i64> {
        self.count("SELECT COUNT(*) FROM summaries").await
    }

    /// Canonical URLs that received a summary in `[start, end)`, any batch.
    pub async fn summarized_urls_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<HashSet<String>> {
        let (start, end) = (timestamp(&start), timestamp(&end));
        let urls = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT DISTINCT a.url
                       FROM articles a
                       JOIN summaries s ON s.article_id = a.id
                       WHERE s.created_at >= ?1 AND s.created_at < ?2"#,
                )?;
                let urls = stmt
                    .query_map(params![start, end], |row| row.get::<_, String>(0))?
                    .collect::<std::result::Result<HashSet<_>, _>>()?;
                Ok(urls)
            })
            .await?;
        Ok(urls)
    }

    /// Case-insensitive match on article title or summary text, newest first.
    pub async fn search_summaries(&self, keyword: String) -> Result<Vec<SearchHit>> {
        let hits = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT a.id, a.source, a.url, a.title, s.summary_text, s.batch, s.created_at
                       FROM summaries s
                       JOIN articles a ON s.article_id = a.id
                       WHERE instr(lower(a.title), lower(?1)) > 0
                          OR instr(lower(s.summary_text), lower(?1)) > 0
                       ORDER BY s.created_at DESC, s.id DESC"#,
                )?;
                let hits = stmt
                    .query_map(params![keyword], |row| {
                        Ok(SearchHit {
                            article_id: row.get(0)?,
                            source: row.get(1)?,
                            url: row.get(2)?,
                            title: row.get(3)?,
                            summary_text: row.get(4)?,
                            batch: row.get(5)?,
                            created_at: datetime_column(row, 6)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(hits)
            })
            .await?;
        Ok(hits)
    }

    pub async fn article_detail(&self, article_id: i64) -> Result<Option<ArticleDetail>> {
        let Some(article) = self.get_article(article_id).await? else {
            return Ok(None);
        };
        let summary = self.latest_summary(article_id).await?;
        let related = self.related_articles(article_id).await?;
        Ok(Some(ArticleDetail {
            article,
            summary,
            related,
        }))
    }

    // Bookmarks

    pub async fn add_bookmark(&self, user_id: String, article_id: i64) -> Result<Inserted<Bookmark>> {
        let inserted = self
            .conn
            .call(move |conn| {
                let now = timestamp(&Utc::now());
                let changed = conn.execute(
                    "INSERT INTO bookmarks (user_id, article_id, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(user_id, article_id) DO NOTHING",
                    params![user_id, article_id, now],
                )?;
                if changed == 0 {
                    return Ok(Inserted::AlreadyExists);
                }
                let bookmark = conn.query_row(
                    "SELECT id, user_id, article_id, created_at FROM bookmarks WHERE id = ?1",
                    params![conn.last_insert_rowid()],
                    |row| {
                        Ok(Bookmark {
                            id: row.get(0)?,
                            user_id: row.get(1)?,
                            article_id: row.get(2)?,
                            created_at: datetime_column(row, 3)?,
                        })
                    },
                )?;
                Ok(Inserted::New(bookmark))
            })
            .await?;
        Ok(inserted)
    }

    /// Returns whether a bookmark was removed.
    pub async fn remove_bookmark(&self, user_id: String, article_id: i64) -> Result<bool> {
        let removed = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM bookmarks WHERE user_id = ?1 AND article_id = ?2",
                    params![user_id, article_id],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(removed)
    }

    pub async fn list_bookmarks(&self, user_id: String) -> Result<Vec<BookmarkEntry>> {
        let entries = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT b.id, b.created_at, a.id, a.source, a.url, a.title,
                              (SELECT s.summary_text FROM summaries s
                               WHERE s.article_id = a.id ORDER BY s.id DESC LIMIT 1)
                       FROM bookmarks b
                       JOIN articles a ON b.article_id = a.id
                       WHERE b.user_id = ?1
                       ORDER BY b.created_at DESC, b.id DESC"#,
                )?;
                let entries = stmt
                    .query_map(params![user_id], |row| {
                        Ok(BookmarkEntry {
                            bookmark_id: row.get(0)?,
                            bookmarked_at: datetime_column(row, 1)?,
                            article_id: row.get(2)?,
                            source: row.get(3)?,
                            url: row.get(4)?,
                            title: row.get(5)?,
                            summary_text: row.get(6)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(entries)
            })
            .await?;
        Ok(entries)
    }

    // Settings

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        let value = self
            .conn
            .call(move |conn| {
                let value = conn
                    .query_row(
                        "SELECT value FROM settings WHERE key = ?1",
                        params![key],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(value)
            })
            .await?;
        Ok(value)
    }

    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO settings (key, value, updated_at) VALUES (?1, ?2, ?3)
                       ON CONFLICT(key) DO UPDATE SET
                           value = excluded.value,
                           updated_at = excluded.updated_at"#,
                    params![key, value, timestamp(&Utc::now())],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Run lease

    /// Take the named lease for `holder` unless another holder has an
    /// unexpired one. Never waits.
    pub async fn try_acquire_lease(
        &self,
        name: &str,
        holder: &str,
        ttl: chrono::Duration,
    ) -> Result<bool> {
        let (name, holder) = (name.to_string(), holder.to_string());
        let acquired = self
            .conn
            .call(move |conn| {
                let now = Utc::now();
                let changed = conn.execute(
                    r#"INSERT INTO run_lock (name, holder, acquired_at, expires_at) VALUES (?1, ?2, ?3, ?4)
                       ON CONFLICT(name) DO UPDATE SET
                           holder = excluded.holder,
                           acquired_at = excluded.acquired_at,
                           expires_at = excluded.expires_at
                       WHERE run_lock.expires_at <= excluded.acquired_at"#,
                    params![name, holder, lease_timestamp(&now), lease_timestamp(&(now + ttl))],
                )?;
                Ok(changed == 1)
            })
            .await?;
        Ok(acquired)
    }

    /// Push the expiry of `holder`'s lease to `ttl` from now. False when the
    /// lease is gone or belongs to someone else.
    pub async fn renew_lease(&self, name: &str, holder: &str, ttl: chrono::Duration) -> Result<bool> {
        let (name, holder) = (name.to_string(), holder.to_string());
        let renewed = self
            .conn
            .call(move |conn| {
                let expires_at = lease_timestamp(&(Utc::now() + ttl));
                let n = conn.execute(
                    "UPDATE run_lock SET expires_at = ?3 WHERE name = ?1 AND holder = ?2",
                    params![name, holder, expires_at],
                )?;
                Ok(n == 1)
            })
            .await?;
        Ok(renewed)
    }

    /// Drop the lease if `holder` still owns it.
    pub async fn release_lease(&self, name: &str, holder: &str) -> Result<bool> {
        let (name, holder) = (name.to_string(), holder.to_string());
        let released = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "DELETE FROM run_lock WHERE name = ?1 AND holder = ?2",
                    params![name, holder],
                )?;
                Ok(n > 0)
            })
            .await?;
        Ok(released)
    }

    pub async fn lease_holder(&self, name: &str) -> Result<Option<String>> {
        let name = name.to_string();
        let holder = self
            .conn
            .call(move |conn| {
                let holder = conn
                    .query_row(
                        "SELECT holder FROM run_lock WHERE name = ?1",
                        params![name],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?;
                Ok(holder)
            })
            .await?;
        Ok(holder)
    }

    async fn count(&self, sql: &'static str) -> Result<i64> {
        let n = self
            .conn
            .call(move |conn| Ok(conn.query_row(sql, [], |row| row.get::<_, i64>(0))?))
            .await?;
        Ok(n)
    }
}

fn migrate(conn: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    let version: usize = conn.query_row("PRAGMA user_version", [], |row| row.get::<_, i64>(0))? as usize;
    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(version) {
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.execute_batch(&format!("PRAGMA user_version = {}", idx + 1))?;
        tx.commit()?;
        tracing::info!(version = idx + 1, "applied schema migration");
    }
    Ok(())
}

fn upsert_article_row(
    conn: &rusqlite::Connection,
    article: &NewArticle,
) -> rusqlite::Result<(Article, bool)> {
    let inserted = conn.execute(
        r#"INSERT INTO articles (source, url, source_url, title, content, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6)
           ON CONFLICT(url) DO NOTHING"#,
        params![
            article.source,
            article.url,
            article.source_url,
            article.title,
            article.content,
            timestamp(&Utc::now()),
        ],
    )?;
    let stored = conn.query_row(
        &format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE url = ?1"),
        params![article.url],
        article_from_row,
    )?;
    Ok((stored, inserted == 1))
}

fn insert_summary_row(
    conn: &rusqlite::Connection,
    article_id: i64,
    label: &BatchLabel,
    text: &str,
) -> rusqlite::Result<Inserted<Summary>> {
    let changed = conn.execute(
        r#"INSERT INTO summaries (article_id, summary_text, batch, kind, created_at)
           VALUES (?1, ?2, ?3, ?4, ?5)
           ON CONFLICT(article_id, batch) DO NOTHING"#,
        params![
            article_id,
            text,
            label.as_str(),
            label.kind(),
            timestamp(&Utc::now())
        ],
    )?;
    if changed == 0 {
        return Ok(Inserted::AlreadyExists);
    }
    let summary = conn.query_row(
        &format!("SELECT {SUMMARY_COLUMNS} FROM summaries WHERE id = ?1"),
        params![conn.last_insert_rowid()],
        summary_from_row,
    )?;
    Ok(Inserted::New(summary))
}

/// Fixed-width UTC text so stored timestamps compare lexicographically.
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Lease rows only compare with each other and need sub-second expiry.
fn lease_timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56Z")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn datetime_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("bad timestamp: {raw}").into(),
        )
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        source: row.get(1)?,
        url: row.get(2)?,
        source_url: row.get(3)?,
        title: row.get(4)?,
        content: row.get(5)?,
        created_at: datetime_column(row, 6)?,
    })
}

fn summary_from_row(row: &Row) -> rusqlite::Result<Summary> {
    Ok(Summary {
        id: row.get(0)?,
        article_id: row.get(1)?,
        text: row.get(2)?,
        batch: row.get(3)?,
        kind: row.get(4)?,
        created_at: datetime_column(row, 5)?,
    })
}

impl ToSql for SourceKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for SourceKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

impl ToSql for BatchKind {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BatchKind {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|e: String| FromSqlError::Other(e.into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamps_sort_lexicographically() {
        let a = Utc.with_ymd_and_hms(2026, 1, 9, 23, 0, 0).unwrap();
        let b = Utc.with_ymd_and_hms(2026, 1, 10, 1, 0, 0).unwrap();
        assert!(timestamp(&a) < timestamp(&b));
        assert_eq!(timestamp(&a), "2026-01-09T23:00:00Z");
    }

    #[test]
    fn lease_timestamps_keep_milliseconds() {
        let a = Utc.with_ymd_and_hms(2026, 1, 9, 23, 0, 0).unwrap();
        let b = a + chrono::Duration::milliseconds(250);
        assert_eq!(lease_timestamp(&b), "2026-01-09T23:00:00.250Z");
        assert!(lease_timestamp(&a) < lease_timestamp(&b));
    }

    #[test]
    fn parses_both_timestamp_formats() {
        assert!(parse_datetime("2026-01-11T12:34:56Z").is_some());
        assert!(parse_datetime("2026-01-11 12:34:56").is_some());
        assert!(parse_datetime("yesterday").is_none());
    }
}
