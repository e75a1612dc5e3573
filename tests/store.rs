//! Store-level invariants against a real on-disk SQLite database.

use chrono::{Duration, Utc};
use tempfile::TempDir;

use tech_digest::db::{Inserted, Repository};
use tech_digest::models::{BatchKind, BatchLabel, NewArticle, SourceKind};

async fn open() -> (TempDir, Repository) {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("digest.db");
    let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
    (dir, repo)
}

fn article(url: &str, title: &str, content: Option<&str>) -> NewArticle {
    NewArticle {
        source: SourceKind::HackerNews,
        url: url.to_string(),
        source_url: url.to_string(),
        title: title.to_string(),
        content: content.map(str::to_string),
    }
}

fn label() -> BatchLabel {
    BatchLabel::scheduled(BatchKind::Morning, Utc::now().date_naive())
}

#[tokio::test]
async fn one_article_per_url_and_content_is_immutable() {
    let (_dir, repo) = open().await;

    let first = repo
        .upsert_article(article("https://a.example/x", "First", Some("original")))
        .await
        .unwrap();
    let second = repo
        .upsert_article(article("https://a.example/x", "Changed", Some("rewritten")))
        .await
        .unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.title, "First");
    assert_eq!(second.content.as_deref(), Some("original"));
    assert_eq!(repo.article_count().await.unwrap(), 1);
}

#[tokio::test]
async fn one_summary_per_article_and_batch() {
    let (_dir, repo) = open().await;
    let a = repo.upsert_article(article("https://a.example/x", "x", None)).await.unwrap();

    let first = repo
        .insert_summary_if_absent(a.id, label(), "text".into())
        .await
        .unwrap();
    let again = repo
        .insert_summary_if_absent(a.id, label(), "other text".into())
        .await
        .unwrap();
    assert!(first.is_new());
    assert_eq!(again, Inserted::AlreadyExists);

    let evening = BatchLabel::scheduled(BatchKind::Evening, Utc::now().date_naive());
    assert!(repo
        .insert_summary_if_absent(a.id, evening, "evening text".into())
        .await
        .unwrap()
        .is_new());

    assert_eq!(repo.summary_count().await.unwrap(), 2);
    let latest = repo.latest_summary(a.id).await.unwrap().unwrap();
    assert_eq!(latest.text, "evening text");
    assert_eq!(latest.kind, BatchKind::Evening);
}

#[tokio::test]
async fn store_item_is_idempotent_per_label() {
    let (_dir, repo) = open().await;

    let first = repo
        .store_item(article("https://a.example/x", "x", None), Some((label(), "s".into())))
        .await
        .unwrap();
    let second = repo
        .store_item(article("https://a.example/x", "x", None), Some((label(), "s".into())))
        .await
        .unwrap();

    assert!(first.article_created);
    assert!(matches!(first.summary, Some(Inserted::New(_))));
    assert!(!second.article_created);
    assert!(matches!(second.summary, Some(Inserted::AlreadyExists)));
    assert_eq!(repo.summary_count().await.unwrap(), 1);
}

#[tokio::test]
async fn summaries_require_an_article() {
    let (_dir, repo) = open().await;
    assert!(repo
        .insert_summary_if_absent(999, label(), "orphan".into())
        .await
        .is_err());
}

#[tokio::test]
async fn bookmarking_twice_leaves_one_row() {
    let (_dir, repo) = open().await;
    let a = repo.upsert_article(article("https://a.example/x", "x", None)).await.unwrap();

    assert!(repo.add_bookmark("u1".into(), a.id).await.unwrap().is_new());
    assert_eq!(repo.add_bookmark("u1".into(), a.id).await.unwrap(), Inserted::AlreadyExists);
    assert!(repo.add_bookmark("u2".into(), a.id).await.unwrap().is_new());

    let entries = repo.list_bookmarks("u1".into()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].article_id, a.id);
    assert!(entries[0].summary_text.is_none());

    assert!(repo.remove_bookmark("u1".into(), a.id).await.unwrap());
    assert!(!repo.remove_bookmark("u1".into(), a.id).await.unwrap());
    assert!(repo.list_bookmarks("u1".into()).await.unwrap().is_empty());
    assert_eq!(repo.list_bookmarks("u2".into()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn settings_are_upserted() {
    let (_dir, repo) = open().await;
    assert_eq!(repo.get_setting("morning_time").await.unwrap(), None);
    repo.set_setting("morning_time", "08:30").await.unwrap();
    repo.set_setting("morning_time", "07:45").await.unwrap();
    assert_eq!(repo.get_setting("morning_time").await.unwrap().as_deref(), Some("07:45"));
}

#[tokio::test]
async fn lease_is_exclusive_until_released_or_expired() {
    let (_dir, repo) = open().await;
    let ttl = Duration::minutes(30);

    assert!(repo.try_acquire_lease("digest", "a", ttl).await.unwrap());
    assert!(!repo.try_acquire_lease("digest", "b", ttl).await.unwrap());
    assert!(!repo.try_acquire_lease("digest", "a", ttl).await.unwrap());
    assert!(!repo.release_lease("digest", "b").await.unwrap());
    assert_eq!(repo.lease_holder("digest").await.unwrap().as_deref(), Some("a"));

    assert!(repo.release_lease("digest", "a").await.unwrap());
    assert!(repo.try_acquire_lease("digest", "b", Duration::seconds(-1)).await.unwrap());
    // b's lease is already expired, so a can take it over.
    assert!(repo.try_acquire_lease("digest", "a", ttl).await.unwrap());
    assert_eq!(repo.lease_holder("digest").await.unwrap().as_deref(), Some("a"));

    assert!(repo.renew_lease("digest", "a", ttl).await.unwrap());
    assert!(!repo.renew_lease("digest", "b", ttl).await.unwrap());
}

#[tokio::test]
async fn search_matches_title_or_summary_case_insensitively() {
    let (_dir, repo) = open().await;
    repo.store_item(
        article("https://a.example/1", "Tokio internals", None),
        Some((label(), "A tour of the scheduler".into())),
    )
    .await
    .unwrap();
    repo.store_item(
        article("https://a.example/2", "Postgres tips", None),
        Some((label(), "Vacuum and the TOKIO-style runtime".into())),
    )
    .await
    .unwrap();
    repo.store_item(article("https://a.example/3", "Tokio unsummarized", None), None)
        .await
        .unwrap();

    let hits = repo.search_summaries("tokio".into()).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(repo.search_summaries("kubernetes".into()).await.unwrap().is_empty());
}

#[tokio::test]
async fn detail_includes_summary_and_related_articles() {
    let (_dir, repo) = open().await;
    let a = repo
        .store_item(article("https://a.example/1", "Rust 2.0", None), Some((label(), "big news".into())))
        .await
        .unwrap()
        .article;
    let b = repo
        .upsert_article(NewArticle {
            source: SourceKind::GeekNews,
            ..article("https://news.hada.io/topic?id=1", "Rust 2.0 released", None)
        })
        .await
        .unwrap();

    repo.link_related(a.id, b.id).await.unwrap();
    repo.link_related(b.id, a.id).await.unwrap();

    let detail = repo.article_detail(a.id).await.unwrap().unwrap();
    assert_eq!(detail.summary.unwrap().text, "big news");
    assert_eq!(detail.related.len(), 1);
    assert_eq!(detail.related[0].source, SourceKind::GeekNews);

    let back = repo.related_articles(b.id).await.unwrap();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].id, a.id);

    assert!(repo.article_detail(12345).await.unwrap().is_none());
}

#[tokio::test]
async fn summarized_urls_cover_the_requested_window() {
    let (_dir, repo) = open().await;
    repo.store_item(article("https://a.example/1", "one", None), Some((label(), "s".into())))
        .await
        .unwrap();
    repo.store_item(article("https://a.example/2", "two", None), None)
        .await
        .unwrap();

    let now = Utc::now();
    let today = repo
        .summarized_urls_between(now - Duration::hours(1), now + Duration::hours(1))
        .await
        .unwrap();
    assert!(today.contains("https://a.example/1"));
    assert!(!today.contains("https://a.example/2"));

    let yesterday = repo
        .summarized_urls_between(now - Duration::hours(48), now - Duration::hours(24))
        .await
        .unwrap();
    assert!(yesterday.is_empty());
}

#[tokio::test]
async fn reopening_keeps_data_and_schema() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("digest.db");
    let path = path.to_str().unwrap().to_string();

    let repo = Repository::new(&path).await.unwrap();
    repo.upsert_article(article("https://a.example/x", "x", None)).await.unwrap();
    drop(repo);

    let reopened = Repository::new(&path).await.unwrap();
    assert_eq!(reopened.article_count().await.unwrap(), 1);
}

#[tokio::test]
async fn readers_see_committed_rows_while_a_write_is_open() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("digest.db");
    let repo = Repository::new(path.to_str().unwrap()).await.unwrap();
    repo.upsert_article(article("https://a.example/committed", "committed", None))
        .await
        .unwrap();

    let writer = rusqlite::Connection::open(&path).unwrap();
    let mode: String = writer
        .query_row("PRAGMA journal_mode", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode, "wal");

    writer
        .execute_batch(
            "BEGIN IMMEDIATE;
             INSERT INTO articles (source, url, source_url, title)
             VALUES ('hackernews', 'https://a.example/pending', 'https://a.example/pending', 'pending');",
        )
        .unwrap();

    // The open write transaction neither blocks nor leaks into reads.
    assert_eq!(repo.article_count().await.unwrap(), 1);
    assert!(repo
        .find_article_by_url("https://a.example/pending".into())
        .await
        .unwrap()
        .is_none());

    writer.execute_batch("COMMIT;").unwrap();
    assert_eq!(repo.article_count().await.unwrap(), 2);
}
