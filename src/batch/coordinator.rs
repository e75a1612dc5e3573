use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use futures::FutureExt;
use tokio::sync::watch;

use crate::ai::{self, Summarize};
use crate::config::Config;
use crate::db::Repository;
use crate::dedup::Deduplicator;
use crate::error::{AppError, Result};
use crate::models::{BatchKind, BatchLabel, CanonicalItem, NewArticle, SourceKind};
use crate::services::{Digest, DigestEntry, Notifier, TelegramNotifier};
use crate::sources::{FetchError, SourceRegistry};

use super::lock::RunLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStage {
    Idle,
    Locking,
    Fetching,
    Deduplicating,
    Summarizing,
    Persisting,
    Notifying,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// Every stage succeeded for every source and item.
    Completed,
    /// Finished, but a source, a summary or the delivery failed.
    Degraded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    NotAttempted,
    /// Nothing new to send.
    Skipped,
    Delivered,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source: SourceKind,
    pub fetched: usize,
    pub error: Option<FetchError>,
}

#[derive(Debug, Clone)]
pub struct BatchReport {
    pub label: BatchLabel,
    pub outcome: BatchOutcome,
    /// Stage in which a failed batch stopped.
    pub failed_stage: Option<BatchStage>,
    pub error: Option<String>,
    pub sources: Vec<SourceReport>,
    pub merged: usize,
    pub articles_created: usize,
    pub summaries_created: usize,
    pub summaries_existing: usize,
    /// Canonical URLs whose summarization failed.
    pub summary_failures: Vec<String>,
    pub links_created: usize,
    pub delivery: DeliveryStatus,
}

impl BatchReport {
    fn new(label: BatchLabel) -> Self {
        Self {
            label,
            outcome: BatchOutcome::Completed,
            failed_stage: None,
            error: None,
            sources: Vec::new(),
            merged: 0,
            articles_created: 0,
            summaries_created: 0,
            summaries_existing: 0,
            summary_failures: Vec::new(),
            links_created: 0,
            delivery: DeliveryStatus::NotAttempted,
        }
    }

    pub fn fetch_failures(&self) -> Vec<&FetchError> {
        self.sources.iter().filter_map(|s| s.error.as_ref()).collect()
    }

    fn fail(mut self, stage: BatchStage, error: &AppError) -> Self {
        self.outcome = BatchOutcome::Failed;
        self.failed_stage = Some(stage);
        self.error = Some(error.to_string());
        self
    }

    fn finish(mut self) -> Self {
        let degraded = !self.fetch_failures().is_empty()
            || !self.summary_failures.is_empty()
            || matches!(self.delivery, DeliveryStatus::Failed(_));
        self.outcome = if degraded {
            BatchOutcome::Degraded
        } else {
            BatchOutcome::Completed
        };
        self
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Batch {}: {:?}", self.label, self.outcome)?;
        if let (Some(stage), Some(error)) = (self.failed_stage, &self.error) {
            writeln!(f, "  failed during {:?}: {}", stage, error)?;
        }
        for source in &self.sources {
            match &source.error {
                Some(e) => writeln!(f, "  {:<12} failed: {}", source.source.as_str(), e)?,
                None => writeln!(f, "  {:<12} {} item(s)", source.source.as_str(), source.fetched)?,
            }
        }
        writeln!(f, "  merged: {}", self.merged)?;
        writeln!(f, "  new articles: {}", self.articles_created)?;
        writeln!(
            f,
            "  summaries: {} new, {} already present, {} failed",
            self.summaries_created,
            self.summaries_existing,
            self.summary_failures.len()
        )?;
        writeln!(f, "  related links: {}", self.links_created)?;
        write!(f, "  delivery: {:?}", self.delivery)
    }
}

/// Drives one batch end to end: lock, fetch, merge, summarize, persist and
/// notify. At most one batch runs at a time across every coordinator that
/// shares the store.
pub struct BatchCoordinator {
    repo: Repository,
    sources: SourceRegistry,
    dedup: Deduplicator,
    summarizer: Box<dyn Summarize>,
    notifier: Box<dyn Notifier>,
    lock: RunLock,
    tz: Tz,
    source_limit: usize,
    stage: watch::Sender<BatchStage>,
}

impl BatchCoordinator {
    pub fn new(
        repo: Repository,
        sources: SourceRegistry,
        summarizer: Box<dyn Summarize>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let lock = RunLock::new(repo.clone(), Duration::minutes(30));
        let (stage, _) = watch::channel(BatchStage::Idle);
        Self {
            repo,
            sources,
            dedup: Deduplicator::new(0.5, 10),
            summarizer,
            notifier,
            lock,
            tz: chrono_tz::Asia::Seoul,
            source_limit: 10,
            stage,
        }
    }

    pub fn from_config(config: &Config, repo: Repository) -> Result<Self> {
        config.validate_for_pipeline()?;
        let sources = SourceRegistry::from_config(config)?;
        let summarizer = ai::from_config(&config.summarizer)?;
        let notifier = TelegramNotifier::from_config(&config.telegram)?;

        Ok(Self::new(repo, sources, summarizer, Box::new(notifier))
            .with_dedup(Deduplicator::from_config(&config.dedup))
            .with_timezone(config.tz()?)
            .with_source_limit(config.sources.limit)
            .with_lock_ttl(Duration::minutes(i64::from(config.lock_ttl_minutes))))
    }

    pub fn with_dedup(mut self, dedup: Deduplicator) -> Self {
        self.dedup = dedup;
        self
    }

    pub fn with_timezone(mut self, tz: Tz) -> Self {
        self.tz = tz;
        self
    }

    pub fn with_source_limit(mut self, limit: usize) -> Self {
        self.source_limit = limit;
        self
    }

    pub fn with_lock_ttl(mut self, ttl: Duration) -> Self {
        self.lock = RunLock::new(self.repo.clone(), ttl);
        self
    }

    pub fn stage(&self) -> BatchStage {
        *self.stage.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BatchStage> {
        self.stage.subscribe()
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn lock(&self) -> &RunLock {
        &self.lock
    }

    /// Run a batch of `kind` labelled for the current local time.
    pub async fn run(&self, kind: BatchKind) -> Result<BatchReport> {
        let now = Utc::now().with_timezone(&self.tz);
        self.run_labeled(BatchLabel::for_kind(kind, &now)).await
    }

    /// Run a batch under an explicit idempotency label. Returns
    /// `AlreadyRunning` without waiting when another batch holds the lock.
    pub async fn run_labeled(&self, label: BatchLabel) -> Result<BatchReport> {
        // A refused run must not touch the stage of the batch that holds the lock.
        let guard = match self.lock.try_acquire().await {
            Ok(guard) => guard,
            Err(AppError::AlreadyRunning) => {
                tracing::info!(batch = %label, "another batch is running, skipping");
                return Err(AppError::AlreadyRunning);
            }
            Err(e) => {
                tracing::error!(batch = %label, error = %e, "could not take run lock");
                return Err(e);
            }
        };
        self.set_stage(&label, BatchStage::Locking);

        let outcome = AssertUnwindSafe(self.execute(label.clone())).catch_unwind().await;

        if let Err(e) = guard.release().await {
            tracing::error!(batch = %label, error = %e, "failed to release run lock");
        }

        match outcome {
            Ok(report) => {
                match report.outcome {
                    BatchOutcome::Failed => {
                        tracing::error!(batch = %label, error = ?report.error, "batch failed");
                        self.set_stage(&label, BatchStage::Failed);
                    }
                    outcome => {
                        tracing::info!(
                            batch = %label,
                            ?outcome,
                            summaries = report.summaries_created,
                            "batch finished"
                        );
                        self.set_stage(&label, BatchStage::Idle);
                    }
                }
                Ok(report)
            }
            Err(_) => {
                tracing::error!(batch = %label, "batch panicked");
                self.set_stage(&label, BatchStage::Failed);
                Err(AppError::Other(anyhow::anyhow!("batch {label} panicked")))
            }
        }
    }

    async fn execute(&self, label: BatchLabel) -> BatchReport {
        let mut report = BatchReport::new(label.clone());

        // Fetching
        self.set_stage(&label, BatchStage::Fetching);
        let mut candidates = Vec::new();
        let mut any_succeeded = false;
        for batch in self.sources.fetch_all(self.source_limit).await {
            match batch.result {
                Ok(items) => {
                    any_succeeded = true;
                    report.sources.push(SourceReport {
                        source: batch.source,
                        fetched: items.len(),
                        error: None,
                    });
                    candidates.extend(items);
                }
                Err(e) => report.sources.push(SourceReport {
                    source: batch.source,
                    fetched: 0,
                    error: Some(e),
                }),
            }
        }
        if !any_succeeded {
            return report.fail(BatchStage::Fetching, &AppError::NoSources);
        }

        // Deduplicating
        self.set_stage(&label, BatchStage::Deduplicating);
        let (day_start, day_end) = local_day_bounds(self.tz, Utc::now());
        let delivered = match self.repo.summarized_urls_between(day_start, day_end).await {
            Ok(urls) => urls,
            Err(e) => return report.fail(BatchStage::Deduplicating, &e),
        };
        let merged = self.dedup.merge(candidates, &delivered);
        report.merged = merged.len();
        tracing::info!(batch = %label, merged = merged.len(), excluded = delivered.len(), "merged candidates");

        // Summarizing, strictly one item at a time.
        self.set_stage(&label, BatchStage::Summarizing);
        let mut summarized: Vec<(CanonicalItem, Option<String>)> = Vec::with_capacity(merged.len());
        for item in merged {
            let text = match self.summarizer.summarize(&item).await {
                Ok(text) => Some(text),
                Err(e) => {
                    tracing::warn!(batch = %label, url = %item.url, error = %e, "summarization failed");
                    report.summary_failures.push(item.url.clone());
                    None
                }
            };
            summarized.push((item, text));
        }

        // Persisting
        self.set_stage(&label, BatchStage::Persisting);
        let mut ids: HashMap<String, i64> = HashMap::new();
        let mut entries = Vec::new();
        for (item, text) in &summarized {
            let stored = match self
                .repo
                .store_item(NewArticle::from(item), text.clone().map(|t| (label.clone(), t)))
                .await
            {
                Ok(stored) => stored,
                Err(e) => return report.fail(BatchStage::Persisting, &e),
            };

            if stored.article_created {
                report.articles_created += 1;
            }
            match stored.summary {
                Some(crate::db::Inserted::New(summary)) => {
                    report.summaries_created += 1;
                    entries.push(DigestEntry {
                        article: stored.article.clone(),
                        summary,
                        duplicates: item.duplicates.clone(),
                        related: item.related.clone(),
                    });
                }
                Some(crate::db::Inserted::AlreadyExists) => report.summaries_existing += 1,
                None => {}
            }
            ids.insert(item.url.clone(), stored.article.id);
        }

        for (item, _) in &summarized {
            let Some(&id) = ids.get(&item.url) else { continue };
            for related in &item.related {
                let Some(&other) = ids.get(&related.url) else { continue };
                if id < other {
                    if let Err(e) = self.repo.link_related(id, other).await {
                        return report.fail(BatchStage::Persisting, &e);
                    }
                    report.links_created += 1;
                }
            }
        }

        // Notifying
        self.set_stage(&label, BatchStage::Notifying);
        if entries.is_empty() {
            report.delivery = DeliveryStatus::Skipped;
        } else {
            let digest = Digest {
                label: label.clone(),
                entries,
            };
            report.delivery = match self.notifier.deliver(&digest).await {
                Ok(()) => DeliveryStatus::Delivered,
                Err(e) => {
                    tracing::warn!(batch = %label, error = %e, "delivery failed");
                    DeliveryStatus::Failed(e.to_string())
                }
            };
        }

        report.finish()
    }

    fn set_stage(&self, label: &BatchLabel, stage: BatchStage) {
        tracing::info!(batch = %label, ?stage, "batch stage");
        self.stage.send_replace(stage);
    }
}

/// UTC bounds of the local calendar day containing `now`.
pub fn local_day_bounds(tz: Tz, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let date = now.with_timezone(&tz).date_naive();
    let start_of = |d: chrono::NaiveDate| {
        tz.from_local_datetime(&d.and_time(NaiveTime::MIN))
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
    };
    let start = start_of(date).unwrap_or(now - Duration::hours(24));
    let end = date
        .succ_opt()
        .and_then(start_of)
        .unwrap_or(start + Duration::hours(24));
    (start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_bounds_follow_the_local_zone() {
        // 2026-10-18 23:30 UTC is already 2026-10-19 in Seoul.
        let now = Utc.with_ymd_and_hms(2026, 10, 18, 23, 30, 0).unwrap();
        let (start, end) = local_day_bounds(chrono_tz::Asia::Seoul, now);
        assert_eq!(start, Utc.with_ymd_and_hms(2026, 10, 18, 15, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 10, 19, 15, 0, 0).unwrap());
    }

    #[test]
    fn degraded_when_anything_was_lost() {
        let label = BatchLabel::manual(&Utc::now());
        let clean = BatchReport::new(label.clone()).finish();
        assert_eq!(clean.outcome, BatchOutcome::Completed);

        let mut report = BatchReport::new(label);
        report.delivery = DeliveryStatus::Failed("chat not found".into());
        assert_eq!(report.finish().outcome, BatchOutcome::Degraded);
    }
}
