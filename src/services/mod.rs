mod telegram;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{Article, BatchLabel, DuplicateRef, RelatedRef, Summary};

pub use telegram::{split_message, TelegramNotifier};

/// One newly summarized article, ready to hand to a delivery surface.
#[derive(Debug, Clone)]
pub struct DigestEntry {
    pub article: Article,
    pub summary: Summary,
    pub duplicates: Vec<DuplicateRef>,
    pub related: Vec<RelatedRef>,
}

#[derive(Debug, Clone)]
pub struct Digest {
    pub label: BatchLabel,
    pub entries: Vec<DigestEntry>,
}

/// Delivery surface for finished batches. Failures are reported back but
/// never undo persistence.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, digest: &Digest) -> Result<()>;
}
