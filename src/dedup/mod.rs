//! Cross-source merging.
//!
//! Candidates are keyed by canonical URL. The first candidate for a key wins,
//! where "first" means source priority, then fetch order within the source;
//! later ones are recorded as duplicates. Distinct URLs from different
//! sources with similar titles are linked as related, never merged.

mod canonical;
mod similarity;

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::config::DedupConfig;
use crate::models::{CandidateItem, CanonicalItem, DuplicateRef, RelatedRef, SourceKind};

pub use canonical::canonicalize_url;
pub use similarity::{jaccard, title_similarity, title_tokens};

#[derive(Debug, Clone)]
pub struct Deduplicator {
    related_threshold: f64,
    batch_size: usize,
}

impl Deduplicator {
    pub fn new(related_threshold: f64, batch_size: usize) -> Self {
        Self {
            related_threshold,
            batch_size,
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(config.related_threshold, config.batch_size)
    }

    /// Merge candidates from all sources into at most `batch_size` canonical
    /// items. URLs whose canonical form is in `exclude` are dropped first.
    /// The output depends only on the input set and the order of candidates
    /// within each source.
    pub fn merge(&self, candidates: Vec<CandidateItem>, exclude: &HashSet<String>) -> Vec<CanonicalItem> {
        let unique = self.collapse(candidates, exclude);
        let mut selected = self.interleave(unique);
        self.link_related(&mut selected);
        selected
    }

    fn collapse(&self, mut candidates: Vec<CandidateItem>, exclude: &HashSet<String>) -> Vec<CanonicalItem> {
        // Stable: keeps fetch order inside each source.
        candidates.sort_by_key(|c| c.source.priority());

        let mut index: HashMap<String, usize> = HashMap::new();
        let mut items: Vec<CanonicalItem> = Vec::new();

        for candidate in candidates {
            let title = candidate.title.trim();
            if candidate.url.trim().is_empty() || title.is_empty() {
                continue;
            }
            let key = canonicalize_url(&candidate.url);
            if exclude.contains(&key) {
                tracing::debug!(url = %key, "skipping already delivered item");
                continue;
            }

            if let Some(&pos) = index.get(&key) {
                let primary = &mut items[pos];
                if primary.source != candidate.source
                    && !primary.duplicates.iter().any(|d| d.source == candidate.source)
                {
                    primary.duplicates.push(DuplicateRef {
                        source: candidate.source,
                        url: candidate.url.clone(),
                    });
                }
                if primary.body.is_none() {
                    primary.body = candidate.body;
                }
                continue;
            }

            index.insert(key.clone(), items.len());
            items.push(CanonicalItem {
                source: candidate.source,
                url: key,
                source_url: candidate.url.trim().to_string(),
                title: title.to_string(),
                body: candidate.body,
                published_at: candidate.published_at,
                duplicates: Vec::new(),
                related: Vec::new(),
            });
        }

        items
    }

    /// Round-robin across sources in priority order until the batch is full.
    fn interleave(&self, items: Vec<CanonicalItem>) -> Vec<CanonicalItem> {
        let mut queues: BTreeMap<SourceKind, VecDeque<CanonicalItem>> = BTreeMap::new();
        for item in items {
            queues.entry(item.source).or_default().push_back(item);
        }

        let mut selected = Vec::with_capacity(self.batch_size);
        while selected.len() < self.batch_size {
            let mut took_any = false;
            for queue in queues.values_mut() {
                if selected.len() >= self.batch_size {
                    break;
                }
                if let Some(item) = queue.pop_front() {
                    selected.push(item);
                    took_any = true;
                }
            }
            if !took_any {
                break;
            }
        }
        selected
    }

    fn link_related(&self, items: &mut [CanonicalItem]) {
        let tokens: Vec<_> = items.iter().map(|i| title_tokens(&i.title)).collect();
        let mut pairs = Vec::new();
        for i in 0..items.len() {
            for j in (i + 1)..items.len() {
                if items[i].source == items[j].source {
                    continue;
                }
                let score = jaccard(&tokens[i], &tokens[j]);
                if score > 0.0 && score >= self.related_threshold {
                    pairs.push((i, j));
                }
            }
        }

        for (i, j) in pairs {
            let (a, b) = (related_ref(&items[i]), related_ref(&items[j]));
            items[i].related.push(b);
            items[j].related.push(a);
        }
    }
}

fn related_ref(item: &CanonicalItem) -> RelatedRef {
    RelatedRef {
        source: item.source,
        url: item.url.clone(),
        title: item.title.clone(),
    }
}
