//! Batch indexing pipeline
//!
//! Turns raw documents into validated, deduplicated, chunked units and
//! upserts them into the corpus:
//! - documents whose (uri, content hash) already completed are skipped
//! - decode and validation failures are recorded per document and never
//!   abort their batch
//! - all units of a batch are upserted as one group under a process-wide
//!   lock, and the whole batch fails together if that upsert fails

mod document;
mod split;
mod text;

pub use document::*;
pub use split::*;
pub use text::*;

use crate::config::Config;
use crate::corpus::Corpus;
use crate::error::{Error, Result};
use crate::meta::{DocumentKey, HistoryStore};
use crate::uri;
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Result of running a set of batches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub total: usize,
    pub failed: usize,
}

impl BatchOutcome {
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0
    }

    /// Status message for the resource: empty on success
    pub fn message(&self) -> String {
        if self.all_succeeded() {
            String::new()
        } else {
            format!(
                "Some batches failed processing ({}/{})",
                self.failed, self.total
            )
        }
    }
}

/// A unit ready for the corpus, with the history key of its document
struct PreparedUnit {
    unit: DocumentUnit,
    uri: String,
    content_hash: String,
}

impl PreparedUnit {
    fn key(&self) -> DocumentKey<'_> {
        DocumentKey {
            document_id: &self.unit.id,
            uri: &self.uri,
            content_hash: &self.content_hash,
        }
    }
}

pub struct IndexingPipeline {
    history: HistoryStore,
    corpus: Arc<dyn Corpus>,
    upsert_lock: Mutex<()>,
    splitter: CodeSplitter,
    printable_threshold: f64,
    sample_chars: usize,
}

impl IndexingPipeline {
    pub fn new(config: &Config, history: HistoryStore, corpus: Arc<dyn Corpus>) -> Result<Self> {
        Ok(Self {
            history,
            corpus,
            upsert_lock: Mutex::new(()),
            splitter: CodeSplitter::from_config(&config.chunk)?,
            printable_threshold: config.indexing.printable_threshold,
            sample_chars: config.indexing.sample_chars,
        })
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }

    /// Process one batch; `true` iff no document failed
    ///
    /// Skipped (already processed) documents do not count as failures.
    pub async fn process_batch(&self, documents: Vec<RawDocument>) -> bool {
        match self.try_process_batch(documents).await {
            Ok(ok) => ok,
            Err(e) => {
                error!("Batch processing failed: {}", e);
                false
            }
        }
    }

    async fn try_process_batch(&self, documents: Vec<RawDocument>) -> Result<bool> {
        let mut valid: Vec<PreparedUnit> = Vec::new();
        // (uri, parent id, unit ids) of every document that produced units
        let mut refreshed: Vec<(String, String, Vec<String>)> = Vec::new();
        let mut invalid = 0usize;

        for document in documents {
            let content_hash = document.content_hash();

            if self
                .history
                .is_processed(&document.uri, &content_hash)
                .await?
            {
                debug!(
                    "Document with same hash already processed, skipping: {}",
                    document.id
                );
                continue;
            }

            debug!("Processing document: {}", document.id);
            let document_id = document.id.clone();
            let doc_uri = document.uri.clone();
            let key = DocumentKey {
                document_id: &document_id,
                uri: &doc_uri,
                content_hash: &content_hash,
            };

            let text = match decode(&document_id, document.content) {
                Ok(text) => text,
                Err(e) => {
                    warn!("{}", e);
                    self.history.mark_failed(key, &e.to_string()).await?;
                    invalid += 1;
                    continue;
                }
            };

            if !is_valid_text(&text, self.printable_threshold, self.sample_chars) {
                let e = Error::Validation(document_id.clone());
                warn!("{}", e);
                self.history.mark_failed(key, &e.to_string()).await?;
                invalid += 1;
                continue;
            }

            let cleaned = clean_text(&text);
            let parent_id = uri::parent_document_id(&document_id).to_string();
            let units = self.split_units(&document_id, &parent_id, &doc_uri, cleaned);
            refreshed.push((
                doc_uri.clone(),
                parent_id,
                units.iter().map(|u| u.id.clone()).collect(),
            ));
            for unit in units {
                valid.push(PreparedUnit {
                    unit,
                    uri: doc_uri.clone(),
                    content_hash: content_hash.clone(),
                });
            }
        }

        for (doc_uri, parent_id, unit_ids) in &refreshed {
            let keep: Vec<&str> = unit_ids.iter().map(String::as_str).collect();
            let pruned = self.history.prune_units(doc_uri, parent_id, &keep).await?;
            if pruned > 0 {
                debug!("Dropped {} superseded unit records of {}", pruned, parent_id);
            }
        }

        for prepared in &valid {
            self.history
                .mark_indexing(prepared.key(), Some(&prepared.unit.metadata))
                .await?;
        }

        if !valid.is_empty() {
            let units = valid.iter().map(|p| p.unit.clone()).collect::<Vec<_>>();
            let result = {
                let _guard = self.upsert_lock.lock().await;
                self.corpus.upsert(units).await
            };

            if let Err(e) = result {
                let message = Error::Upsert(e.to_string()).to_string();
                error!("{}", message);
                for prepared in &valid {
                    self.history.mark_failed(prepared.key(), &message).await?;
                }
                return Ok(false);
            }

            for prepared in &valid {
                self.history
                    .mark_completed(prepared.key(), Some(&prepared.unit.metadata))
                    .await?;
            }
        }

        Ok(invalid == 0)
    }

    /// Expand a cleaned document into corpus units
    ///
    /// Local source files are split into chunks of `parent_id`; everything
    /// else, and any document the splitter rejects, stays whole.
    fn split_units(
        &self,
        document_id: &str,
        parent_id: &str,
        doc_uri: &str,
        text: String,
    ) -> Vec<DocumentUnit> {
        let language = if uri::is_local(doc_uri) {
            language_for_path(&uri::uri_to_path(doc_uri))
        } else {
            None
        };

        let Some(language) = language else {
            return vec![DocumentUnit::whole(document_id, doc_uri, text)];
        };

        match self.splitter.split(&text) {
            Ok(chunks) => {
                let total = chunks.len();
                chunks
                    .into_iter()
                    .enumerate()
                    .map(|(i, chunk)| {
                        DocumentUnit::chunk(parent_id, doc_uri, language, i, total, chunk)
                    })
                    .collect()
            }
            Err(e) => {
                error!(
                    "Error splitting document: {}, so skipping split, error: {}",
                    document_id, e
                );
                vec![DocumentUnit::whole(document_id, doc_uri, text)]
            }
        }
    }

    /// Split `documents` into batches and process up to `workers` at a time
    pub async fn run_batches(
        &self,
        documents: Vec<RawDocument>,
        batch_size: usize,
        workers: usize,
    ) -> BatchOutcome {
        let batch_size = batch_size.max(1);
        let mut batches: Vec<Vec<RawDocument>> = Vec::new();
        let mut iter = documents.into_iter().peekable();
        while iter.peek().is_some() {
            batches.push(iter.by_ref().take(batch_size).collect());
        }

        let total = batches.len();
        info!("Splitting documents into {} batches for processing", total);

        let results: Vec<bool> = stream::iter(batches)
            .map(|batch| self.process_batch(batch))
            .buffer_unordered(workers.max(1))
            .collect()
            .await;

        BatchOutcome {
            total,
            failed: results.iter().filter(|ok| !**ok).count(),
        }
    }
}
