//! Retrieval scoped to one resource
//!
//! The corpus is global, so query results are filtered down to the
//! requested local directory or remote origin before they are returned and
//! passed to the LLM for answer synthesis.

use crate::config::Config;
use crate::corpus::{Corpus, ScoredUnit};
use crate::error::{Error, Result};
use crate::pipeline::{clean_text, is_valid_text};
use crate::provider::LlmModel;
use crate::uri;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// A source returned with a retrieval answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub uri: String,
    pub content: String,
    pub score: f32,
}

/// Answer and the in-scope sources it was built from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrieveResponse {
    pub response: String,
    pub sources: Vec<Source>,
}

/// Requested scope of a query
#[derive(Debug)]
enum Scope {
    /// Canonical directory
    Local(PathBuf),
    /// Origin URL and its prefix form ending in `/`
    Remote { origin: String, prefix: String },
}

impl Scope {
    async fn resolve(base_uri: &str) -> Result<Self> {
        if uri::is_local(base_uri) {
            let dir = uri::uri_to_path(base_uri);
            let dir = tokio::fs::canonicalize(&dir)
                .await
                .map_err(|_| Error::NotFound(format!("Directory not found: {}", base_uri)))?;
            Ok(Scope::Local(dir))
        } else {
            Ok(Scope::Remote {
                origin: base_uri.to_string(),
                prefix: uri::with_trailing_slash(base_uri),
            })
        }
    }
}

/// File contents read while filtering one query's results
#[derive(Default)]
struct FileCache {
    contents: HashMap<PathBuf, Option<String>>,
}

impl FileCache {
    async fn get(&mut self, path: &Path) -> Option<&str> {
        if !self.contents.contains_key(path) {
            let content = match tokio::fs::read_to_string(path).await {
                Ok(content) => Some(content),
                Err(e) => {
                    warn!("Unable to read {:?}: {}", path, e);
                    None
                }
            };
            self.contents.insert(path.to_path_buf(), content);
        }
        self.contents.get(path).and_then(|c| c.as_deref())
    }
}

/// Filters corpus results to a scope and synthesizes an answer
pub struct RetrievalScoper {
    corpus: Arc<dyn Corpus>,
    llm: Option<Arc<dyn LlmModel>>,
    candidate_k: usize,
    printable_threshold: f64,
    sample_chars: usize,
}

impl RetrievalScoper {
    pub fn new(config: &Config, corpus: Arc<dyn Corpus>, llm: Option<Arc<dyn LlmModel>>) -> Self {
        Self {
            corpus,
            llm,
            candidate_k: config.retrieval.candidate_k,
            printable_threshold: config.indexing.printable_threshold,
            sample_chars: config.indexing.sample_chars,
        }
    }

    /// Query the corpus and keep the top `top_k` results inside `base_uri`
    pub async fn scoped_sources(
        &self,
        query: &str,
        base_uri: &str,
        top_k: usize,
    ) -> Result<Vec<Source>> {
        let scope = Scope::resolve(base_uri).await?;

        let candidates = self
            .corpus
            .query(query, self.candidate_k.max(top_k))
            .await?;
        debug!("Got {} candidates from corpus", candidates.len());

        let mut cache = FileCache::default();
        let mut sources = Vec::new();
        for candidate in candidates {
            if !self.in_scope(&scope, &candidate, &mut cache).await {
                continue;
            }
            if !is_valid_text(
                &candidate.unit.text,
                self.printable_threshold,
                self.sample_chars,
            ) {
                warn!(
                    "Skipping invalid document content: {}",
                    candidate.unit.metadata.uri
                );
                continue;
            }
            sources.push(Source {
                uri: candidate.unit.metadata.uri,
                content: clean_text(&candidate.unit.text),
                score: candidate.score,
            });
        }

        if sources.is_empty() {
            return Err(Error::NotFound(format!(
                "No relevant documents found in uri: {}",
                base_uri
            )));
        }

        sources.truncate(top_k);
        Ok(sources)
    }

    async fn in_scope(&self, scope: &Scope, candidate: &ScoredUnit, cache: &mut FileCache) -> bool {
        let origin = candidate.unit.metadata.uri.as_str();

        if uri::is_local(origin) {
            let Scope::Local(dir) = scope else {
                return false;
            };

            let path = uri::uri_to_path(origin);
            let resolved = match tokio::fs::canonicalize(&path).await {
                Ok(resolved) => resolved,
                Err(_) => {
                    if path.starts_with(dir) {
                        warn!("File not found: {:?}", path);
                    }
                    return false;
                }
            };
            if !resolved.starts_with(dir) {
                return false;
            }

            match cache.get(&resolved).await {
                Some(content) if content.contains(candidate.unit.text.as_str()) => true,
                Some(_) => {
                    warn!("File content does not match: {:?}", resolved);
                    false
                }
                None => false,
            }
        } else {
            match scope {
                Scope::Remote { origin: base, prefix } => origin == base || origin.starts_with(prefix),
                Scope::Local(_) => false,
            }
        }
    }

    /// Scoped retrieval followed by answer synthesis
    ///
    /// A failed LLM call leaves `response` empty; the sources are still
    /// returned.
    pub async fn retrieve(&self, query: &str, base_uri: &str, top_k: usize) -> Result<RetrieveResponse> {
        info!(
            "Received retrieval request: {} for base uri: {}",
            query, base_uri
        );

        let sources = self.scoped_sources(query, base_uri, top_k).await?;

        let response = match &self.llm {
            Some(llm) => match llm.complete(&answer_prompt(query, &sources)).await {
                Ok(text) => clean_text(&text),
                Err(e) => {
                    error!("Answer synthesis with {} failed: {}", llm.model_name(), e);
                    String::new()
                }
            },
            None => String::new(),
        };

        info!(
            "Retrieval completed, found {} relevant documents",
            sources.len()
        );
        Ok(RetrieveResponse { response, sources })
    }
}

/// Question-answering prompt over the retrieved sources
fn answer_prompt(query: &str, sources: &[Source]) -> String {
    let context = sources
        .iter()
        .map(|s| format!("uri: {}\n\n{}", s.uri, s.content))
        .collect::<Vec<_>>()
        .join("\n\n");

    format!(
        "Context information is below.\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {query}\n\
         Answer: "
    )
}
