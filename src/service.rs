//! Indexing service orchestration
//!
//! Owns the registry, history, pipeline, watchers and leadership gate, and
//! implements the resource lifecycle on top of them. Only the leader starts
//! watchers and indexing runs; every instance serves retrieval.

use crate::config::Config;
use crate::corpus::{open_corpus, Corpus};
use crate::crawl::Crawler;
use crate::error::{Error, Result};
use crate::leader::{FileLockGate, LeadershipGate};
use crate::meta::{
    ActivityStatus, HistoryRecord, HistoryStore, IndexingStatus, MetaDb, Resource,
    ResourceRegistry,
};
use crate::pipeline::{BatchOutcome, IndexingPipeline, RawDocument};
use crate::provider::{self, LlmModel};
use crate::retrieve::{RetrievalScoper, RetrieveResponse};
use crate::scan::{DirectoryScanner, IgnoreRules};
use crate::uri;
use crate::watch::{ChangeHandler, DebounceTable, WatchRegistry};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Embedding provider and model the corpus was built with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFingerprint {
    pub provider: String,
    pub embed_model: String,
}

impl ProviderFingerprint {
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            provider: config.embed.provider.to_lowercase(),
            embed_model: provider::resolved_embed_model(&config.embed)?,
        })
    }

    /// Read a stored fingerprint; `None` when absent or unreadable
    pub fn load(path: &Path) -> Option<Self> {
        let content = std::fs::read(path).ok()?;
        serde_json::from_slice(&content).ok()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_vec(self)?)?;
        Ok(())
    }
}

/// Reset the corpus and history when the embedding provider changed
///
/// Returns whether a reset happened. The current fingerprint is always
/// written back.
pub async fn reset_on_provider_change(
    path: &Path,
    current: &ProviderFingerprint,
    corpus: &dyn Corpus,
    history: &HistoryStore,
) -> Result<bool> {
    let changed = match ProviderFingerprint::load(path) {
        Some(previous) => previous != *current,
        None => false,
    };

    if changed {
        info!("Detected embedding provider change, clearing existing data...");
        corpus.reset().await?;
        let cleared = history.clear().await?;
        debug!("Cleared {} history records", cleared);
    }

    current.save(path)?;
    Ok(changed)
}

/// Per-document history of one resource
#[derive(Debug, Clone, Serialize)]
pub struct IndexingStatusReport {
    pub uri: String,
    pub is_watched: bool,
    pub files: Vec<HistoryRecord>,
    pub total_files: usize,
    pub status_summary: BTreeMap<String, usize>,
}

/// Registry listing with counts by activity status
#[derive(Debug, Clone, Serialize)]
pub struct ResourceList {
    pub resources: Vec<Resource>,
    pub total_count: usize,
    pub status_summary: BTreeMap<String, usize>,
}

fn count_by<'a>(statuses: impl Iterator<Item = &'a str>) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for status in statuses {
        *counts.entry(status.to_string()).or_insert(0) += 1;
    }
    counts
}

pub struct IndexingService {
    config: Config,
    db: MetaDb,
    pipeline: IndexingPipeline,
    scoper: RetrievalScoper,
    crawler: Crawler,
    scanner: DirectoryScanner,
    watches: WatchRegistry,
    leader: Box<dyn LeadershipGate>,
    runs: Mutex<JoinSet<()>>,
    /// Ignore rules per canonical watched root, dropped when `.gitignore` changes
    ignore_rules: Mutex<HashMap<PathBuf, Arc<IgnoreRules>>>,
}

impl IndexingService {
    /// Wire the service from configuration
    ///
    /// Builds the provider models and corpus, applies the provider
    /// fingerprint check, and guards leadership with the data directory's
    /// lock file.
    pub async fn open(config: Config) -> Result<Arc<Self>> {
        let db = MetaDb::open(&config).await?;
        let embed = provider::build_embed_model(&config.embed)?;
        let llm = provider::build_llm_model(&config.llm)?;
        info!(
            "Using embedding model {} and LLM {}",
            embed.model_name(),
            llm.model_name()
        );

        let corpus = open_corpus(&config, embed).await?;
        let fingerprint = ProviderFingerprint::from_config(&config)?;
        reset_on_provider_change(
            &config.paths.fingerprint_file,
            &fingerprint,
            corpus.as_ref(),
            &db.history(),
        )
        .await?;

        let leader = Box::new(FileLockGate::new(&config.paths.lock_file));
        Self::from_parts(config, db, corpus, Some(llm), leader)
    }

    /// Assemble the service from already-built collaborators
    pub fn from_parts(
        config: Config,
        db: MetaDb,
        corpus: Arc<dyn Corpus>,
        llm: Option<Arc<dyn LlmModel>>,
        leader: Box<dyn LeadershipGate>,
    ) -> Result<Arc<Self>> {
        let pipeline = IndexingPipeline::new(&config, db.history(), Arc::clone(&corpus))?;
        let scoper = RetrievalScoper::new(&config, corpus, llm);
        let crawler = Crawler::new(&config.crawl)?;
        let scanner = DirectoryScanner::new(&config.scan);
        let watches = WatchRegistry::new(DebounceTable::new(
            config.indexing.debounce_window(),
            config.indexing.debounce_evict_windows,
        ));

        Ok(Arc::new(Self {
            config,
            db,
            pipeline,
            scoper,
            crawler,
            scanner,
            watches,
            leader,
            runs: Mutex::new(JoinSet::new()),
            ignore_rules: Mutex::new(HashMap::new()),
        }))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn registry(&self) -> ResourceRegistry {
        self.db.resources()
    }

    pub fn is_leader(&self) -> bool {
        self.leader.is_leader()
    }

    /// Try to become leader and, if so, reconcile every active resource
    pub async fn start(self: &Arc<Self>) -> Result<bool> {
        if !self.leader.try_acquire()? {
            info!("Another instance is leader; serving retrieval only");
            return Ok(false);
        }

        info!(
            "Starting as leader (PID: {})",
            std::process::id()
        );
        let active = self.registry().list_active().await?;
        info!("Found {} active resources to sync", active.len());

        for resource in active {
            if let Err(e) = self.reconcile(&resource).await {
                let message = format!("Failed to sync resource {}: {}", resource.uri, e);
                error!("{}", message);
                self.registry()
                    .set_activity(&resource.uri, ActivityStatus::Error, Some(&message))
                    .await?;
            }
        }
        Ok(true)
    }

    async fn reconcile(self: &Arc<Self>, resource: &Resource) -> Result<()> {
        if uri::is_local(&resource.uri) {
            let directory = uri::uri_to_path(&resource.uri);
            if !directory.exists() {
                let message = format!("Directory not found: {}", directory.display());
                error!("{}", message);
                return self
                    .registry()
                    .set_activity(&resource.uri, ActivityStatus::Error, Some(&message))
                    .await;
            }
            self.start_watch(resource)?;
        } else if uri::is_remote(&resource.uri) {
            if !self.crawler.exists(&resource.uri).await {
                error!("Remote resource not found: {}", resource.uri);
                return self
                    .registry()
                    .set_activity(
                        &resource.uri,
                        ActivityStatus::Error,
                        Some("remote resource not found"),
                    )
                    .await;
            }
        } else {
            return Err(Error::InvalidRequest(format!("Invalid URI: {}", resource.uri)));
        }

        self.spawn_run(resource.clone());
        debug!("Scheduled sync of resource: {}", resource.uri);
        Ok(())
    }

    fn change_handler(self: &Arc<Self>, resource_uri: &str) -> ChangeHandler {
        let service = Arc::downgrade(self);
        let resource_uri = resource_uri.to_string();
        Arc::new(move |path: PathBuf| {
            let service = service.clone();
            let resource_uri = resource_uri.clone();
            async move {
                if let Some(service) = service.upgrade() {
                    service.update_index_for_file(&resource_uri, &path).await;
                }
            }
            .boxed()
        })
    }

    fn start_watch(self: &Arc<Self>, resource: &Resource) -> Result<()> {
        let directory = uri::uri_to_path(&resource.uri).canonicalize()?;
        let handler = self.change_handler(&resource.uri);
        if self.watches.watch(&resource.uri, &directory, handler)? {
            info!("Watching {:?} for changes", directory);
        }
        Ok(())
    }

    fn spawn_run(self: &Arc<Self>, resource: Resource) {
        let service = Arc::clone(self);
        let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
        runs.spawn(async move {
            if let Err(e) = service.index_resource(&resource).await {
                error!("Indexing run for {} failed: {}", resource.uri, e);
            }
        });
    }

    /// Wait for every indexing run spawned so far
    #[cfg(test)]
    pub(crate) async fn wait_for_runs(&self) {
        let mut runs = std::mem::take(&mut *self.runs.lock().unwrap_or_else(|e| e.into_inner()));
        while let Some(result) = runs.join_next().await {
            if let Err(e) = result {
                warn!("Indexing run ended abnormally: {}", e);
            }
        }
    }

    /// Register (or reactivate) a resource and schedule its indexing
    pub async fn add_resource(self: &Arc<Self>, name: &str, resource_uri: &str) -> Result<String> {
        let added = format!(
            "Resource {} added and indexing started in background",
            resource_uri
        );
        let registry = self.registry();

        let existing = registry.get(resource_uri).await?;
        if existing.as_ref().is_some_and(Resource::is_active) {
            return Ok(added);
        }

        if uri::is_local(resource_uri) {
            let directory = uri::uri_to_path(resource_uri);
            if !directory.exists() {
                return Err(Error::NotFound(format!(
                    "Directory not found: {}",
                    directory.display()
                )));
            }
            if !directory.is_dir() {
                return Err(Error::InvalidRequest(format!(
                    "{} is not a directory",
                    directory.display()
                )));
            }
            let git_directory = directory.join(".git");
            if !git_directory.is_dir() {
                return Err(Error::InvalidRequest(format!(
                    "{} is not a git repository",
                    git_directory.display()
                )));
            }
        } else if uri::is_remote(resource_uri) {
            if !self.crawler.exists(resource_uri).await {
                return Err(Error::NotFound("web resource not found".to_string()));
            }
        } else {
            return Err(Error::InvalidRequest(format!("Invalid URI: {}", resource_uri)));
        }

        let resource = match existing {
            Some(resource) => {
                if resource.name != name {
                    return Err(Error::InvalidRequest(format!(
                        "Resource name cannot be changed: {}",
                        resource.name
                    )));
                }
                registry
                    .set_activity(resource_uri, ActivityStatus::Active, None)
                    .await?;
                info!("Reactivated resource {} ({})", name, resource_uri);
                resource
            }
            None => {
                let resource = Resource::new(name, resource_uri)?;
                registry.add(&resource).await?;
                info!("Registered resource {} ({})", name, resource_uri);
                resource
            }
        };

        if self.is_leader() {
            if uri::is_local(resource_uri) {
                self.start_watch(&resource)?;
            }
            self.spawn_run(resource);
        }

        Ok(added)
    }

    /// Deactivate a resource and stop its watcher
    pub async fn remove_resource(&self, resource_uri: &str) -> Result<String> {
        let registry = self.registry();
        match registry.get(resource_uri).await? {
            Some(resource) if resource.is_active() => {}
            _ => return Err(Error::NotFound("Resource not being watched".to_string())),
        }

        if self.watches.unwatch(resource_uri).await {
            info!("Stopped watching {}", resource_uri);
        }
        if uri::is_local(resource_uri) {
            if let Ok(root) = uri::uri_to_path(resource_uri).canonicalize() {
                self.forget_ignore_rules(&root);
            }
        }
        registry
            .set_activity(resource_uri, ActivityStatus::Inactive, None)
            .await?;

        Ok(format!("Resource {} removed", resource_uri))
    }

    async fn index_resource(&self, resource: &Resource) -> Result<BatchOutcome> {
        if uri::is_local(&resource.uri) {
            self.index_local(resource).await
        } else {
            self.index_remote(resource).await
        }
    }

    /// Scan a local resource and index every eligible file
    pub async fn index_local(&self, resource: &Resource) -> Result<BatchOutcome> {
        let registry = self.registry();
        registry
            .set_indexing_status(&resource.uri, IndexingStatus::Indexing, "")
            .await?;

        let directory = uri::uri_to_path(&resource.uri);
        info!("Loading directory content: {:?}", directory);

        let documents = match self.load_directory(&directory).await {
            Ok(documents) => documents,
            Err(e) => {
                let message = format!("Directory indexing failed: {}", directory.display());
                error!("{}: {}", message, e);
                registry
                    .set_indexing_status(&resource.uri, IndexingStatus::Failed, &message)
                    .await?;
                return Err(e);
            }
        };

        self.finish_run(resource, documents).await
    }

    async fn load_directory(&self, directory: &Path) -> Result<Vec<RawDocument>> {
        let scanner = self.scanner.clone();
        let directory = directory.to_path_buf();

        tokio::task::spawn_blocking(move || {
            let files = scanner.scan(&directory)?;
            let documents = files
                .iter()
                .filter_map(|path| match RawDocument::from_file(path) {
                    Ok(document) => Some(document),
                    Err(e) => {
                        warn!("Failed to read {:?}: {}", path, e);
                        None
                    }
                })
                .collect();
            Ok(documents)
        })
        .await
        .map_err(|e| Error::Other(format!("Directory scan task failed: {}", e)))?
    }

    /// Fetch a remote resource and its linked pages and index them
    pub async fn index_remote(&self, resource: &Resource) -> Result<BatchOutcome> {
        let registry = self.registry();
        registry
            .set_indexing_status(&resource.uri, IndexingStatus::Indexing, "")
            .await?;

        debug!("Loading resource content: {}", resource.uri);
        let documents = match self
            .crawler
            .fetch_site(&resource.uri, self.config.indexing.workers)
            .await
        {
            Ok(documents) => documents,
            Err(e) => {
                let message = format!("Resource indexing failed: {}", resource.uri);
                error!("{}: {}", message, e);
                registry
                    .set_indexing_status(&resource.uri, IndexingStatus::Failed, &message)
                    .await?;
                return Err(e);
            }
        };

        self.finish_run(resource, documents).await
    }

    async fn finish_run(
        &self,
        resource: &Resource,
        documents: Vec<RawDocument>,
    ) -> Result<BatchOutcome> {
        info!("Found {} documents in {}", documents.len(), resource.uri);

        let outcome = self
            .pipeline
            .run_batches(
                documents,
                self.config.indexing.batch_size,
                self.config.indexing.workers,
            )
            .await;

        let message = outcome.message();
        if outcome.all_succeeded() {
            info!("Resource {} indexing completed", resource.uri);
        } else {
            error!("{} for {}", message, resource.uri);
        }

        self.registry()
            .set_indexing_status(&resource.uri, IndexingStatus::Indexed, &message)
            .await?;
        Ok(outcome)
    }

    /// Reindex one changed file of a watched local resource
    pub async fn update_index_for_file(&self, resource_uri: &str, path: &Path) {
        if let Err(e) = self.try_update_index_for_file(resource_uri, path).await {
            error!("File indexing failed: {:?}: {}", path, e);
        }
    }

    async fn try_update_index_for_file(&self, resource_uri: &str, path: &Path) -> Result<()> {
        debug!("Starting to index file: {:?}", path);

        let root = uri::uri_to_path(resource_uri).canonicalize()?;
        if path.file_name() == Some(OsStr::new(".gitignore")) {
            self.forget_ignore_rules(&root);
        }
        if !self.scanner.is_candidate(path) {
            debug!("File type not indexed, skipping: {:?}", path);
            return Ok(());
        }

        let rules = self.ignore_rules_for(&root).await?;
        if !self.scanner.is_eligible(&rules, path) {
            debug!("File is ignored, skipping: {:?}", path);
            return Ok(());
        }

        let registry = self.registry();
        if registry.get(resource_uri).await?.is_none() {
            error!("Resource not found for directory: {:?}", root);
            return Ok(());
        }

        let document = match RawDocument::from_file(path) {
            Ok(document) => document,
            Err(e) => {
                warn!("Changed file vanished before indexing: {:?}: {}", path, e);
                return Ok(());
            }
        };

        registry
            .set_indexing_status(resource_uri, IndexingStatus::Indexing, "")
            .await?;

        let succeeded = self.pipeline.process_batch(vec![document]).await;
        let outcome = BatchOutcome {
            total: 1,
            failed: usize::from(!succeeded),
        };
        if succeeded {
            debug!("File indexing completed: {:?}", path);
        } else {
            error!("File indexing failed: {:?}", path);
        }

        registry
            .set_indexing_status(resource_uri, IndexingStatus::Indexed, &outcome.message())
            .await
    }

    async fn ignore_rules_for(&self, root: &Path) -> Result<Arc<IgnoreRules>> {
        if let Some(rules) = self
            .ignore_rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(root)
        {
            return Ok(Arc::clone(rules));
        }

        let rules = {
            let root = root.to_path_buf();
            tokio::task::spawn_blocking(move || IgnoreRules::load(&root))
                .await
                .map_err(|e| Error::Other(format!("Ignore rule task failed: {}", e)))??
        };
        let rules = Arc::new(rules);
        self.ignore_rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(root.to_path_buf(), Arc::clone(&rules));
        Ok(rules)
    }

    #[cfg(test)]
    fn has_ignore_rules(&self, root: &Path) -> bool {
        self.ignore_rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(root)
    }

    fn forget_ignore_rules(&self, root: &Path) {
        self.ignore_rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(root);
    }

    /// Scoped retrieval with answer synthesis
    pub async fn retrieve(
        &self,
        query: &str,
        base_uri: &str,
        top_k: Option<usize>,
    ) -> Result<RetrieveResponse> {
        let top_k = top_k.unwrap_or(self.config.retrieval.default_top_k);
        self.scoper.retrieve(query, base_uri, top_k).await
    }

    /// History of every document under a resource
    pub async fn indexing_status(&self, resource_uri: &str) -> Result<IndexingStatusReport> {
        if uri::is_local(resource_uri) {
            let directory = uri::uri_to_path(resource_uri);
            if !directory.exists() {
                return Err(Error::NotFound(format!(
                    "Directory not found: {}",
                    directory.display()
                )));
            }
        }

        let files = self.db.history().list_for_base_uri(resource_uri).await?;
        info!("Found {} files in resource {}", files.len(), resource_uri);

        let status_summary = count_by(files.iter().map(|f| f.status.as_str()));
        Ok(IndexingStatusReport {
            uri: resource_uri.to_string(),
            is_watched: self.watches.is_watched(resource_uri),
            total_files: files.len(),
            files,
            status_summary,
        })
    }

    /// Every registered resource
    pub async fn list_resources(&self) -> Result<ResourceList> {
        let resources = self.registry().list_all().await?;
        let status_summary = count_by(resources.iter().map(|r| r.status.as_str()));
        Ok(ResourceList {
            total_count: resources.len(),
            resources,
            status_summary,
        })
    }

    /// Stop every watcher and abandon in-flight indexing runs
    pub async fn shutdown(&self) {
        self.watches.stop_all().await;
        let mut runs = std::mem::take(&mut *self.runs.lock().unwrap_or_else(|e| e.into_inner()));
        runs.shutdown().await;
        info!("Indexing service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::test_support::{local_corpus, HashEmbed};
    use crate::corpus::LocalCorpus;
    use crate::leader::AlwaysLeader;
    use crate::meta::test_support::setup_test_db;
    use crate::meta::HistoryStatus;
    use crate::pipeline::DocumentUnit;
    use std::fs;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct NeverLeader;

    impl LeadershipGate for NeverLeader {
        fn try_acquire(&self) -> Result<bool> {
            Ok(false)
        }

        fn is_leader(&self) -> bool {
            false
        }
    }

    struct Harness {
        service: Arc<IndexingService>,
        db: MetaDb,
        _db_dir: TempDir,
    }

    async fn harness(leader: Box<dyn LeadershipGate>) -> Harness {
        let (db, db_dir) = setup_test_db().await;
        let mut config = Config::default();
        config.crawl.rate_limit_per_host = 1000.0;
        config.indexing.workers = 2;
        let service =
            IndexingService::from_parts(config, db.clone(), local_corpus(), None, leader).unwrap();
        Harness {
            service,
            db,
            _db_dir: db_dir,
        }
    }

    /// A directory that looks like a git checkout
    fn git_repo() -> (TempDir, PathBuf, String) {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().canonicalize().unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        let resource_uri = uri::path_to_uri(&root);
        (tmp, root, resource_uri)
    }

    #[tokio::test]
    async fn test_add_local_resource_indexes_code_but_not_images() {
        let h = harness(Box::new(AlwaysLeader)).await;
        h.service.start().await.unwrap();

        let (_tmp, root, resource_uri) = git_repo();
        fs::write(root.join("main.py"), "def main():\n    return 1\n").unwrap();
        fs::write(root.join("logo.png"), [0x89, b'P', b'N', b'G', 0, 0]).unwrap();

        h.service.add_resource("repo", &resource_uri).await.unwrap();
        assert!(h.service.indexing_status(&resource_uri).await.unwrap().is_watched);
        h.service.wait_for_runs().await;

        let records = h.db.history().list_for_base_uri(&resource_uri).await.unwrap();
        assert!(!records.is_empty());
        assert!(records.iter().all(|r| r.uri.ends_with("main.py")));
        assert!(records
            .iter()
            .all(|r| r.get_status().unwrap() == HistoryStatus::Completed));

        let resource = h.db.resources().get(&resource_uri).await.unwrap().unwrap();
        assert_eq!(resource.indexing_status, "indexed");
        assert_eq!(resource.indexing_status_message.as_deref(), Some(""));
        assert!(resource.last_indexed_at.is_some());

        h.service.shutdown().await;
    }

    #[tokio::test]
    async fn test_duplicate_name_is_rejected() {
        let h = harness(Box::new(NeverLeader)).await;
        let (_a, _, first) = git_repo();
        let (_b, _, second) = git_repo();

        h.service.add_resource("a", &first).await.unwrap();
        let err = h.service.add_resource("a", &second).await.unwrap_err();
        assert!(matches!(err, Error::DuplicateResource(_)));
    }

    #[tokio::test]
    async fn test_adding_active_resource_again_is_noop() {
        let h = harness(Box::new(NeverLeader)).await;
        let (_tmp, _, resource_uri) = git_repo();

        h.service.add_resource("a", &resource_uri).await.unwrap();
        h.service.add_resource("other", &resource_uri).await.unwrap();
        assert_eq!(h.service.list_resources().await.unwrap().total_count, 1);
    }

    #[tokio::test]
    async fn test_local_resource_validation() {
        let h = harness(Box::new(NeverLeader)).await;

        let err = h
            .service
            .add_resource("gone", "file:///definitely/not/here")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        let tmp = TempDir::new().unwrap();
        let plain = uri::path_to_uri(&tmp.path().canonicalize().unwrap());
        let err = h.service.add_resource("plain", &plain).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(msg) if msg.contains("not a git repository")));

        let err = h.service.add_resource("ftp", "ftp://example.com/x").await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(msg) if msg.starts_with("Invalid URI")));
    }

    #[tokio::test]
    async fn test_remove_and_reactivate() {
        let h = harness(Box::new(NeverLeader)).await;
        let (_tmp, _, resource_uri) = git_repo();

        let err = h.service.remove_resource(&resource_uri).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        h.service.add_resource("a", &resource_uri).await.unwrap();
        h.service.remove_resource(&resource_uri).await.unwrap();
        assert!(h.service.remove_resource(&resource_uri).await.is_err());

        let err = h.service.add_resource("b", &resource_uri).await.unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(msg) if msg.contains("cannot be changed")));

        h.service.add_resource("a", &resource_uri).await.unwrap();
        let listing = h.service.list_resources().await.unwrap();
        assert_eq!(listing.status_summary.get("active"), Some(&1));
    }

    #[tokio::test]
    async fn test_non_leader_does_not_watch_or_index() {
        let h = harness(Box::new(NeverLeader)).await;
        assert!(!h.service.start().await.unwrap());

        let (_tmp, root, resource_uri) = git_repo();
        fs::write(root.join("notes.md"), "some notes\n").unwrap();
        h.service.add_resource("a", &resource_uri).await.unwrap();
        h.service.wait_for_runs().await;

        let report = h.service.indexing_status(&resource_uri).await.unwrap();
        assert!(!report.is_watched);
        assert_eq!(report.total_files, 0);
    }

    #[tokio::test]
    async fn test_startup_marks_missing_directory_as_error() {
        let h = harness(Box::new(AlwaysLeader)).await;
        let resource = Resource::new("gone", "file:///definitely/not/here").unwrap();
        h.db.resources().add(&resource).await.unwrap();

        h.service.start().await.unwrap();

        let stored = h.db.resources().get(&resource.uri).await.unwrap().unwrap();
        assert_eq!(stored.status, "error");
        assert!(stored
            .last_error
            .unwrap()
            .starts_with("Directory not found"));
    }

    #[tokio::test]
    async fn test_update_index_for_file() {
        let h = harness(Box::new(NeverLeader)).await;
        let (_tmp, root, resource_uri) = git_repo();
        fs::write(root.join(".gitignore"), "secret.md\n").unwrap();
        h.service.add_resource("a", &resource_uri).await.unwrap();

        fs::write(root.join("secret.md"), "do not index\n").unwrap();
        h.service
            .update_index_for_file(&resource_uri, &root.join("secret.md"))
            .await;
        let report = h.service.indexing_status(&resource_uri).await.unwrap();
        assert_eq!(report.total_files, 0);

        fs::write(root.join("readme.md"), "hello world\n").unwrap();
        h.service
            .update_index_for_file(&resource_uri, &root.join("readme.md"))
            .await;

        let report = h.service.indexing_status(&resource_uri).await.unwrap();
        assert_eq!(report.total_files, 1);
        assert_eq!(report.status_summary.get("completed"), Some(&1));

        let resource = h.db.resources().get(&resource_uri).await.unwrap().unwrap();
        assert_eq!(resource.indexing_status, "indexed");

        // A file deleted before its event is handled
        h.service
            .update_index_for_file(&resource_uri, &root.join("missing.md"))
            .await;
        assert_eq!(h.service.indexing_status(&resource_uri).await.unwrap().total_files, 1);
    }

    #[tokio::test]
    async fn test_file_events_reuse_ignore_rules_until_gitignore_changes() {
        let h = harness(Box::new(NeverLeader)).await;
        let (_tmp, root, resource_uri) = git_repo();
        h.service.add_resource("a", &resource_uri).await.unwrap();

        // binary and git-internal paths are dropped before any rules are built
        fs::write(root.join("logo.png"), [0x89, b'P', b'N', b'G']).unwrap();
        h.service
            .update_index_for_file(&resource_uri, &root.join("logo.png"))
            .await;
        fs::write(root.join(".git").join("index"), "x").unwrap();
        h.service
            .update_index_for_file(&resource_uri, &root.join(".git").join("index"))
            .await;
        assert!(!h.service.has_ignore_rules(&root));

        fs::write(root.join("a.md"), "first file\n").unwrap();
        h.service
            .update_index_for_file(&resource_uri, &root.join("a.md"))
            .await;
        assert!(h.service.has_ignore_rules(&root));

        fs::write(root.join(".gitignore"), "b.md\n").unwrap();
        h.service
            .update_index_for_file(&resource_uri, &root.join(".gitignore"))
            .await;
        assert!(!h.service.has_ignore_rules(&root));

        fs::write(root.join("b.md"), "now ignored\n").unwrap();
        h.service
            .update_index_for_file(&resource_uri, &root.join("b.md"))
            .await;

        let report = h.service.indexing_status(&resource_uri).await.unwrap();
        assert_eq!(report.total_files, 1);
        assert!(report.files[0].uri.ends_with("a.md"));

        h.service.remove_resource(&resource_uri).await.unwrap();
        assert!(!h.service.has_ignore_rules(&root));
    }

    #[tokio::test]
    async fn test_single_file_failure_message() {
        let h = harness(Box::new(NeverLeader)).await;
        let (_tmp, root, resource_uri) = git_repo();
        h.service.add_resource("a", &resource_uri).await.unwrap();

        fs::write(root.join("bad.txt"), [0xff, 0xfe, 0x00, 0x01]).unwrap();
        h.service
            .update_index_for_file(&resource_uri, &root.join("bad.txt"))
            .await;

        let resource = h.db.resources().get(&resource_uri).await.unwrap().unwrap();
        assert_eq!(resource.indexing_status, "indexed");
        assert_eq!(
            resource.indexing_status_message.as_deref(),
            Some("Some batches failed processing (1/1)")
        );
    }

    #[tokio::test]
    async fn test_add_remote_resource_crawls_pages() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/docs"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                r#"<html><body><p>Root</p><a href="/docs/intro">Intro</a></body></html>"#,
                "text/html",
            ))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/docs/intro"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(
                "<html><body><p>Introduction page</p></body></html>",
                "text/html",
            ))
            .mount(&server)
            .await;

        let h = harness(Box::new(AlwaysLeader)).await;
        h.service.start().await.unwrap();

        let resource_uri = format!("{}/docs", server.uri());
        h.service.add_resource("docs", &resource_uri).await.unwrap();
        h.service.wait_for_runs().await;

        let report = h.service.indexing_status(&resource_uri).await.unwrap();
        assert_eq!(report.total_files, 2);
        assert!(!report.is_watched);

        let response = h
            .service
            .retrieve("Introduction", &resource_uri, Some(5))
            .await
            .unwrap();
        assert!(response
            .sources
            .iter()
            .any(|s| s.uri == format!("{}/docs/intro", server.uri())));
    }

    #[tokio::test]
    async fn test_unreachable_remote_resource() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let h = harness(Box::new(NeverLeader)).await;
        let err = h
            .service
            .add_resource("docs", &format!("{}/docs", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(msg) if msg == "web resource not found"));
    }

    #[tokio::test]
    async fn test_provider_change_resets_corpus_and_history() {
        let (db, tmp) = setup_test_db().await;
        let path = tmp.path().join("rag_config.json");
        let corpus = LocalCorpus::in_memory(Arc::new(HashEmbed));
        corpus
            .upsert(vec![DocumentUnit::whole("a", "a", "text".into())])
            .await
            .unwrap();

        let openai = ProviderFingerprint {
            provider: "openai".into(),
            embed_model: "text-embedding-3-small".into(),
        };
        let ollama = ProviderFingerprint {
            provider: "ollama".into(),
            embed_model: "nomic-embed-text".into(),
        };

        assert!(!reset_on_provider_change(&path, &openai, &corpus, &db.history()).await.unwrap());
        assert!(!reset_on_provider_change(&path, &openai, &corpus, &db.history()).await.unwrap());
        assert_eq!(corpus.len().await.unwrap(), 1);

        assert!(reset_on_provider_change(&path, &ollama, &corpus, &db.history()).await.unwrap());
        assert_eq!(corpus.len().await.unwrap(), 0);
        assert_eq!(ProviderFingerprint::load(&path), Some(ollama));
    }
}
