//! Default values for configuration

use std::path::PathBuf;

/// Default data directory under the platform data dir
pub fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ragindex")
}

/// Default HTTP bind address
pub fn default_bind() -> String {
    "0.0.0.0:20250".to_string()
}

/// Documents per pipeline batch
pub fn default_batch_size() -> usize {
    40
}

/// Worker pool size (host CPU parallelism)
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Minimum time between accepted change events for one file
pub fn default_debounce_ms() -> u64 {
    1000
}

/// Debounce entries older than this many windows are evicted
pub fn default_debounce_evict_windows() -> u32 {
    60
}

/// A document is valid only if its printable ratio exceeds this
pub fn default_printable_threshold() -> f64 {
    0.95
}

/// Characters of an invalid document logged for diagnosis
pub fn default_sample_chars() -> usize {
    100
}

/// Lines per code chunk
pub fn default_chunk_lines() -> usize {
    80
}

/// Overlapping lines between consecutive code chunks
pub fn default_chunk_overlap_lines() -> usize {
    15
}

/// Maximum characters per code chunk
pub fn default_chunk_max_chars() -> usize {
    1500
}

/// File extensions read by the directory scanner
pub fn default_allowed_extensions() -> Vec<String> {
    [
        "txt", "rst", "json", "ini", "conf", "toml", "md", "markdown", "csv", "tsv", "html",
        "htm", "xml", "yaml", "yml", "css", "scss", "less", "sass", "styl", "sh", "bash", "zsh",
        "fish", "rb", "java", "go", "ts", "tsx", "js", "jsx", "vue", "py", "php", "c", "cpp", "h",
        "rs", "swift", "kt", "lua", "perl", "pl", "pm", "t", "pm6", "m", "scala",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Default crawler user agent
pub fn default_crawl_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/114.0.0.0 Safari/537.36".to_string()
}

/// Default request timeout in seconds
pub fn default_crawl_timeout() -> u64 {
    30
}

/// Default requests per second per host
pub fn default_crawl_rate_limit() -> f64 {
    5.0
}

/// Maximum linked pages fetched from one remote resource
pub fn default_crawl_max_links() -> usize {
    200
}

/// Default model provider
pub fn default_provider() -> String {
    "openai".to_string()
}

/// Default corpus backend
pub fn default_corpus_backend() -> String {
    "local".to_string()
}

/// Default Qdrant gRPC URL
pub fn default_qdrant_url() -> String {
    std::env::var("QDRANT_URL").unwrap_or_else(|_| "http://127.0.0.1:6334".to_string())
}

/// Default Qdrant collection name
pub fn default_collection_name() -> String {
    "ragindex_docs".to_string()
}

/// Default number of sources returned by retrieve
pub fn default_top_k() -> usize {
    5
}

/// Upper bound accepted for `top_k`
pub fn default_max_top_k() -> usize {
    20
}

/// Corpus candidates fetched before scoping
pub fn default_candidate_k() -> usize {
    40
}

/// Default model request timeout in seconds
pub fn default_model_timeout() -> u64 {
    60
}
