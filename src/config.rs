use std::env;

/// Process-level configuration, populated once from the environment.
/// Mirrors how the rest of this codebase's services read config: a flat
/// struct with typed defaults, no layered config-file format.
#[derive(Clone, Debug)]
pub struct Config {
    pub vespa_endpoint: String,
    pub vespa_deploy_endpoint: String,
    pub app_id: String,
    pub index_settings_dir: String,
    pub feed_max_concurrency: usize,
    pub feed_doc_timeout_ms: u64,
    pub deploy_timeout_ms: u64,
    pub convergence_timeout_ms: u64,
    pub history_retention: usize,
    pub allow_downgrade: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let vespa_endpoint = env::var("VESPA_ENDPOINT").unwrap_or_else(|_| "http://localhost:8100".to_string());
        let vespa_deploy_endpoint = env::var("VESPA_DEPLOY_ENDPOINT").unwrap_or_else(|_| "http://localhost:19071".to_string());
        let app_id = env::var("APP_ID").unwrap_or_else(|_| "default-app".to_string());
        let index_settings_dir = env::var("INDEX_SETTINGS_DIR").unwrap_or_else(|_| "./marqo-app".to_string());
        let feed_max_concurrency = env::var("FEED_MAX_CONCURRENCY").ok().and_then(|v| v.parse().ok()).unwrap_or(10);
        let feed_doc_timeout_ms = env::var("FEED_DOC_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(60_000);
        let deploy_timeout_ms = env::var("DEPLOY_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(60_000);
        let convergence_timeout_ms = env::var("CONVERGENCE_TIMEOUT_MS").ok().and_then(|v| v.parse().ok()).unwrap_or(120_000);
        // History retention is hard-coded to 3 in the settings store regardless of this
        // value; we still read it so an operator-supplied override is visible in logs.
        let history_retention = env::var("HISTORY_RETENTION").ok().and_then(|v| v.parse().ok()).unwrap_or(3);
        let allow_downgrade = env::var("ALLOW_DOWNGRADE").map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        Self {
            vespa_endpoint,
            vespa_deploy_endpoint,
            app_id,
            index_settings_dir,
            feed_max_concurrency,
            feed_doc_timeout_ms,
            deploy_timeout_ms,
            convergence_timeout_ms,
            history_retention,
            allow_downgrade,
        }
    }
}
