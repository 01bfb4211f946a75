/// Environment variable names and fixed defaults shared across the crate.

// Configuration file locations
pub const CONFIG_PATH_ENV: &str = "GIGS_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

// Backend credentials and endpoints
pub const FIRECRAWL_URL_ENV: &str = "FIRECRAWL_API_URL";
pub const FIRECRAWL_KEY_ENV: &str = "FIRECRAWL_API_KEY";
pub const EXTRACTION_URL_ENV: &str = "EXTRACTION_API_URL";
pub const EXTRACTION_KEY_ENV: &str = "EXTRACTION_API_KEY";
pub const EXTRACTION_MODEL_ENV: &str = "EXTRACTION_MODEL";
pub const SUPABASE_URL_ENV: &str = "SUPABASE_URL";
pub const SUPABASE_KEY_ENV: &str = "SUPABASE_SERVICE_ROLE_KEY";

// Chaining
pub const CHAIN_WEBHOOK_URL_ENV: &str = "GIGS_CHAIN_URL";
pub const CHAIN_SECRET_ENV: &str = "GIGS_CHAIN_SECRET";
pub const CHAIN_DISABLED_ENV: &str = "GIGS_CHAIN_DISABLED";

// Scheduler overrides
pub const CEILING_SECS_ENV: &str = "GIGS_EXECUTION_CEILING_SECS";
pub const INTER_TASK_DELAY_MS_ENV: &str = "GIGS_INTER_TASK_DELAY_MS";
pub const BATCH_SIZE_ENV: &str = "GIGS_BATCH_SIZE";

// Observability
pub const METRICS_ADDR_ENV: &str = "GIGS_METRICS_ADDR";
pub const PUSHGATEWAY_URL_ENV: &str = "GIGS_PUSHGATEWAY_URL";

/// Batch used when a trigger omits one.
pub const DEFAULT_BATCH: u32 = 1;

/// Wikimedia and MusicBrainz both ask for an identifying agent.
pub const DEFAULT_USER_AGENT: &str =
    "gigs_scraper/0.1 (+https://github.com/gigs-scraper/gigs_scraper)";

/// Upper bound on page content forwarded to the extraction service.
pub const MAX_PROMPT_CONTENT_CHARS: usize = 60_000;

/// Upper bound on discovered links forwarded alongside the content.
pub const MAX_PROMPT_LINKS: usize = 200;

/// Returns true when an env flag is set to `1` or `true`.
pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}
