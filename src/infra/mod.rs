pub mod extraction_client;
pub mod firecrawl;
pub mod http_client;
pub mod image_sources;
pub mod in_memory_store;
pub mod rate_limiter;
pub mod supabase_store;
pub mod webhook_trigger;

pub use extraction_client::ChatExtractionClient;
pub use firecrawl::FirecrawlClient;
pub use in_memory_store::InMemoryStore;
pub use supabase_store::SupabaseStore;
pub use webhook_trigger::{LogOnlyTrigger, WebhookChainTrigger};
