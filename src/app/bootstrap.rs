use crate::app::ports::{ChainTriggerPort, PersistencePort};
use crate::common::error::{Result, ScraperError};
use crate::config::AppConfig;
use crate::infra::image_sources::build_stages;
use crate::infra::{
    ChatExtractionClient, FirecrawlClient, InMemoryStore, LogOnlyTrigger, SupabaseStore, WebhookChainTrigger,
};
use crate::pipeline::retry::{LinearBackoff, RetryPolicy};
use crate::pipeline::scheduler::SchedulerSettings;
use crate::pipeline::{BatchScheduler, ChainDispatcher, FilterRules, ImageEnricher, PageExtractor, QualityFilter};
use crate::registry::SourceRegistry;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Wiring switches that are not part of the config file.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Keep results in memory and only log chain intents.
    pub dry_run: bool,
}

pub fn load_rules(config: &AppConfig) -> Result<Arc<FilterRules>> {
    match &config.paths.rules {
        Some(path) => Ok(Arc::new(FilterRules::load(path)?)),
        None => Ok(FilterRules::builtin()),
    }
}

pub fn load_registry(config: &AppConfig) -> Result<SourceRegistry> {
    let batch_size = config.scheduler.batch_size;
    match &config.paths.sources {
        Some(path) => SourceRegistry::load(path, batch_size),
        None => SourceRegistry::builtin(batch_size),
    }
}

fn build_store(config: &AppConfig, options: BuildOptions) -> Result<Arc<dyn PersistencePort>> {
    if options.dry_run {
        info!("Dry run: events are kept in memory");
        return Ok(Arc::new(InMemoryStore::new()));
    }
    let backends = &config.backends;
    match (&backends.supabase_url, &backends.supabase_key) {
        (Some(url), Some(key)) => Ok(Arc::new(SupabaseStore::new(
            url,
            key,
            &backends.events_table,
            &backends.deletions_table,
            Duration::from_secs(backends.request_timeout_secs),
        )?)),
        _ => Err(ScraperError::Config(
            "SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY are required unless running dry".to_string(),
        )),
    }
}

fn build_dispatcher(config: &AppConfig, options: BuildOptions) -> Result<ChainDispatcher> {
    let trigger: Arc<dyn ChainTriggerPort> = match (&config.backends.chain_url, options.dry_run) {
        (Some(url), false) => Arc::new(WebhookChainTrigger::new(
            url,
            config.backends.chain_secret.clone(),
            Duration::from_secs(config.chain.request_timeout_secs),
        )?),
        _ => Arc::new(LogOnlyTrigger),
    };
    Ok(ChainDispatcher::new(trigger, RetryPolicy::from_config(&config.chain)))
}

/// Builds a scheduler backed by the real HTTP adapters.
pub fn build_scheduler(config: &AppConfig, options: BuildOptions) -> Result<BatchScheduler> {
    let rules = load_rules(config)?;
    let registry = load_registry(config)?;
    let timeout = Duration::from_secs(config.backends.request_timeout_secs);

    let backend = Arc::new(FirecrawlClient::new(
        &config.backends.firecrawl_url,
        config.backends.firecrawl_api_key.clone(),
        timeout,
    )?);
    let extraction = Arc::new(ChatExtractionClient::new(
        &config.backends.extraction_url,
        config.backends.extraction_api_key.clone(),
        &config.backends.extraction_model,
        timeout,
    )?);
    let extractor = PageExtractor::new(
        backend,
        extraction,
        rules.clone(),
        LinearBackoff::from_config(&config.retry),
    );
    let enricher = ImageEnricher::new(build_stages(&config.enrich)?);
    info!(
        "Scheduler ready: {} sources in {} batches, rules v{}, image stages {:?}",
        registry.sources().len(),
        registry.total_batches(),
        rules.rule_version,
        enricher.stage_names()
    );

    Ok(BatchScheduler::new(
        registry,
        extractor,
        QualityFilter::new(rules),
        enricher,
        build_store(config, options)?,
        Some(build_dispatcher(config, options)?),
        SchedulerSettings::from(&config.scheduler),
    ))
}
