//! Source registry and deterministic batch derivation.
//!
//! Enabled sources are expanded into page tasks in file order and chunked
//! into fixed-size batches. Nothing is persisted: the same registry file and
//! batch number always regenerate the same task list.

use crate::common::error::{Result, ScraperError};
use crate::domain::EventCategory;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

const BUNDLED_SOURCES: &str = include_str!("../../config/sources.toml");

/// Placeholder substituted with the 1-based page number.
pub const PAGE_PLACEHOLDER: &str = "{page}";

static BUILTIN: Lazy<Arc<Vec<SourceSpec>>> = Lazy::new(|| {
    Arc::new(parse_sources(BUNDLED_SOURCES).unwrap_or_else(|e| {
        panic!("bundled config/sources.toml is invalid: {e}");
    }))
});

fn default_true() -> bool {
    true
}

fn default_wait_ms() -> u64 {
    3000
}

fn default_max_pages() -> u32 {
    1
}

/// Render options passed to the scraping backend for one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchOptions {
    #[serde(default = "default_wait_ms")]
    pub wait_ms: u64,
    #[serde(default = "default_true")]
    pub include_links: bool,
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    /// Text the site shows when a page number runs past the last page.
    #[serde(default)]
    pub no_results_marker: Option<String>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            wait_ms: default_wait_ms(),
            include_links: true,
            max_pages: 1,
            no_results_marker: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    pub url: String,
    pub category: EventCategory,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub fetch: FetchOptions,
}

impl SourceSpec {
    pub fn is_paginated(&self) -> bool {
        self.url.contains(PAGE_PLACEHOLDER) && self.fetch.max_pages > 1
    }

    fn page_count(&self) -> u32 {
        if self.url.contains(PAGE_PLACEHOLDER) {
            self.fetch.max_pages.max(1)
        } else {
            1
        }
    }

    fn url_for_page(&self, page: u32) -> String {
        self.url.replace(PAGE_PLACEHOLDER, &page.to_string())
    }
}

/// Position of a task within a paginated source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PageCursor {
    pub page: u32,
    pub last_page: u32,
}

/// One fetchable page plus its extraction parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceTask {
    pub source_name: String,
    pub url: String,
    pub category: EventCategory,
    pub fetch: FetchOptions,
    pub cursor: Option<PageCursor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchDescriptor {
    pub number: u32,
    pub total_batches: u32,
    pub tasks: Vec<SourceTask>,
}

impl BatchDescriptor {
    pub fn is_last(&self) -> bool {
        self.number >= self.total_batches
    }

    pub fn next_number(&self) -> Option<u32> {
        if self.is_last() {
            None
        } else {
            Some(self.number + 1)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub number: u32,
    pub task_count: usize,
    pub sources: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    sources: Vec<SourceSpec>,
}

fn parse_sources(content: &str) -> Result<Vec<SourceSpec>> {
    let file: SourcesFile = toml::from_str(content)?;
    Ok(file.sources)
}

#[derive(Debug, Clone)]
pub struct SourceRegistry {
    sources: Arc<Vec<SourceSpec>>,
    batch_size: usize,
}

impl SourceRegistry {
    pub fn new(sources: Vec<SourceSpec>, batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(ScraperError::Config("batch_size must be at least 1".to_string()));
        }
        Ok(Self {
            sources: Arc::new(sources),
            batch_size,
        })
    }

    /// Registry backed by the bundled `config/sources.toml`.
    pub fn builtin(batch_size: usize) -> Result<Self> {
        if batch_size == 0 {
            return Err(ScraperError::Config("batch_size must be at least 1".to_string()));
        }
        Ok(Self {
            sources: BUILTIN.clone(),
            batch_size,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P, batch_size: usize) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            ScraperError::Config(format!("Failed to read sources file '{}': {}", path.display(), e))
        })?;
        let sources = parse_sources(&content)?;
        debug!("Loaded {} sources from {}", sources.len(), path.display());
        Self::new(sources, batch_size)
    }

    pub fn sources(&self) -> &[SourceSpec] {
        &self.sources
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn all_tasks(&self) -> Vec<SourceTask> {
        let mut tasks = Vec::new();
        for source in self.sources.iter().filter(|s| s.enabled) {
            let pages = source.page_count();
            for page in 1..=pages {
                tasks.push(SourceTask {
                    source_name: source.name.clone(),
                    url: source.url_for_page(page),
                    category: source.category,
                    fetch: source.fetch.clone(),
                    cursor: source.is_paginated().then_some(PageCursor {
                        page,
                        last_page: pages,
                    }),
                });
            }
        }
        tasks
    }

    pub fn total_batches(&self) -> u32 {
        let tasks = self.all_tasks().len();
        tasks.div_ceil(self.batch_size) as u32
    }

    /// Tasks for a 1-based batch number, or `None` when out of range.
    ///
    /// With `page` set, paginated sources contribute only that page; plain
    /// sources are unaffected.
    pub fn batch(&self, number: u32, page: Option<u32>) -> Option<BatchDescriptor> {
        if number == 0 {
            return None;
        }
        let all = self.all_tasks();
        let total_batches = all.len().div_ceil(self.batch_size) as u32;
        if number > total_batches {
            return None;
        }
        let start = (number as usize - 1) * self.batch_size;
        let mut tasks: Vec<SourceTask> = all.into_iter().skip(start).take(self.batch_size).collect();
        if let Some(page) = page {
            tasks.retain(|t| t.cursor.map_or(true, |c| c.page == page));
        }
        Some(BatchDescriptor {
            number,
            total_batches,
            tasks,
        })
    }

    pub fn summaries(&self) -> Vec<BatchSummary> {
        (1..=self.total_batches())
            .filter_map(|n| self.batch(n, None))
            .map(|b| {
                let mut sources: Vec<String> = Vec::new();
                for t in &b.tasks {
                    if !sources.contains(&t.source_name) {
                        sources.push(t.source_name.clone());
                    }
                }
                BatchSummary {
                    number: b.number,
                    task_count: b.tasks.len(),
                    sources,
                }
            })
            .collect()
    }
}
