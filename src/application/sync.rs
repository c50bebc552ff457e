//! Sync use case: run every entry of a batch file through the link pipeline.

use anyhow::Result;
use log::{info, warn};

use super::link::{LinkReport, LinkUseCase};
use crate::batch::BatchConfig;
use crate::error::PkglinkError;
use crate::install::PackageInstaller;
use crate::runtime::Runtime;

#[derive(Debug)]
pub struct SyncResult {
    pub name: String,
    pub result: Result<LinkReport>,
}

#[derive(Debug, Default)]
pub struct SyncSummary {
    pub results: Vec<SyncResult>,
}

impl SyncSummary {
    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.result.is_err()).count()
    }
}

/// Compile entry-name filters. An entry runs when any pattern matches; no patterns run everything.
pub fn compile_filters(patterns: &[String]) -> Result<Vec<glob::Pattern>> {
    patterns
        .iter()
        .map(|p| {
            glob::Pattern::new(p)
                .map_err(|e| PkglinkError::spec_parse(p.as_str(), e.to_string()).into())
        })
        .collect()
}

fn selected(filters: &[glob::Pattern], name: &str) -> bool {
    filters.is_empty() || filters.iter().any(|p| p.matches(name))
}

pub struct SyncUseCase<'u, 'a, R: Runtime, I: PackageInstaller> {
    link: &'u LinkUseCase<'a, R, I>,
}

impl<'u, 'a, R: Runtime, I: PackageInstaller> SyncUseCase<'u, 'a, R, I> {
    pub fn new(link: &'u LinkUseCase<'a, R, I>) -> Self {
        Self { link }
    }

    /// Run the selected entries in name order. A failing entry does not stop the rest.
    #[tracing::instrument(skip(self, config, filters))]
    pub async fn run(
        &self,
        config: &BatchConfig,
        filters: &[glob::Pattern],
        force_dry_run: bool,
    ) -> SyncSummary {
        let mut summary = SyncSummary::default();
        for (name, request) in config.requests(force_dry_run) {
            if !selected(filters, &name) {
                continue;
            }
            info!("Syncing entry '{}'", name);
            let result = self.link.run(&request).await;
            if let Err(e) = &result {
                warn!("Entry '{}' failed: {:#}", name, e);
            }
            summary.results.push(SyncResult { name, result });
        }
        summary
    }
}
