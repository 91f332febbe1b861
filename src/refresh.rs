//! One refresh pass over a dashboard.
//!
//! 1. discover templates and partials ([`crate::dashboard::discover`])
//! 2. fetch remote partial bodies concurrently ([`crate::source::fetch_partials`])
//! 3. build a fresh [`Engine`] for this pass
//! 4. resolve every view in parallel on the blocking pool against the shared engine
//! 5. report
//!
//! Nothing in a pass fails because of a single bad template, partial, or card:
//! those are collected in the [`RefreshReport`]. Errors returned from [`refresh`]
//! mean the pass itself could not run.

use anyhow::{Context as _, Result};
use futures::future::join_all;
use std::sync::Arc;

use crate::config::EngineConfig;
use crate::dashboard::{Dashboard, DiscoveryProblem, SaveOutcome, ViewSink, discover};
use crate::source::{FetchText, PartialFetchFailure, fetch_partials};
use crate::templating::{BuildReport, Context, Engine, NodeFailure, NodePath};

/// Everything that went wrong, or nearly did, during a pass.
#[derive(Debug, Default)]
pub struct RefreshReport {
    /// Number of templates registered
    pub templates: usize,
    /// Number of partials loaded
    pub partials: usize,
    /// Number of views resolved
    pub views: usize,
    /// Unusable partial definitions
    pub discovery_problems: Vec<DiscoveryProblem>,
    /// Partials whose bodies could not be fetched
    pub fetch_failures: Vec<PartialFetchFailure>,
    /// Template and partial load problems
    pub build: BuildReport,
    /// Cards that failed to resolve, across all views
    pub node_failures: Vec<NodeFailure>,
}

impl RefreshReport {
    /// Problems with definitions: templates, partials, fetches.
    #[must_use]
    pub fn definition_problems(&self) -> Vec<String> {
        let mut problems: Vec<String> = self.discovery_problems.iter().map(ToString::to_string).collect();
        problems.extend(self.fetch_failures.iter().map(ToString::to_string));
        problems.extend(self.build.templates.rejected.iter().map(ToString::to_string));
        problems.extend(self.build.partials.failures.iter().map(ToString::to_string));
        problems
    }

    /// Total number of problems of any kind.
    #[must_use]
    pub fn problem_count(&self) -> usize {
        self.definition_problems().len() + self.node_failures.len()
    }

    /// Whether the pass resolved everything.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.problem_count() == 0
    }
}

/// Run a refresh pass, returning the resolved dashboard.
///
/// The input is not modified. Template definitions stay in the output so the
/// result can be refreshed again.
pub async fn refresh<F>(
    dashboard: &Dashboard,
    fetcher: &F,
    config: &EngineConfig,
) -> Result<(Dashboard, RefreshReport)>
where
    F: FetchText + Sync,
{
    let discovery = discover(dashboard);
    let fetched = fetch_partials(fetcher, discovery.remote_partials, config.fetch.concurrency).await;

    let builder = Engine::builder()
        .max_depth(config.max_depth)
        .overwrite(config.overwrite)
        .partials(discovery.partials)
        .partials(fetched.partials);
    let builder = discovery.templates.iter().fold(builder, |builder, template| template.add_to(builder));
    let (engine, build) = builder.build();
    let engine = Arc::new(engine);

    let tasks = dashboard.views.iter().cloned().enumerate().map(|(index, view)| {
        let engine = Arc::clone(&engine);
        tokio::task::spawn_blocking(move || {
            let path = NodePath::root(format!("views[{index}]"));
            engine.resolve_with(&view, &Context::new(), &path)
        })
    });

    let mut resolved = dashboard.clone();
    let mut node_failures = Vec::new();
    for (slot, result) in resolved.views.iter_mut().zip(join_all(tasks).await) {
        let resolution = result.context("View resolution task panicked")?;
        node_failures.extend(resolution.failures);
        *slot = resolution.node;
    }

    let report = RefreshReport {
        templates: engine.templates().len(),
        partials: engine.snippets().partials().len(),
        views: resolved.views.len(),
        discovery_problems: discovery.problems,
        fetch_failures: fetched.failures,
        build,
        node_failures,
    };

    tracing::info!(
        "Resolved {} view(s) with {} template(s) and {} partial(s); {} problem(s)",
        report.views,
        report.templates,
        report.partials,
        report.problem_count()
    );
    Ok((resolved, report))
}

/// Totals from saving a dashboard's views.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveSummary {
    /// Views written
    pub written: usize,
    /// Views already up to date
    pub unchanged: usize,
}

/// Hand every view to `sink`, named by [`Dashboard::view_names`].
pub async fn save_views<S>(dashboard: &Dashboard, sink: &S) -> Result<SaveSummary>
where
    S: ViewSink + Sync,
{
    let mut summary = SaveSummary::default();
    for (name, view) in dashboard.view_names().iter().zip(&dashboard.views) {
        match sink.save_view(name, view).await? {
            SaveOutcome::Written => summary.written += 1,
            SaveOutcome::Unchanged => summary.unchanged += 1,
        }
    }
    tracing::info!("Saved views: {} written, {} unchanged", summary.written, summary.unchanged);
    Ok(summary)
}
