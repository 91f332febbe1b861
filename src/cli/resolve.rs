//! `cardtpl resolve`: run a refresh pass and write the result.

use anyhow::{Context as _, Result};
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};

use crate::config::EngineConfig;
use crate::core::CardtplError;
use crate::dashboard::{Dashboard, DirectorySink, Format};
use crate::refresh::{RefreshReport, refresh, save_views};
use crate::source::HttpFetcher;

/// Resolve a dashboard and write the result.
#[derive(Args, Debug)]
pub struct ResolveCommand {
    /// Dashboard file (YAML or JSON)
    dashboard: PathBuf,

    /// Write the resolved dashboard here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Also write each resolved view to `<dir>/<view>.json`
    #[arg(long, value_name = "DIR")]
    views_dir: Option<PathBuf>,

    /// Output format for the resolved dashboard
    #[arg(long, value_enum, default_value_t = Format::Yaml)]
    format: Format,

    /// Keep the first definition when two templates share a key
    #[arg(long)]
    no_overwrite: bool,

    /// Exit with an error if anything failed to resolve
    #[arg(long)]
    strict: bool,
}

impl ResolveCommand {
    pub async fn execute(self, mut config: EngineConfig, quiet: bool) -> Result<()> {
        if self.no_overwrite {
            config.overwrite = false;
        }

        let dashboard = Dashboard::load(&self.dashboard).await?;
        let fetcher = HttpFetcher::new(base_dir(&self.dashboard), &config.fetch)?;
        let (resolved, report) = refresh(&dashboard, &fetcher, &config).await?;

        if !quiet {
            print_problems(&report);
        }

        let text = self.format.render(&resolved)?;
        match &self.output {
            Some(path) => {
                tokio::fs::write(path, &text)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                if !quiet {
                    eprintln!("{} Wrote {}", "✓".green(), path.display());
                }
            }
            // Keep stdout clean for piping when only views were asked for
            None if self.views_dir.is_some() => {}
            None => print!("{text}"),
        }

        if let Some(dir) = &self.views_dir {
            let summary = save_views(&resolved, &DirectorySink::new(dir)).await?;
            if !quiet {
                eprintln!(
                    "{} Views in {}: {} written, {} unchanged",
                    "✓".green(),
                    dir.display(),
                    summary.written,
                    summary.unchanged
                );
            }
        }

        if self.strict && !report.is_clean() {
            return Err(CardtplError::ResolutionProblems {
                dashboard: self.dashboard.display().to_string(),
                count: report.problem_count(),
            }
            .into());
        }
        Ok(())
    }
}

/// Directory relative partial locations are resolved against.
pub(super) fn base_dir(dashboard: &Path) -> PathBuf {
    dashboard
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
}

/// Print every problem in a report to stderr.
pub(super) fn print_problems(report: &RefreshReport) {
    for problem in report.definition_problems() {
        eprintln!("{} {}", "⚠".yellow(), problem);
    }
    for failure in &report.node_failures {
        eprintln!("{} {}", "✗".red(), failure);
    }
}
