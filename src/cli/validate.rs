//! `cardtpl validate`: check dashboards without writing anything.
//!
//! Definition problems (rejected templates, broken or unreachable partials) always
//! fail validation. Cards that fail to resolve are warnings unless `--strict` is
//! given.

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::resolve::base_dir;
use crate::config::EngineConfig;
use crate::core::CardtplError;
use crate::dashboard::Dashboard;
use crate::refresh::{RefreshReport, refresh};
use crate::source::HttpFetcher;

const DASHBOARD_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Check a dashboard, or every dashboard under a directory.
#[derive(Args, Debug)]
pub struct ValidateCommand {
    /// Dashboard file, or a directory searched for .yaml/.yml/.json files
    path: PathBuf,

    /// Treat cards that fail to resolve as errors
    #[arg(long)]
    strict: bool,
}

impl ValidateCommand {
    pub async fn execute(self, config: EngineConfig, quiet: bool) -> Result<()> {
        let files = dashboard_files(&self.path)?;
        let mut problems = 0;

        for file in &files {
            let count = match self.check(file, &config).await {
                Ok(report) => {
                    let count = self.count(&report);
                    if !quiet {
                        print_report(file, &report, self.strict);
                    }
                    count
                }
                Err(e) => {
                    eprintln!("{} {}: {:#}", "✗".red(), file.display(), e);
                    1
                }
            };
            problems += count;
        }

        if problems > 0 {
            return Err(CardtplError::ResolutionProblems {
                dashboard: self.path.display().to_string(),
                count: problems,
            }
            .into());
        }
        if !quiet {
            println!("{} {} dashboard(s) valid", "✓".green(), files.len());
        }
        Ok(())
    }

    async fn check(&self, file: &Path, config: &EngineConfig) -> Result<RefreshReport> {
        let dashboard = Dashboard::load(file).await?;
        let fetcher = HttpFetcher::new(base_dir(file), &config.fetch)?;
        let (_, report) = refresh(&dashboard, &fetcher, config).await?;
        Ok(report)
    }

    fn count(&self, report: &RefreshReport) -> usize {
        let definitions = report.definition_problems().len();
        if self.strict {
            definitions + report.node_failures.len()
        } else {
            definitions
        }
    }
}

/// `path` itself when it is a file, else every dashboard file below it, sorted.
fn dashboard_files(path: &Path) -> Result<Vec<PathBuf>> {
    if !path.exists() {
        return Err(CardtplError::DashboardNotFound {
            path: path.display().to_string(),
        }
        .into());
    }
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(path).follow_links(true) {
        let entry = entry?;
        let is_dashboard = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| DASHBOARD_EXTENSIONS.contains(&ext));
        if entry.file_type().is_file() && is_dashboard {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

fn print_report(file: &Path, report: &RefreshReport, strict: bool) {
    let definitions = report.definition_problems();
    let mark = if !definitions.is_empty() || (strict && !report.node_failures.is_empty()) {
        "✗".red()
    } else if report.node_failures.is_empty() {
        "✓".green()
    } else {
        "⚠".yellow()
    };
    println!(
        "{} {} ({} view(s), {} template(s), {} partial(s))",
        mark,
        file.display(),
        report.views,
        report.templates,
        report.partials
    );
    let other_problems = report
        .discovery_problems
        .iter()
        .map(ToString::to_string)
        .chain(report.fetch_failures.iter().map(ToString::to_string))
        .chain(report.build.partials.failures.iter().map(ToString::to_string));
    for problem in other_problems {
        println!("    {} {}", "✗".red(), problem);
    }
    for rejected in &report.build.templates.rejected {
        let mut lines = rejected.format_with_context().lines().map(str::to_string).collect::<Vec<_>>();
        if lines.is_empty() {
            continue;
        }
        let first = lines.remove(0);
        println!("    {} {}", "✗".red(), first);
        for line in lines {
            println!("      {line}");
        }
    }
    for failure in &report.node_failures {
        let marker = if strict { "✗".red() } else { "⚠".yellow() };
        println!("    {} {}", marker, failure);
    }
}
