//! `cvdb import` command - Import CV documents into the store

use console::style;
use miette::Result;
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::helpers::{open, print_json};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::pipeline::{import_dir, ImportOptions, ImportReport};

#[derive(clap::Args, Debug)]
pub struct ImportArgs {
    /// Documents directory (default: configured documents_dir, or data/)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Only import documents of this owner (slug or base slug)
    #[arg(long)]
    pub owner: Option<String>,

    /// Replace each section present in a document instead of merging
    #[arg(long)]
    pub overwrite: bool,

    /// Skip the backup normally written before an overwrite
    #[arg(long)]
    pub no_backup: bool,

    /// Fail if any document or item could not be imported
    #[arg(long)]
    pub strict: bool,
}

#[derive(Serialize)]
struct DocumentOutcome {
    path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    report: Option<ImportReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

pub fn run(args: ImportArgs, global: &GlobalOpts) -> Result<()> {
    let (project, config, mut store) = open(global)?;
    let dir = args.dir.clone().unwrap_or_else(|| config.documents_dir(&project));
    let languages = config.languages();

    let options = ImportOptions {
        overwrite: args.overwrite,
        backup_dir: (args.overwrite && !args.no_backup && config.backup_on_overwrite())
            .then(|| project.backup_dir()),
    };

    let results = import_dir(&mut store, &dir, args.owner.as_deref(), &languages, &options)?;

    let outcomes: Vec<DocumentOutcome> = results
        .into_iter()
        .map(|r| match r.result {
            Ok(report) => DocumentOutcome {
                path: r.path,
                report: Some(report),
                error: None,
            },
            Err(e) => DocumentOutcome {
                path: r.path,
                report: None,
                error: Some(e.to_string()),
            },
        })
        .collect();

    let failed_documents = outcomes.iter().filter(|o| o.error.is_some()).count();
    let item_errors: usize = outcomes
        .iter()
        .filter_map(|o| o.report.as_ref())
        .map(|r| r.errors.len())
        .sum();

    if global.format == OutputFormat::Json {
        print_json(&outcomes)?;
    } else if !global.quiet {
        print_summary(&outcomes);
    }

    if args.strict && (failed_documents > 0 || item_errors > 0) {
        return Err(miette::miette!(
            "import finished with {} failed document(s) and {} item error(s)",
            failed_documents,
            item_errors
        ));
    }

    Ok(())
}

fn print_summary(outcomes: &[DocumentOutcome]) {
    if outcomes.is_empty() {
        println!("{} No documents found", style("!").yellow());
        return;
    }

    for outcome in outcomes {
        let name = outcome
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        match (&outcome.report, &outcome.error) {
            (Some(report), _) => {
                println!(
                    "{} {} → {}",
                    style("✓").green(),
                    style(&name).cyan(),
                    style(&report.owner).bold()
                );
                println!(
                    "  created {}, updated {}, unchanged {}{}",
                    style(report.created).green(),
                    style(report.updated).yellow(),
                    report.unchanged,
                    if report.deleted > 0 {
                        format!(", replaced {}", style(report.deleted).red())
                    } else {
                        String::new()
                    }
                );
                if let Some(backup) = &report.backup {
                    println!("  backup {}", style(backup.display()).dim());
                }
                for err in &report.errors {
                    println!(
                        "  {} {}: {}",
                        style("✗").red(),
                        err.location,
                        err.message
                    );
                }
            }
            (None, Some(error)) => {
                println!("{} {}: {}", style("✗").red(), style(&name).cyan(), error);
            }
            (None, None) => {}
        }
    }
}
