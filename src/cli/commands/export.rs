//! `cvdb export` command - Write stored owners back to documents

use clap::ValueEnum;
use console::{style, Term};
use dialoguer::{theme::ColorfulTheme, Confirm};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::cli::helpers::{open, print_json, READ_ATTEMPTS};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::document::save_document;
use crate::core::pipeline::{SkippedEntry, TagMode};
use crate::core::store::retry_on_busy;

#[derive(clap::Args, Debug)]
pub struct ExportArgs {
    /// Output directory (default: configured output_dir, or out/)
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Only export this owner (slug or base slug)
    #[arg(long)]
    pub owner: Option<String>,

    /// How current tag relations are applied to exported entries
    #[arg(long, value_enum, default_value = "none")]
    pub tags: TagModeArg,

    /// Overwrite existing files without asking
    #[arg(long, short = 'y')]
    pub yes: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum TagModeArg {
    /// Payloads exactly as stored
    None,
    /// Refresh tags of entries that already carry a tag field
    Apply,
    /// Give every entry its current tags
    ApplyAll,
}

impl From<TagModeArg> for TagMode {
    fn from(arg: TagModeArg) -> Self {
        match arg {
            TagModeArg::None => TagMode::None,
            TagModeArg::Apply => TagMode::Apply,
            TagModeArg::ApplyAll => TagMode::ApplyAll,
        }
    }
}

#[derive(Serialize)]
struct ExportedFile {
    owner: String,
    path: PathBuf,
    entries: usize,
    written: bool,
    skipped: Vec<SkippedEntry>,
}

pub fn run(args: ExportArgs, global: &GlobalOpts) -> Result<()> {
    let (project, config, store) = open(global)?;
    let out_dir = args.out.clone().unwrap_or_else(|| config.output_dir(&project));
    let mode = TagMode::from(args.tags);

    let mut owners = Vec::new();
    for summary in retry_on_busy(READ_ATTEMPTS, || store.list_owners())? {
        let owner = retry_on_busy(READ_ATTEMPTS, || store.get_owner(&summary.slug))?;
        let selected = match &args.owner {
            Some(filter) => owner.slug == *filter || owner.base_slug == *filter,
            None => true,
        };
        if selected {
            owners.push(owner);
        }
    }

    if owners.is_empty() {
        return match &args.owner {
            Some(filter) => Err(miette::miette!("owner not found: {}", filter)),
            None => {
                if !global.quiet {
                    println!("{} Store has no owners to export", style("!").yellow());
                }
                Ok(())
            }
        };
    }

    std::fs::create_dir_all(&out_dir).into_diagnostic()?;
    let interactive = Term::stdout().is_term();
    let mut files = Vec::new();

    for owner in owners {
        let report = retry_on_busy(READ_ATTEMPTS, || store.export_owner(&owner.slug, mode))?;
        let path = out_dir.join(format!("{}.json", owner.slug));

        let written = if path.exists() && !args.yes {
            if !interactive {
                return Err(miette::miette!(
                    "{} already exists; pass --yes to overwrite",
                    path.display()
                ));
            }
            Confirm::with_theme(&ColorfulTheme::default())
                .with_prompt(format!("Overwrite {}?", path.display()))
                .default(false)
                .interact()
                .into_diagnostic()?
        } else {
            true
        };

        if written {
            save_document(&path, &report.document)?;
        }

        files.push(ExportedFile {
            owner: owner.slug,
            path,
            entries: report.entries_exported,
            written,
            skipped: report.skipped,
        });
    }

    if global.format == OutputFormat::Json {
        return print_json(&files);
    }
    if global.quiet {
        return Ok(());
    }

    for file in &files {
        if file.written {
            println!(
                "{} {} → {} ({} entries, tags: {})",
                style("✓").green(),
                style(&file.owner).bold(),
                style(file.path.display()).cyan(),
                file.entries,
                mode
            );
        } else {
            println!(
                "{} {} skipped, {} left unchanged",
                style("-").dim(),
                style(&file.owner).bold(),
                file.path.display()
            );
        }
        for skipped in &file.skipped {
            println!(
                "  {} entry {} ({}): {}",
                style("✗").red(),
                skipped.entry_id,
                skipped.section,
                skipped.reason
            );
        }
    }

    Ok(())
}
