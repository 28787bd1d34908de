//! `cvdb tag` command - Tag catalog lifecycle
//!
//! Every change keeps the catalog, the relation table and the tag lists
//! embedded in entry payloads consistent.

use clap::Subcommand;
use console::style;
use miette::Result;

use crate::cli::helpers::{open, print_json, render_table, READ_ATTEMPTS};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::store::{retry_on_busy, EntryId};

#[derive(Subcommand, Debug)]
pub enum TagCommands {
    /// Create a tag
    New {
        name: String,

        /// Optional description
        #[arg(long, short = 'd')]
        description: Option<String>,
    },

    /// Rename a tag (entry payloads keep the old name until exported with tags applied)
    Rename { old: String, new: String },

    /// Delete a tag and strip it from every entry
    Delete { name: String },

    /// Tag an entry, creating the tag if needed
    Assign { entry: EntryId, name: String },

    /// Remove a tag from an entry
    Unassign { entry: EntryId, name: String },

    /// List tags with usage counts
    List,

    /// Strip payload references to tags missing from the catalog
    Cleanup,
}

pub fn run(cmd: TagCommands, global: &GlobalOpts) -> Result<()> {
    let (_, _, mut store) = open(global)?;
    let json = global.format == OutputFormat::Json;

    match cmd {
        TagCommands::New { name, description } => {
            let tag = store.create_tag(&name, description.as_deref())?;
            if json {
                return print_json(&tag);
            }
            if !global.quiet {
                println!("{} Created tag {}", style("✓").green(), style(&tag.name).cyan());
            }
        }
        TagCommands::Rename { old, new } => {
            store.rename_tag(&old, &new)?;
            if !global.quiet {
                println!(
                    "{} Renamed {} → {}",
                    style("✓").green(),
                    style(&old).dim(),
                    style(&new).cyan()
                );
            }
        }
        TagCommands::Delete { name } => {
            let report = store.delete_tag(&name)?;
            if json {
                return print_json(&report);
            }
            if !global.quiet {
                println!(
                    "{} Deleted tag {} ({} relation(s), {} payload(s) updated)",
                    style("✓").green(),
                    style(&report.tag).cyan(),
                    report.relations_removed,
                    report.payloads_updated
                );
            }
        }
        TagCommands::Assign { entry, name } => {
            let added = store.assign_tag(entry, &name)?;
            if !global.quiet {
                if added {
                    println!(
                        "{} Tagged entry {} with {}",
                        style("✓").green(),
                        entry,
                        style(&name).cyan()
                    );
                } else {
                    println!("{} Entry {} already has {}", style("-").dim(), entry, name);
                }
            }
        }
        TagCommands::Unassign { entry, name } => {
            let removed = store.unassign_tag(entry, &name)?;
            if !global.quiet {
                if removed {
                    println!(
                        "{} Removed {} from entry {}",
                        style("✓").green(),
                        style(&name).cyan(),
                        entry
                    );
                } else {
                    println!("{} Entry {} does not have {}", style("-").dim(), entry, name);
                }
            }
        }
        TagCommands::List => {
            let tags = retry_on_busy(READ_ATTEMPTS, || store.list_tags())?;
            if json {
                return print_json(&tags);
            }
            let rows = tags
                .iter()
                .map(|t| vec![t.name.clone(), t.entry_count.to_string()])
                .collect();
            println!("{}", render_table(global.format, &["NAME", "ENTRIES"], rows));
        }
        TagCommands::Cleanup => {
            let report = store.cleanup_orphan_references()?;
            if json {
                return print_json(&report);
            }
            if !global.quiet {
                println!(
                    "{} Scanned {} entries, updated {}, removed {} reference(s)",
                    style("✓").green(),
                    report.entries_scanned,
                    report.entries_updated,
                    report.references_removed
                );
                if !report.removed_names.is_empty() {
                    let names: Vec<&str> = report.removed_names.iter().map(String::as_str).collect();
                    println!("  removed names: {}", names.join(", "));
                }
                for id in &report.unparsable {
                    println!("  {} entry {} has an invalid payload", style("✗").red(), id);
                }
            }
        }
    }

    Ok(())
}
