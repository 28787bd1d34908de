//! `cvdb list` command - List owners or tags

use clap::ValueEnum;
use console::style;
use miette::Result;

use crate::cli::helpers::{open, print_json, render_table, truncate_str, READ_ATTEMPTS};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::store::retry_on_busy;

#[derive(clap::Args, Debug)]
pub struct ListArgs {
    /// What to list
    #[arg(value_enum)]
    pub kind: ListKind,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum ListKind {
    /// CV owners with entry counts
    Owners,
    /// Tag catalog with usage counts
    Tags,
}

pub fn run(args: ListArgs, global: &GlobalOpts) -> Result<()> {
    let (_, _, store) = open(global)?;

    match args.kind {
        ListKind::Owners => {
            let owners = retry_on_busy(READ_ATTEMPTS, || store.list_owners())?;
            if global.format == OutputFormat::Json {
                return print_json(&owners);
            }
            if owners.is_empty() {
                println!("{} No owners yet. Run {}", style("!").yellow(), style("cvdb import").yellow());
                return Ok(());
            }
            let rows = owners
                .iter()
                .map(|o| {
                    vec![
                        o.slug.clone(),
                        truncate_str(&o.name, 40),
                        o.language.clone(),
                        o.entry_count.to_string(),
                    ]
                })
                .collect();
            println!(
                "{}",
                render_table(global.format, &["SLUG", "NAME", "LANG", "ENTRIES"], rows)
            );
        }
        ListKind::Tags => {
            let tags = retry_on_busy(READ_ATTEMPTS, || store.list_tags())?;
            if global.format == OutputFormat::Json {
                return print_json(&tags);
            }
            if tags.is_empty() {
                println!("{} Tag catalog is empty", style("!").yellow());
                return Ok(());
            }
            let rows = tags
                .iter()
                .map(|t| {
                    vec![
                        t.name.clone(),
                        t.entry_count.to_string(),
                        truncate_str(t.description.as_deref().unwrap_or(""), 50),
                    ]
                })
                .collect();
            println!(
                "{}",
                render_table(global.format, &["NAME", "ENTRIES", "DESCRIPTION"], rows)
            );
        }
    }

    Ok(())
}
