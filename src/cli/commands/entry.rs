//! `cvdb entry` command - Entries and their translations

use clap::Subcommand;
use console::style;
use miette::Result;
use serde_json::json;

use crate::cli::helpers::{
    open, parse_json_arg, print_json, render_table, truncate_str, READ_ATTEMPTS,
};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::sections::root_section;
use crate::core::store::{retry_on_busy, Entry, EntryId};

#[derive(Subcommand, Debug)]
pub enum EntryCommands {
    /// List an owner's entries in document order
    List {
        /// Owner slug
        owner: String,

        /// Only entries of this section
        #[arg(long)]
        section: Option<String>,
    },

    /// Show an entry with its tags and translations
    Show { id: EntryId },

    /// Create an entry and linked placeholders in every configured language
    New {
        /// Owner base slug (document name without language suffix)
        #[arg(long)]
        owner: String,

        /// Section, or skills/<category>/<subcategory> for skills
        #[arg(long)]
        section: String,

        /// Entry data as JSON, or @file
        #[arg(long)]
        data: String,

        /// Language of the given data (default: configured default language)
        #[arg(long)]
        lang: Option<String>,
    },

    /// Replace an entry's data
    Update {
        id: EntryId,

        /// Entry data as JSON, or @file
        #[arg(long)]
        data: String,

        /// Copy shared fields (URLs, dates, tags, ids) to the other languages
        #[arg(long)]
        sync: bool,
    },

    /// Delete an entry
    Delete {
        id: EntryId,

        /// Delete every language variant and the translation group
        #[arg(long)]
        all_languages: bool,
    },

    /// Group existing entries of different languages as translations
    Link {
        #[arg(required = true, num_args = 1..)]
        ids: Vec<EntryId>,
    },

    /// List the language variants of an entry
    Translations { id: EntryId },

    /// Mark an entry's translation as done
    Translated { id: EntryId },
}

pub fn run(cmd: EntryCommands, global: &GlobalOpts) -> Result<()> {
    let (_, config, mut store) = open(global)?;
    let json_out = global.format == OutputFormat::Json;

    match cmd {
        EntryCommands::List { owner, section } => {
            let owner = store.get_owner(&owner)?;
            let entries: Vec<Entry> = retry_on_busy(READ_ATTEMPTS, || store.entries_for_owner(owner.id))?
                .into_iter()
                .filter(|e| match &section {
                    Some(s) => root_section(&e.section) == s.as_str(),
                    None => true,
                })
                .collect();
            if json_out {
                return print_json(&entries);
            }
            let rows = entries
                .iter()
                .map(|e| {
                    vec![
                        e.id.to_string(),
                        e.section.clone(),
                        truncate_str(e.identity_key.as_deref().unwrap_or(""), 60),
                    ]
                })
                .collect();
            println!("{}", render_table(global.format, &["ID", "SECTION", "IDENTITY"], rows));
        }
        EntryCommands::Show { id } => {
            let entry = retry_on_busy(READ_ATTEMPTS, || store.get_entry(id))?;
            let payload = entry.parse_payload()?;
            let tags = store.tags_for_entry(id)?;
            let translations = store.translations(id)?;

            if json_out {
                return print_json(&json!({
                    "entry": entry,
                    "data": payload,
                    "tags": tags,
                    "translations": translations,
                }));
            }

            println!("{} {}", style("Entry").bold(), style(entry.id).cyan());
            println!("  Owner:    {}", entry.owner_slug);
            println!("  Section:  {}", entry.section);
            println!("  Kind:     {}", entry.kind.as_str());
            println!(
                "  Identity: {}",
                entry.identity_key.as_deref().unwrap_or("(none)")
            );
            println!("  Tags:     {}", tags.join(", "));
            if !translations.is_empty() {
                println!("  Group:    {}", translations[0].stable_id);
                for link in &translations {
                    println!(
                        "    {} → {}{}",
                        link.language,
                        link.entry_id,
                        if link.needs_translation {
                            style(" (needs translation)").yellow().to_string()
                        } else {
                            String::new()
                        }
                    );
                }
            }
            println!();
            print_json(&payload)?;
        }
        EntryCommands::New {
            owner,
            section,
            data,
            lang,
        } => {
            let data = parse_json_arg(&data)?;
            let languages = config.languages();
            let source = lang.unwrap_or_else(|| languages.default.clone());
            let group = store.create_with_sync(&owner, &section, &data, &source, &languages)?;

            if json_out {
                return print_json(&group);
            }
            if !global.quiet {
                println!(
                    "{} Created {} in {} language(s)",
                    style("✓").green(),
                    style(&group.stable_id).cyan(),
                    group.links.len()
                );
                for link in &group.links {
                    println!("  {} → entry {}", link.language, link.entry_id);
                }
            }
        }
        EntryCommands::Update { id, data, sync } => {
            let data = parse_json_arg(&data)?;
            let report = store.update_entry(id, &data, sync)?;
            if json_out {
                return print_json(&report);
            }
            if !global.quiet {
                println!("{} Updated entry {}", style("✓").green(), id);
                if !report.synced.is_empty() {
                    let ids: Vec<String> = report.synced.iter().map(|i| i.to_string()).collect();
                    println!("  shared fields synced to {}", ids.join(", "));
                }
            }
        }
        EntryCommands::Delete { id, all_languages } => {
            let deleted = store.delete_entry(id, all_languages)?;
            if json_out {
                return print_json(&deleted);
            }
            if !global.quiet {
                println!(
                    "{} Deleted {} entr{}",
                    style("✓").green(),
                    deleted.len(),
                    if deleted.len() == 1 { "y" } else { "ies" }
                );
            }
        }
        EntryCommands::Link { ids } => {
            let group = store.link_existing(&ids)?;
            if json_out {
                return print_json(&group);
            }
            if !global.quiet {
                println!(
                    "{} Linked {} entries as {}",
                    style("✓").green(),
                    group.links.len(),
                    style(&group.stable_id).cyan()
                );
            }
        }
        EntryCommands::Translations { id } => {
            let links = retry_on_busy(READ_ATTEMPTS, || store.translations(id))?;
            if json_out {
                return print_json(&links);
            }
            if links.is_empty() {
                println!("{} Entry {} is not linked", style("!").yellow(), id);
            }
            for link in &links {
                println!(
                    "{}\t{}\t{}",
                    link.language,
                    link.entry_id,
                    if link.needs_translation { "needs translation" } else { "translated" }
                );
            }
        }
        EntryCommands::Translated { id } => {
            store.mark_translated(id)?;
            if !global.quiet {
                println!("{} Entry {} marked as translated", style("✓").green(), id);
            }
        }
    }

    Ok(())
}
