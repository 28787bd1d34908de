//! `cvdb doctor` command - Report store consistency problems

use console::style;
use miette::Result;

use crate::cli::helpers::{open, print_json, READ_ATTEMPTS};
use crate::cli::{GlobalOpts, OutputFormat};
use crate::core::store::retry_on_busy;
use crate::core::DoctorReport;

#[derive(clap::Args, Debug)]
pub struct DoctorArgs {
    /// Exit with an error when problems are found
    #[arg(long)]
    pub check: bool,
}

pub fn run(args: DoctorArgs, global: &GlobalOpts) -> Result<()> {
    let (_, _, store) = open(global)?;
    let report = retry_on_busy(READ_ATTEMPTS, || store.doctor())?;

    if global.format == OutputFormat::Json {
        print_json(&report)?;
    } else {
        if !global.quiet {
            let stats = retry_on_busy(READ_ATTEMPTS, || store.statistics())?;
            println!(
                "{} owners, {} entries, {} tags, {} relations, {} translation groups ({} KiB)",
                stats.owners,
                stats.entries,
                stats.tags,
                stats.relations,
                stats.stable_entries,
                stats.db_size_bytes / 1024
            );
            println!();
        }
        print_report(&report, global.quiet);
    }

    if args.check && !report.is_healthy() {
        return Err(miette::miette!(
            "{} problem(s) found",
            report.problem_count()
        ));
    }
    Ok(())
}

fn print_report(report: &DoctorReport, quiet: bool) {
    if report.is_healthy() {
        if !quiet {
            println!("{} Store is consistent", style("✓").green());
        }
    } else {
        println!(
            "{} {} problem(s) found",
            style("✗").red(),
            report.problem_count()
        );
    }

    for orphan in &report.orphan_entries {
        println!(
            "  {} entry {} belongs to missing owner {}",
            style("orphan").red(),
            orphan.entry_id,
            orphan.owner_id
        );
    }
    for relation in &report.dangling_relations {
        println!(
            "  {} entry {} / tag {} ({} missing)",
            style("relation").red(),
            relation.entry_id,
            relation.tag_id,
            relation.missing
        );
    }
    for group in &report.case_duplicate_tags {
        println!(
            "  {} tags differ only by case: {}",
            style("duplicate").yellow(),
            group.join(", ")
        );
    }
    for id in &report.missing_identity_keys {
        println!("  {} entry {} has no identity key", style("identity").yellow(), id);
    }
    for invalid in &report.invalid_payloads {
        println!(
            "  {} entry {}: {}",
            style("payload").red(),
            invalid.entry_id,
            invalid.error
        );
    }
    for stable in &report.empty_stable_entries {
        println!("  {} {} has no language links", style("group").yellow(), stable);
    }
    for link in &report.dangling_links {
        println!(
            "  {} {} [{}] points at missing entry {}",
            style("link").red(),
            link.stable_id,
            link.language,
            link.entry_id
        );
    }

    if !report.tag_drift.is_empty() && !quiet {
        println!();
        println!(
            "{} {} entr(ies) whose embedded tags differ from relations (export with --tags apply to reconcile)",
            style("i").blue(),
            report.tag_drift.len()
        );
        for drift in &report.tag_drift {
            println!(
                "  entry {}: embedded [{}], related [{}]",
                drift.entry_id,
                drift.embedded.join(", "),
                drift.related.join(", ")
            );
        }
    }
}
