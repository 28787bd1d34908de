//! `cvdb init` command - Initialize a new cvdb project

use console::style;
use miette::{IntoDiagnostic, Result};
use std::path::Path;

use crate::cli::GlobalOpts;
use crate::core::project::{Project, ProjectError};
use crate::core::CvStore;

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Directory to initialize (default: current directory)
    #[arg(default_value = ".")]
    pub path: std::path::PathBuf,

    /// Force initialization even if .cvdb/ already exists
    #[arg(long)]
    pub force: bool,
}

pub fn run(args: InitArgs, global: &GlobalOpts) -> Result<()> {
    let path = if args.path.as_os_str() == "." {
        std::env::current_dir().into_diagnostic()?
    } else {
        args.path.clone()
    };

    if !path.exists() {
        std::fs::create_dir_all(&path).into_diagnostic()?;
        if !global.quiet {
            println!(
                "{} Created directory {}",
                style("✓").green(),
                style(path.display()).cyan()
            );
        }
    }

    let project = if args.force {
        Project::init_force(&path)
    } else {
        Project::init(&path)
    };

    match project {
        Ok(project) => {
            // Creating the store applies the schema
            CvStore::open_project(&project)?;

            if global.quiet {
                return Ok(());
            }
            println!(
                "{} Initialized cvdb project at {}",
                style("✓").green(),
                style(project.root().display()).cyan()
            );
            println!();
            println!("Created project structure:");
            print_structure(project.root());
            println!();
            println!("Next steps:");
            println!(
                "  {} Put CV documents (<owner>.json, <owner>_<lang>.json) in data/",
                style("1.").yellow()
            );
            println!("  {} Import them", style("cvdb import").yellow());
            println!("  {} Export them again", style("cvdb export").yellow());
            Ok(())
        }
        Err(ProjectError::AlreadyExists(path)) => {
            println!(
                "{} cvdb project already exists at {}",
                style("!").yellow(),
                style(path.display()).cyan()
            );
            println!();
            println!(
                "Use {} to reinitialize",
                style("cvdb init --force").yellow()
            );
            Ok(())
        }
        Err(e) => Err(miette::miette!("{}", e)),
    }
}

fn print_structure(root: &Path) {
    let entries = [
        ".cvdb/",
        ".cvdb/config.yaml",
        ".cvdb/cv.db",
        ".cvdb/backups/",
        "data/",
        "out/",
    ];

    for entry in entries {
        if root.join(entry).exists() {
            let prefix = if entry.ends_with('/') { "📁" } else { "📄" };
            println!("  {} {}", prefix, style(entry).dim());
        }
    }
}
