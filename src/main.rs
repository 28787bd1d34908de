use clap::Parser;
use cvdb::cli::{Cli, Commands};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    // Reset SIGPIPE to default behavior (terminate silently) for proper Unix piping.
    // Without this, piping to `head`, `grep -q`, etc. causes a panic on broken pipe.
    #[cfg(unix)]
    {
        unsafe {
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
        }
    }
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(2)
                .tab_width(4)
                .build(),
        )
    }))?;

    let cli = Cli::parse();
    let global = cli.global;

    init_logging(global.verbose);

    match cli.command {
        Commands::Init(args) => cvdb::cli::commands::init::run(args, &global),
        Commands::Import(args) => cvdb::cli::commands::import::run(args, &global),
        Commands::Export(args) => cvdb::cli::commands::export::run(args, &global),
        Commands::Diff(args) => cvdb::cli::commands::diff::run(args, &global),
        Commands::List(args) => cvdb::cli::commands::list::run(args, &global),
        Commands::Doctor(args) => cvdb::cli::commands::doctor::run(args, &global),
        Commands::Tag(cmd) => cvdb::cli::commands::tag::run(cmd, &global),
        Commands::Entry(cmd) => cvdb::cli::commands::entry::run(cmd, &global),
        Commands::Completions(args) => cvdb::cli::commands::completions::run(args),
    }
}

/// Log to stderr; `CVDB_LOG` takes precedence over `--verbose`
fn init_logging(verbose: bool) {
    let default = if verbose { "cvdb=debug" } else { "cvdb=warn" };
    let filter = EnvFilter::try_from_env("CVDB_LOG").unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}
