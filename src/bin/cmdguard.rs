//! cmdguard CLI binary.

use clap::Parser;

use cmdguard::cli::{self, Cli, Commands};

fn main() {
    let cli_args = Cli::parse();

    let default_level = if cli_args.quiet {
        tracing::Level::WARN
    } else {
        match cli_args.verbose {
            0 => tracing::Level::INFO,
            1 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let exit_code = match cli_args.command {
        Commands::Run {
            config,
            group,
            hash_dir,
            run_id,
            dry_run,
        } => cli::run(&config, group.as_deref(), &hash_dir, &run_id, dry_run),
        Commands::Record {
            config,
            hash_dir,
            force,
        } => cli::record(&config, &hash_dir, force),
        Commands::Verify { config, hash_dir } => cli::verify(&config, &hash_dir),
    };

    std::process::exit(exit_code);
}
