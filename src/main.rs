use clap::Parser;
use kdbxkit::cli::commands;
use kdbxkit::cli::{Cli, Commands};
use tracing_subscriber::EnvFilter;

fn main() {
    // Diagnostics go to stderr so they never mix with command output.
    let filter = EnvFilter::try_from_env("KDBXKIT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Create {
            ref path,
            ref format,
            ref cipher,
            ref name,
        } => commands::create::execute(
            &cli,
            path,
            format.as_deref(),
            cipher.as_deref(),
            name.as_deref(),
        ),
        Commands::Info { ref path, json } => commands::info::execute(path, json),
        Commands::Ls { ref path, json } => commands::ls::execute(&cli, path, json),
        Commands::Show {
            ref path,
            ref entry,
            reveal,
        } => commands::show::execute(&cli, path, entry, reveal),
        Commands::Add {
            ref path,
            ref title,
            ref password,
            ref username,
            ref url,
            ref group,
        } => commands::add::execute(
            &cli,
            path,
            commands::add::NewEntry {
                title,
                password: password.as_deref(),
                username: username.as_deref(),
                url: url.as_deref(),
                group: group.as_deref(),
            },
        ),
        Commands::Rm {
            ref path,
            ref entry,
            permanent,
            force,
        } => commands::rm::execute(&cli, path, entry, permanent, force),
        Commands::Convert {
            ref input,
            ref output,
            ref format,
        } => commands::convert::execute(&cli, input, output, format),
        Commands::Calibrate { ref kdf, target_ms } => {
            commands::calibrate::execute(kdf.as_deref(), target_ms)
        }
        Commands::KeyfileGenerate { ref path } => commands::keyfile::execute(path),
        Commands::Completions { shell } => commands::completions::execute(shell),
    };

    if let Err(e) = result {
        kdbxkit::cli::output::error(&e.to_string());
        std::process::exit(1);
    }
}
