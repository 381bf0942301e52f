mod driver;
mod prefs;
mod prompt;
mod reporter;

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use icauth_core::config::parse_icloud_remotes;
use icauth_core::remote::run_remote_selection_flow;
use icauth_core::{assemble_outcome, run_auth_flow};

use crate::driver::IcloudDriver;
use crate::prompt::ConsolePrompt;

/// Remote name used when no config exists to select from.
const DEFAULT_REMOTE: &str = "iclouddrive";

/// Harvest an iCloud web session and feed it to rclone's iCloud Drive
/// backend.
#[derive(Parser, Debug)]
#[command(name = "icloud-auth", version, about)]
struct Cli {
    /// Capture checkpoint screenshots under /tmp during the flow
    #[arg(long)]
    debug: bool,

    /// Patch this remote instead of prompting for a selection
    #[arg(long)]
    remote: Option<String>,

    /// Path to the rclone config file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.debug {
        "icauth_cli=debug,icauth_browser=debug,icauth_core=debug"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    println!("=== rclone iCloud Authenticator ===");

    let config_path = cli.config.unwrap_or_else(reporter::rclone_config_path);
    let existing_config = reporter::read_rclone_config(&config_path)?;

    let prefs_path = prefs::preferences_path();
    let mut preferences = prefs::Preferences::load(&prefs_path);

    let mut prompt = ConsolePrompt::new();

    let remotes = existing_config
        .as_deref()
        .map(parse_icloud_remotes)
        .unwrap_or_default();

    let (remote, selected_interactively) = match cli.remote {
        Some(name) => (name, false),
        // Nothing to select from: the patch will be a no-op and the
        // reporter falls back to printing the command line.
        None if remotes.is_empty() => (DEFAULT_REMOTE.to_string(), false),
        None => {
            let selection = run_remote_selection_flow(
                &remotes,
                preferences.default_remote.as_deref(),
                |candidates, saved_default| prompt.select_remote(candidates, saved_default),
            )
            .await?;
            (selection.remote_name, true)
        }
    };

    let mut driver = IcloudDriver::new(cli.debug);
    let result = run_auth_flow(&mut driver, &mut prompt).await?;

    let outcome = assemble_outcome(&result, existing_config.as_deref(), &remote);
    reporter::report_outcome(&outcome, &config_path, &remote)?;

    if selected_interactively && preferences.default_remote.as_deref() != Some(remote.as_str()) {
        preferences.default_remote = Some(remote.clone());
        if let Err(e) = preferences.save(&prefs_path) {
            tracing::warn!(error = %e, "failed to save preferences");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_parse() {
        let cli = Cli::parse_from([
            "icloud-auth",
            "--debug",
            "--remote",
            "work-icloud",
            "--config",
            "/tmp/rclone.conf",
        ]);
        assert!(cli.debug);
        assert_eq!(cli.remote.as_deref(), Some("work-icloud"));
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("/tmp/rclone.conf")));
    }

    #[test]
    fn flags_default_off() {
        let cli = Cli::parse_from(["icloud-auth"]);
        assert!(!cli.debug);
        assert_eq!(cli.remote, None);
        assert_eq!(cli.config, None);
    }
}
