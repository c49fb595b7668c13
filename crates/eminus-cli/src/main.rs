//! Command-line bootstrap for EMinus native plugins.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use eminus_core::config::{env_vars, DEFAULT_MODS_DIR, MANIFEST_FILE_NAME};
use eminus_core::{BootstrapConfig, BootstrapOutcome, NativeHost};

/// EMinus - Load native plugins from the mods directory.
#[derive(Parser, Debug)]
#[command(name = "eminus")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Plugin directory.
    #[arg(long, default_value = DEFAULT_MODS_DIR)]
    mods_dir: PathBuf,

    /// Manifest file (defaults to eminus.ini inside the plugin directory).
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Shared-library extension to load (defaults to the platform's).
    #[arg(long)]
    extension: Option<String>,

    /// Enable debug logging.
    #[arg(long)]
    verbose_log: bool,
}

impl Args {
    fn config(&self) -> BootstrapConfig {
        let mut config = BootstrapConfig::with_mods_dir(&self.mods_dir).with_manifest_path(
            self.manifest
                .clone()
                .unwrap_or_else(|| self.mods_dir.join(MANIFEST_FILE_NAME)),
        );
        if let Some(ext) = &self.extension {
            config = config.with_library_extension(ext.clone());
        }
        config
    }
}

fn init_logging(verbose: bool) {
    let json_logging = std::env::var(env_vars::LOG_JSON)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(false);

    let default_level = if verbose { "eminus=debug" } else { "eminus=warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_env(env_vars::LOG_FILTER)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .with_writer(std::io::stderr)
            .init();
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose_log);

    let config = args.config();
    tracing::debug!(?config, "starting bootstrap");

    let mut host = NativeHost::new();
    let outcome = eminus_core::bootstrap(config, &mut host).context("plugin bootstrap failed")?;

    match outcome {
        BootstrapOutcome::Completed(report) => {
            tracing::debug!(modules = report.modules.len(), "bootstrap complete");
            Ok(())
        }
        BootstrapOutcome::Aborted { module, code, .. } => {
            tracing::debug!(%module, code, "bootstrap aborted");
            std::process::exit(code as i32);
        }
    }
}
