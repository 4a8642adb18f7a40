//! makeavail - Temporary interactive access to a remote encrypted tree
//!
//! Usage:
//!   makeavail open [target]   - Mount, open a shell in the decrypted tree, unmount
//!   makeavail check [target]  - Validate the configuration and show the plan
//!   makeavail list            - List configured mount targets
//!   makeavail init --host <h> - Write a starter configuration

use clap::{Parser, Subcommand};
use makeavail::{
    config::Config,
    run::run,
    tools::{SystemTools, Tools},
    validate::{plan, validate},
    Error, Result,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "makeavail")]
#[command(author = "makeavail Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Temporarily expose a remote encfs tree over sshfs for an interactive session")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "~/.config/makeavail/config.json")]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a target, open a shell in the decrypted tree, then unmount
    Open {
        /// Mount target name (optional when only one is configured)
        target: Option<String>,

        /// Mount the remote tree read-write
        #[arg(long)]
        read_write: bool,

        /// Regenerate the checksum manifest after the session
        #[arg(long, conflicts_with = "no_checksum")]
        checksum: bool,

        /// Skip the checksum manifest even if the config enables it
        #[arg(long)]
        no_checksum: bool,
    },

    /// Validate the configuration for a target without mounting anything
    Check {
        /// Mount target name (optional when only one is configured)
        target: Option<String>,
    },

    /// List configured mount targets
    List,

    /// Write a starter configuration file
    Init {
        /// Remote host holding the encrypted trees
        #[arg(long)]
        host: String,

        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    // Setup logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set up logging: {}", e);
    }

    let config_path = expand_tilde(&cli.config);

    if let Err(e) = run_command(cli.command, &config_path) {
        error!("Error: {}", e);
        if e.is_preflight() {
            info!("Nothing was mounted; fix {:?} and retry", config_path);
        }
        std::process::exit(1);
    }
}

fn run_command(command: Commands, config_path: &Path) -> Result<()> {
    match command {
        Commands::Open {
            target,
            read_write,
            checksum,
            no_checksum,
        } => {
            let mut config = load_for(config_path, target)?;
            if read_write {
                config.mount_read_write = true;
            }
            if checksum {
                config.perform_checksum = true;
            }
            if no_checksum {
                config.perform_checksum = false;
            }
            cmd_open(&config)
        }

        Commands::Check { target } => cmd_check(&load_for(config_path, target)?),

        Commands::List => cmd_list(&Config::load(config_path)?),

        Commands::Init { host, force } => cmd_init(config_path, host, force),
    }
}

/// Load the config and select the requested target
fn load_for(config_path: &Path, target: Option<String>) -> Result<Config> {
    let mut config = Config::load(config_path)?;
    match target {
        Some(name) => config.select(name),
        None => {
            if config.select_sole_target() {
                info!("Using the only configured target");
            }
        }
    }
    Ok(config)
}

fn cmd_open(config: &Config) -> Result<()> {
    let system = SystemTools::new(config.tools.clone());
    let report = run(config, Tools::from_all(&system))?;

    if let Some(manifest) = report.manifest {
        println!("Checksum file updated at {}.", manifest.display());
    }
    Ok(())
}

fn cmd_check(config: &Config) -> Result<()> {
    let target = validate(config)?;

    println!("Target '{}' is ready", target.spec.name);
    for (label, value) in plan(config, &target) {
        println!("  {:<16} {}", format!("{}:", label), value);
    }
    Ok(())
}

fn cmd_list(config: &Config) -> Result<()> {
    if config.mounts.is_empty() {
        println!("No mount targets configured");
        return Ok(());
    }

    println!("Mount targets on {}:", config.host);
    for spec in &config.mounts {
        println!("  {:<16} {}", spec.name, spec.remote_dir);
    }
    Ok(())
}

fn cmd_init(config_path: &Path, host: String, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        )));
    }

    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    Config::example(host).save(config_path)?;

    info!("Configuration saved to {:?}", config_path);
    info!("Edit the mount targets, then run 'makeavail check' to validate");
    Ok(())
}

/// Expand ~ to home directory
fn expand_tilde(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
