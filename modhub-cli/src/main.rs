//! Modhub - Install and upgrade modules from signed repositories
//!
//! Main entry point: parses the command line, loads the configuration and
//! dispatches to the repository operations.

use anyhow::{bail, Result};
use clap::{Args, Parser, ValueEnum};
use std::path::PathBuf;
use tabled::{
    settings::{object::Rows, Alignment, Modify, Style},
    Table, Tabled,
};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use modhub_core::repositories::{Keyring, ModuleInfo, UpdateSummary};
use modhub_core::ModhubConfig;

mod progress;
mod repos_cli;

use progress::with_repositories;

/// Log levels
#[derive(Debug, Clone, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

#[derive(Parser, Debug)]
#[clap(
    name = "modhub",
    about = "Install and upgrade modules from signed repositories",
    version
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,

    #[clap(flatten)]
    options: GlobalOptions,
}

/// Flags shared by every command
#[derive(Args, Debug)]
struct GlobalOptions {
    /// Set log level
    #[clap(long, default_value = "warn", global = true)]
    log_level: LogLevel,

    /// Override configuration file path
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    /// Override the directory holding sources.list
    #[clap(long, global = true)]
    workdir: Option<PathBuf>,

    /// Override the directory holding modules, caches and keyrings
    #[clap(long, global = true)]
    datadir: Option<PathBuf>,

    /// Override the gpgv binary used to check signatures
    #[clap(long, global = true)]
    gpgv: Option<PathBuf>,

    /// Hide progress messages (errors are still shown)
    #[clap(long, short, global = true)]
    quiet: bool,
}

#[derive(Parser, Debug)]
enum Command {
    /// Refresh repositories and upgrade installed modules
    Update,

    /// Install modules
    Install {
        /// Module names
        #[clap(required = true)]
        names: Vec<String>,
    },

    /// List available modules
    List {
        /// Only modules with one of these capabilities (comma-separated)
        #[clap(long, value_delimiter = ',')]
        caps: Vec<String>,

        /// Only installed modules
        #[clap(long)]
        installed: bool,

        /// Output results as JSON
        #[clap(long)]
        json: bool,
    },

    /// Show details about a module
    Info {
        /// Module name
        name: String,

        /// Output as JSON
        #[clap(long)]
        json: bool,
    },

    /// Check that every configured repository has been fetched
    Check,

    /// Publish module repositories
    Repo {
        #[clap(subcommand)]
        command: repos_cli::RepoCommand,
    },
}

/// Initialize tracing with CLI flags
fn initialize_tracing(log_level: &LogLevel) {
    let mut filter = EnvFilter::new(log_level.to_filter_directive());
    // Signature failures are always reported
    if let Ok(directive) = "security=error".parse() {
        filter = filter.add_directive(directive);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

impl GlobalOptions {
    fn load_config(&self) -> Result<ModhubConfig> {
        let mut config = ModhubConfig::load(self.config.as_deref())?;
        if let Some(workdir) = &self.workdir {
            config.workdir = workdir.clone();
        }
        if let Some(datadir) = &self.datadir {
            config.datadir = datadir.clone();
        }
        if let Some(gpgv) = &self.gpgv {
            config.gpgv = Some(gpgv.clone());
        }
        debug!("Configuration: {:?}", config);
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    initialize_tracing(&cli.options.log_level);

    let quiet = cli.options.quiet;
    match cli.command {
        Command::Repo { command } => command.execute().await,
        command => {
            let config = cli.options.load_config()?;
            run_command(command, config, quiet).await
        }
    }
}

async fn run_command(command: Command, config: ModhubConfig, quiet: bool) -> Result<()> {
    match command {
        Command::Update => update_command(config, quiet).await,
        Command::Install { names } => install_command(config, quiet, names).await,
        Command::List {
            caps,
            installed,
            json,
        } => list_command(config, quiet, caps, installed, json).await,
        Command::Info { name, json } => info_command(config, quiet, name, json).await,
        Command::Check => check_command(config, quiet).await,
        Command::Repo { command } => command.execute().await,
    }
}

async fn update_command(config: ModhubConfig, quiet: bool) -> Result<()> {
    let summary = with_repositories(config, quiet, |set, progress| set.update(progress)).await?;
    print_summary(&summary);

    if !summary.failed.is_empty() {
        bail!("{} module(s) could not be updated", summary.failed.len());
    }
    Ok(())
}

fn print_summary(summary: &UpdateSummary) {
    for (name, version) in &summary.installed {
        println!("Upgraded {name} to {version}");
    }
    for name in &summary.unavailable {
        println!("{name} is installed but no repository provides it anymore");
    }
    for (name, reason) in &summary.failed {
        println!("Failed to upgrade {name}: {reason}");
    }
    if summary.installed.is_empty() && summary.failed.is_empty() {
        println!("All modules are up to date");
    }
}

async fn install_command(config: ModhubConfig, quiet: bool, names: Vec<String>) -> Result<()> {
    let results = with_repositories(config, quiet, move |set, progress| {
        Ok(names
            .into_iter()
            .map(|name| {
                let result = set.install(&name, progress).map_err(|e| e.to_string());
                (name, result)
            })
            .collect::<Vec<_>>())
    })
    .await?;

    let mut failures = 0;
    for (name, result) in results {
        match result {
            Ok(path) => println!("Module {name} installed into {}", path.display()),
            Err(reason) => {
                failures += 1;
                eprintln!("Unable to install {name}: {reason}");
            }
        }
    }

    if failures > 0 {
        bail!("{failures} module(s) could not be installed");
    }
    Ok(())
}

/// Table row for module listings
#[derive(Tabled)]
struct ModuleRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Version")]
    version: u64,
    #[tabled(rename = "Installed")]
    installed: String,
    #[tabled(rename = "Capabilities")]
    capabilities: String,
    #[tabled(rename = "Description")]
    description: String,
}

impl From<&ModuleInfo> for ModuleRow {
    fn from(info: &ModuleInfo) -> Self {
        let installed = if info.is_local() {
            "local"
        } else if info.is_installed() {
            "yes"
        } else {
            ""
        };

        ModuleRow {
            name: info.name.clone(),
            version: info.version,
            installed: installed.to_string(),
            capabilities: info.capabilities.join(" "),
            description: truncate(&info.description, 50),
        }
    }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max - 3).collect();
        format!("{cut}...")
    } else {
        text.to_string()
    }
}

async fn list_command(
    config: ModhubConfig,
    quiet: bool,
    caps: Vec<String>,
    installed_only: bool,
    json_output: bool,
) -> Result<()> {
    let modules = with_repositories(config, quiet, move |set, _| {
        Ok(set.get_all_modules_info(caps.as_slice()))
    })
    .await?;

    let modules: Vec<&ModuleInfo> = modules
        .values()
        .filter(|info| !installed_only || info.is_installed())
        .collect();

    if json_output {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    if modules.is_empty() {
        println!("No modules found.");
        return Ok(());
    }

    let table_rows: Vec<ModuleRow> = modules.iter().map(|info| ModuleRow::from(*info)).collect();
    let table = Table::new(&table_rows)
        .with(Style::rounded())
        .with(Modify::new(Rows::first()).with(Alignment::center()))
        .to_string();
    println!("{table}");
    Ok(())
}

async fn info_command(config: ModhubConfig, quiet: bool, name: String, json_output: bool) -> Result<()> {
    let lookup = name.clone();
    let found = with_repositories(config, quiet, move |set, _| {
        Ok(set.get_module_info(&lookup).map(|info| {
            let keyring = Keyring::open(&set.layout().keyring_base(&info.repository_url))
                .map(|keyring| keyring.to_string())
                .unwrap_or_else(|e| e.to_string());
            (info, keyring)
        }))
    })
    .await?;

    let Some((info, keyring)) = found else {
        bail!("Module '{name}' not found in any repository");
    };

    if json_output {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    println!("Module:       {}", info.name);
    println!("Version:      {}", info.version);
    println!("Maintainer:   {}", info.maintainer);
    println!("License:      {}", info.license);
    println!("Capabilities: {}", info.capabilities.join(", "));
    println!("Description:  {}", info.description);
    if !info.urls.is_empty() {
        println!("URLs:         {}", info.urls);
    }
    println!("Repository:   {}", info.repository_url);
    if info.is_local() {
        println!("Location:     local source tree");
    } else {
        println!("Signed:       {}", if info.signed { "yes" } else { "no" });
        println!("Keyring:      {keyring}");
    }
    match &info.install_path {
        Some(path) => println!("Installed:    {}", path.display()),
        None => println!("Installed:    no"),
    }
    Ok(())
}

async fn check_command(config: ModhubConfig, quiet: bool) -> Result<()> {
    let complete = with_repositories(config, quiet, |set, _| set.check_repositories()).await?;
    if !complete {
        bail!("Some repositories have not been fetched, run `modhub update`");
    }
    println!("All repositories are up to date");
    Ok(())
}
