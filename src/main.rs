//! hbpm - plugin lifecycle manager for HomeKit bridge hosts.
//!
//! Lists, classifies, installs, updates and removes bridge plugins, keeping
//! the host's config document in step.

use std::io;
use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use serde::Serialize;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hbpm::plugin::{OperationResult, PluginManager, Refusal};
use hbpm::Settings;

/// Plugin lifecycle manager for HomeKit bridge hosts
#[derive(Parser)]
#[command(name = "hbpm")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to ./hbpm.toml, then the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bridge instance whose config document is managed
    #[arg(short, long, global = true, env = "HBPM_INSTANCE")]
    instance: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List installed plugins declared in the config document
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List installed plugins with registry metadata
    Installed {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the platforms and accessories a plugin offers
    Type {
        /// Package name
        name: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Install a plugin
    Install {
        /// Package name
        id: String,

        /// Version or dist-tag
        #[arg(short, long, default_value = "latest")]
        tag: String,
    },

    /// Uninstall a plugin
    Uninstall {
        /// Package name
        id: String,
    },

    /// Update a plugin
    Update {
        /// Package name
        id: String,

        /// Version or dist-tag
        #[arg(short, long, default_value = "latest")]
        tag: String,
    },

    /// Search the npm registry for plugins
    Search {
        /// Search text
        query: String,

        /// Keyword packages must carry
        #[arg(short, long, default_value = "homebridge-plugin")]
        keyword: String,

        /// Maximum number of results
        #[arg(short, long, default_value_t = 50)]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List certified plugins in a category
    Certified {
        /// Category name
        category: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List certified plugin categories
    Categories {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show the latest host releases
    Releases {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(io::stderr))
        .with(filter)
        .init();

    if let Commands::Completions { shell } = cli.command {
        cmd_completions(shell);
        return Ok(());
    }

    let settings = load_settings(&cli)?;
    let rt = tokio::runtime::Runtime::new()?;

    rt.block_on(run(cli.command, settings))
}

/// Load settings, applying command-line overrides.
fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load_from_file(path)?,
        None => Settings::load()?,
    };

    if let Some(instance) = &cli.instance {
        settings.paths.instance.clone_from(instance);
    }

    Ok(settings)
}

async fn run(command: Commands, settings: Settings) -> Result<()> {
    let manager = PluginManager::new(settings)?;

    match command {
        Commands::List { format } => cmd_list(&manager, &format),
        Commands::Installed { format } => cmd_installed(&manager, &format).await,
        Commands::Type { name, format } => cmd_type(&manager, &name, &format).await,
        Commands::Install { id, tag } => {
            report("install", &id, &manager.install(&id, &tag).await)
        }
        Commands::Uninstall { id } => report("uninstall", &id, &manager.uninstall(&id).await),
        Commands::Update { id, tag } => report("update", &id, &manager.update(&id, &tag).await),
        Commands::Search { query, keyword, limit, format } => {
            let entries = manager.search(&query, &keyword, limit).await?;
            print_entries(&entries, &format)
        }
        Commands::Certified { category, format } => {
            let entries = manager.certified(&category).await?;
            print_entries(&entries, &format)
        }
        Commands::Categories { format } => cmd_categories(&manager, &format).await,
        Commands::Releases { format } => cmd_releases(&manager, &format).await,
        Commands::Completions { shell } => {
            cmd_completions(shell);
            Ok(())
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// List declared, installed plugins.
fn cmd_list(manager: &PluginManager, format: &str) -> Result<()> {
    let plugins = manager.list();

    if format == "json" {
        return print_json(&plugins);
    }

    if plugins.is_empty() {
        println!("No plugins installed.");
        println!("\nInstall plugins with:");
        println!("  hbpm install <name>");
        return Ok(());
    }

    println!("Installed plugins:\n");
    for (name, plugin) in &plugins {
        println!("  {} v{}", name, plugin.version);

        if !plugin.description.is_empty() {
            println!("      {}", plugin.description);
        }
    }
    println!("\nTotal: {} plugin(s)", plugins.len());

    Ok(())
}

/// List installed plugins with registry metadata.
async fn cmd_installed(manager: &PluginManager, format: &str) -> Result<()> {
    let plugins = manager.installed().await;

    if format == "json" {
        return print_json(&plugins);
    }

    for plugin in &plugins {
        let name = hbpm::plugin::full_name(plugin.scope.as_deref(), &plugin.name);
        let installed = plugin.installed.as_deref().unwrap_or("-");
        let marker = if plugin.local {
            "local"
        } else if plugin.scope.as_deref() == Some(manager.settings().packages.trusted_scope.as_str()) {
            "certified"
        } else {
            "community"
        };

        print!("  {name} v{installed} [{marker}]");
        if plugin.has_update() {
            print!(" (update available: {})", plugin.version.as_deref().unwrap_or_default());
        }
        println!();

        for capability in &plugin.details {
            println!("      {} {}", capability.capability_type, capability.alias);
        }
    }
    println!("\nTotal: {} plugin(s)", plugins.len());

    Ok(())
}

/// Show a plugin's capabilities.
async fn cmd_type(manager: &PluginManager, name: &str, format: &str) -> Result<()> {
    let records = manager.get_plugin_type(name).await;

    if format == "json" {
        return print_json(&records);
    }

    if records.is_empty() {
        println!("Unable to determine plugin type for '{name}'");
        return Ok(());
    }

    for record in &records {
        println!("{} {}", record.capability_type, record.alias);
    }

    Ok(())
}

/// Print the outcome of a package operation, failing on refusal or error.
fn report(operation: &str, id: &str, result: &OperationResult) -> Result<()> {
    match result.refusal {
        Some(Refusal::Busy) => anyhow::bail!(
            "Another package operation is in progress ({} active), try again later",
            result.active
        ),
        Some(Refusal::Blocked) => anyhow::bail!("'{id}' is a blocked plugin"),
        None if result.success => {
            println!("{operation} {id}: done");
            Ok(())
        }
        None => anyhow::bail!("{operation} {id} failed"),
    }
}

fn print_entries(entries: &[hbpm::plugin::SearchEntry], format: &str) -> Result<()> {
    if format == "json" {
        return print_json(entries);
    }

    if entries.is_empty() {
        println!("No plugins found.");
        return Ok(());
    }

    for entry in entries {
        let version = entry.version.as_deref().unwrap_or("-");
        let installed =
            entry.installed.as_deref().map(|v| format!(" [installed v{v}]")).unwrap_or_default();

        println!("  {} v{}{}", entry.full_name(), version, installed);

        if !entry.description.is_empty() {
            println!("      {}", entry.description);
        }
    }

    Ok(())
}

async fn cmd_categories(manager: &PluginManager, format: &str) -> Result<()> {
    let categories = manager.registry().categories().await?;

    if format == "json" {
        return print_json(&categories);
    }

    for category in &categories {
        println!("{category}");
    }

    Ok(())
}

async fn cmd_releases(manager: &PluginManager, format: &str) -> Result<()> {
    let releases = manager.registry().releases().await?;

    if format == "json" {
        return print_json(&releases);
    }

    for release in &releases {
        println!("{} {}", release.name, release.version);

        if let Some(changelog) = &release.changelog {
            for line in changelog.lines().filter(|l| !l.trim().is_empty()) {
                println!("    {line}");
            }
        }
    }

    Ok(())
}

/// Generate shell completions.
fn cmd_completions(shell: Shell) {
    let mut cmd = Cli::command();
    generate(shell, &mut cmd, "hbpm", &mut io::stdout());
}
