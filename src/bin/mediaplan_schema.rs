//! Media plan schema CLI
//!
//! Lists versions, validates plan files, migrates them between versions and
//! prints component schemas.

use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use mediaplan_schema::{
    DocumentCodec, JsonCodec, SchemaConfig, SchemaError, SchemaManager, SchemaVersion,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mediaplan-schema")]
#[command(about = "Validate and migrate media plan documents")]
struct Cli {
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported schema versions
    Versions,

    /// Validate a media plan file
    Validate {
        /// Media plan (JSON)
        file: PathBuf,
        /// Validate against this version instead of meta.schema_version
        #[arg(short, long)]
        version: Option<String>,
    },

    /// Migrate a media plan file to another version
    Migrate {
        /// Media plan (JSON)
        file: PathBuf,
        /// Target version (defaults to current)
        #[arg(short, long)]
        to: Option<String>,
        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show how a version relates to the current one
    Check {
        version: String,
    },

    /// Print the resolved JSON Schema of one component, or all of them
    Schema {
        /// Component name (mediaplan, campaign, lineitem)
        component: Option<String>,
        /// Schema version (defaults to current)
        #[arg(short, long)]
        version: Option<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let config = match SchemaConfig::load_from(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match run(cli, &config) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Returns whether the command succeeded
fn run(cli: Cli, config: &SchemaConfig) -> anyhow::Result<bool> {
    let manager = SchemaManager::from_config(config);
    let registry = manager.registry()?;

    match cli.command {
        Commands::Versions => {
            let current = registry.get_current_version();
            println!("Current version: {}", current);
            println!("Supported versions:");
            for definition in registry.definitions() {
                let marker = if definition.version() == current { "*" } else { " " };
                println!(
                    "  {} {}  {}  {}",
                    marker,
                    definition.version(),
                    definition.checksum().short(12),
                    definition.title().unwrap_or("")
                );
            }

            let migrator = manager.migrator()?;
            for (from, to) in migrator.missing_links() {
                println!("  ! no migration step {} -> {}", from, to);
            }
            Ok(true)
        }

        Commands::Validate { file, version } => {
            let version = version.map(|v| registry.resolve(&v)).transpose()?;
            let result = match manager.validate_file(&file, version.as_ref()) {
                Ok(result) => result,
                Err(err @ SchemaError::FileRead { .. }) => bail!(err),
                Err(err) => return Err(err).with_context(|| format!("cannot validate {}", file.display())),
            };

            if result.is_valid() {
                println!("✓ {} is valid", file.display());
                return Ok(true);
            }
            println!("✗ {} has {} error(s):", file.display(), result.len());
            for error in &result {
                println!("  [{}] {}", error.kind, error);
            }
            Ok(false)
        }

        Commands::Migrate { file, to, output } => {
            let codec = JsonCodec::pretty();
            let document = codec.read_file(&file)?;
            let from = document
                .schema_version()?
                .ok_or(SchemaError::MissingVersion)
                .with_context(|| format!("{} has no meta.schema_version", file.display()))?;
            let to: Option<SchemaVersion> = to.map(|v| registry.resolve(&v)).transpose()?;

            let migrated = manager.migrate(&document, &from, to.as_ref())?;
            let bytes = codec.encode(&migrated)?;

            match output {
                Some(path) => {
                    fs::write(&path, &bytes)
                        .with_context(|| format!("cannot write {}", path.display()))?;
                    eprintln!(
                        "Migrated {} from {} to {} -> {}",
                        file.display(),
                        from,
                        migrated.schema_version()?.map(|v| v.to_string()).unwrap_or_default(),
                        path.display()
                    );
                }
                None => println!("{}", String::from_utf8_lossy(&bytes)),
            }
            Ok(true)
        }

        Commands::Check { version } => {
            let version = SchemaVersion::parse(&version)?;
            let recommendation = manager.recommendation(&version)?;
            println!("Version:        {}", recommendation.version);
            println!("Compatibility:  {}", recommendation.compatibility);
            println!("Action:         {:?}", recommendation.action);
            println!("Can import:     {}", recommendation.can_import);
            println!("Should upgrade: {}", recommendation.should_upgrade);
            println!("{}", recommendation.message);
            if let Some(warning) = &recommendation.warning {
                println!("⚠ {}", warning);
            }
            Ok(recommendation.can_import)
        }

        Commands::Schema { component, version } => {
            let version = version.map(|v| registry.resolve(&v)).transpose()?;
            let schema = match component {
                Some(component) => manager.get_schema(&component, version.as_ref())?,
                None => serde_json::to_value(manager.get_all_schemas(version.as_ref())?)?,
            };
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(true)
        }
    }
}
