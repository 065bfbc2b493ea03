use crate::compat::{check, parse_osrel, PersonalityOptions, PersonalityRecord, PersonalityRegistry};
use crate::config::config::{HierarchyConfig, RegistryConfig};
use crate::config::types::{NodeId, PersonalitySnapshot};
use crate::testing::{run_allocation_race, RaceProofConfig};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Registry configuration file (defaults to ./jailcompat.json if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build a jail hierarchy and print every jail's personality
    Show {
        /// Hierarchy description (JSON)
        #[arg(long)]
        hierarchy: PathBuf,
        /// Append registry metrics in Prometheus format
        #[arg(long)]
        metrics: bool,
    },
    /// Validate jail parameters without applying them
    Check {
        /// Parameters in key=value form, e.g. linux.osrelease=3.10.0
        params: Vec<String>,
    },
    /// Print the numeric form of a release string
    Osrel {
        release: String,
    },
    /// Apply debug commands ("<id>.<0|1>" or "all.<0|1>") to a fresh map
    Debug {
        commands: Vec<String>,
    },
    /// Race concurrent setters on one jail and verify the allocator
    RaceProof {
        #[arg(long, default_value_t = 8)]
        threads: usize,
        #[arg(long, default_value_t = 100)]
        iterations: usize,
        #[arg(long, default_value_t = 4)]
        depth: usize,
    },
}

#[derive(Serialize)]
struct JailReport {
    id: NodeId,
    name: String,
    parent: Option<NodeId>,
    /// `None` while the registry is unregistered
    configured: Option<PersonalitySnapshot>,
    effective: PersonalityRecord,
    effective_owner: NodeId,
}

fn load_registry_config(path: Option<&Path>) -> Result<RegistryConfig> {
    match path {
        Some(path) => RegistryConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(RegistryConfig::load_or_default()),
    }
}

fn build_hierarchy(registry: &PersonalityRegistry, hierarchy: &HierarchyConfig) -> Result<()> {
    for spec in &hierarchy.containers {
        let parent = match &spec.parent {
            None => NodeId::ROOT,
            Some(name) => registry
                .find(name)
                .ok_or_else(|| anyhow!("jail {:?}: unknown parent {:?}", spec.name, name))?,
        };
        let options = PersonalityOptions::from_params(&spec.params)
            .with_context(|| format!("jail {:?}", spec.name))?;
        registry
            .create_container(parent, &spec.name, &options)
            .with_context(|| format!("creating jail {:?}", spec.name))?;
    }
    Ok(())
}

fn report(registry: &PersonalityRegistry) -> Result<Vec<JailReport>> {
    let mut reports = Vec::new();
    for id in registry.arena().ids() {
        let node = registry.node(id)?;
        let configured = if registry.is_registered() {
            Some(registry.get(id)?)
        } else {
            None
        };
        let (effective_owner, effective) =
            registry.with_effective(id, |owner, record| (owner, record.clone()))?;
        reports.push(JailReport {
            id,
            name: node.name().to_string(),
            parent: node.parent_id(),
            configured,
            effective,
            effective_owner,
        });
    }
    Ok(reports)
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    env_logger::init();

    match cli.command {
        Commands::Show { hierarchy, metrics } => {
            let hierarchy = HierarchyConfig::load_from_file(&hierarchy)
                .with_context(|| format!("loading {}", hierarchy.display()))?;
            let config = match &hierarchy.registry {
                Some(config) => config.clone(),
                None => load_registry_config(cli.config.as_deref())?,
            };

            let registry = PersonalityRegistry::new(&config)?;
            build_hierarchy(&registry, &hierarchy)?;

            println!("{}", serde_json::to_string_pretty(&report(&registry)?)?);
            if metrics {
                print!("{}", registry.metrics().export_prometheus());
            }
        }
        Commands::Check { params } => {
            let options = PersonalityOptions::from_params(&params)?;
            let checked = check(&options)?;
            match checked.effective_mode() {
                Some(mode) => println!("ok: mode {}", mode),
                None => println!("ok: no change"),
            }
            if let Some((release, osrel)) = &checked.osrelease {
                println!("  osrelease {} ({})", release, osrel);
            }
        }
        Commands::Osrel { release } => {
            println!("{}", parse_osrel(&release)?);
        }
        Commands::Debug { commands } => {
            let config = load_registry_config(cli.config.as_deref())?;
            let registry = PersonalityRegistry::new(&config)?;
            let map = registry.debug_map();
            for command in &commands {
                let parsed = map.apply_command(command)?;
                println!("{}: {:?}", command, parsed);
            }
            println!(
                "{} of {} operations suppressed",
                map.suppressed_count(),
                map.size()
            );
        }
        Commands::RaceProof {
            threads,
            iterations,
            depth,
        } => {
            let result = run_allocation_race(&RaceProofConfig {
                threads,
                iterations,
                depth,
                strict_mode: false,
            })?;
            println!(
                "{}/{} iterations passed",
                result.successes, result.iterations
            );
            for line in result
                .race_conditions
                .iter()
                .chain(&result.accounting_violations)
                .chain(&result.errors)
            {
                eprintln!("  {}", line);
            }
            if !result.is_pass() {
                return Err(anyhow!("allocation race proof failed"));
            }
        }
    }

    Ok(())
}
