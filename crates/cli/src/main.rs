use anatomist::{ContextId, DescriptorContext, HierarchyCache};
use anyhow::Context;
use clap::{Parser, Subcommand};
use common::registry::RuleRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "weaver")]
#[command(about = "Instrumentation weaving decisions for loaded types", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay type-load events and print one weaving decision per type.
    Analyze {
        /// Rule document (`.json`) or baked archive (`.rkyv`).
        #[arg(long)]
        rules: PathBuf,
        /// JSON array of thin type descriptors acting as the loading context.
        #[arg(long)]
        types: PathBuf,
        /// Print the full analyzed type alongside each decision.
        #[arg(long)]
        full: bool,
        /// Types to load, in order. Defaults to every descriptor, sorted by name.
        names: Vec<String>,
    },
    /// Compile a rule document and report errors.
    CheckRules {
        /// Rule document (`.json`) or baked archive (`.rkyv`).
        #[arg(long)]
        rules: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match &cli.command {
        Commands::Analyze {
            rules,
            types,
            full,
            names,
        } => cmd_analyze(rules, types, names, *full)?,
        Commands::CheckRules { rules } => cmd_check_rules(rules)?,
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// analyze
// ---------------------------------------------------------------------------

fn cmd_analyze(rules: &Path, types: &Path, names: &[String], full: bool) -> anyhow::Result<()> {
    let registry = load_registry(rules)?;
    let ctx = DescriptorContext::load(ContextId(0), types)
        .with_context(|| format!("Failed to load type descriptors from {:?}", types))?;
    let cache = HierarchyCache::new(Arc::new(registry));

    let requested: Vec<String> = if names.is_empty() {
        ctx.type_names().into_iter().map(str::to_string).collect()
    } else {
        names.to_vec()
    };

    for name in &requested {
        let thin = ctx
            .get(name)
            .with_context(|| format!("Type `{}` not found in {:?}", name, types))?;
        let outcome = cache.analyze(thin, &ctx);
        let json = if full {
            serde_json::to_string_pretty(&outcome)?
        } else {
            serde_json::to_string_pretty(&outcome.decision)?
        };
        println!("{json}");
    }

    let stats = cache.stats();
    tracing::info!(
        analyses = stats.analyses,
        hits = stats.hits,
        sentinels = stats.sentinels,
        entries = stats.entries,
        "hierarchy cache"
    );

    Ok(())
}

// ---------------------------------------------------------------------------
// check-rules
// ---------------------------------------------------------------------------

fn cmd_check_rules(rules: &Path) -> anyhow::Result<()> {
    let registry = load_registry(rules)?;

    println!("+------------------------------------------+");
    println!("| RULE CHECK                               |");
    println!("+------------------------------------------+");
    println!("| Rules          : {:>22} |", registry.len());
    println!("| Shims          : {:>22} |", registry.shims().len());
    println!("| Mixins         : {:>22} |", registry.mixins().len());
    println!("+------------------------------------------+");

    let unreachable: Vec<&str> = registry
        .rules()
        .iter()
        .filter(|r| r.has_misplaced_rest())
        .map(|r| r.id())
        .collect();
    if unreachable.is_empty() {
        println!("All rules compiled.");
    } else {
        println!("\nRULES THAT CAN NEVER MATCH:");
        for id in unreachable {
            println!("  {id} - `..` outside the last parameter position");
        }
    }

    Ok(())
}

fn load_registry(path: &Path) -> anyhow::Result<RuleRegistry> {
    RuleRegistry::load(path).with_context(|| format!("Failed to load rules from {:?}", path))
}
