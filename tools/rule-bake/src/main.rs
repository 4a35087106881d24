//! Compiles a directory of JSON rule documents into one sorted `rules.rkyv` archive.

use anyhow::{Context, Result};
use clap::Parser;
use common::config::RuleSet;
use common::registry::RuleRegistry;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "rule-bake")]
#[command(about = "Bake JSON rule documents into a zero-copy archive", long_about = None)]
struct Args {
    /// Directory scanned recursively for `*.json` rule documents.
    #[arg(long, default_value = "rules")]
    input: PathBuf,
    /// Archive to write.
    #[arg(long, default_value = "rules.rkyv")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut rule_set = if args.input.exists() {
        load_json_rules(&args.input)?
    } else {
        eprintln!(
            "Warning: '{}' not found. Writing an empty archive.",
            args.input.display()
        );
        RuleSet::default()
    };

    // Fail before writing anything the engine would reject at startup.
    RuleRegistry::compile(rule_set.clone())
        .with_context(|| format!("Rules under {:?} do not compile", args.input))?;

    rule_set
        .save(&args.output)
        .with_context(|| format!("Failed to write {:?}", args.output))?;

    println!(
        "Successfully compiled {} with {} rules, {} shims and {} mixins.",
        args.output.display(),
        rule_set.rules.len(),
        rule_set.shims.len(),
        rule_set.mixins.len()
    );

    Ok(())
}

fn load_json_rules(root: &Path) -> Result<RuleSet> {
    let mut rule_set = RuleSet::default();

    let mut paths: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
        .collect();
    paths.sort();

    for path in paths {
        println!("Processing: {:?}", path);
        let content =
            fs::read_to_string(&path).with_context(|| format!("Failed to read {:?}", path))?;
        let document = RuleSet::from_json_str(&content)
            .with_context(|| format!("Invalid rule document {:?}", path))?;
        rule_set.merge(document);
    }

    Ok(rule_set)
}
