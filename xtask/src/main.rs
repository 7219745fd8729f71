use std::{fs, path::Path};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use walkdir::WalkDir;

/// A source tree and the module paths it must never import.
struct LayerRule {
    dir: &'static str,
    forbidden: &'static [&'static str],
}

const LAYERING: &[LayerRule] = &[
    LayerRule {
        dir: "src/core",
        forbidden: &["crate::application", "crate::adapters", "crate::config"],
    },
    LayerRule {
        dir: "src/application",
        forbidden: &["crate::adapters", "crate::config", "crate::bootstrap"],
    },
];

#[derive(Parser)]
#[command(author, version, about = "Workspace maintenance tasks")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enforce the core / application / adapters layering.
    CheckArchitecture,
}

fn main() -> Result<()> {
    match Cli::parse().command {
        Commands::CheckArchitecture => check_architecture(),
    }
}

fn check_architecture() -> Result<()> {
    let Some(root) = Path::new(env!("CARGO_MANIFEST_DIR")).parent() else {
        bail!("xtask must live inside the workspace");
    };

    let mut violations = Vec::new();
    for rule in LAYERING {
        violations.extend(scan(&root.join(rule.dir), rule.forbidden)?);
    }
    if violations.is_empty() {
        println!("architecture check passed");
        return Ok(());
    }
    for violation in &violations {
        eprintln!("{violation}");
    }
    bail!("{} layering violation(s)", violations.len())
}

/// Reports `path:line: uses <module>` for every non-comment line naming a forbidden module.
fn scan(dir: &Path, forbidden: &[&str]) -> Result<Vec<String>> {
    let mut violations = Vec::new();
    for entry in WalkDir::new(dir) {
        let entry = entry.with_context(|| format!("Failed to walk {}", dir.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "rs") {
            continue;
        }
        let source = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        for (idx, line) in source.lines().enumerate() {
            if line.trim_start().starts_with("//") {
                continue;
            }
            for module in forbidden.iter().filter(|module| line.contains(*module)) {
                violations.push(format!("{}:{}: uses {module}", path.display(), idx + 1));
            }
        }
    }
    Ok(violations)
}
