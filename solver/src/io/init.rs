//! Layout of `.solver/` and the `solver init` scaffolding.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::info;

use super::config::{SolverConfig, write_config};

const SOLVER_GITIGNORE: &str = "traces/\n";

/// Canonical paths within `.solver/` for a working directory.
#[derive(Debug, Clone)]
pub struct SolverPaths {
    pub root: PathBuf,
    pub solver_dir: PathBuf,
    pub traces_dir: PathBuf,
    pub gitignore_path: PathBuf,
    pub config_path: PathBuf,
    pub ledger_path: PathBuf,
}

impl SolverPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let solver_dir = root.join(".solver");
        Self {
            root: root.clone(),
            traces_dir: solver_dir.join("traces"),
            gitignore_path: solver_dir.join(".gitignore"),
            config_path: solver_dir.join("config.toml"),
            ledger_path: solver_dir.join("ledger.json"),
            solver_dir,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InitOptions {
    /// Rewrite the config and `.gitignore` if `.solver/` already exists.
    pub force: bool,
}

/// Create `.solver/` with a default config.
///
/// The ledger is never touched; it is created by the first solved stage.
pub fn init_solver(root: &Path, options: &InitOptions) -> Result<SolverPaths> {
    let paths = SolverPaths::new(root);
    if paths.solver_dir.exists() && !paths.solver_dir.is_dir() {
        return Err(anyhow!("solver init: .solver exists but is not a directory"));
    }
    if paths.solver_dir.exists() && !options.force {
        return Err(anyhow!(
            "solver init: .solver already exists (use --force to overwrite)"
        ));
    }

    fs::create_dir_all(&paths.traces_dir)
        .with_context(|| format!("create directory {}", paths.traces_dir.display()))?;
    fs::write(&paths.gitignore_path, SOLVER_GITIGNORE)
        .with_context(|| format!("write file {}", paths.gitignore_path.display()))?;
    write_config(&paths.config_path, &SolverConfig::default())?;
    info!(dir = %paths.solver_dir.display(), "initialized solver directory");

    Ok(paths)
}
