//! Config command - create, inspect and edit configuration files
//!
//! - `init` writes a default config file (local or global)
//! - `set` changes one value in the local or global file
//! - `show` prints the effective configuration
//! - `path` lists where configuration is read from

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Subcommand;
use metamirror_config::{ConfigLoader, MirrorConfig};
use serde::Serialize;

use super::print_info;
use crate::GlobalOptions;

/// Config management commands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Create a config file with default values if none exists
    Init(InitArgs),

    /// Set a configuration value
    Set(SetArgs),

    /// Show the effective configuration
    Show(ShowArgs),

    /// Show configuration file paths
    Path(PathArgs),
}

#[derive(clap::Args, Debug)]
pub struct InitArgs {
    /// Create ~/.metamirror/config.toml instead of the local file
    #[arg(long)]
    global: bool,
}

#[derive(clap::Args, Debug)]
pub struct SetArgs {
    /// Configuration key (e.g. "pool.max_active", "data_sources.shop.url")
    key: String,

    /// Value to set; an empty value clears optional data source fields
    value: String,

    /// Set in global config (~/.metamirror/config.toml) instead of local
    #[arg(long)]
    global: bool,
}

#[derive(clap::Args, Debug)]
pub struct ShowArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

#[derive(clap::Args, Debug)]
pub struct PathArgs {
    /// Output as JSON
    #[arg(long)]
    json: bool,
}

/// Configuration paths
#[derive(Debug, Clone, Serialize)]
pub struct ConfigPaths {
    pub global: Option<PathBuf>,
    pub local: PathBuf,
    pub global_exists: bool,
    pub local_exists: bool,
}

pub fn execute(cmd: ConfigCommand, config: &MirrorConfig, global: GlobalOptions) -> Result<()> {
    let root = std::env::current_dir().context("Failed to get current directory")?;
    match cmd {
        ConfigCommand::Init(args) => execute_init(args, &root, global),
        ConfigCommand::Set(args) => execute_set(args, &root, global),
        ConfigCommand::Show(args) => execute_show(args, config),
        ConfigCommand::Path(args) => execute_path(args, &root),
    }
}

fn execute_init(args: InitArgs, root: &Path, global: GlobalOptions) -> Result<()> {
    let loader = ConfigLoader::new();
    let path = if args.global {
        loader.init_global()?
    } else {
        loader.init_local(root)?
    };
    print_info(&format!("Config file: {}", path.display()), global.quiet);
    Ok(())
}

fn execute_set(args: SetArgs, root: &Path, global: GlobalOptions) -> Result<()> {
    let mut loader = ConfigLoader::new();

    let mut config = if args.global {
        loader.load_global()?.unwrap_or_default()
    } else {
        loader.load_local(root)?.unwrap_or_default()
    };

    config
        .set_value(&args.key, &args.value)
        .with_context(|| format!("Failed to set configuration key: {}", args.key))?;
    config.validate()?;

    let scope = if args.global {
        loader.save_global(&config)?;
        "global"
    } else {
        loader.save_local(root, &config)?;
        "local"
    };
    print_info(
        &format!("Set {} = {} in {scope} config", args.key, args.value),
        global.quiet,
    );
    Ok(())
}

fn execute_show(args: ShowArgs, config: &MirrorConfig) -> Result<()> {
    if args.json {
        println!("{}", serde_json::to_string_pretty(config)?);
    } else {
        print!("{}", toml::to_string_pretty(config)?);
    }
    Ok(())
}

fn execute_path(args: PathArgs, root: &Path) -> Result<()> {
    let loader = ConfigLoader::new();
    let global_path = loader.global_config_path();
    let local_path = loader.local_config_path(root);

    let paths = ConfigPaths {
        global_exists: global_path.as_ref().is_some_and(|p| p.exists()),
        local_exists: local_path.exists(),
        global: global_path,
        local: local_path,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&paths)?);
        return Ok(());
    }

    let status = |exists: bool| if exists { "exists" } else { "not found" };
    match paths.global {
        Some(ref path) => println!("Global: {} ({})", path.display(), status(paths.global_exists)),
        None => println!("Global: not available (no home directory)"),
    }
    println!("Local:  {} ({})", paths.local.display(), status(paths.local_exists));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_paths_serialization() {
        let paths = ConfigPaths {
            global: Some(PathBuf::from("/home/user/.metamirror/config.toml")),
            local: PathBuf::from("/project/.metamirror/config.toml"),
            global_exists: true,
            local_exists: false,
        };

        let json = serde_json::to_string(&paths).unwrap();
        assert!(json.contains("\"global_exists\":true"));
        assert!(json.contains("\"local_exists\":false"));
    }
}
