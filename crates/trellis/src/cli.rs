use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use trellis_core::plugin_system::PluginArtifact;
use trellis_core::{ManagerConfig, PluginManager, RestartState, Result};

/// Trellis: manage the plugins of an application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Print "pong" and exit without touching any plugin state
    #[arg(long)]
    pub ping: bool,

    /// Manager configuration file (.json, .yaml, .yml or .toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Hot-deploy plugin directory; overrides the configuration file
    #[arg(long, value_name = "DIR")]
    pub plugin_dir: Option<PathBuf>,

    /// Directory of bundled, read-only plugins; overrides the configuration file
    #[arg(long, value_name = "DIR")]
    pub bundled_dir: Option<PathBuf>,

    /// Persisted plugin state file; overrides the configuration file
    #[arg(long, value_name = "FILE")]
    pub state_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List plugins with their state and modules
    List,
    /// Enable a plugin and the plugins it requires
    Enable { key: String },
    /// Disable a plugin and every plugin that requires it
    Disable { key: String },
    /// Enable one module, given as plugin:module
    EnableModule { complete_key: String },
    /// Disable one module, given as plugin:module
    DisableModule { complete_key: String },
    /// Look for new or changed artifacts in the plugin directory
    Scan {
        /// Keep scanning at this interval until interrupted
        #[arg(long, value_name = "MS", value_parser = clap::value_parser!(u64).range(1..))]
        watch: Option<u64>,
    },
    /// Install plugin artifacts; nothing is installed if any is rejected
    Install {
        #[arg(required = true)]
        artifacts: Vec<PathBuf>,
    },
    /// Uninstall a plugin, or mark it for removal on the next restart
    Uninstall { key: String },
    /// Cancel a change that is waiting for a restart
    Revert { key: String },
}

impl CliArgs {
    /// The configuration file, if any, with command-line overrides applied.
    pub fn manager_config(&self) -> Result<ManagerConfig> {
        let mut config = match &self.config {
            Some(path) => ManagerConfig::load(path)?,
            None => ManagerConfig::default(),
        };
        if let Some(dir) = &self.plugin_dir {
            config.plugin_directory = Some(dir.clone());
        }
        if let Some(dir) = &self.bundled_dir {
            config.bundled_directory = Some(dir.clone());
        }
        if let Some(file) = &self.state_file {
            config.state_file = file.clone();
        }
        Ok(config)
    }
}

pub async fn run(manager: &PluginManager, command: Commands) -> Result<()> {
    match command {
        Commands::List => list(manager)?,
        Commands::Enable { key } => {
            manager.enable_plugin(&key).await?;
            if manager.is_plugin_enabled(&key)? {
                println!("Enabled '{}'", key);
            } else {
                println!("'{}' did not start in time and stays disabled", key);
            }
        }
        Commands::Disable { key } => {
            let dependents = manager.get_dependent_plugin_keys(&key)?;
            manager.disable_plugin(&key).await?;
            println!("Disabled '{}'", key);
            for dependent in dependents {
                println!("  also disabled '{}'", dependent);
            }
        }
        Commands::EnableModule { complete_key } => {
            manager.enable_plugin_module(&complete_key).await?;
            println!("Enabled module '{}'", complete_key);
        }
        Commands::DisableModule { complete_key } => {
            manager.disable_plugin_module(&complete_key).await?;
            if manager.is_plugin_module_enabled(&complete_key)? {
                println!("Module '{}' cannot be disabled", complete_key);
            } else {
                println!("Disabled module '{}'", complete_key);
            }
        }
        Commands::Scan { watch: None } => {
            let found = manager.scan_for_new_plugins().await?;
            println!("Found {} new plugin(s)", found);
        }
        Commands::Scan { watch: Some(ms) } => watch(manager, Duration::from_millis(ms)).await?,
        Commands::Install { artifacts } => {
            let artifacts: Vec<PluginArtifact> = artifacts.into_iter().map(PluginArtifact::new).collect();
            for key in manager.install_plugins(&artifacts).await? {
                let state = manager.get_restart_state(&key)?;
                if state == RestartState::Install {
                    println!("Installed '{}' (completes on restart)", key);
                } else {
                    println!("Installed '{}'", key);
                }
            }
        }
        Commands::Uninstall { key } => {
            manager.uninstall(&key).await?;
            if manager.get_restart_state(&key)? == RestartState::Remove {
                println!("'{}' will be removed on restart", key);
            } else {
                println!("Uninstalled '{}'", key);
            }
        }
        Commands::Revert { key } => {
            let pending = manager.get_restart_state(&key)?;
            manager.revert_restart_required_change(&key).await?;
            match pending {
                RestartState::None => println!("No pending change for '{}'", key),
                state => println!("Reverted pending {} of '{}'", state, key),
            }
        }
    }
    Ok(())
}

fn list(manager: &PluginManager) -> Result<()> {
    let mut plugins = manager.get_all_plugins();
    if plugins.is_empty() {
        println!("No plugins installed.");
        return Ok(());
    }
    plugins.sort_by(|a, b| a.key().cmp(b.key()));
    for plugin in plugins {
        let mut line = format!("{} {} [{}]", plugin.key(), plugin.version(), plugin.state());
        let pending = manager.get_restart_state(plugin.key())?;
        if pending != RestartState::None {
            line.push_str(&format!(" pending {}", pending));
        }
        if let Some(reason) = plugin.unloadable_reason() {
            line.push_str(&format!(" unloadable: {}", reason));
        }
        println!("{}", line);
        for module in plugin.modules() {
            let state = if module.is_enabled() { "enabled" } else { "disabled" };
            println!("  - {} ({}) [{}]", module.complete_key(), module.module_type(), state);
        }
    }
    Ok(())
}

async fn watch(manager: &PluginManager, interval: Duration) -> Result<()> {
    println!("Watching for new plugins every {:?}; Ctrl-C to stop", interval);
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let found = manager.scan_for_new_plugins().await?;
                if found > 0 {
                    println!("Found {} new plugin(s)", found);
                }
            }
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}
