use fieldsync_core::SyncConfig;

use crate::cli::ConfigCommands;
use crate::commands::common::{apply_overrides, load_config, resolve_config_path, PathOverrides};
use crate::error::CliError;

pub fn run_config(command: ConfigCommands, overrides: &PathOverrides) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show => {
            let path = resolve_config_path(overrides.config.as_deref());
            let config = load_config(overrides)?;
            println!("# {}", path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        ConfigCommands::Init {
            device_name,
            listen_addr,
            peers,
        } => run_config_init(overrides, device_name, listen_addr, peers),
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Merge command-line values into the config file, creating it when missing.
pub fn init_config(
    mut config: SyncConfig,
    overrides: &PathOverrides,
    device_name: Option<String>,
    listen_addr: Option<String>,
    peers: Vec<String>,
) -> Result<SyncConfig, CliError> {
    apply_overrides(&mut config, overrides);
    if let Some(name) = non_blank(device_name) {
        config.device_name = name;
    }
    if let Some(addr) = non_blank(listen_addr) {
        config.listen_addr = addr;
    }
    let peers: Vec<String> = peers.into_iter().filter_map(|peer| non_blank(Some(peer))).collect();
    if !peers.is_empty() {
        config.peers = peers;
    }
    config.validate()?;
    Ok(config)
}

fn run_config_init(
    overrides: &PathOverrides,
    device_name: Option<String>,
    listen_addr: Option<String>,
    peers: Vec<String>,
) -> Result<(), CliError> {
    let path = resolve_config_path(overrides.config.as_deref());
    let existing = SyncConfig::load_from_path(&path)?;
    let config = init_config(existing, overrides, device_name, listen_addr, peers)?;
    config.save_to_path(&path)?;
    println!("Saved config for {} to {}", config.device_name, path.display());
    Ok(())
}
