use streamguard_config::{Config, save_config};

use crate::cli::{ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;

const REDACTED: &str = "********";

pub fn handle(cmd: &ConfigCommand, global: &GlobalOpts) -> Result<(), CliError> {
    let path = config::resolve_path(global);
    match cmd {
        ConfigCommand::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommand::Show => {
            let cfg = config::load(&path)?;
            print!("{}", render_redacted(&cfg).map_err(CliError::config(&path))?);
            Ok(())
        }
        ConfigCommand::Check => {
            let cfg = config::load(&path)?;
            cfg.to_runtime().map_err(CliError::config(&path))?;
            println!("{} is valid", path.display());
            Ok(())
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                println!("{} already exists (use --force to overwrite)", path.display());
                return Ok(());
            }
            save_config(&Config::default(), &path).map_err(CliError::config(&path))?;
            println!("wrote {}", path.display());
            Ok(())
        }
    }
}

fn render_redacted(cfg: &Config) -> Result<String, streamguard_config::ConfigError> {
    let mut cfg = cfg.clone();
    for secret in [&mut cfg.connection.api_key, &mut cfg.connection.session_id] {
        if secret.is_some() {
            *secret = Some(REDACTED.into());
        }
    }
    Ok(toml::to_string_pretty(&cfg)?)
}
