//! Configuration Manager

use super::{Config, ReplaceRule};
use crate::relay::{HookChain, LogObserver, ReplaceTransformer};
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;

/// Upper bound for a single read chunk
pub const MAX_BUFFER_SIZE: usize = 1 << 20;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file, falling back to defaults when it is missing
    pub fn load_from_file(path: &Path) -> Result<Config> {
        if !path.exists() {
            tracing::warn!("Configuration file not found at {}, using defaults", path.display());
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}

impl Config {
    /// Override fields from `MITM_*` variables, looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("MITM_LISTEN_ADDR") {
            self.relay.listen_addr = addr;
        }
        if let Some(addr) = lookup("MITM_REMOTE_ADDR") {
            self.relay.remote_addr = addr;
        }
        if let Some(path) = lookup("MITM_LOG_FILE") {
            self.relay.log_file = path.into();
        }
        if let Some(size) = lookup("MITM_BUFFER_SIZE") {
            self.relay.buffer_size = size
                .parse::<usize>()
                .with_context(|| format!("Invalid MITM_BUFFER_SIZE: {}", size))?;
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_relay_config()
            .context("Relay configuration validation failed")?;
        self.validate_hook_config()
            .context("Hook configuration validation failed")?;
        Ok(())
    }

    fn validate_relay_config(&self) -> Result<()> {
        validate_host_port("listen_addr", &self.relay.listen_addr)?;
        validate_host_port("remote_addr", &self.relay.remote_addr)?;

        if self.relay.buffer_size == 0 {
            bail!("buffer_size must be greater than 0");
        }
        if self.relay.buffer_size > MAX_BUFFER_SIZE {
            bail!("buffer_size cannot exceed 1MB");
        }
        if self.relay.log_file.as_os_str().is_empty() {
            bail!("log_file cannot be empty");
        }
        Ok(())
    }

    fn validate_hook_config(&self) -> Result<()> {
        for (i, rule) in self.hooks.replace.iter().enumerate() {
            if rule.from.is_empty() {
                bail!("replace rule {} has an empty 'from' pattern", i);
            }
        }
        Ok(())
    }

    /// Build the hook chain shared by every engine
    pub fn build_hooks(&self) -> HookChain {
        let mut hooks = HookChain::new();
        if self.hooks.log_chunks {
            hooks = hooks.with_observer(LogObserver::new(self.hooks.format));
        }
        if let Some((first, rest)) = self.hooks.replace.split_first() {
            let replace = rest.iter().fold(
                ReplaceTransformer::new(first.from.as_bytes(), first.to.as_bytes()),
                |replace, rule| replace.rule(rule.from.as_bytes(), rule.to.as_bytes()),
            );
            hooks = hooks.with_transformer(replace);
        }
        hooks
    }
}

fn validate_host_port(field: &str, addr: &str) -> Result<()> {
    let Some((host, port)) = addr.rsplit_once(':') else {
        bail!("{} must be in host:port form, got {:?}", field, addr);
    };
    if host.is_empty() {
        bail!("{} is missing a host: {:?}", field, addr);
    }
    port.parse::<u16>()
        .with_context(|| format!("{} has an invalid port: {:?}", field, addr))?;
    Ok(())
}

impl std::str::FromStr for ReplaceRule {
    type Err = anyhow::Error;

    /// Parse `FROM=TO`
    fn from_str(s: &str) -> Result<Self> {
        let Some((from, to)) = s.split_once('=') else {
            bail!("replace rule must be FROM=TO, got {:?}", s);
        };
        if from.is_empty() {
            bail!("replace rule has an empty FROM: {:?}", s);
        }
        Ok(ReplaceRule {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}
