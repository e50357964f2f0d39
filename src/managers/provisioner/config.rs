use crate::constants::bridge::DEFAULT_ENV_PREFIX;
use crate::errors::TunnelError;
use crate::services::credentials::HostKeyKind;
use crate::utils::template::{render_template, TemplateContext};
use crate::utils::user_paths::{expand_home_path, find_executable};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

static ENV_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("env name regex"));

/// Raw provisioner settings, as read from a JSON file and/or the command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProvisionerConfig {
    #[serde(default)]
    pub exec: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub host_key: Option<HostKeyKind>,
    #[serde(default)]
    pub env_prefix: Option<String>,
}

/// Settings after templating and executable lookup; ready to launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedConfig {
    pub exec: PathBuf,
    pub args: Vec<String>,
    pub host_key: HostKeyKind,
    pub env_prefix: String,
}

impl ProvisionerConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, TunnelError> {
        serde_json::from_str(raw)
            .map_err(|err| TunnelError::invalid_config(format!("invalid provisioner config: {}", err)))
    }

    pub fn from_json_file(path: &Path) -> Result<Self, TunnelError> {
        let path = expand_home_path(path);
        let raw = std::fs::read_to_string(&path).map_err(|err| {
            TunnelError::invalid_config(format!("failed to read {}: {}", path.display(), err))
        })?;
        Self::from_json_str(&raw)
    }

    /// Command-line values win. A non-empty `command` replaces both exec and args.
    pub fn merge(
        mut self,
        command: Vec<String>,
        host_key: Option<HostKeyKind>,
        env_prefix: Option<String>,
    ) -> Self {
        let mut command = command.into_iter();
        if let Some(exec) = command.next() {
            self.exec = exec;
            self.args = command.collect();
        }
        if host_key.is_some() {
            self.host_key = host_key;
        }
        if env_prefix.is_some() {
            self.env_prefix = env_prefix;
        }
        self
    }

    /// Renders templates, validates and resolves the executable. Every template or
    /// validation problem is reported at once; executable lookup only runs after those pass.
    pub fn prepare(&self, ctx: &dyn TemplateContext) -> Result<PreparedConfig, TunnelError> {
        let mut problems = Vec::new();

        if self.exec.is_empty() {
            problems.push("missing tunnel provisioner parameter exec".to_string());
        }
        let exec = match render_template(&self.exec, ctx) {
            Ok(exec) => exec,
            Err(err) => {
                problems.push(format!("error processing exec template: {}", err.message));
                String::new()
            }
        };

        let mut args = Vec::with_capacity(self.args.len());
        for (index, arg) in self.args.iter().enumerate() {
            match render_template(arg, ctx) {
                Ok(rendered) => args.push(rendered),
                Err(err) => problems.push(format!(
                    "error processing arg {} ({:?}): {}",
                    index, arg, err.message
                )),
            }
        }

        let env_prefix = self
            .env_prefix
            .clone()
            .unwrap_or_else(|| DEFAULT_ENV_PREFIX.to_string());
        if !ENV_NAME.is_match(&env_prefix) {
            problems.push(format!(
                "env_prefix {:?} is not a valid environment variable name",
                env_prefix
            ));
        }

        if !problems.is_empty() {
            return Err(TunnelError::invalid_config_all(&problems));
        }

        let resolved = find_executable(&exec).ok_or_else(|| {
            TunnelError::invalid_config(format!("executable {:?} not found", exec))
                .with_hint("Use an absolute path or make sure the tool is on PATH.")
        })?;

        Ok(PreparedConfig {
            exec: resolved,
            args,
            host_key: self
                .host_key
                .or_else(HostKeyKind::from_env)
                .unwrap_or_default(),
            env_prefix,
        })
    }
}
