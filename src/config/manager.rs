use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{AppError, Result};

/// Environments a server may be filed under.
pub const ENVIRONMENTS: [&str; 3] = ["dev", "staging", "prod"];

/// Application settings
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub default_port: u16,
    /// Seconds allowed for dialing and authenticating.
    pub connection_timeout: u64,
    pub identity_file: String,
    pub download_dir: Option<String>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_port: 22,
            connection_timeout: 10,
            identity_file: "~/.ssh/id_ed25519".to_string(),
            download_dir: None,
        }
    }
}

fn serialize_password<S>(plain: &Option<String>, serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match plain {
        Some(plain) => {
            let enc = crate::config::encryption::PasswordEncryption::new();
            let encrypted = enc
                .encrypt_password(plain)
                .map_err(serde::ser::Error::custom)?;
            serializer.serialize_some(&encrypted)
        }
        None => serializer.serialize_none(),
    }
}

fn deserialize_password<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let Some(encrypted) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let enc = crate::config::encryption::PasswordEncryption::new();
    enc.decrypt_password(&encrypted)
        .map(Some)
        .map_err(serde::de::Error::custom)
}

/// A remote machine entry.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Server {
    pub hostname: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub alias: String,
    pub user: String,
    pub port: u16,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_password",
        deserialize_with = "deserialize_password"
    )]
    pub password: Option<String>,
    pub added_at: DateTime<Utc>,
}

impl Server {
    pub fn new(hostname: String, alias: String, user: String, port: u16) -> Self {
        Self {
            hostname,
            ip: None,
            alias,
            user,
            port,
            password: None,
            added_at: Utc::now(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(AppError::ValidationError(
                "Hostname cannot be empty".to_string(),
            ));
        }
        if self.alias.trim().is_empty() {
            return Err(AppError::ValidationError("Alias cannot be empty".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(AppError::ValidationError("User cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(AppError::ValidationError(
                "Port must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Environment {
    pub name: String,
    #[serde(default)]
    pub servers: Vec<Server>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub environments: Vec<Environment>,
}

/// Main configuration structure
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub settings: AppSettings,
    #[serde(default)]
    pub groups: Vec<Group>,
}

/// How to authenticate against a server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthMethod {
    Password(String),
    PublicKey {
        private_key_path: String,
        passphrase: Option<String>,
    },
}

/// Everything needed to dial one server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectTarget {
    pub user: String,
    pub host: String,
    pub port: u16,
    pub auth: AuthMethod,
}

impl ConnectTarget {
    pub fn new(user: impl Into<String>, host: impl Into<String>, port: u16, auth: AuthMethod) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port,
            auth,
        }
    }

    pub fn host_port(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user, self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Duplicate,
}

/// A server eligible for a group command, with the environment it lives in.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub environment: &'a str,
    pub server: &'a Server,
}

impl Candidate<'_> {
    pub fn label(&self) -> String {
        format!("{} ({})", self.server.alias, self.environment)
    }
}

/// Configuration manager for the group / environment / server tree
pub struct ConfigManager {
    config_path: PathBuf,
    config: Config,
}

impl ConfigManager {
    /// Load from `path`, or from the default location when `None`.
    pub fn new(path: Option<PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::with_path(path),
            None => Self::with_path(Self::get_config_path()?),
        }
    }

    pub fn with_path<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref().to_path_buf();
        let config = Self::load_config_from_path(&config_path)?;
        debug!("Loaded config from {}", config_path.display());

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Get the default configuration file path
    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .ok_or_else(|| AppError::ConfigError("Cannot determine config directory".to_string()))?
            .join("ssm");
        Ok(config_dir.join("config.toml"))
    }

    fn load_config_from_path(config_path: &Path) -> Result<Config> {
        if !config_path.exists() {
            return Ok(Config::default());
        }

        let config_content = fs::read_to_string(config_path)
            .map_err(|e| AppError::ConfigError(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&config_content)
            .map_err(|e| AppError::ConfigError(format!("Failed to parse config file: {}", e)))
    }

    /// Persist current config to disk
    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.config_path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir).map_err(|e| {
                AppError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }
        let toml = toml::to_string_pretty(&self.config)
            .map_err(|e| AppError::ConfigError(format!("Failed to serialize config: {}", e)))?;
        fs::write(&self.config_path, toml)
            .map_err(|e| AppError::ConfigError(format!("Failed to write config: {}", e)))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> &AppSettings {
        &self.config.settings
    }

    pub fn groups(&self) -> &[Group] {
        &self.config.groups
    }

    /// File `server` under `group` / `environment`, creating both on demand.
    pub fn add_server(&mut self, group: &str, environment: &str, server: Server) -> Result<AddOutcome> {
        if group.trim().is_empty() {
            return Err(AppError::ValidationError("Group cannot be empty".to_string()));
        }
        if !ENVIRONMENTS.contains(&environment) {
            return Err(AppError::ValidationError(format!(
                "Environment must be one of {}, got '{}'",
                ENVIRONMENTS.join(", "),
                environment
            )));
        }
        server.validate()?;

        let groups = &mut self.config.groups;
        let group_idx = match groups.iter().position(|g| g.name == group) {
            Some(idx) => idx,
            None => {
                groups.push(Group {
                    name: group.to_string(),
                    environments: Vec::new(),
                });
                groups.len() - 1
            }
        };

        let environments = &mut groups[group_idx].environments;
        let env_idx = match environments.iter().position(|e| e.name == environment) {
            Some(idx) => idx,
            None => {
                environments.push(Environment {
                    name: environment.to_string(),
                    servers: Vec::new(),
                });
                environments.len() - 1
            }
        };

        let servers = &mut environments[env_idx].servers;
        if servers.iter().any(|s| s.hostname == server.hostname) {
            info!("{} already present in {}/{}", server.hostname, group, environment);
            return Ok(AddOutcome::Duplicate);
        }

        info!("Adding {} to {}/{}", server.hostname, group, environment);
        servers.push(server);
        self.save()?;
        Ok(AddOutcome::Added)
    }

    /// Remove every server with `hostname`, returning how many were removed.
    pub fn remove_server(&mut self, hostname: &str) -> Result<usize> {
        self.remove_server_with(hostname, |_, _| Ok(true))
    }

    /// Remove servers with `hostname`, asking `confirm(group, environment)`
    /// before each one. Fails when the hostname is not configured at all.
    pub fn remove_server_with<F>(&mut self, hostname: &str, mut confirm: F) -> Result<usize>
    where
        F: FnMut(&str, &str) -> Result<bool>,
    {
        let mut found = 0;
        let mut removed = 0;
        for group in self.config.groups.iter_mut() {
            for environment in group.environments.iter_mut() {
                let Some(idx) = environment.servers.iter().position(|s| s.hostname == hostname)
                else {
                    continue;
                };
                found += 1;
                if confirm(&group.name, &environment.name)? {
                    environment.servers.remove(idx);
                    removed += 1;
                } else {
                    info!("Kept {} in {}/{}", hostname, group.name, environment.name);
                }
            }
        }

        if found == 0 {
            return Err(AppError::ValidationError(format!(
                "No server with hostname '{}'",
                hostname
            )));
        }
        if removed > 0 {
            info!("Removed {} entries for {}", removed, hostname);
            self.save()?;
        }
        Ok(removed)
    }

    /// Sort the servers of every environment by alias.
    pub fn sort_servers(&mut self) -> Result<()> {
        for environment in self
            .config
            .groups
            .iter_mut()
            .flat_map(|g| g.environments.iter_mut())
        {
            environment.servers.sort_by(|a, b| a.alias.cmp(&b.alias));
        }
        self.save()
    }

    /// Servers of `group`, optionally restricted to one environment.
    pub fn candidates(&self, group: &str, environment: Option<&str>) -> Result<Vec<Candidate<'_>>> {
        let group = self
            .config
            .groups
            .iter()
            .find(|g| g.name == group)
            .ok_or_else(|| AppError::ValidationError(format!("Unknown group '{}'", group)))?;

        Ok(group
            .environments
            .iter()
            .filter(|e| environment.is_none_or(|wanted| e.name == wanted))
            .flat_map(|e| {
                e.servers.iter().map(|server| Candidate {
                    environment: e.name.as_str(),
                    server,
                })
            })
            .collect())
    }

    /// Candidates narrowed by `server` (an alias or a hostname); never empty.
    pub fn matching_servers(
        &self,
        group: &str,
        environment: Option<&str>,
        server: Option<&str>,
    ) -> Result<Vec<Candidate<'_>>> {
        let mut candidates = self.candidates(group, environment)?;
        if let Some(wanted) = server {
            candidates.retain(|c| c.server.alias == wanted || c.server.hostname == wanted);
        }
        if candidates.is_empty() {
            return Err(AppError::ValidationError(format!(
                "No matching server in group '{}'",
                group
            )));
        }
        Ok(candidates)
    }

    /// Resolve exactly one server without asking; several matches are an error.
    pub fn select_server(
        &self,
        group: &str,
        environment: Option<&str>,
        server: Option<&str>,
    ) -> Result<Candidate<'_>> {
        let candidates = self.matching_servers(group, environment, server)?;
        match candidates.as_slice() {
            [only] => Ok(*only),
            many => {
                let labels: Vec<String> = many.iter().map(|c| format!("  {}", c.label())).collect();
                Err(AppError::ValidationError(format!(
                    "Several servers match, pick one with -s:\n{}",
                    labels.join("\n")
                )))
            }
        }
    }

    /// Build the dial parameters for `server` from the current settings.
    pub fn connect_target(&self, server: &Server) -> ConnectTarget {
        let auth = match &server.password {
            Some(password) => AuthMethod::Password(password.clone()),
            None => AuthMethod::PublicKey {
                private_key_path: self.config.settings.identity_file.clone(),
                passphrase: None,
            },
        };
        ConnectTarget::new(&server.user, &server.hostname, server.port, auth)
    }
}
