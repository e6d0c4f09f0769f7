use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_yaml;
use std::env;
use std::fs;
use std::path::PathBuf;

use crate::model::SettingKey;

#[derive(Parser, Debug)]
#[command(name = "readpress")]
#[command(about = "Publishes tagged Readwise highlights as posts", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config")]
    pub config_path: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP service and the recurring sync (default)
    Serve,
    /// Run a single sync and print the report
    Sync {
        /// Ignore the checkpoint and fetch every highlight
        #[arg(long = "all")]
        fetch_all: bool,
    },
    /// Store a sync setting
    Set { key: SettingKey, value: String },
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".readpress")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone)]
pub struct App {
    database: String,
    port: i32,
    #[serde(default)]
    pub turso_url: Option<String>,
    #[serde(default)]
    pub turso_auth_token: Option<String>,
    #[serde(default = "default_sync_interval")]
    pub sync_interval_seconds: u64,
    #[serde(default = "default_lease")]
    pub lease_seconds: u64,
}

fn default_sync_interval() -> u64 {
    3600
}

fn default_lease() -> u64 {
    900
}

impl Default for App {
    fn default() -> Self {
        App {
            database: "readpress.db".to_string(),
            port: 8080,
            turso_url: None,
            turso_auth_token: None,
            sync_interval_seconds: default_sync_interval(),
            lease_seconds: default_lease(),
        }
    }
}

impl App {
    pub fn get_db(&self) -> &str {
        &self.database
    }

    pub fn get_port(&self) -> i32 {
        self.port
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Readwise {
    #[serde(default = "default_readwise_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

fn default_readwise_url() -> String {
    "https://readwise.io".to_string()
}

fn default_timeout() -> u64 {
    30
}

impl Default for Readwise {
    fn default() -> Self {
        Readwise {
            base_url: default_readwise_url(),
            timeout_seconds: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Publish {
    #[serde(default = "default_author_id")]
    pub author_id: i64,
    #[serde(default = "default_marketplace")]
    pub marketplace_search_url: String,
    #[serde(default = "default_true")]
    pub skip_duplicates: bool,
    #[serde(default = "default_true")]
    pub strict_name_rules: bool,
}

fn default_author_id() -> i64 {
    1
}

fn default_marketplace() -> String {
    "https://www.amazon.com/s?k=".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for Publish {
    fn default() -> Self {
        Publish {
            author_id: default_author_id(),
            marketplace_search_url: default_marketplace(),
            skip_duplicates: true,
            strict_name_rules: true,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    pub app: App,
    #[serde(default)]
    pub readwise: Readwise,
    #[serde(default)]
    pub publish: Publish,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        Ok(cfg)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Config> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let config: Config = serde_yaml::from_str(&yaml_with_env)?;
        Ok(config)
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find("}") {
                let var_name = &result[actual_start + 2..actual_start + end];

                // Handle default values like ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var).unwrap_or_else(|_| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!("environment variable '{}' not found", var_name);
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}
