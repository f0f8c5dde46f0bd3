use crate::services::{gateway::GatewayConfig, name_mapper::ContainerPaths};
use anyhow::{Context, Result};
use clap::Parser;
use std::{env, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "OBJECT_GATEWAY_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub store_url: String,
    pub cache_url: String,
    pub wiki_id: Option<String>,
    pub containers: Vec<(String, String)>,
    pub stat_ttl_secs: u64,
    pub local_copy_ttl_secs: u64,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "File storage gateway over a flat blob store")]
pub struct Args {
    /// Host to bind to (overrides OBJECT_GATEWAY_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides OBJECT_GATEWAY_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Blob store URL: gs://bucket, s3://bucket or memory:// (overrides OBJECT_GATEWAY_STORE_URL)
    #[arg(long)]
    pub store_url: Option<String>,

    /// Stat cache store: memory:// or a sqlite:// URL (overrides OBJECT_GATEWAY_CACHE_URL)
    #[arg(long)]
    pub cache_url: Option<String>,

    /// Wiki whose default container layout is registered (overrides OBJECT_GATEWAY_WIKI_ID)
    #[arg(long)]
    pub wiki_id: Option<String>,

    /// Container prefix as NAME=PREFIX; repeatable (overrides OBJECT_GATEWAY_CONTAINERS)
    #[arg(long = "container", value_parser = parse_container)]
    pub containers: Vec<(String, String)>,

    /// Stat cache entry lifetime in seconds (overrides OBJECT_GATEWAY_STAT_TTL_SECS)
    #[arg(long)]
    pub stat_ttl_secs: Option<u64>,

    /// Lifetime of download URLs used for local copies (overrides OBJECT_GATEWAY_LOCAL_COPY_TTL_SECS)
    #[arg(long)]
    pub local_copy_ttl_secs: Option<u64>,

    /// Create the stat cache table and exit
    #[arg(long)]
    pub migrate: bool,
}

fn parse_container(raw: &str) -> Result<(String, String), String> {
    let (name, prefix) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=PREFIX, got `{}`", raw))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("empty container name in `{}`", raw));
    }
    Ok((name.to_string(), prefix.trim().to_string()))
}

fn env_var(name: &str) -> Result<Option<String>> {
    let key = format!("{}{}", ENV_PREFIX, name);
    match env::var(&key) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

fn env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env_var(name)?
        .map(|value| {
            value
                .parse::<T>()
                .with_context(|| format!("parsing {}{} value `{}`", ENV_PREFIX, name, value))
        })
        .transpose()
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let env_containers = match env_var("CONTAINERS")? {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(parse_container)
                .collect::<Result<Vec<_>, _>>()
                .map_err(anyhow::Error::msg)
                .context("parsing OBJECT_GATEWAY_CONTAINERS")?,
            None => Vec::new(),
        };

        let cfg = Self {
            host: args
                .host
                .or(env_var("HOST")?)
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: match args.port {
                Some(port) => port,
                None => env_parsed("PORT")?.unwrap_or(3000),
            },
            store_url: args
                .store_url
                .or(env_var("STORE_URL")?)
                .unwrap_or_else(|| "memory://".into()),
            cache_url: args
                .cache_url
                .or(env_var("CACHE_URL")?)
                .unwrap_or_else(|| "memory://".into()),
            wiki_id: args.wiki_id.or(env_var("WIKI_ID")?),
            containers: if args.containers.is_empty() {
                env_containers
            } else {
                args.containers
            },
            stat_ttl_secs: match args.stat_ttl_secs {
                Some(secs) => secs,
                None => env_parsed("STAT_TTL_SECS")?.unwrap_or(604_800),
            },
            local_copy_ttl_secs: match args.local_copy_ttl_secs {
                Some(secs) => secs,
                None => env_parsed("LOCAL_COPY_TTL_SECS")?.unwrap_or(86_400),
            },
        };

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Container table: the wiki layout (if any) with explicit entries on top.
    pub fn container_paths(&self) -> ContainerPaths {
        let base = self
            .wiki_id
            .as_deref()
            .map(ContainerPaths::for_wiki)
            .unwrap_or_default();
        base.merged(ContainerPaths::new(self.containers.iter().cloned()))
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            containers: self.container_paths(),
            stat_ttl: Duration::from_secs(self.stat_ttl_secs),
            local_copy_ttl: Duration::from_secs(self.local_copy_ttl_secs),
        }
    }
}
