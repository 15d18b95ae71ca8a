//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::str::FromStr;

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use time::UtcOffset;
use tracing::level_filters::LevelFilter;

use crate::cache::InvalidationPolicy;

pub use cli::{
    CliArgs, Command, GlobalOverrides, ListArgs, MenuArgs, MetaArgs, MetaCommand, OptionArgs,
    OwnerKind, PostArgs, RelatedArgs, ReorderArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "presskit";
const ENV_PREFIX: &str = "PRESSKIT";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_TABLE_PREFIX: &str = "wp_";
const DEFAULT_CACHE_CAPACITY: usize = 1024;
const DEFAULT_POST_TTL_SECS: u64 = 300;
const DEFAULT_TERM_TTL_SECS: u64 = 300;
const DEFAULT_MENU_TTL_SECS: u64 = 900;
const MIN_GMT_OFFSET_HOURS: f64 = -12.0;
const MAX_GMT_OFFSET_HOURS: f64 = 14.0;

const META_KEY_POPULAR_RANK: &str = "wordpress.meta_keys.popular_rank";
const META_KEY_PRIMARY_CATEGORY: &str = "wordpress.meta_keys.primary_category";
const META_KEY_FEATURED: &str = "wordpress.meta_keys.featured";
const META_KEY_FEATURED_POSITION: &str = "wordpress.meta_keys.featured_position";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub wordpress: MetaKeys,
    /// Offset of the site's timezone from UTC (`wordpress.gmt_offset`, hours).
    pub utc_offset: UtcOffset,
    /// The merged source tree, for dotted-path lookups of keys not modelled above.
    pub tree: Config,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
    pub table_prefix: String,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub enabled: bool,
    pub capacity: usize,
    pub post_ttl_secs: u64,
    pub term_ttl_secs: u64,
    pub menu_ttl_secs: u64,
    pub invalidation: InvalidationPolicy,
}

/// Meta keys the curated post lists read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaKeys {
    pub popular_rank: String,
    pub primary_category: String,
    pub featured: String,
    pub featured_position: String,
}

impl Default for MetaKeys {
    fn default() -> Self {
        Self::from_lookup(&HashMap::new())
    }
}

impl MetaKeys {
    pub fn from_lookup(source: &impl ConfigLookup) -> Self {
        Self {
            popular_rank: source.get_or(META_KEY_POPULAR_RANK, "_popular_rank"),
            primary_category: source.get_or(META_KEY_PRIMARY_CATEGORY, "_primary_category"),
            featured: source.get_or(META_KEY_FEATURED, "_featured"),
            featured_position: source.get_or(META_KEY_FEATURED_POSITION, "_featured_position"),
        }
    }
}

/// Dotted-path reads (`wordpress.meta_keys.featured`) over a configuration source.
pub trait ConfigLookup {
    fn lookup(&self, path: &str) -> Option<String>;

    fn get_or(&self, path: &str, default: &str) -> String {
        self.lookup(path)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| default.to_string())
    }
}

impl ConfigLookup for Config {
    fn lookup(&self, path: &str) -> Option<String> {
        self.get_string(path).ok()
    }
}

impl ConfigLookup for HashMap<String, String> {
    fn lookup(&self, path: &str) -> Option<String> {
        self.get(path).cloned()
    }
}

impl ConfigLookup for Settings {
    fn lookup(&self, path: &str) -> Option<String> {
        self.tree.lookup(path)
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    resolve(builder.build()?, &cli.overrides)
}

/// Validate a merged source tree and apply CLI overrides on top of it.
pub fn resolve(tree: Config, overrides: &GlobalOverrides) -> Result<Settings, LoadError> {
    let mut raw: RawSettings = tree.clone().try_deserialize()?;
    raw.apply_overrides(overrides);
    Settings::from_raw(raw, tree)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
    wordpress: RawWordpressSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
        if let Some(max) = overrides.database_max_connections {
            self.database.max_connections = Some(max);
        }
        if let Some(prefix) = overrides.table_prefix.as_ref() {
            self.database.table_prefix = Some(prefix.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if overrides.no_cache {
            self.cache.enabled = Some(false);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings, tree: Config) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
            wordpress,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
            wordpress: MetaKeys::from_lookup(&tree),
            utc_offset: build_utc_offset(wordpress.gmt_offset)?,
            tree,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    let table_prefix = database
        .table_prefix
        .unwrap_or_else(|| DEFAULT_TABLE_PREFIX.to_string());
    if !table_prefix
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
    {
        return Err(LoadError::invalid(
            "database.table_prefix",
            "may only contain ASCII letters, digits and underscores",
        ));
    }

    Ok(DatabaseSettings {
        url,
        max_connections,
        table_prefix,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let capacity = cache.capacity.unwrap_or(DEFAULT_CACHE_CAPACITY);
    if capacity == 0 {
        return Err(LoadError::invalid("cache.capacity", "must be greater than zero"));
    }

    let invalidation = match cache.invalidation.as_deref().map(str::trim) {
        None | Some("") | Some("ttl_only") => InvalidationPolicy::TtlOnly,
        Some("on_write") => InvalidationPolicy::OnWrite,
        Some(other) => {
            return Err(LoadError::invalid(
                "cache.invalidation",
                format!("expected `ttl_only` or `on_write`, got `{other}`"),
            ));
        }
    };

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        capacity,
        post_ttl_secs: cache.post_ttl_secs.unwrap_or(DEFAULT_POST_TTL_SECS),
        term_ttl_secs: cache.term_ttl_secs.unwrap_or(DEFAULT_TERM_TTL_SECS),
        menu_ttl_secs: cache.menu_ttl_secs.unwrap_or(DEFAULT_MENU_TTL_SECS),
        invalidation,
    })
}

/// WordPress stores `gmt_offset` in hours and allows fractions such as 5.5.
fn build_utc_offset(hours: Option<f64>) -> Result<UtcOffset, LoadError> {
    let hours = hours.unwrap_or(0.0);
    if !(MIN_GMT_OFFSET_HOURS..=MAX_GMT_OFFSET_HOURS).contains(&hours) {
        return Err(LoadError::invalid(
            "wordpress.gmt_offset",
            format!(
                "expected hours between {MIN_GMT_OFFSET_HOURS} and {MAX_GMT_OFFSET_HOURS}, \
                 got {hours}"
            ),
        ));
    }
    let seconds = (hours * 3600.0).round() as i32;
    UtcOffset::from_whole_seconds(seconds)
        .map_err(|err| LoadError::invalid("wordpress.gmt_offset", err.to_string()))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawWordpressSettings {
    gmt_offset: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
    table_prefix: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    capacity: Option<usize>,
    post_ttl_secs: Option<u64>,
    term_ttl_secs: Option<u64>,
    menu_ttl_secs: Option<u64>,
    invalidation: Option<String>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
