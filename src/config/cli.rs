use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum, builder::BoolishValueParser};

/// Command-line arguments for the presskit binary.
#[derive(Debug, Parser)]
#[command(
    name = "presskit",
    version,
    about = "Inspect and maintain WordPress content over its MySQL schema"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PRESSKIT_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", global = true, value_name = "URL")]
    pub database_url: Option<String>,

    /// Override the database pool size.
    #[arg(long = "database-max-connections", global = true, value_name = "COUNT")]
    pub database_max_connections: Option<u32>,

    /// Override the WordPress table prefix.
    #[arg(long = "table-prefix", global = true, value_name = "PREFIX")]
    pub table_prefix: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        global = true,
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Bypass the query cache.
    #[arg(long = "no-cache", global = true, action = clap::ArgAction::SetTrue)]
    pub no_cache: bool,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Show one post with its meta.
    Post(PostArgs),
    /// Most recent published posts.
    Latest(ListArgs),
    /// Posts ordered by popularity rank.
    Popular(ListArgs),
    /// Posts flagged as featured, by featured position.
    Featured(ListArgs),
    /// Posts sharing the first tag of a post.
    Related(RelatedArgs),
    /// Items of a navigation menu.
    Menu(MenuArgs),
    /// Read or write meta values.
    Meta(MetaArgs),
    /// Read a value from the options table.
    #[command(name = "option")]
    OptionValue(OptionArgs),
    /// Move a post within an ordered collection.
    Reorder(ReorderArgs),
}

#[derive(Debug, Args, Clone)]
pub struct PostArgs {
    pub id: u64,

    /// Print only these attributes (schema columns or meta keys).
    #[arg(long = "attribute", value_name = "NAME")]
    pub attributes: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct ListArgs {
    /// Post types to include; may be repeated.
    #[arg(long = "type", value_name = "TYPE", default_value = "post")]
    pub post_types: Vec<String>,

    #[arg(long, default_value_t = 10)]
    pub limit: u64,

    /// Only posts whose primary category is this term id.
    #[arg(long = "category", value_name = "TERM_ID")]
    pub primary_category: Option<u64>,

    /// Post ids to leave out; may be repeated.
    #[arg(long = "exclude", value_name = "ID")]
    pub exclude: Vec<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct RelatedArgs {
    pub id: u64,

    #[arg(long, default_value_t = 10)]
    pub limit: u64,
}

#[derive(Debug, Args, Clone)]
pub struct MenuArgs {
    pub slug: String,

    /// Only items of this object type (post, page, category, custom, ...).
    #[arg(long = "type", value_name = "TYPE")]
    pub item_type: Option<String>,

    #[arg(long, default_value_t = 10)]
    pub limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OwnerKind {
    Post,
    Term,
    User,
}

#[derive(Debug, Args, Clone)]
pub struct MetaArgs {
    #[command(subcommand)]
    pub command: MetaCommand,
}

#[derive(Debug, Subcommand, Clone)]
pub enum MetaCommand {
    /// Print the first value stored for a key.
    Get {
        id: u64,
        key: String,
        #[arg(long, value_enum, default_value_t = OwnerKind::Post)]
        owner: OwnerKind,
    },
    /// Store a value for a key, replacing the first existing record.
    Set {
        id: u64,
        key: String,
        value: String,
        #[arg(long, value_enum, default_value_t = OwnerKind::Post)]
        owner: OwnerKind,
        /// Parse the value as JSON; arrays and objects are stored serialized.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        json: bool,
        /// Append a record instead of replacing the first one.
        #[arg(long, action = clap::ArgAction::SetTrue)]
        add: bool,
    },
    /// Remove every record for a key.
    Delete {
        id: u64,
        key: String,
        #[arg(long, value_enum, default_value_t = OwnerKind::Post)]
        owner: OwnerKind,
    },
}

#[derive(Debug, Args, Clone)]
pub struct OptionArgs {
    pub name: String,
}

#[derive(Debug, Args, Clone)]
pub struct ReorderArgs {
    pub id: u64,

    /// Meta key holding the position, e.g. `_featured_position`.
    pub key: String,

    /// 1-based target position; positions past the end append.
    #[arg(long, conflicts_with_all = ["end", "remove"])]
    pub position: Option<u64>,

    /// Move to the end of the collection.
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with = "remove")]
    pub end: bool,

    /// Take the post out of the collection.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub remove: bool,
}
