use std::collections::BTreeMap;
use std::process;
use std::sync::Arc;

use presskit::{
    application::{
        error::AppError,
        factory::{ListFilter, PostFactory, TermFactory},
        meta::{MetaService, OptionsService},
        ordering::OrderingService,
        posts::PostService,
        query::Tables,
    },
    cache::{CacheConfig, QueryCache},
    config::{self, Command, ListArgs, MetaCommand, OwnerKind, ReorderArgs, Settings},
    domain::{
        entities::{MetaOwner, format_datetime},
        meta_value::MetaValue,
        ordering::RequestedPosition,
        posts::Post,
        variants::{PostVariant, post_types},
    },
    infra::{db::MySqlRepositories, error::InfraError, telemetry},
};
use serde::Serialize;
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(error.exit_code());
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;
    telemetry::init(&settings.logging)?;

    let app = App::connect(&settings).await?;
    app.dispatch(cli_args.command).await
}

struct App {
    posts: PostService,
    factory: PostFactory,
    terms: Arc<TermFactory>,
    ordering: OrderingService,
    options: OptionsService,
}

impl App {
    async fn connect(settings: &Settings) -> Result<Self, AppError> {
        let url = settings
            .database
            .url
            .as_deref()
            .ok_or_else(|| InfraError::configuration("`database.url` is not set"))?;
        let pool = MySqlRepositories::connect(url, settings.database.max_connections.get())
            .await
            .map_err(|err| InfraError::database(err.to_string()))?;
        let tables = Tables::new(settings.database.table_prefix.clone());
        let repos = Arc::new(MySqlRepositories::new(pool, tables.clone()));
        repos
            .health_check()
            .await
            .map_err(|err| InfraError::database(err.to_string()))?;

        let cache = Arc::new(QueryCache::in_memory(CacheConfig::from(&settings.cache)));
        info!(
            target_module = "main",
            table_prefix = tables.prefix(),
            cache_enabled = cache.is_enabled(),
            invalidation = cache.policy().as_str(),
            "connected to WordPress database"
        );

        let meta = MetaService::new(repos.clone()).with_cache(cache.clone());
        let terms = Arc::new(TermFactory::new(cache.clone(), repos.clone(), tables.clone()));
        let factory = PostFactory::new(
            cache.clone(),
            repos.clone(),
            meta.clone(),
            terms.clone(),
            tables,
        )
        .with_meta_keys(settings.wordpress.clone());

        Ok(Self {
            posts: PostService::new(repos.clone(), meta)
                .with_cache(cache.clone())
                .with_utc_offset(settings.utc_offset),
            factory,
            terms,
            ordering: OrderingService::new(repos.clone()).with_cache(cache),
            options: OptionsService::new(repos),
        })
    }

    async fn dispatch(&self, command: Command) -> Result<(), AppError> {
        match command {
            Command::Post(args) => {
                let post = self.require_post(args.id).await?;
                if args.attributes.is_empty() {
                    return print_json(&post);
                }
                let mut values = BTreeMap::new();
                for name in &args.attributes {
                    values.insert(name.clone(), self.posts.attribute(&post, name).await?);
                }
                print_json(&values)
            }
            Command::Latest(args) => {
                print_posts(self.factory.latest(&list_filter(&args)).await?)
            }
            Command::Popular(args) => {
                print_posts(self.factory.popular(&list_filter(&args)).await?)
            }
            Command::Featured(args) => {
                print_posts(self.factory.featured(&list_filter(&args)).await?)
            }
            Command::Related(args) => {
                let post = self.require_post(args.id).await?;
                print_posts(self.factory.related(&post, args.limit).await?)
            }
            Command::Menu(args) => {
                let items = self
                    .terms
                    .menu_items_by_slug(&args.slug, args.item_type.as_deref(), args.limit)
                    .await?;
                print_json(&items)
            }
            Command::Meta(args) => self.meta(args.command).await,
            Command::OptionValue(args) => print_json(&self.options.get(&args.name).await?),
            Command::Reorder(args) => self.reorder(args).await,
        }
    }

    async fn meta(&self, command: MetaCommand) -> Result<(), AppError> {
        let meta = self.posts.meta();
        match command {
            MetaCommand::Get { id, key, owner } => {
                print_json(&meta.get(meta_owner(owner, id), &key).await?)
            }
            MetaCommand::Set {
                id,
                key,
                value,
                owner,
                json,
                add,
            } => {
                let value = if json {
                    let parsed: serde_json::Value = serde_json::from_str(&value)
                        .map_err(|err| AppError::validation(format!("value is not JSON: {err}")))?;
                    MetaValue::from(parsed)
                } else {
                    MetaValue::from(value)
                };
                let owner = meta_owner(owner, id);
                let record = if add {
                    meta.add(owner, &key, &value).await?
                } else {
                    meta.set(owner, &key, &value).await?
                };
                print_json(&record)
            }
            MetaCommand::Delete { id, key, owner } => {
                let deleted = meta.delete(meta_owner(owner, id), &key).await?;
                print_json(&serde_json::json!({ "deleted": deleted }))
            }
        }
    }

    async fn reorder(&self, args: ReorderArgs) -> Result<(), AppError> {
        let requested = match (args.position, args.end, args.remove) {
            (Some(position), _, _) => RequestedPosition::At(position),
            (None, true, _) => RequestedPosition::End,
            (None, false, true) => RequestedPosition::Remove,
            (None, false, false) => {
                return Err(AppError::validation(
                    "one of --position, --end or --remove is required",
                ));
            }
        };
        let post = self
            .posts
            .find(args.id)
            .await?
            .ok_or_else(|| AppError::not_found("post", args.id))?;

        let plan = self
            .ordering
            .rearrange_order(&post, &args.key, requested)
            .await?;
        let group = self.ordering.group(post.post_type(), &args.key).await?;
        print_json(&serde_json::json!({
            "shifted": plan.shifts.len(),
            "own": format!("{:?}", plan.own),
            "group": group,
        }))
    }

    async fn require_post(&self, id: u64) -> Result<Post, AppError> {
        self.factory
            .find(id)
            .await?
            .ok_or_else(|| AppError::not_found("post", id))
    }
}

fn list_filter(args: &ListArgs) -> ListFilter {
    let mut filter = ListFilter::new(args.post_types.iter().cloned(), args.limit).exclude(&args.exclude);
    if let Some(term_id) = args.primary_category {
        filter = filter.primary_category(term_id);
    }
    filter
}

fn meta_owner(kind: OwnerKind, id: u64) -> MetaOwner {
    match kind {
        OwnerKind::Post => MetaOwner::Post(id),
        OwnerKind::Term => MetaOwner::Term(id),
        OwnerKind::User => MetaOwner::User(id),
    }
}

#[derive(Serialize)]
struct PostSummary {
    id: u64,
    kind: &'static str,
    post_type: String,
    title: String,
    slug: String,
    date: String,
}

impl From<PostVariant> for PostSummary {
    fn from(variant: PostVariant) -> Self {
        let kind = match &variant {
            PostVariant::Article(_) => "article",
            PostVariant::Page(_) => "page",
            PostVariant::Attachment(_) => "attachment",
            PostVariant::MenuItem(_) => "menu_item",
            PostVariant::Custom(_) => "custom",
            PostVariant::Generic(_) => "generic",
        };
        let post = variant.into_post();
        Self {
            id: post.record().id,
            kind,
            post_type: post.post_type().to_string(),
            title: post.title().to_string(),
            slug: post.slug().to_string(),
            date: format_datetime(post.record().post_date),
        }
    }
}

fn print_posts(posts: Vec<Post>) -> Result<(), AppError> {
    let summaries: Vec<PostSummary> = post_types()
        .hydrate_all(posts)
        .into_iter()
        .map(PostSummary::from)
        .collect();
    print_json(&summaries)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
