use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use presskit::application::factory::{FactoryError, ListFilter, PostFactory, TermFactory};
use presskit::application::handlers::{
    HandlerError, MenuItemHandler, MenuItemHandlers, PostHandler, PostHandlers,
};
use presskit::application::meta::MetaService;
use presskit::application::query::{PostQuery, SortDirection, SortKey, Tables};
use presskit::cache::{CacheConfig, ManualClock, MemoryCacheStore, QueryCache};
use presskit::config::MetaKeys;
use presskit::domain::entities::{MenuItem, MetaOwner};
use presskit::domain::posts::Post;
use presskit::domain::types::Taxonomy;
use presskit::infra::memory::InMemoryRepositories;

struct Harness {
    repos: InMemoryRepositories,
    clock: Arc<ManualClock>,
    factory: PostFactory,
    terms: Arc<TermFactory>,
}

fn harness(handlers: PostHandlers, menu_handlers: MenuItemHandlers) -> Harness {
    let repos = InMemoryRepositories::new();
    let clock = Arc::new(ManualClock::default());
    let config = CacheConfig::default();
    let store = Arc::new(MemoryCacheStore::with_clock(&config, clock.clone()));
    let cache = Arc::new(QueryCache::with_clock(store, config, clock.clone()));

    let shared = Arc::new(repos.clone());
    let terms = Arc::new(
        TermFactory::new(cache.clone(), shared.clone(), Tables::default())
            .with_menu_handlers(menu_handlers),
    );
    let factory = PostFactory::new(
        cache,
        shared.clone(),
        MetaService::new(shared),
        terms.clone(),
        Tables::default(),
    )
    .with_handlers(handlers)
    .with_meta_keys(MetaKeys::default());

    Harness {
        repos,
        clock,
        factory,
        terms,
    }
}

fn latest_posts() -> PostQuery {
    PostQuery::new()
        .published()
        .post_type("post")
        .order_by(SortKey::PostDate, SortDirection::Desc)
}

struct Stamp;

impl PostHandler for Stamp {
    fn handle(&self, post: &mut Post) -> Result<(), HandlerError> {
        let title = format!("{} (stamped)", post.title());
        post.set_title(title);
        Ok(())
    }
}

struct Flaky {
    failing: AtomicBool,
}

impl PostHandler for Flaky {
    fn handle(&self, _post: &mut Post) -> Result<(), HandlerError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HandlerError::failed("flaky", "upstream unavailable"));
        }
        Ok(())
    }
}

struct Uppercase;

impl MenuItemHandler for Uppercase {
    fn handle(&self, item: &mut MenuItem) -> Result<(), HandlerError> {
        item.name = item.name.as_ref().map(|name| name.to_uppercase());
        Ok(())
    }
}

#[tokio::test]
async fn repeated_queries_are_served_from_cache_until_expiry() {
    let h = harness(PostHandlers::new(), MenuItemHandlers::new());
    h.repos.seed_published("post", "First", "first");

    let first = h.factory.query(&latest_posts()).await.expect("query");
    let second = h.factory.query(&latest_posts()).await.expect("query");
    assert_eq!(first.len(), 1);
    assert_eq!(first, second);
    assert_eq!(h.repos.post_reads(), 1);

    h.repos.seed_published("post", "Second", "second");
    h.clock.advance(Duration::from_secs(299));
    assert_eq!(h.factory.query(&latest_posts()).await.expect("query").len(), 1);

    h.clock.advance(Duration::from_secs(2));
    assert_eq!(h.factory.query(&latest_posts()).await.expect("query").len(), 2);
    assert_eq!(h.repos.post_reads(), 2);
}

#[tokio::test]
async fn handlers_run_once_and_the_processed_result_is_cached() {
    let handlers = PostHandlers::new().with("stamp", Arc::new(Stamp));
    let h = harness(handlers, MenuItemHandlers::new());
    h.repos.seed_published("post", "Hello", "hello");

    for _ in 0..2 {
        let posts = h.factory.query(&latest_posts()).await.expect("query");
        assert_eq!(posts[0].title(), "Hello (stamped)");
        assert_eq!(posts[0].handlers().to_vec(), vec!["stamp".to_string()]);
        posts[0].require_handler("stamp").expect("stamp ran");
    }
}

#[tokio::test]
async fn failing_handler_stores_nothing() {
    let flaky = Arc::new(Flaky {
        failing: AtomicBool::new(true),
    });
    let handlers = PostHandlers::new().with("flaky", flaky.clone());
    let h = harness(handlers, MenuItemHandlers::new());
    h.repos.seed_published("post", "Hello", "hello");

    let err = h
        .factory
        .query(&latest_posts())
        .await
        .expect_err("handler failure propagates");
    assert!(matches!(err, FactoryError::Handler(_)));

    flaky.failing.store(false, Ordering::SeqCst);
    let posts = h.factory.query(&latest_posts()).await.expect("query");
    assert_eq!(posts.len(), 1);
    assert_eq!(h.repos.post_reads(), 2);
}

#[tokio::test]
async fn disabled_cache_always_reaches_the_store() {
    let h = harness(PostHandlers::new(), MenuItemHandlers::new());
    h.repos.seed_published("post", "Hello", "hello");

    h.factory.disable_cache();
    assert!(!h.factory.is_caching());
    h.factory.query(&latest_posts()).await.expect("query");
    h.factory.query(&latest_posts()).await.expect("query");
    assert_eq!(h.repos.post_reads(), 2);

    h.factory.enable_cache();
    h.factory.query(&latest_posts()).await.expect("query");
    h.factory.query(&latest_posts()).await.expect("query");
    assert_eq!(h.repos.post_reads(), 3);
}

#[tokio::test]
async fn find_loads_meta_and_caches_missing_posts() {
    let h = harness(PostHandlers::new(), MenuItemHandlers::new());
    let id = h.repos.seed_published("post", "Hello", "hello");
    h.repos.seed_meta(MetaOwner::Post(id), "subtitle", "World");

    let post = h.factory.find(id).await.expect("find").expect("post exists");
    assert_eq!(post.get_attribute("subtitle"), Some("World".into()));

    assert!(h.factory.find(404).await.expect("find").is_none());
    assert!(h.factory.find(404).await.expect("find").is_none());
    assert_eq!(h.repos.post_reads(), 2);
}

#[tokio::test]
async fn count_is_cached_separately_from_rows() {
    let h = harness(PostHandlers::new(), MenuItemHandlers::new());
    h.repos.seed_published("post", "One", "one");
    h.repos.seed_published("post", "Two", "two");

    assert_eq!(h.factory.count(&latest_posts()).await.expect("count"), 2);
    assert_eq!(h.factory.count(&latest_posts()).await.expect("count"), 2);
    assert_eq!(h.factory.query(&latest_posts()).await.expect("query").len(), 2);
    assert_eq!(h.repos.post_reads(), 2);
}

#[tokio::test]
async fn curated_lists_follow_their_meta_keys() {
    let h = harness(PostHandlers::new(), MenuItemHandlers::new());
    let keys = MetaKeys::default();
    let low = h.repos.seed_published("post", "Low", "low");
    let high = h.repos.seed_published("post", "High", "high");
    let unranked = h.repos.seed_published("post", "Unranked", "unranked");
    h.repos.seed_meta(MetaOwner::Post(low), &keys.popular_rank, "5");
    h.repos.seed_meta(MetaOwner::Post(high), &keys.popular_rank, "40");
    h.repos.seed_meta(MetaOwner::Post(high), &keys.primary_category, "7");

    let popular = h
        .factory
        .popular(&ListFilter::new(["post"], 10))
        .await
        .expect("popular");
    let titles: Vec<&str> = popular.iter().map(Post::title).collect();
    assert_eq!(titles, vec!["High", "Low"]);

    let in_category = h
        .factory
        .popular(&ListFilter::new(["post"], 10).primary_category(7))
        .await
        .expect("popular in category");
    assert_eq!(in_category.len(), 1);
    assert_eq!(in_category[0].title(), "High");

    h.repos.seed_meta(MetaOwner::Post(unranked), &keys.featured, "1");
    h.repos.seed_meta(MetaOwner::Post(low), &keys.featured, "1");
    h.repos.seed_meta(MetaOwner::Post(low), &keys.featured_position, "2");
    h.repos.seed_meta(MetaOwner::Post(high), &keys.featured, "0");
    let featured = h
        .factory
        .featured(&ListFilter::new(["post"], 10).exclude(&[high]))
        .await
        .expect("featured");
    let titles: Vec<&str> = featured.iter().map(Post::title).collect();
    assert_eq!(titles, vec!["Unranked", "Low"]);
}

#[tokio::test]
async fn related_posts_share_the_first_tag() {
    let h = harness(PostHandlers::new(), MenuItemHandlers::new());
    let rust = h.repos.seed_term(Taxonomy::PostTag, "Rust", "rust");
    let go = h.repos.seed_term(Taxonomy::PostTag, "Go", "go");
    let source = h.repos.seed_published("post", "Source", "source");
    let sibling = h.repos.seed_published("post", "Sibling", "sibling");
    let other = h.repos.seed_published("post", "Other", "other");
    h.repos.relate(source, rust.term_taxonomy_id);
    h.repos.relate(source, go.term_taxonomy_id);
    h.repos.relate(sibling, rust.term_taxonomy_id);
    h.repos.relate(other, go.term_taxonomy_id);

    let post = h.factory.find(source).await.expect("find").expect("source");
    let related = h.factory.related(&post, 5).await.expect("related");
    let ids: Vec<Option<u64>> = related.iter().map(Post::id).collect();
    assert_eq!(ids, vec![Some(sibling)]);

    let lonely = h.factory.related(&Post::new("post"), 5).await.expect("related");
    assert!(lonely.is_empty());
}

#[tokio::test]
async fn menu_items_run_their_type_handler_and_use_the_menu_ttl() {
    let menu_handlers = MenuItemHandlers::new().with("page", Arc::new(Uppercase));
    let h = harness(PostHandlers::new(), menu_handlers);
    let menu = h.repos.seed_term(Taxonomy::NavMenu, "Main", "main");
    let about = h.repos.seed_published("page", "About", "about");
    let news = h.repos.seed_term(Taxonomy::Category, "News", "news");
    h.repos
        .seed_menu_item(&menu, "ignored", 2, "page", &about.to_string());
    h.repos
        .seed_menu_item(&menu, "ignored", 1, "category", &news.term_id.to_string());

    let items = h
        .terms
        .menu_items_by_slug("main", None, 10)
        .await
        .expect("menu items");
    let names: Vec<Option<&str>> = items.iter().map(|item| item.name.as_deref()).collect();
    assert_eq!(names, vec![Some("News"), Some("ABOUT")]);
    assert_eq!(items[1].handlers, vec!["page".to_string()]);
    assert!(items[0].handlers.is_empty());

    h.repos.seed_menu_item(&menu, "Late", 3, "custom", "0");
    h.clock.advance(Duration::from_secs(600));
    let cached = h
        .terms
        .menu_items_by_slug("main", None, 10)
        .await
        .expect("menu items");
    assert_eq!(cached.len(), 2);

    h.clock.advance(Duration::from_secs(301));
    let refreshed = h
        .terms
        .menu_items_by_slug("main", None, 10)
        .await
        .expect("menu items");
    assert_eq!(refreshed.len(), 3);

    let pages_only = h
        .terms
        .menu_items_by_slug("main", Some("page"), 10)
        .await
        .expect("menu items");
    assert_eq!(pages_only.len(), 1);
}

#[tokio::test]
async fn term_lookups_attach_the_term_row() {
    let h = harness(PostHandlers::new(), MenuItemHandlers::new());
    let news = h.repos.seed_term(Taxonomy::Category, "News", "news");
    h.repos.seed_term(Taxonomy::NavMenu, "News", "news");

    let by_slug = h
        .terms
        .category_by_slug("news")
        .await
        .expect("category")
        .expect("category exists");
    assert_eq!(by_slug.term_taxonomy_id, news.term_taxonomy_id);
    assert_eq!(by_slug.name(), Some("News"));

    let menu = h.terms.menu_by_slug("news").await.expect("menu").expect("menu exists");
    assert_eq!(menu.taxonomy, "nav_menu");
    assert!(h.terms.category_by_id(999).await.expect("category").is_none());
}
