use std::sync::Arc;

use presskit::application::factory::{PostFactory, TermFactory};
use presskit::application::meta::{MetaService, OptionsService};
use presskit::application::query::{PostQuery, Tables};
use presskit::application::repos::RepoError;
use presskit::cache::{CacheConfig, InvalidationPolicy, QueryCache};
use presskit::domain::entities::MetaOwner;
use presskit::domain::meta_value::{ArrayKey, MetaValue};
use presskit::domain::types::Taxonomy;
use presskit::infra::memory::InMemoryRepositories;

fn meta_service() -> (InMemoryRepositories, MetaService) {
    let repos = InMemoryRepositories::new();
    let service = MetaService::new(Arc::new(repos.clone()));
    (repos, service)
}

#[tokio::test]
async fn stored_values_decode_and_malformed_ones_stay_strings() {
    let (repos, meta) = meta_service();
    let id = repos.seed_published("post", "Hello", "hello");
    let owner = MetaOwner::Post(id);
    repos.seed_meta(owner, "sizes", r#"a:2:{s:5:"small";i:150;s:5:"large";i:1024;}"#);
    repos.seed_meta(owner, "broken", r#"a:2:{s:5:"small";i:150;"#);
    repos.seed_meta(owner, "flag", "b:1;");

    assert_eq!(
        meta.get(owner, "sizes").await.expect("get"),
        Some(MetaValue::Array(vec![
            (ArrayKey::Str("small".to_string()), MetaValue::Int(150)),
            (ArrayKey::Str("large".to_string()), MetaValue::Int(1024)),
        ]))
    );
    assert_eq!(
        meta.get(owner, "broken").await.expect("get"),
        Some(MetaValue::from(r#"a:2:{s:5:"small";i:150;"#))
    );
    assert_eq!(meta.get(owner, "flag").await.expect("get"), Some(MetaValue::Bool(true)));
    assert_eq!(meta.get(owner, "missing").await.expect("get"), None);
}

#[tokio::test]
async fn add_appends_while_set_replaces_the_first_value() {
    let (repos, meta) = meta_service();
    let owner = MetaOwner::Post(repos.seed_published("post", "Hello", "hello"));

    meta.add(owner, "tag", &"one".into()).await.expect("add");
    meta.add(owner, "tag", &"two".into()).await.expect("add");
    assert_eq!(
        meta.get_all(owner, "tag").await.expect("get_all"),
        vec![MetaValue::from("one"), MetaValue::from("two")]
    );

    let record = meta.set(owner, "tag", &"uno".into()).await.expect("set");
    assert_eq!(record.meta_value.as_deref(), Some("uno"));
    assert_eq!(
        meta.get_all(owner, "tag").await.expect("get_all"),
        vec![MetaValue::from("uno"), MetaValue::from("two")]
    );

    assert_eq!(meta.delete(owner, "tag").await.expect("delete"), 2);
    assert!(meta.get_all(owner, "tag").await.expect("get_all").is_empty());
    assert_eq!(meta.delete(owner, "tag").await.expect("delete"), 0);
}

#[tokio::test]
async fn terms_and_users_own_meta_too() {
    let (repos, meta) = meta_service();
    let news = repos.seed_term(Taxonomy::Category, "News", "news");
    let term = MetaOwner::Term(news.term_id);
    let user = MetaOwner::User(repos.seed_user());

    meta.set(term, "color", &"teal".into()).await.expect("term meta");
    meta.set(user, "nickname", &"ada".into()).await.expect("user meta");
    assert_eq!(meta.get(term, "color").await.expect("get"), Some("teal".into()));
    assert_eq!(meta.get(user, "nickname").await.expect("get"), Some("ada".into()));
    assert_eq!(meta.get(user, "color").await.expect("get"), None);

    let err = meta
        .set(MetaOwner::User(999), "nickname", &"ghost".into())
        .await
        .expect_err("unknown user");
    assert!(matches!(err, RepoError::OwnerNotPersisted { .. }));
}

#[tokio::test]
async fn options_decode_like_meta() {
    let repos = InMemoryRepositories::new();
    repos.seed_option("blogname", "Presskit", "yes");
    repos.seed_option("sticky_posts", "a:2:{i:0;i:4;i:1;i:9;}", "yes");
    let options = OptionsService::new(Arc::new(repos));

    assert_eq!(
        options.get("blogname").await.expect("option"),
        Some("Presskit".into())
    );
    assert_eq!(
        options.get("sticky_posts").await.expect("option"),
        Some(MetaValue::list([MetaValue::Int(4), MetaValue::Int(9)]))
    );
    assert_eq!(options.get("missing").await.expect("option"), None);
}

#[tokio::test]
async fn writes_drop_cached_queries_when_invalidating_on_write() {
    for (policy, expected_reads) in [
        (InvalidationPolicy::TtlOnly, 1),
        (InvalidationPolicy::OnWrite, 2),
    ] {
        let repos = InMemoryRepositories::new();
        let id = repos.seed_published("post", "Hello", "hello");
        let cache = Arc::new(QueryCache::in_memory(CacheConfig {
            invalidation: policy,
            ..CacheConfig::default()
        }));
        let shared = Arc::new(repos.clone());
        let meta = MetaService::new(shared.clone()).with_cache(cache.clone());
        let terms = Arc::new(TermFactory::new(
            cache.clone(),
            shared.clone(),
            Tables::default(),
        ));
        let factory = PostFactory::new(cache, shared, meta.clone(), terms, Tables::default());
        let query = PostQuery::new().published().post_type("post");

        let before = factory.query(&query).await.expect("query");
        assert_eq!(before[0].meta("subtitle"), None);

        meta.set(MetaOwner::Post(id), "subtitle", &"fresh".into())
            .await
            .expect("set");
        let after = factory.query(&query).await.expect("query");
        assert_eq!(repos.post_reads(), expected_reads, "{}", policy.as_str());
        if policy == InvalidationPolicy::OnWrite {
            assert_eq!(after[0].meta("subtitle"), Some("fresh".into()));
        }
    }
}
