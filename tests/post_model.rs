use std::sync::Arc;

use time::{Duration, UtcOffset};

use presskit::application::meta::MetaService;
use presskit::application::posts::PostService;
use presskit::application::repos::RepoError;
use presskit::domain::entities::MetaOwner;
use presskit::domain::error::DomainError;
use presskit::domain::meta_value::MetaValue;
use presskit::domain::posts::Post;
use presskit::infra::memory::InMemoryRepositories;

fn service() -> (InMemoryRepositories, PostService) {
    let repos = InMemoryRepositories::new();
    let shared = Arc::new(repos.clone());
    let service = PostService::new(shared.clone(), MetaService::new(shared));
    (repos, service)
}

#[tokio::test]
async fn saving_a_new_post_writes_buffered_meta() {
    let (_repos, service) = service();
    let mut post = Post::new("post");
    post.set_title("Draft");
    let gallery = MetaValue::list([MetaValue::from("a.jpg"), MetaValue::from("b.jpg")]);
    post.set_attribute("gallery", gallery.clone())
        .expect("meta attribute");
    post.set_attribute("subtitle", "Hello".into())
        .expect("meta attribute");

    assert!(post.get_attribute("gallery").is_none());
    assert_eq!(post.pending_meta().len(), 2);

    service.save(&mut post).await.expect("save");

    let id = post.id().expect("id assigned on insert");
    assert!(post.exists());
    assert!(post.pending_meta().is_empty());
    assert_eq!(post.get_attribute("gallery"), Some(gallery.clone()));
    assert_eq!(post.get_attribute("subtitle"), Some("Hello".into()));

    let records = service
        .meta()
        .records(MetaOwner::Post(id))
        .await
        .expect("records");
    let stored = records
        .iter()
        .find(|record| record.meta_key == "gallery")
        .and_then(|record| record.meta_value.clone());
    assert_eq!(
        stored.as_deref(),
        Some(r#"a:2:{i:0;s:5:"a.jpg";i:1;s:5:"b.jpg";}"#)
    );

    let reloaded = service.find(id).await.expect("find").expect("post");
    assert_eq!(reloaded.title(), "Draft");
    assert_eq!(reloaded.get_attribute("gallery"), Some(gallery));
}

#[tokio::test]
async fn saving_an_existing_post_updates_dirty_columns_and_replaces_meta() {
    let (repos, service) = service();
    let id = repos.seed_published("post", "Before", "before");
    repos.seed_meta(MetaOwner::Post(id), "subtitle", "old");

    let mut post = service.find(id).await.expect("find").expect("post");
    post.set_attribute("postTitle", "After".into())
        .expect("column attribute");
    post.set_attribute("subtitle", "new".into())
        .expect("meta attribute");
    assert!(post.is_dirty());
    service.save(&mut post).await.expect("save");
    assert!(!post.is_dirty());

    let reloaded = service.find(id).await.expect("find").expect("post");
    assert_eq!(reloaded.title(), "After");
    assert_eq!(reloaded.get_attribute("post_title"), Some("After".into()));
    assert_eq!(reloaded.get_attribute("subtitle"), Some("new".into()));
    let subtitles = service
        .meta()
        .get_all(MetaOwner::Post(id), "subtitle")
        .await
        .expect("get_all");
    assert_eq!(subtitles, vec![MetaValue::from("new")]);
}

#[tokio::test]
async fn service_attribute_sees_meta_written_after_load() {
    let (repos, service) = service();
    let id = repos.seed_published("post", "Hello", "hello");
    let post = service.find(id).await.expect("find").expect("post");

    service
        .meta()
        .set(MetaOwner::Post(id), "view_count", &MetaValue::Int(12))
        .await
        .expect("set");

    assert!(post.get_attribute("viewCount").is_none());
    assert_eq!(
        service.attribute(&post, "viewCount").await.expect("attribute"),
        Some("12".into())
    );
    assert_eq!(
        service.attribute(&post, "postName").await.expect("attribute"),
        Some("hello".into())
    );
    assert!(
        service
            .attribute(&Post::new("post"), "view_count")
            .await
            .expect("attribute")
            .is_none()
    );
}

#[tokio::test]
async fn meta_cannot_be_written_for_an_unsaved_owner() {
    let (_repos, service) = service();
    let err = service
        .meta()
        .set(MetaOwner::Post(77), "subtitle", &"x".into())
        .await
        .expect_err("missing owner");
    assert!(matches!(
        err,
        RepoError::OwnerNotPersisted {
            owner: MetaOwner::Post(77)
        }
    ));
}

#[tokio::test]
async fn updating_a_post_missing_from_the_store_is_not_found() {
    let (seeded, seeded_service) = service();
    let id = seeded.seed_published("post", "Elsewhere", "elsewhere");
    let mut post = seeded_service.find(id).await.expect("find").expect("post");
    post.set_title("Moved");

    let (_empty, empty_service) = service();
    let err = empty_service.save(&mut post).await.expect_err("row missing");
    assert!(matches!(err, RepoError::NotFound));
    assert!(post.is_dirty());
}

#[test]
fn the_primary_key_cannot_be_assigned() {
    let mut post = Post::new("post");
    for name in ["ID", "id"] {
        let err = post
            .set_attribute(name, MetaValue::Int(5))
            .expect_err("ID is read-only");
        assert!(matches!(err, DomainError::Validation { .. }));
    }
    assert!(post.id().is_none());
}

#[test]
fn handler_requirements_are_checked() {
    let mut post = Post::new("post");
    assert!(matches!(
        post.require_handler("shortcodes"),
        Err(DomainError::HandlerNotRun { .. })
    ));
    post.record_handler("shortcodes");
    post.require_handler("shortcodes").expect("handler recorded");
}

#[tokio::test]
async fn local_dates_follow_the_site_offset() {
    let (_repos, service) = service();
    let service = service.with_utc_offset(UtcOffset::from_hms(2, 0, 0).expect("offset"));

    let mut post = Post::new("post");
    post.set_title("Dated");
    service.save(&mut post).await.expect("save");
    let stored = service
        .find(post.id().expect("id"))
        .await
        .expect("find")
        .expect("stored post");
    let record = stored.record();
    assert_eq!(
        Some(record.post_modified - Duration::hours(2)),
        record.post_modified_gmt
    );
    assert_eq!(Some(record.post_date - Duration::hours(2)), record.post_date_gmt);

    let mut scheduled = Post::new("post");
    scheduled
        .set_attribute("post_date", "2024-06-01 09:00:00".into())
        .expect("date column");
    service.save(&mut scheduled).await.expect("save");
    let stored = service
        .find(scheduled.id().expect("id"))
        .await
        .expect("find")
        .expect("stored post");
    assert_eq!(
        stored.get_attribute("post_date_gmt"),
        Some("2024-06-01 07:00:00".into())
    );
}
