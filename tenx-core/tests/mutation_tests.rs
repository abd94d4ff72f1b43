use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tenx_core::models::NewResource;
use tenx_core::{
    ApiClient, ClientConfig, ClientError, FilterSet, ListKey, Mutations, NoticeLevel, Queries,
    ResourceCache, ResourceKind, ResourcePage, ResourceSummary,
};

fn resource(id: &str) -> ResourceSummary {
    ResourceSummary {
        id: id.into(),
        title: format!("Resource {id}"),
        description: Some("Hooks explained from first principles".into()),
        url: format!("https://example.com/{id}"),
        image: None,
        resource_type: ResourceKind::Video,
        category_name: "web-development".into(),
        tags: vec!["react".into(), "hooks".into()],
        is_published: true,
        upvote_count: 4,
        has_upvoted: false,
        is_bookmarked: false,
        bookmark_count: 3,
        user_id: Some("u1".into()),
        created_at: None,
        updated_at: None,
    }
}

fn page(ids: &[&str], cursor: Option<&str>) -> ResourcePage {
    ResourcePage {
        resources: ids.iter().map(|id| resource(id)).collect(),
        next_cursor: cursor.map(ToOwned::to_owned),
    }
}

fn keys() -> [ListKey; 3] {
    [
        ListKey::feed(FilterSet::default()),
        ListKey::feed(FilterSet {
            category: Some("web-development".into()),
            tags: vec!["react".into(), "hooks".into()],
            ..FilterSet::default()
        }),
        ListKey::bookmarks(),
    ]
}

fn api(server: &MockServer) -> ApiClient {
    let config = ClientConfig {
        api_base_url: server.uri(),
        ..ClientConfig::default()
    };
    ApiClient::new(Client::new(), &config).unwrap()
}

async fn setup(server: &MockServer) -> (Mutations, ResourceCache) {
    let api = api(server);
    let cache = ResourceCache::default();

    let [all, tagged, bookmarks] = keys();
    cache.insert_first_page(all.clone(), page(&["r1", "r2"], Some("c1"))).await;
    cache.append_page(all, page(&["r3", "r1"], None)).await;
    cache.insert_first_page(tagged, page(&["r2", "r1"], None)).await;
    cache.insert_first_page(bookmarks, page(&["r3"], None)).await;
    cache.put_resource(resource("r1")).await;
    cache.put_resource(resource("r2")).await;

    (Mutations::new(api, cache.clone()), cache)
}

async fn occurrences(cache: &ResourceCache, id: &str) -> Vec<Arc<ResourceSummary>> {
    let mut found = Vec::new();
    for key in keys() {
        found.extend(cache.resources(&key).await.into_iter().filter(|r| r.id == id));
    }
    found.extend(cache.resource(id).await);
    found
}

#[tokio::test]
async fn upvote_overwrites_every_cached_copy() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/resource/upvote/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceId": "r1",
            "action": "added",
            "count": 10
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (mutations, cache) = setup(&server).await;
    let before = cache.snapshot().await;

    let response = mutations.toggle_upvote("r1").await.unwrap();
    assert_eq!(response.count, 10);

    let copies = occurrences(&cache, "r1").await;
    assert_eq!(copies.len(), 4);
    for copy in copies {
        assert_eq!(copy.upvote_count, 10);
        assert!(copy.has_upvoted);
    }

    let after = cache.snapshot().await;
    for (key, partition) in &before.lists {
        for (old, new) in partition.resources().zip(after.lists[key].resources()) {
            if old.id != "r1" {
                assert!(Arc::ptr_eq(old, new), "{} in {:?} was replaced", old.id, key);
            }
        }
    }
    assert!(Arc::ptr_eq(&before.resources["r2"], &after.resources["r2"]));
}

#[tokio::test]
async fn failed_upvote_leaves_cache_alone() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/resource/upvote/r1"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let (mutations, cache) = setup(&server).await;
    let mut notices = mutations.subscribe_notices();
    let before = cache.resource("r1").await.unwrap();

    let err = mutations.toggle_upvote("r1").await.unwrap_err();
    assert!(matches!(err, ClientError::Status { .. }));
    assert!(Arc::ptr_eq(&before, &cache.resource("r1").await.unwrap()));

    let notice = notices.try_recv().unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
}

#[tokio::test]
async fn unverified_user_gets_specific_message() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/resource/upvote/r1"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({ "message": "EMAIL_NOT_VERIFIED" })))
        .mount(&server)
        .await;

    let (mutations, _cache) = setup(&server).await;
    let mut notices = mutations.subscribe_notices();
    assert!(mutations.toggle_upvote("r1").await.is_err());
    assert_eq!(
        notices.try_recv().unwrap().message,
        "Please verify your email address"
    );
}

#[tokio::test]
async fn bookmark_is_optimistic_and_rolls_back_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/resource/r1/bookmark"))
        .respond_with(ResponseTemplate::new(500).set_delay(Duration::from_millis(400)))
        .expect(1)
        .mount(&server)
        .await;

    let (mutations, cache) = setup(&server).await;
    let pending = {
        let mutations = mutations.clone();
        tokio::spawn(async move { mutations.toggle_bookmark("r1").await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    let copies = occurrences(&cache, "r1").await;
    assert!(!copies.is_empty());
    for copy in &copies {
        assert!(copy.is_bookmarked);
        assert_eq!(copy.bookmark_count, 4);
    }

    let result = pending.await.unwrap();
    assert!(result.is_err());
    for copy in occurrences(&cache, "r1").await {
        assert!(!copy.is_bookmarked);
        assert_eq!(copy.bookmark_count, 3);
    }
}

#[tokio::test]
async fn bookmark_adopts_server_state_when_present() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/resource/r1/bookmark"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceId": "r1",
            "action": "added",
            "count": 42
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/resource/r2/bookmark"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let (mutations, cache) = setup(&server).await;

    mutations.toggle_bookmark("r1").await.unwrap();
    let r1 = cache.resource("r1").await.unwrap();
    assert!(r1.is_bookmarked);
    assert_eq!(r1.bookmark_count, 42);

    mutations.toggle_bookmark("r2").await.unwrap();
    let r2 = cache.resource("r2").await.unwrap();
    assert!(r2.is_bookmarked);
    assert_eq!(r2.bookmark_count, 4);
}

#[tokio::test]
async fn bookmark_supersedes_resource_fetch_in_flight() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resources/r3"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({
                    "id": "r3",
                    "title": "Resource r3",
                    "resourceType": "video",
                    "isBookmarked": false,
                    "bookmarkCount": 3
                }))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/resource/r3/bookmark"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceId": "r3",
            "action": "added",
            "count": 4
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (mutations, cache) = setup(&server).await;
    let queries = Queries::new(api(&server), cache.clone());
    let fetch = {
        let queries = queries.clone();
        tokio::spawn(async move { queries.resource("r3").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    mutations.toggle_bookmark("r3").await.unwrap();
    let late = fetch.await.unwrap();
    assert!(matches!(late, Err(ClientError::Cancelled)));
    assert!(cache.resource("r3").await.is_none());

    let copies = occurrences(&cache, "r3").await;
    assert_eq!(copies.len(), 2);
    for copy in copies {
        assert!(copy.is_bookmarked);
        assert_eq!(copy.bookmark_count, 4);
    }
    server.verify().await;
}

fn submission() -> NewResource {
    NewResource {
        title: "React hooks in depth".into(),
        description: "Everything about useEffect, useMemo and custom hooks.".into(),
        url: "https://example.com/hooks".into(),
        resource_type: ResourceKind::Article,
        category_name: "web-development".into(),
        tags: "react,hooks".into(),
        image_url: None,
        image: None,
    }
}

#[tokio::test]
async fn invalid_submission_never_reaches_the_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/resources"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&server)
        .await;

    let (mutations, _cache) = setup(&server).await;
    let mut bad = submission();
    bad.description = "too short".into();
    let err = mutations.submit_resource(&bad).await.unwrap_err();
    match err {
        ClientError::Validation(errors) => assert_eq!(errors[0].field, "description"),
        other => panic!("unexpected error {other:?}"),
    }
    server.verify().await;
}

#[tokio::test]
async fn submission_invalidates_user_listing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/resources"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": "r9",
            "title": "React hooks in depth",
            "resourceType": "article",
            "isPublished": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (mutations, cache) = setup(&server).await;
    cache
        .insert_first_page(ListKey::submissions(), page(&["r1"], None))
        .await;
    let mut notices = mutations.subscribe_notices();

    let created = mutations.submit_resource(&submission()).await.unwrap();
    assert_eq!(created.id, "r9");
    assert!(!created.is_published);
    assert!(!cache.contains(&ListKey::submissions()).await);
    assert!(cache.contains(&ListKey::bookmarks()).await);
    assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Success);
}

#[tokio::test]
async fn update_replaces_cached_resource() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/resource/r1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "r1",
            "title": "React hooks in depth",
            "resourceType": "article",
            "upvoteCount": 4
        })))
        .expect(1)
        .mount(&server)
        .await;

    let (mutations, cache) = setup(&server).await;
    cache
        .insert_first_page(ListKey::submissions(), page(&["r1"], None))
        .await;
    let mut notices = mutations.subscribe_notices();

    let updated = mutations.update_resource("r1", &submission()).await.unwrap();
    assert_eq!(updated.title, "React hooks in depth");
    assert_eq!(
        cache.resource("r1").await.unwrap().title,
        "React hooks in depth"
    );
    assert!(!cache.contains(&ListKey::submissions()).await);
    assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Success);
    server.verify().await;
}

#[tokio::test]
async fn rejected_update_reports_server_message() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/resource/r1"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({ "error": "unauthorized" })))
        .mount(&server)
        .await;

    let (mutations, cache) = setup(&server).await;
    let before = cache.resource("r1").await.unwrap();
    let mut notices = mutations.subscribe_notices();

    let err = mutations.update_resource("r1", &submission()).await.unwrap_err();
    assert_eq!(err.status(), Some(reqwest::StatusCode::UNAUTHORIZED));
    assert!(Arc::ptr_eq(&before, &cache.resource("r1").await.unwrap()));
    assert_eq!(notices.try_recv().unwrap().level, NoticeLevel::Error);
}
