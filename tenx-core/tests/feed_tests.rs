use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tenx_core::{
    ApiClient, ClientConfig, FilterChange, FilterSet, ListKey, Queries, ResourceCache,
    ResourceFeed,
};

fn summary(id: &str) -> serde_json::Value {
    json!({
        "id": id,
        "title": format!("Resource {id}"),
        "resourceType": "article",
        "categoryName": "web-development",
        "tags": ["react"],
        "upvoteCount": 1
    })
}

fn config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        api_base_url: server.uri(),
        ..ClientConfig::default()
    }
}

fn api(server: &MockServer) -> ApiClient {
    ApiClient::new(Client::new(), &config(server)).unwrap()
}

fn queries(server: &MockServer) -> Queries {
    Queries::new(api(server), ResourceCache::default())
}

fn page_url() -> Url {
    Url::parse("https://10xcoder.club/resources").unwrap()
}

async fn wait_for_key(feed: &ResourceFeed, expected: &ListKey) {
    let mut keys = feed.subscribe_key();
    tokio::time::timeout(Duration::from_secs(5), async {
        while keys.borrow_and_update().clone() != *expected {
            keys.changed().await.unwrap();
        }
    })
    .await
    .expect("feed never settled on the expected key");
}

async fn wait_for_partition(cache: &ResourceCache, key: &ListKey) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cache.contains(key).await {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("partition never loaded");
}

#[tokio::test]
async fn rapid_filter_changes_produce_one_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resources"))
        .and(query_param_is_missing("category"))
        .and(query_param_is_missing("tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [summary("r0")],
            "nextCursor": null
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/resources"))
        .and(query_param("category", "web-development"))
        .and(query_param("tags", "react,hooks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [summary("r1"), summary("r2")],
            "nextCursor": "c2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": [] })))
        .with_priority(10)
        .expect(0)
        .mount(&server)
        .await;

    let queries = queries(&server);
    let cache = queries.cache().clone();
    let feed = ResourceFeed::start(queries, page_url(), Duration::from_millis(150));
    wait_for_partition(&cache, &ListKey::feed(FilterSet::default())).await;

    feed.update(FilterChange::Category(Some("web-development".into()))).await;
    feed.update(FilterChange::ToggleTag("react".into())).await;
    feed.update(FilterChange::ToggleTag("vue".into())).await;
    feed.update(FilterChange::ToggleTag("hooks".into())).await;
    feed.update(FilterChange::ToggleTag("vue".into())).await;

    // Nothing reaches the URL before the quiet window passes.
    assert_eq!(feed.current_url().query(), None);
    assert_eq!(feed.pending().await.tags, vec!["react", "hooks"]);

    let expected = ListKey::feed(FilterSet {
        category: Some("web-development".into()),
        tags: vec!["react".into(), "hooks".into()],
        ..FilterSet::default()
    });
    wait_for_key(&feed, &expected).await;
    wait_for_partition(&cache, &expected).await;

    let url = feed.current_url();
    assert_eq!(
        FilterSet::from_url(&url),
        expected.filters,
        "url {url} should encode exactly the settled filters"
    );
    assert_eq!(feed.resources().await.len(), 2);
    assert!(feed.has_more().await);

    feed.shutdown().await.unwrap();
    server.verify().await;
}

#[tokio::test]
async fn removing_all_tags_drops_the_parameter() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": [] })))
        .mount(&server)
        .await;

    let start = Url::parse("https://10xcoder.club/resources?category=web-development&tags=react,hooks").unwrap();
    let feed = ResourceFeed::start(queries(&server), start, Duration::from_millis(50));

    feed.update(FilterChange::ClearTags).await;
    let expected = ListKey::feed(FilterSet {
        category: Some("web-development".into()),
        ..FilterSet::default()
    });
    wait_for_key(&feed, &expected).await;
    assert_eq!(feed.current_url().query(), Some("category=web-development"));

    feed.shutdown().await.unwrap();
}

#[tokio::test]
async fn pagination_follows_cursor_until_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resources"))
        .and(query_param_is_missing("cursor"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [summary("r1")],
            "nextCursor": "c2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/resources"))
        .and(query_param("cursor", "c2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [summary("r2")],
            "nextCursor": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let queries = queries(&server);
    let key = ListKey::feed(FilterSet::default());

    assert!(queries.load_first(&key).await.unwrap());
    assert!(queries.cache().has_more(&key).await);
    assert!(queries.load_more(&key).await.unwrap());
    assert!(!queries.cache().has_more(&key).await);
    assert!(!queries.load_more(&key).await.unwrap());

    let ids: Vec<_> = queries
        .cache()
        .resources(&key)
        .await
        .iter()
        .map(|r| r.id.clone())
        .collect();
    assert_eq!(ids, vec!["r1", "r2"]);

    // A fresh partition is served from cache without another request.
    assert!(!queries.load_first(&key).await.unwrap());
    server.verify().await;
}

#[tokio::test]
async fn bookmarks_and_taxonomy_use_their_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user/bookmarks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "bookmarks": [{ "id": "b1", "resource": summary("r7") }],
            "nextCursor": null
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "name": "react" },
            { "id": 2, "name": "hooks" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let queries = queries(&server);
    queries.load_first(&ListKey::bookmarks()).await.unwrap();
    let bookmarked = queries.cache().resources(&ListKey::bookmarks()).await;
    assert_eq!(bookmarked.len(), 1);
    assert!(bookmarked[0].is_bookmarked);

    assert_eq!(queries.tags().await.unwrap().len(), 2);
    assert_eq!(queries.tags().await.unwrap().len(), 2);
    server.verify().await;
}

#[tokio::test]
async fn search_uses_its_endpoint_and_skips_blank_queries() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("query", "hooks"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resources": [summary("r4")],
            "nextCursor": null
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": [] })))
        .with_priority(10)
        .expect(0)
        .mount(&server)
        .await;

    let queries = queries(&server);
    assert!(!queries.load_first(&ListKey::search("   ")).await.unwrap());
    assert!(!queries.load_first(&ListKey::search("")).await.unwrap());

    let key = ListKey::search(" hooks ");
    assert!(queries.load_first(&key).await.unwrap());
    let found = queries.cache().resources(&key).await;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, "r4");
    assert!(!queries.cache().contains(&ListKey::feed(FilterSet::default())).await);
    server.verify().await;
}

#[tokio::test]
async fn feed_settles_after_configured_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/resources"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "resources": [] })))
        .mount(&server)
        .await;

    let mut config = config(&server);
    config.feed.debounce_ms = 40;
    let feed = ResourceFeed::from_config(queries(&server), page_url(), &config);

    feed.update(FilterChange::Query(Some("rust".into()))).await;
    let expected = ListKey::feed(FilterSet {
        query: Some("rust".into()),
        ..FilterSet::default()
    });
    let mut keys = feed.subscribe_key();
    tokio::time::timeout(Duration::from_millis(400), async {
        while keys.borrow_and_update().clone() != expected {
            keys.changed().await.unwrap();
        }
    })
    .await
    .expect("a 40ms window should settle well before the 500ms default");

    feed.shutdown().await.unwrap();
}

#[tokio::test]
async fn credentials_are_sent_with_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/categories"))
        .and(header("authorization", "Bearer t0ken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "name": "web-development" }
        ])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/tags"))
        .and(header("cookie", "session=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "id": 1, "name": "react" }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let categories = api(&server).with_bearer("t0ken").unwrap().categories().await.unwrap();
    assert_eq!(categories[0].name, "web-development");

    let tags = api(&server).with_cookie("session=abc123").unwrap().tags().await.unwrap();
    assert_eq!(tags[0].name, "react");

    let anonymous = api(&server).categories().await;
    assert!(anonymous.is_err());
    server.verify().await;
}
