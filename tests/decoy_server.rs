//! End-to-end tests against a server bound to a real socket.

mod common;

use std::time::Duration;

use common::{config_from, spawn_app};
use web_deadend::config::DeadendConfig;
use web_deadend::http::X_REQUEST_ID;

const DECOYS: &str = r#"
[[routes]]
name = "wp-login"
pattern = "/wp-login.php"
methods = ["GET", "POST"]
media_type = "text/html"
headers = { "X-Powered-By" = "PHP/5.4.16" }
body = "<html>login for {{ body.log | default('guest') }}</html>"

[[routes]]
name = "user"
pattern = "/api/users/{id}"
status = 201
media_type = "application/json"
body = '{"id": "{{ matched.id }}", "q": "{{ query.q }}"}'

[[routes]]
name = "shell"
pattern = 'r/\/cgi-bin\/(?P<script>[a-z]+)\.sh'
body = "ran {{ matched.script | upper }}"
"#;

#[tokio::test]
async fn configured_routes_answer_over_tcp() {
    let app = spawn_app(config_from(DECOYS)).await;
    let client = reqwest::Client::new();

    let res = client.get(app.url("/api/users/42?q=admin")).send().await.unwrap();
    assert_eq!(res.status(), 201);
    assert_eq!(res.headers()["content-type"], "application/json");
    assert!(res.headers().contains_key(X_REQUEST_ID));
    assert_eq!(res.text().await.unwrap(), r#"{"id": "42", "q": "admin"}"#);

    let res = client
        .post(app.url("/wp-login.php"))
        .form(&[("log", "root"), ("pwd", "hunter2")])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(res.headers()["x-powered-by"], "PHP/5.4.16");
    assert_eq!(res.text().await.unwrap(), "<html>login for root</html>");

    let res = client.get(app.url("/cgi-bin/test.sh")).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "ran TEST");

    app.stop().await;
}

#[tokio::test]
async fn method_filter_falls_through_to_fallback() {
    let app = spawn_app(config_from(DECOYS)).await;
    let client = reqwest::Client::new();

    let res = client.delete(app.url("/wp-login.php")).send().await.unwrap();
    assert_eq!(res.status(), 204);
    assert!(res.headers().contains_key(X_REQUEST_ID));

    let res = client.get(app.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 204);

    assert_eq!(app.stats.total(), 2);
    app.stop().await;
}

#[tokio::test]
async fn request_ids_are_unique() {
    let app = spawn_app(DeadendConfig::default()).await;
    let client = reqwest::Client::new();

    let mut ids = Vec::new();
    for _ in 0..5 {
        let res = client.get(app.url("/.env")).send().await.unwrap();
        ids.push(res.headers()[X_REQUEST_ID].to_str().unwrap().to_string());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);

    app.stop().await;
}

#[tokio::test]
async fn status_endpoint_is_not_counted_for_local_checks() {
    let app = spawn_app(DeadendConfig::default()).await;

    let res = reqwest::get(app.url("/deadend-status")).await.unwrap();
    assert_eq!(res.status(), 200);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["service"], "ok");

    assert_eq!(app.stats.total(), 0);
    app.stop().await;
}

#[tokio::test]
async fn status_endpoint_hides_from_disallowed_clients() {
    let app = spawn_app(config_from(
        r#"
        [status]
        allowed = ["10.0.0.0/8"]
        "#,
    ))
    .await;

    let res = reqwest::get(app.url("/deadend-status")).await.unwrap();
    assert_eq!(res.status(), 204);
    assert!(res.text().await.unwrap().is_empty());

    app.stop().await;
}

#[tokio::test]
async fn oversized_body_is_rejected_and_counted() {
    let app = spawn_app(config_from(
        r#"
        [limits]
        max_body_bytes = 1024
        "#,
    ))
    .await;

    let res = reqwest::Client::new()
        .post(app.url("/upload"))
        .body(vec![b'A'; 4096])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 413);
    assert_eq!(app.stats.total(), 1);

    app.stop().await;
}

#[tokio::test]
async fn overlong_url_gets_414() {
    let app = spawn_app(config_from(
        r#"
        [limits]
        max_url_length = 64
        "#,
    ))
    .await;

    let path = format!("/{}", "a".repeat(200));
    let res = reqwest::get(app.url(&path)).await.unwrap();
    assert_eq!(res.status(), 414);

    app.stop().await;
}

#[tokio::test]
async fn concurrent_requests_beyond_slot_limit_all_complete() {
    let app = spawn_app(config_from(
        r#"
        [listener]
        max_connections = 4

        [[routes]]
        pattern = "/ping/{n}"
        body = "pong {{ matched.n }}"
        "#,
    ))
    .await;
    let client = reqwest::Client::new();

    let mut tasks = Vec::new();
    for n in 0..40 {
        let client = client.clone();
        let url = app.url(&format!("/ping/{n}"));
        tasks.push(tokio::spawn(async move {
            client.get(url).send().await.unwrap().text().await.unwrap()
        }));
    }
    for (n, task) in tasks.into_iter().enumerate() {
        assert_eq!(task.await.unwrap(), format!("pong {n}"));
    }

    assert_eq!(app.stats.total(), 40);
    assert_eq!(app.stats.snapshot().unique_ips, 1);
    app.stop().await;
}

#[tokio::test]
async fn shutdown_stops_accepting() {
    let app = spawn_app(DeadendConfig::default()).await;
    let url = app.url("/");
    app.stop().await;

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    assert!(client.get(url).send().await.is_err());
}
