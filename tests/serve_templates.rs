//! End-to-end request handling over HTTP.

use axum::http::StatusCode;
use serde_json::Value;
use template_server::config::{DatabaseConfig, OutputMode};

mod common;

use common::{client, start_server, template_dir, test_config, ADMIN_KEY};

const SITE: &[(&str, &str)] = &[
    ("index.html", "{% include \"header\" %}home"),
    ("about.html", "about {{ meta.owner }}"),
    ("_partials.html", "{% define \"header\" %}<h1>{{ meta.owner }}</h1>{% enddefine %}"),
    (
        "_contact.html",
        "{% define \"GET /contact/:id\" %}contact {{ params.id }}{% enddefine %}\n\
         {% define \"POST /contact/:id\" %}saved {{ params.id }}: {{ req.form.msg }}{% enddefine %}",
    ),
    ("secret.html", "{{ httpError(403) }}"),
    ("fail.html", "{{ humanize('bogus', 'x') }}"),
    (
        "post.html",
        "{% set doc = splitFrontMatter(req.query.src) %}<title>{{ doc.meta.title }}</title>{{ markdown(doc.body) }}",
    ),
];

fn site_config(root: &std::path::Path) -> template_server::ServerConfig {
    let mut config = test_config(root);
    config.context.insert("owner".to_string(), toml::Value::String("ada".to_string()));
    config
}

#[tokio::test]
async fn test_implicit_and_explicit_routes() {
    let dir = template_dir(&SITE[..4]);
    let (running, base) = start_server(site_config(dir.path())).await;
    let client = client();

    let res = client.get(format!("{}/", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/html; charset=utf-8");
    assert!(res.headers().contains_key("x-request-id"));
    assert_eq!(res.text().await.unwrap(), "<h1>ada</h1>home");

    let res = client.get(format!("{}/about", base)).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "about ada");

    let res = client.get(format!("{}/contact/42", base)).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "contact 42");

    let res = client
        .post(format!("{}/contact/7", base))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("msg=hello+there")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "saved 7: hello there");

    let res = client.head(format!("{}/about", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    running.shutdown();
    running.wait().await.unwrap();
}

#[tokio::test]
async fn test_routing_and_render_statuses() {
    let dir = template_dir(&[SITE[3], SITE[4], SITE[5]]);
    let (running, base) = start_server(site_config(dir.path())).await;
    let client = client();

    let res = client.get(format!("{}/nowhere", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.get(format!("{}/contact/", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.delete(format!("{}/contact/1", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    let allow = res.headers()["allow"].to_str().unwrap().to_string();
    assert!(allow.contains("GET") && allow.contains("POST") && allow.contains("HEAD"));

    let res = client.get(format!("{}/secret", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert_eq!(res.text().await.unwrap(), "");

    let res = client.get(format!("{}/fail", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(res.text().await.unwrap(), "");

    running.shutdown();
}

#[tokio::test]
async fn test_body_limit() {
    let dir = template_dir(&[SITE[3]]);
    let mut config = site_config(dir.path());
    config.listener.max_body_bytes = 16;
    let (running, base) = start_server(config).await;

    let res = client()
        .post(format!("{}/contact/1", base))
        .body("x".repeat(1024))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PAYLOAD_TOO_LARGE);

    running.shutdown();
}

#[tokio::test]
async fn test_content_helpers() {
    let dir = template_dir(&[SITE[6]]);
    let (running, base) = start_server(site_config(dir.path())).await;

    let src = "---\ntitle: Hello\n---\n# Intro\n\nSee https://example.com\n";
    let res = client()
        .get(format!("{}/post", base))
        .query(&[("src", src)])
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let text = res.text().await.unwrap();
    assert!(text.starts_with("<title>Hello</title>"));
    assert!(text.contains("<h1 id=\"intro\">Intro</h1>"));
    assert!(text.contains("<a href=\"https://example.com\">https://example.com</a>"));

    running.shutdown();
}

#[tokio::test]
async fn test_database_queries() {
    let dir = template_dir(&[
        (
            "_setup.html",
            "{% define \"POST /notes\" %}{{ db.exec('INSERT INTO notes (body) VALUES (?)', req.form.body) }}{% enddefine %}\n\
             {% define \"GET /notes/:id\" %}{{ db.query_row('SELECT body FROM notes WHERE id = ?', params.id).body }}{% enddefine %}",
        ),
        (
            "notes.html",
            "{% for n in db.query('SELECT id, body FROM notes ORDER BY id') %}{{ n.id }}:{{ n.body }};{% endfor %}",
        ),
    ]);
    let db_dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite:{}", db_dir.path().join("notes.db").display());
    {
        let conn = rusqlite::Connection::open(db_dir.path().join("notes.db")).unwrap();
        conn.execute("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT)", []).unwrap();
    }

    let mut config = site_config(dir.path());
    config.database = Some(DatabaseConfig {
        url,
        ..Default::default()
    });
    let (running, base) = start_server(config).await;
    let client = client();

    for body in ["first", "<second>"] {
        let res = client
            .post(format!("{}/notes", base))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(format!("body={}", body))
            .send()
            .await
            .unwrap();
        assert_eq!(res.text().await.unwrap(), "1");
    }

    let res = client.get(format!("{}/notes", base)).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "1:first;2:&lt;second&gt;;");

    let res = client.get(format!("{}/notes/2", base)).send().await.unwrap();
    assert_eq!(res.text().await.unwrap(), "&lt;second&gt;");

    let res = client.get(format!("{}/notes/99", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

    running.shutdown();
}

#[tokio::test]
async fn test_streaming_output() {
    let dir = template_dir(&[
        ("big.html", "{% for i in range(2000) %}row {{ i }}\n{% endfor %}"),
        ("early.html", "{{ httpError(404) }}"),
    ]);
    let mut config = site_config(dir.path());
    config.render.output = OutputMode::Streaming;
    config.render.stream_chunk_bytes = 256;
    let (running, base) = start_server(config).await;
    let client = client();

    let res = client.get(format!("{}/big", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let text = res.text().await.unwrap();
    assert_eq!(text.lines().count(), 2000);
    assert!(text.ends_with("row 1999\n"));

    let res = client.get(format!("{}/early", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    running.shutdown();
}

#[tokio::test]
async fn test_admin_api() {
    let dir = template_dir(&SITE[..4]);
    let (running, base) = start_server(site_config(dir.path())).await;
    let client = client();

    let res = client.get(format!("{}/_admin/status", base)).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("{}/_admin/status", base))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let status: Value = client
        .get(format!("{}/_admin/status", base))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["generation"], 1);
    assert_eq!(status["reload"]["state"], "idle");

    let routes: Vec<Value> = client
        .get(format!("{}/_admin/routes", base))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(routes
        .iter()
        .any(|r| r["method"] == "GET" && r["pattern"] == "/contact/:id" && r["source"] == "explicit"));

    let res = client
        .post(format!("{}/_admin/reload", base))
        .bearer_auth(ADMIN_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let status: Value = res.json().await.unwrap();
    assert_eq!(status["generation"], 2);

    running.shutdown();
}
