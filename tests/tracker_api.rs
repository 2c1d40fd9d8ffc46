use ops_harness::clock;
use ops_harness::config::Config;
use ops_harness::server;
use ops_harness::tracker_api;
use serde_json::{json, Value};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct TestServer {
    addr: SocketAddr,
    client: reqwest::Client,
    _data: TempDir,
    _stop: oneshot::Sender<()>,
}

impl TestServer {
    async fn start() -> Self {
        let data = TempDir::new().unwrap();
        let mut config = Config::default();
        config.rate_limit.requests = 1000;
        config.tracker.data_dir = Some(data.path().to_path_buf());

        let app = tracker_api::router_from_config(&config, clock::system());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(server::serve(listener, app, async move {
            let _ = stopped.await;
        }));
        Self {
            addr,
            client: reqwest::Client::new(),
            _data: data,
            _stop: stop,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}/api/v1{}", self.addr, path)
    }

    async fn send(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> (u16, Value) {
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(&body);
        }
        let response = request.send().await.unwrap();
        let status = response.status().as_u16();
        (status, response.json().await.unwrap_or(Value::Null))
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        self.send(reqwest::Method::GET, path, None).await
    }

    async fn post(&self, path: &str, body: Value) -> (u16, Value) {
        self.send(reqwest::Method::POST, path, Some(body)).await
    }

    async fn patch(&self, path: &str, body: Value) -> (u16, Value) {
        self.send(reqwest::Method::PATCH, path, Some(body)).await
    }

    async fn delete(&self, path: &str) -> (u16, Value) {
        self.send(reqwest::Method::DELETE, path, None).await
    }
}

fn project() -> TempDir {
    let root = TempDir::new().unwrap();
    write(root.path(), "a.go", "package main\n");
    write(root.path(), "pkg/b.go", "package pkg\n");
    write(root.path(), "README.md", "# readme\n");
    root
}

fn write(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

async fn create(server: &TestServer, root: &Path, name: &str) -> Value {
    let (status, body) = server
        .post(
            "/campaigns",
            json!({
                "name": name,
                "patterns": ["**/*.go"],
                "location": root.display().to_string(),
            }),
        )
        .await;
    assert_eq!(status, 201, "create failed: {}", body);
    body
}

fn id_of(campaign: &Value) -> String {
    campaign["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health_reports_storage() {
    let server = TestServer::start().await;
    let body: Value = reqwest::get(format!("http://{}/health", server.addr))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "visited-tracker");
    assert_eq!(body["storage"]["exists"], true);
}

#[tokio::test]
async fn test_create_visit_and_coverage() {
    let server = TestServer::start().await;
    let root = project();
    let campaign = create(&server, root.path(), "review").await;
    assert_eq!(campaign["total_files"], 2);
    assert_eq!(campaign["coverage_percent"], 0.0);
    assert_eq!(campaign["metadata"]["auto_sync_success"], true);
    let mut paths: Vec<&str> = campaign["tracked_files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["file_path"].as_str().unwrap())
        .collect();
    paths.sort();
    assert_eq!(paths, vec!["a.go", "pkg/b.go"]);
    let id = id_of(&campaign);

    let (status, body) = server
        .post(&format!("/campaigns/{}/visit", id), json!({ "files": ["a.go"] }))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["recorded"], 1);

    let (status, coverage) = server.get(&format!("/campaigns/{}/coverage", id)).await;
    assert_eq!(status, 200);
    assert_eq!(coverage["total_files"], 2);
    assert_eq!(coverage["visited_files"], 1);
    assert_eq!(coverage["coverage_percent"], 50.0);

    let (_, least) = server
        .get(&format!("/campaigns/{}/prioritize/least-visited?limit=1", id))
        .await;
    assert_eq!(least["limit"], 1);
    assert_eq!(least["files"][0]["file_path"], "pkg/b.go");

    let (status, list) = server.get("/campaigns").await;
    assert_eq!(status, 200);
    assert_eq!(list["count"], 1);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let server = TestServer::start().await;
    let (status, body) = server
        .delete(&format!("/campaigns/{}", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["deleted"], true);
}

#[tokio::test]
async fn test_create_validation_and_conflict() {
    let server = TestServer::start().await;
    let root = project();
    create(&server, root.path(), "dup").await;

    let (status, body) = server
        .post(
            "/campaigns",
            json!({
                "name": "dup",
                "patterns": ["**/*.go"],
                "location": root.path().display().to_string(),
            }),
        )
        .await;
    assert_eq!(status, 409);
    assert!(body["error"].is_string());

    let (status, _) = server
        .post("/campaigns", json!({ "name": "empty", "patterns": [] }))
        .await;
    assert_eq!(status, 400);

    let (status, _) = server.get("/campaigns/not-a-uuid").await;
    assert_eq!(status, 400);

    let (status, _) = server
        .get(&format!("/campaigns/{}", uuid::Uuid::new_v4()))
        .await;
    assert_eq!(status, 404);
}

#[tokio::test]
async fn test_sync_picks_up_new_and_deleted_files() {
    let server = TestServer::start().await;
    let root = project();
    let id = id_of(&create(&server, root.path(), "sync").await);

    write(root.path(), "pkg/c.go", "package pkg\n");
    fs::remove_file(root.path().join("a.go")).unwrap();

    let (status, body) = server
        .post(&format!("/campaigns/{}/structure/sync", id), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["added_files"], json!(["pkg/c.go"]));
    assert_eq!(body["deleted_files"], json!(["a.go"]));
    // Deleted files stay tracked; only live files count toward coverage.
    assert_eq!(body["total_files"], 3);
    let (_, campaign) = server.get(&format!("/campaigns/{}", id)).await;
    assert_eq!(campaign["total_files"], 2);
}

#[tokio::test]
async fn test_adjust_and_file_operations() {
    let server = TestServer::start().await;
    let root = project();
    let campaign = create(&server, root.path(), "files").await;
    let id = id_of(&campaign);

    let (status, file) = server
        .get(&format!("/campaigns/{}/files/by-path?path=pkg/b.go", id))
        .await;
    assert_eq!(status, 200);
    let file_id = file["id"].as_str().unwrap().to_string();

    let (status, adjusted) = server
        .post(
            &format!("/campaigns/{}/adjust-visit", id),
            json!({ "file_id": file_id, "action": "increment" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(adjusted["visit_count"], 1);

    let (status, _) = server
        .patch(
            &format!("/campaigns/{}/files/{}/priority", id, file_id),
            json!({ "priority_weight": 0 }),
        )
        .await;
    assert_eq!(status, 400);

    let (status, noted) = server
        .patch(
            &format!("/campaigns/{}/files/{}/notes", id, file_id),
            json!({ "notes": "needs a second look" }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(noted["notes"], "needs a second look");

    let (status, bulk) = server
        .post(
            &format!("/campaigns/{}/files/exclude", id),
            json!({ "paths": ["a.go", "missing.go"] }),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(bulk["updated"], 1);
    assert_eq!(bulk["not_found"], json!(["missing.go"]));

    let (_, least) = server
        .get(&format!("/campaigns/{}/prioritize/least-visited", id))
        .await;
    let paths: Vec<&str> = least["files"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["file_path"].as_str().unwrap())
        .collect();
    assert_eq!(paths, vec!["pkg/b.go"]);
}

#[tokio::test]
async fn test_export_then_import() {
    let server = TestServer::start().await;
    let root = project();
    let id = id_of(&create(&server, root.path(), "portable").await);
    server
        .post(&format!("/campaigns/{}/visit", id), json!({ "files": ["a.go"] }))
        .await;

    let (status, exported) = server.get(&format!("/campaigns/{}/export", id)).await;
    assert_eq!(status, 200);

    // Same id, no merge: conflict.
    let (status, _) = server.post("/campaigns/import", exported.clone()).await;
    assert_eq!(status, 409);

    let (status, merged) = server
        .post("/campaigns/import?merge=true", exported.clone())
        .await;
    assert_eq!(status, 200);
    assert_eq!(merged["id"], id.as_str());
    assert_eq!(merged["visited_files"], 1);

    server.delete(&format!("/campaigns/{}", id)).await;
    let (status, imported) = server.post("/campaigns/import", exported).await;
    assert_eq!(status, 201);
    assert_eq!(imported["total_files"], 2);
    assert_eq!(imported["visited_files"], 1);
}

#[tokio::test]
async fn test_find_or_create_reuses_location_and_tag() {
    let server = TestServer::start().await;
    let root = project();
    let body = json!({
        "location": root.path().display().to_string(),
        "tag": "review",
        "patterns": ["**/*.go"],
    });

    let (status, first) = server.post("/campaigns/find-or-create", body.clone()).await;
    assert_eq!(status, 201);
    assert_eq!(first["created"], true);

    let (status, second) = server.post("/campaigns/find-or-create", body).await;
    assert_eq!(status, 200);
    assert_eq!(second["created"], false);
    assert_eq!(second["campaign"]["id"], first["campaign"]["id"]);
}

#[tokio::test]
async fn test_reset_clears_visits() {
    let server = TestServer::start().await;
    let root = project();
    let id = id_of(&create(&server, root.path(), "reset").await);
    server
        .post(&format!("/campaigns/{}/visit", id), json!({ "files": ["a.go", "pkg/b.go"] }))
        .await;

    let (status, reset) = server
        .post(&format!("/campaigns/{}/reset", id), json!({}))
        .await;
    assert_eq!(status, 200);
    assert_eq!(reset["visited_files"], 0);
    assert_eq!(reset["total_files"], 2);
}
