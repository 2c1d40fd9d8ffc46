use ops_harness::config::{AuthMode, Config};
use ops_harness::network_api;
use ops_harness::server;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;

struct TestServer {
    addr: SocketAddr,
    _stop: oneshot::Sender<()>,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

async fn start(config: Config) -> TestServer {
    let app = network_api::router_from_config(&config).await.unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(server::serve(listener, app, async move {
        let _ = stopped.await;
    }));
    TestServer { addr, _stop: stop }
}

fn config() -> Config {
    let mut config = Config::default();
    config.rate_limit.requests = 1000;
    config
}

async fn post(server: &TestServer, path: &str, body: Value) -> (u16, Value) {
    let response = reqwest::Client::new()
        .post(server.url(path))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_health_reports_database_not_configured() {
    let server = start(config()).await;
    for path in ["/health", "/api/health", "/api/v1/health"] {
        let body: Value = reqwest::get(server.url(path))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "healthy");
        assert_eq!(body["data"]["dependencies"]["database"], "not_configured");
    }
}

#[tokio::test]
async fn test_scan_reports_open_and_closed_ports() {
    let server = start(config()).await;
    let open = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let open_port = open.local_addr().unwrap().port();
    let closed = closed_port().await;

    let (status, body) = post(
        &server,
        "/api/v1/network/scan",
        json!({ "target": "127.0.0.1", "ports": [open_port, closed] }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    let data = &body["data"];
    assert_eq!(data["kind"], "scan");
    assert_eq!(data["target"], "127.0.0.1");
    assert_eq!(data["open_ports"], json!([open_port]));
    assert_eq!(data["results"][0]["state"], "open");
    assert_eq!(data["results"][1]["state"], "closed");
}

#[tokio::test]
async fn test_scan_rejects_out_of_range_ports() {
    let server = start(config()).await;
    for port in [0, 65536] {
        let (status, body) = post(
            &server,
            "/api/v1/network/scan",
            json!({ "target": "127.0.0.1", "ports": [port] }),
        )
        .await;
        assert_eq!(status, 400);
        assert_eq!(body["success"], false);
    }
}

#[tokio::test]
async fn test_dns_unsupported_record_type() {
    let server = start(config()).await;
    let (status, body) = post(
        &server,
        "/api/v1/network/dns",
        json!({ "query": "example.com", "record_type": "AAAA" }),
    )
    .await;
    assert_eq!(status, 400);
    assert!(body["error"].as_str().unwrap().contains("Unsupported record type"));
}

#[tokio::test]
async fn test_tls_requires_https() {
    let server = start(config()).await;
    let (status, body) = post(
        &server,
        "/api/v1/network/ssl/validate",
        json!({ "url": "http://example.com" }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_generic_probe_dispatches_on_kind() {
    let server = start(config()).await;
    let closed = closed_port().await;
    let (status, body) = post(
        &server,
        "/api/v1/network/probe",
        json!({ "kind": "scan", "target": "127.0.0.1", "ports": [closed] }),
    )
    .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["kind"], "scan");

    let (status, _) = post(&server, "/api/v1/network/probe", json!({ "kind": "ping" })).await;
    assert_eq!(status, 400);
}

#[tokio::test]
async fn test_malformed_json_is_bad_request() {
    let server = start(config()).await;
    let response = reqwest::Client::new()
        .post(server.url("/api/v1/network/scan"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 400);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_history_without_database_is_server_error() {
    let server = start(config()).await;
    let response = reqwest::get(server.url("/api/v1/network/history"))
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 500);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("database"));
}

#[tokio::test]
async fn test_history_lists_persisted_probes() {
    let tmp = tempfile::TempDir::new().unwrap();
    let mut config = config();
    config.diagnostics.database_url = Some(format!(
        "sqlite://{}?mode=rwc",
        tmp.path().join("probes.db").display()
    ));
    let server = start(config).await;
    let closed = closed_port().await;
    let (status, _) = post(
        &server,
        "/api/v1/network/scan",
        json!({ "target": "127.0.0.1", "ports": [closed] }),
    )
    .await;
    assert_eq!(status, 200);

    // Persistence happens off the request path.
    let mut count = 0;
    for _ in 0..50 {
        let body: Value = reqwest::get(server.url("/api/v1/network/history?kind=scan"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        count = body["data"]["count"].as_u64().unwrap();
        if count > 0 {
            assert_eq!(body["data"]["results"][0]["kind"], "scan");
            assert_eq!(body["data"]["results"][0]["target"], "127.0.0.1");
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(count, 1);

    let health: Value = reqwest::get(server.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["data"]["dependencies"]["database"], "connected");
}

#[tokio::test]
async fn test_rate_limit_returns_retry_after() {
    let mut config = config();
    config.rate_limit.requests = 2;
    let server = start(config).await;
    let client = reqwest::Client::new();
    let send = || {
        client
            .post(server.url("/api/v1/network/dns"))
            .json(&json!({ "query": "example.com", "record_type": "AAAA" }))
            .send()
    };

    assert_eq!(send().await.unwrap().status().as_u16(), 400);
    assert_eq!(send().await.unwrap().status().as_u16(), 400);
    let limited = send().await.unwrap();
    assert_eq!(limited.status().as_u16(), 429);
    let retry_after: u64 = limited.headers()["retry-after"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after >= 1);

    // Health stays reachable while the client is limited.
    let health = reqwest::get(server.url("/health")).await.unwrap();
    assert_eq!(health.status().as_u16(), 200);
}

#[tokio::test]
async fn test_strict_auth_accepts_either_header() {
    let mut config = config();
    config.auth.mode = AuthMode::Strict;
    config.auth.api_key = Some("s3cret".into());
    let server = start(config).await;
    let client = reqwest::Client::new();
    let body = json!({ "query": "example.com", "record_type": "AAAA" });
    let path = server.url("/api/v1/network/dns");

    let anonymous = client.post(&path).json(&body).send().await.unwrap();
    assert_eq!(anonymous.status().as_u16(), 401);

    let wrong = client
        .post(&path)
        .header("x-api-key", "nope")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(wrong.status().as_u16(), 401);

    // Authenticated requests reach validation.
    let keyed = client
        .post(&path)
        .header("x-api-key", "s3cret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(keyed.status().as_u16(), 400);

    let bearer = client
        .post(&path)
        .bearer_auth("s3cret")
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(bearer.status().as_u16(), 400);

    let health = client.get(server.url("/health")).send().await.unwrap();
    assert_eq!(health.status().as_u16(), 200);
}

#[tokio::test]
async fn test_unknown_route_is_enveloped_404() {
    let server = start(config()).await;
    let response = reqwest::get(server.url("/api/v1/network/nope")).await.unwrap();
    assert_eq!(response.status().as_u16(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["success"], false);
}
