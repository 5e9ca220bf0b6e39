use std::collections::HashMap;
use std::io::Write;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use agegate_contracts::{Destination, GATE_PATH, ROOT_PATH, gate_location};
use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use reqwest::header::{COOKIE, LOCATION, SET_COOKIE, USER_AGENT};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const SECRET: &str = "AGEGATE_SMOKE_SECRET_7d1c4a9e0b2f4e6a8c3d5b7f";
const BROWSER_UA: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15";
const DESTINATION: &str = "/calculators/yield-forecasting?ref=abc123";

type Collected = Arc<Mutex<Vec<serde_json::Value>>>;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_visitor_confirms_and_lands_on_original_destination() {
    let log_buf = init_test_tracing();

    let collected: Collected = Arc::new(Mutex::new(Vec::new()));
    let collector_app = Router::new()
        .route("/collect", post(collect))
        .with_state(collected.clone());
    let (collector_addr, collector_shutdown, collector_task) = spawn_server(collector_app).await;

    let gateway_config = agegate_gateway::config::GatewayConfig::from_kv(&HashMap::from([
        ("AGEGATE_BIND_ADDR".to_string(), "127.0.0.1:0".to_string()),
        ("AGEGATE_COOKIE_SECRET".to_string(), SECRET.to_string()),
        (
            "AGEGATE_COLLECTOR_URL".to_string(),
            format!("http://{}/collect", collector_addr),
        ),
        ("AGEGATE_COLLECTOR_TIMEOUT_MS".to_string(), "2000".to_string()),
    ]))
    .expect("gateway config should be valid");

    let (gateway_addr, gateway_shutdown, gateway_task) = spawn_server(
        agegate_gateway::http::router(gateway_config).expect("gateway router should init"),
    )
    .await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client should build");
    wait_for_healthz(&client, gateway_addr).await;
    let base = format!("http://{}", gateway_addr);
    let mut jar = CookieJar::default();

    // Deep link without verification goes to the gate with its destination attached.
    let response = client
        .get(format!("{}{}", base, DESTINATION))
        .header(USER_AGENT, BROWSER_UA)
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let gate_url = location(&response);
    let destination = Destination::parse(DESTINATION).expect("destination should parse");
    assert_eq!(gate_url, gate_location(&destination));
    assert_eq!(
        gate_url,
        "/age-gate?next=%2Fcalculators%2Fyield-forecasting%3Fref%3Dabc123"
    );

    let response = client
        .get(format!("{}{}", base, gate_url))
        .header(USER_AGENT, BROWSER_UA)
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers().get(SET_COOKIE).is_none(),
        "viewing the gate must not write cookies"
    );
    let body = response.text().await.expect("body should be readable");
    assert!(body.contains(
        r#"name="next" value="/calculators/yield-forecasting?ref=abc123""#
    ));

    // Confirm: the visitor lands exactly where they started.
    let response = client
        .post(format!("{}/age-gate/confirm", base))
        .header(USER_AGENT, BROWSER_UA)
        .header(COOKIE, jar.header())
        .form(&[("next", DESTINATION)])
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), destination.as_str());
    jar.absorb(&response);
    let token = jar
        .get("age_verified")
        .expect("confirm should set the verification cookie")
        .to_string();
    assert!(token.starts_with("v1."));
    assert_eq!(jar.get("referral_id"), Some("abc123"));
    let visitor_id = jar
        .get("visitor_id")
        .expect("confirm should mint a visitor id")
        .to_string();

    let response = client
        .get(format!("{}{}", base, DESTINATION))
        .header(USER_AGENT, BROWSER_UA)
        .header(COOKIE, jar.header())
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::OK);

    // Already verified: the gate sends the visitor home, and confirming again changes nothing.
    let response = client
        .get(format!("{}/age-gate", base))
        .header(COOKIE, jar.header())
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), ROOT_PATH);

    let response = client
        .post(format!("{}/age-gate/confirm", base))
        .header(COOKIE, jar.header())
        .form(&[("next", "/calculators/thc-loss")])
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/calculators/thc-loss");
    jar.absorb(&response);
    assert!(jar.get("age_verified").is_some());

    let response = client
        .post(format!("{}/age-gate/confirm", base))
        .header(COOKIE, jar.header())
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(location(&response), ROOT_PATH);
    assert_eq!(jar.get("visitor_id"), Some(visitor_id.as_str()));

    // Usage events are stamped with the visitor and referral and relayed.
    let response = client
        .post(format!("{}/v1/usage-events", base))
        .header(COOKIE, jar.header())
        .json(&serde_json::json!({
            "calculator": "yield-forecasting",
            "action": "calculate",
            "detail": {"plants": 12}
        }))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted: serde_json::Value = response.json().await.expect("body should be json");
    assert_eq!(accepted["forwarded"], true);

    let events = collected
        .lock()
        .expect("collector lock should be available")
        .clone();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["visitor_id"], visitor_id.as_str());
    assert_eq!(events[0]["referral_id"], "abc123");
    assert_eq!(events[0]["calculator"], "yield-forecasting");
    assert_eq!(events[0]["detail"]["plants"], 12);
    assert_eq!(events[0]["event_id"], accepted["event_id"]);

    // Reset clears everything; the next visit is gated again.
    let response = client
        .post(format!("{}/age-gate/reset", base))
        .header(COOKIE, jar.header())
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), GATE_PATH);
    jar.absorb(&response);
    assert!(jar.get("age_verified").is_none());
    assert!(jar.get("visitor_id").is_none());
    assert!(jar.get("referral_id").is_none());

    let response = client
        .get(format!("{}/calculators/thc-loss", base))
        .header(COOKIE, jar.header())
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);

    // Decline leaves without writing any state.
    let response = client
        .post(format!("{}/age-gate/decline", base))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "https://www.google.com/");
    assert!(response.headers().get(SET_COOKIE).is_none());

    let metrics = client
        .get(format!("{}/metrics", base))
        .send()
        .await
        .expect("request should succeed")
        .text()
        .await
        .expect("metrics should be readable");
    assert!(metrics.contains("agegate_gate_decisions_total"));
    assert!(metrics.contains("agegate_confirmations_total"));

    let logs = String::from_utf8(
        log_buf
            .lock()
            .expect("log lock should be available")
            .clone(),
    )
    .expect("logs should be utf-8");
    assert!(logs.contains("age confirmed"), "expected confirmation log");
    assert!(!logs.contains(SECRET), "cookie secret leaked into logs");
    assert!(!logs.contains(&token), "verification token leaked into logs");

    let _ = gateway_shutdown.send(());
    let _ = collector_shutdown.send(());
    let _ = gateway_task.await;
    let _ = collector_task.await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn smoke_failing_collector_does_not_block_visitors() {
    init_test_tracing();

    let failing_app = Router::new().route(
        "/collect",
        post(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    );
    let (collector_addr, collector_shutdown, collector_task) = spawn_server(failing_app).await;

    let gateway_config = agegate_gateway::config::GatewayConfig::from_kv(&HashMap::from([
        ("AGEGATE_BIND_ADDR".to_string(), "127.0.0.1:0".to_string()),
        ("AGEGATE_COOKIE_SECRET".to_string(), SECRET.to_string()),
        (
            "AGEGATE_COLLECTOR_URL".to_string(),
            format!("http://{}/collect", collector_addr),
        ),
        ("AGEGATE_COLLECTOR_RETRY_MAX_ATTEMPTS".to_string(), "1".to_string()),
        ("AGEGATE_COLLECTOR_RETRY_BASE_BACKOFF_MS".to_string(), "1".to_string()),
    ]))
    .expect("gateway config should be valid");
    let (gateway_addr, gateway_shutdown, gateway_task) = spawn_server(
        agegate_gateway::http::router(gateway_config).expect("gateway router should init"),
    )
    .await;

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client should build");
    wait_for_healthz(&client, gateway_addr).await;

    let mut jar = CookieJar::default();
    let response = client
        .post(format!("http://{}/age-gate/confirm", gateway_addr))
        .send()
        .await
        .expect("request should succeed");
    jar.absorb(&response);

    let response = client
        .post(format!("http://{}/v1/usage-events", gateway_addr))
        .header(COOKIE, jar.header())
        .json(&serde_json::json!({"calculator": "thc-loss", "action": "calculate"}))
        .send()
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = response.json().await.expect("body should be json");
    assert_eq!(body["forwarded"], false);

    let _ = gateway_shutdown.send(());
    let _ = collector_shutdown.send(());
    let _ = gateway_task.await;
    let _ = collector_task.await;
}

async fn collect(
    State(collected): State<Collected>,
    Json(event): Json<serde_json::Value>,
) -> StatusCode {
    collected
        .lock()
        .expect("collector lock should be available")
        .push(event);
    StatusCode::NO_CONTENT
}

/// Minimal cookie store: the gateway only ever sets host-wide `Path=/` cookies.
#[derive(Default)]
struct CookieJar {
    cookies: HashMap<String, String>,
}

impl CookieJar {
    fn absorb(&mut self, response: &reqwest::Response) {
        for value in response.headers().get_all(SET_COOKIE) {
            let value = value.to_str().expect("set-cookie should be ascii");
            let pair = value.split(';').next().unwrap_or_default();
            let Some((name, val)) = pair.split_once('=') else {
                continue;
            };
            if value.contains("Max-Age=0") {
                self.cookies.remove(name.trim());
            } else {
                self.cookies
                    .insert(name.trim().to_string(), val.trim().to_string());
            }
        }
    }

    fn get(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|v| v.as_str())
    }

    fn header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

fn location(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("response should carry a Location header")
        .to_string()
}

async fn spawn_server(
    app: Router,
) -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind should succeed");
    let addr = listener.local_addr().expect("local_addr should succeed");

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .await;
    });

    (addr, shutdown_tx, handle)
}

async fn wait_for_healthz(client: &reqwest::Client, addr: SocketAddr) {
    let url = format!("http://{}/healthz", addr);

    for _ in 0..50 {
        if let Ok(response) = client.get(&url).send().await
            && response.status().is_success()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    panic!("server did not become ready at {}", url);
}

struct TestWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut lock = self
            .buf
            .lock()
            .map_err(|_| std::io::Error::other("log mutex poisoned"))?;
        lock.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

fn init_test_tracing() -> Arc<Mutex<Vec<u8>>> {
    static LOG_BUF: OnceLock<Arc<Mutex<Vec<u8>>>> = OnceLock::new();

    LOG_BUF
        .get_or_init(|| {
            let buf = Arc::new(Mutex::new(Vec::new()));
            let make_writer = {
                let buf = buf.clone();
                move || TestWriter { buf: buf.clone() }
            };

            let subscriber = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new("info,agegate_gateway=debug"))
                .with_ansi(false)
                .with_writer(make_writer)
                .finish();

            tracing::subscriber::set_global_default(subscriber)
                .expect("global tracing subscriber should be set once");

            buf
        })
        .clone()
}
