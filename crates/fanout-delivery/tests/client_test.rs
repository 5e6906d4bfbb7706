//! End-to-end tests over real HTTP against mock webhook servers.

use std::time::Duration;

use anyhow::Result;
use fanout_core::{DeliveryOutcome, Endpoint, Payload};
use fanout_delivery::{
    BackoffStrategy, ClientConfig, DeliveryOptions, FanoutEngine, JitterRange, RetryPolicy,
};
use fanout_testing::PayloadBuilder;
use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

fn fast_options(max_attempts: u32) -> DeliveryOptions {
    DeliveryOptions {
        retry_policy: RetryPolicy {
            max_attempts,
            base_delay: Duration::from_millis(50),
            backoff_strategy: BackoffStrategy::Fixed,
            retry_after_padding: Duration::from_millis(10),
            ..RetryPolicy::default()
        },
        inter_payload_jitter: JitterRange::new(Duration::from_millis(5), Duration::from_millis(20)),
        ..DeliveryOptions::default()
    }
}

fn engine(max_attempts: u32) -> Result<FanoutEngine> {
    let client = ClientConfig { timeout: Duration::from_secs(5), ..ClientConfig::default() };
    Ok(FanoutEngine::http(client, fast_options(max_attempts))?)
}

#[tokio::test]
async fn delivers_to_multiple_servers() -> Result<()> {
    let first = MockServer::start().await;
    let second = MockServer::start().await;

    for server in [&first, &second] {
        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::header("content-type", "application/json"))
            .respond_with(ResponseTemplate::new(204))
            .expect(2)
            .mount(server)
            .await;
    }

    let first_url = format!("{}/hook", first.uri());
    let second_url = format!("{}/hook", second.uri());
    let payloads = vec![
        Payload::json(&serde_json::json!({"content": "x"}))?,
        Payload::json(&serde_json::json!({"content": "y"}))?,
    ];

    let report = engine(3)?.deliver_to([&first_url, &second_url], payloads).await?;

    assert!(report.all_delivered());
    assert_eq!(report.summary().delivered, 4);
    Ok(())
}

#[tokio::test]
async fn honours_retry_after_from_server() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .append_header("Retry-After", "0.3")
                .set_body_json(serde_json::json!({"retry_after": 0.3, "global": false})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(matchers::method("POST"))
        .and(matchers::header("X-Fanout-Attempt", "2"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let url = format!("{}/hook", server.uri());
    let started = std::time::Instant::now();
    let report = engine(3)?.deliver_to([&url], vec![Payload::text("x")]).await?;
    let elapsed = started.elapsed();

    let endpoint = Endpoint::parse(&url)?;
    let result = &report.results_for(&endpoint).unwrap_or_default()[0];
    assert_eq!(result.outcome, DeliveryOutcome::Delivered);
    assert_eq!(result.retries(), 1);
    assert!(result.was_rate_limited());
    assert!(elapsed >= Duration::from_millis(300), "retried after only {elapsed:?}");
    Ok(())
}

#[tokio::test]
async fn unreachable_endpoint_fails_without_blocking_others() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let good = format!("{}/hook", server.uri());
    let report = engine(2)?
        .deliver_to([good.as_str(), "http://127.0.0.1:9/hook"], vec![Payload::text("x")])
        .await?;

    let summary = report.summary();
    assert_eq!(summary.delivered, 1);
    assert_eq!(summary.failed, 1);

    let dead = Endpoint::parse("http://127.0.0.1:9/hook")?;
    let result = &report.results_for(&dead).unwrap_or_default()[0];
    assert_eq!(result.attempt_count(), 2);
    assert_eq!(result.last_status, None);
    Ok(())
}

#[tokio::test]
async fn payload_cannot_override_transport_headers() -> Result<()> {
    let server = MockServer::start().await;

    Mock::given(matchers::method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let payload = PayloadBuilder::new()
        .body("plain body")
        .content_type("text/plain")
        .header("Authorization", "Bearer hook-token")
        .header("Host", "spoofed.example.com")
        .header("Content-Type", "text/html")
        .header("X-Fanout-Attempt", "99")
        .build();

    let url = format!("{}/hook", server.uri());
    let report = engine(1)?.deliver_to([&url], vec![payload]).await?;
    assert!(report.all_delivered());

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 1);
    let headers = &requests[0].headers;
    let values = |name: &str| {
        headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok().map(str::to_string))
            .collect::<Vec<_>>()
    };

    assert_eq!(values("authorization"), vec!["Bearer hook-token"]);
    assert_eq!(values("content-type"), vec!["text/plain"]);
    assert_eq!(values("x-fanout-attempt"), vec!["1"]);
    assert!(values("host").iter().all(|host| !host.contains("spoofed")));
    assert_eq!(requests[0].body, b"plain body");
    Ok(())
}
