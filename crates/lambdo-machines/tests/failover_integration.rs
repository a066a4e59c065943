//! End-to-end tests of client, transport and failover against a scripted
//! HTTP sender.

use async_trait::async_trait;
use lambdo_machines::{
    create_with_failover, wait_for_machine, ApiRequest, ApiResponse, HttpSend, MachineConfig,
    MachineState, MachinesClient, MachinesError, RetryPolicy, SendError, Transport, WaitConfig,
};
use reqwest::{Method, StatusCode};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Script {
    replies: VecDeque<Result<ApiResponse, SendError>>,
    seen: Vec<(Method, String, Option<serde_json::Value>)>,
}

#[derive(Clone, Default)]
struct ScriptedSender(Arc<Mutex<Script>>);

impl ScriptedSender {
    fn reply(&self, reply: Result<ApiResponse, SendError>) -> &Self {
        self.0.lock().unwrap().replies.push_back(reply);
        self
    }

    fn ok(&self, status: StatusCode, body: &str) -> &Self {
        self.reply(Ok(ApiResponse::new(status, body.as_bytes().to_vec())))
    }

    fn seen(&self) -> Vec<(Method, String, Option<serde_json::Value>)> {
        self.0.lock().unwrap().seen.clone()
    }
}

#[async_trait]
impl HttpSend for ScriptedSender {
    async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SendError> {
        let mut script = self.0.lock().unwrap();
        let body = request
            .body
            .as_deref()
            .map(|b| serde_json::from_slice(b).expect("request bodies are JSON"));
        script
            .seen
            .push((request.method.clone(), request.url.clone(), body));
        script
            .replies
            .pop_front()
            .expect("unexpected request: script exhausted")
    }
}

fn client(sender: ScriptedSender) -> MachinesClient<ScriptedSender> {
    MachinesClient::with_transport(
        Transport::with_sender(sender, RetryPolicy::without_delays()),
        "https://machines.test",
        "token",
    )
}

fn worker_config() -> MachineConfig {
    MachineConfig {
        image: "registry.fly.io/worker:2".into(),
        size: Some("performance-2x".into()),
        auto_destroy: true,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_failover_survives_timeouts_and_rejections() {
    let sender = ScriptedSender::default();
    // bos: five timeouts exhaust the transport budget
    for _ in 0..5 {
        sender.reply(Err(SendError::Timeout("deadline elapsed".into())));
    }
    // dfw: rejected config
    sender.ok(StatusCode::UNPROCESSABLE_ENTITY, r#"{"error":"capacity"}"#);
    // den: conflict once, then created
    sender
        .ok(StatusCode::CONFLICT, "")
        .ok(
            StatusCode::OK,
            r#"{"id":"e784079b449483","state":"created","region":"den","config":{"image":"registry.fly.io/worker:2"}}"#,
        );

    let regions: Vec<String> = ["bos", "dfw", "den", "mia"].map(String::from).to_vec();
    let machine = create_with_failover(&client(sender.clone()), "jobs", &worker_config(), &regions)
        .await
        .unwrap();

    assert_eq!(machine.id, "e784079b449483");
    assert_eq!(machine.region, "den");

    let seen = sender.seen();
    assert_eq!(seen.len(), 8);
    let regions_tried: Vec<&str> = seen
        .iter()
        .map(|(_, _, body)| body.as_ref().unwrap()["region"].as_str().unwrap())
        .collect();
    assert_eq!(
        regions_tried,
        vec!["bos", "bos", "bos", "bos", "bos", "dfw", "den", "den"]
    );
    assert!(seen
        .iter()
        .all(|(m, url, _)| *m == Method::POST && url == "https://machines.test/v1/apps/jobs/machines"));
}

#[tokio::test]
async fn test_network_failure_everywhere_is_all_regions_failed() {
    let sender = ScriptedSender::default();
    sender
        .reply(Err(SendError::Other("connection reset".into())))
        .reply(Err(SendError::Other("connection reset".into())));

    let regions = vec!["ams".to_string(), "fra".to_string()];
    let err = create_with_failover(&client(sender.clone()), "jobs", &worker_config(), &regions)
        .await
        .unwrap_err();

    assert!(matches!(err, MachinesError::AllRegionsFailed { .. }));
    assert_eq!(sender.seen().len(), 2);
}

#[tokio::test]
async fn test_readiness_poller_over_http() {
    let sender = ScriptedSender::default();
    sender
        .ok(StatusCode::OK, r#"{"id":"m1","state":"created","region":"bos"}"#)
        .ok(StatusCode::OK, r#"{"id":"m1","state":"starting","region":"bos"}"#)
        .ok(StatusCode::OK, r#"{"id":"m1","state":"started","region":"bos"}"#);

    let machines = client(sender.clone());
    let config = WaitConfig {
        interval: Duration::from_millis(1),
        max_attempts: 150,
    };
    let machine = wait_for_machine(&machines, "jobs", "m1", config, None)
        .await
        .unwrap();

    assert_eq!(machine.state, Some(MachineState::Started));
    assert_eq!(sender.seen().len(), 3);
}
