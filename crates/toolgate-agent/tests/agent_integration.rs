#![allow(clippy::unwrap_used, clippy::expect_used)]
//! End-to-end conversations: Claude backend against a mocked Messages API,
//! tools served by in-process servers over TCP.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use toolgate_agent::{
    ClaudeBackend, ModelBackend, ModelConfig, ModelReply, Orchestrator, OrchestratorConfig,
};
use toolgate_core::{GatewayError, Message, ToolSchema};
use toolgate_mcp::{
    Dispatcher, Health, ServerConfig, StartupReport, Supervisor, SupervisorConfig,
};
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Tool servers
// ---------------------------------------------------------------------------

/// Every frame a test server received, in arrival order.
type Frames = Arc<Mutex<Vec<Value>>>;

/// How a test server answers `tools/call`.
#[derive(Clone, Copy)]
enum OnCall {
    /// Add `a` and `b`.
    Add,
    /// Drop the connection.
    Disconnect,
    /// Never answer.
    Hang,
}

fn add_tool() -> Value {
    json!({
        "name": "add",
        "description": "Add two numbers",
        "inputSchema": {
            "type": "object",
            "properties": {"a": {"type": "number"}, "b": {"type": "number"}},
            "required": ["a", "b"]
        }
    })
}

fn plain_tool(name: &str) -> Value {
    json!({"name": name, "description": format!("{name} tool"), "inputSchema": {"type": "object"}})
}

/// Serve `tool` over newline-delimited JSON-RPC; returns the bound address
/// and the frames received.
async fn spawn_tool_server(tool: Value, on_call: OnCall) -> (String, Frames) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let frames: Frames = Arc::default();
    let seen = frames.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_tool(stream, tool.clone(), on_call, seen.clone()));
        }
    });
    (address, frames)
}

async fn spawn_calculator() -> String {
    spawn_tool_server(add_tool(), OnCall::Add).await.0
}

async fn serve_tool(stream: TcpStream, tool: Value, on_call: OnCall, frames: Frames) {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let frame: Value = serde_json::from_str(&line).unwrap();
        frames.lock().unwrap().push(frame.clone());
        let Some(id) = frame.get("id").cloned() else {
            continue;
        };
        let result = match frame["method"].as_str().unwrap_or_default() {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "test-server", "version": "1.0.0"}
            }),
            "tools/list" => json!({"tools": [tool]}),
            "tools/call" => match on_call {
                OnCall::Add => {
                    let args = &frame["params"]["arguments"];
                    let sum = args["a"].as_f64().unwrap() + args["b"].as_f64().unwrap();
                    json!({"content": [{"type": "text", "text": sum.to_string()}], "isError": false})
                }
                OnCall::Disconnect => return,
                OnCall::Hang => continue,
            },
            _ => json!({}),
        };
        let mut reply = json!({"jsonrpc": "2.0", "id": id, "result": result}).to_string();
        reply.push('\n');
        if write_half.write_all(reply.as_bytes()).await.is_err() {
            return;
        }
    }
}

async fn dispatcher_for(configs: Vec<ServerConfig>) -> (Dispatcher, StartupReport) {
    let supervisor = Supervisor::new(configs, SupervisorConfig::default()).unwrap();
    let report = supervisor.start_all().await;
    (Dispatcher::new(Arc::new(supervisor)), report)
}

async fn calculator_dispatcher() -> Dispatcher {
    let address = spawn_calculator().await;
    let (dispatcher, report) = dispatcher_for(vec![ServerConfig::tcp("calculator", address)]).await;
    assert!(report.all_ready());
    dispatcher
}

/// An address nothing is listening on.
async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

fn claude(server: &MockServer) -> ClaudeBackend {
    ClaudeBackend::new(ModelConfig {
        api_key: "test-key".into(),
        api_base_url: Some(server.uri()),
        ..ModelConfig::default()
    })
    .unwrap()
}

// ---------------------------------------------------------------------------
// Claude backend
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_claude_request_shape() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(header("x-api-key", "test-key"))
        .and(header("anthropic-version", "2023-06-01"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "hello"}],
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let tools = vec![ToolSchema::new(
        "calculator.add",
        "Add two numbers",
        json!({"type": "object"}),
    )];
    let reply = claude(&server)
        .converse(Some("be brief"), &[Message::user("hi")], &tools)
        .await
        .unwrap();
    assert_eq!(reply, ModelReply::Final("hello".into()));

    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["model"], "claude-3-5-sonnet-20240620");
    assert_eq!(body["max_tokens"], 2000);
    assert_eq!(body["system"], "be brief");
    assert_eq!(body["messages"][0]["role"], "user");
    assert_eq!(body["messages"][0]["content"][0]["text"], "hi");
    assert_eq!(body["tools"][0]["name"], "calculator_add");
    assert_eq!(body["tools"][0]["input_schema"]["type"], "object");
}

#[tokio::test]
async fn test_claude_error_status_is_model_unavailable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let err = claude(&server)
        .converse(None, &[Message::user("hi")], &[])
        .await
        .unwrap_err();
    match err {
        GatewayError::ModelUnavailable(reason) => assert!(reason.contains("overloaded")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_claude_omits_empty_tool_list() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "ok"}]
        })))
        .mount(&server)
        .await;

    claude(&server)
        .converse(None, &[Message::user("hi")], &[])
        .await
        .unwrap();
    let requests = server.received_requests().await.unwrap();
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body.get("tools").is_none());
    assert!(body.get("system").is_none());
}

// ---------------------------------------------------------------------------
// Full conversation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_calculator_conversation() {
    let model = MockServer::start().await;

    // Second turn: the history now carries the tool result.
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string_contains("tool_result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "4"}],
            "stop_reason": "end_turn"
        })))
        .expect(1)
        .mount(&model)
        .await;

    // First turn: ask for the tool.
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "text", "text": "I'll use the calculator."},
                {"type": "tool_use", "id": "toolu_01", "name": "add", "input": {"a": 2, "b": 2}}
            ],
            "stop_reason": "tool_use"
        })))
        .expect(1)
        .mount(&model)
        .await;

    let dispatcher = calculator_dispatcher().await;
    let orchestrator = Orchestrator::new(
        Arc::new(claude(&model)),
        dispatcher.clone(),
        OrchestratorConfig::default(),
    )
    .unwrap();

    let outcome = orchestrator
        .chat("what is 2+2 using the calculator tool")
        .await
        .unwrap();
    assert_eq!(outcome.answer, "4");
    assert_eq!(outcome.turns, 2);
    assert_eq!(outcome.tool_calls.len(), 1);
    assert_eq!(outcome.tool_calls[0].name, "add");
    assert_eq!(outcome.tool_calls[0].server.as_deref(), Some("calculator"));
    assert!(!outcome.tool_calls[0].is_error);

    // The tool output reached the model untouched.
    let requests = model.received_requests().await.unwrap();
    let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let result = &second["messages"][2]["content"][0];
    assert_eq!(result["type"], "tool_result");
    assert_eq!(result["tool_use_id"], "toolu_01");
    assert_eq!(result["content"][0]["text"], "4");
    assert_eq!(result["is_error"], false);

    dispatcher.supervisor().stop_all().await;
}

#[tokio::test]
async fn test_invalid_arguments_are_reported_to_model() {
    let model = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("tool_result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": "I need two numbers."}]
        })))
        .mount(&model)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "tool_use", "id": "toolu_02", "name": "add", "input": {"a": "two"}}
            ]
        })))
        .mount(&model)
        .await;

    let dispatcher = calculator_dispatcher().await;
    let orchestrator = Orchestrator::new(
        Arc::new(claude(&model)),
        dispatcher.clone(),
        OrchestratorConfig::default(),
    )
    .unwrap();

    let outcome = orchestrator.chat("add two and nothing").await.unwrap();
    assert_eq!(outcome.answer, "I need two numbers.");
    assert!(outcome.tool_calls[0].is_error);

    let requests = model.received_requests().await.unwrap();
    let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
    let result = &second["messages"][2]["content"][0];
    assert_eq!(result["is_error"], true);
    assert!(result["content"]
        .as_str()
        .unwrap()
        .starts_with("invalid_arguments"));

    dispatcher.supervisor().stop_all().await;
}

/// Model script: ask for `tool` first, answer `answer` once a result is back.
async fn mount_one_tool_call(model: &MockServer, tool: &str, input: Value, answer: &str) {
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_string_contains("tool_result"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "text", "text": answer}],
            "stop_reason": "end_turn"
        })))
        .mount(model)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [
                {"type": "tool_use", "id": "toolu_1", "name": tool, "input": input}
            ],
            "stop_reason": "tool_use"
        })))
        .mount(model)
        .await;
}

#[tokio::test]
async fn test_unreachable_server_does_not_block_other_tools() {
    let model = MockServer::start().await;
    mount_one_tool_call(&model, "add", json!({"a": 2, "b": 2}), "4").await;

    let calculator = spawn_calculator().await;
    let (dispatcher, report) = dispatcher_for(vec![
        ServerConfig::tcp("search", dead_address().await).with_auto_reconnect(false),
        ServerConfig::tcp("calculator", calculator),
    ])
    .await;
    assert_eq!(report.ready, vec!["calculator"]);
    assert_eq!(report.failures[0].server, "search");

    let orchestrator = Orchestrator::new(
        Arc::new(claude(&model)),
        dispatcher.clone(),
        OrchestratorConfig::default(),
    )
    .unwrap();
    let outcome = orchestrator.chat("what is 2+2").await.unwrap();
    assert_eq!(outcome.answer, "4");
    assert!(!outcome.tool_calls[0].is_error);

    let requests = model.received_requests().await.unwrap();
    let first: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(first["tools"].as_array().unwrap().len(), 1);
    assert_eq!(first["tools"][0]["name"], "add");

    dispatcher.supervisor().stop_all().await;
}

#[tokio::test]
async fn test_server_dying_mid_conversation_still_answers() {
    let model = MockServer::start().await;
    mount_one_tool_call(&model, "crash", json!({}), "The crash tool is unavailable.").await;

    let (address, _) = spawn_tool_server(plain_tool("crash"), OnCall::Disconnect).await;
    let (dispatcher, report) = dispatcher_for(vec![ServerConfig::tcp("flaky", address)]).await;
    assert!(report.all_ready());

    let orchestrator = Orchestrator::new(
        Arc::new(claude(&model)),
        dispatcher.clone(),
        OrchestratorConfig::default(),
    )
    .unwrap();
    let outcome = orchestrator.chat("crash it").await.unwrap();
    assert_eq!(outcome.answer, "The crash tool is unavailable.");
    assert_eq!(outcome.turns, 2);
    assert!(outcome.tool_calls[0].is_error);
    assert_eq!(outcome.tool_calls[0].server.as_deref(), Some("flaky"));

    let supervisor = dispatcher.supervisor();
    assert_eq!(supervisor.health("flaky"), Some(Health::Degraded));
    assert!(supervisor.registry().is_empty());

    // The second turn still defines the tool its history refers to.
    let requests = model.received_requests().await.unwrap();
    let second: Value = serde_json::from_slice(&requests[1].body).unwrap();
    assert_eq!(second["messages"][1]["content"][0]["type"], "tool_use");
    assert_eq!(second["messages"][1]["content"][0]["name"], "crash");
    assert_eq!(second["tools"][0]["name"], "crash");
    assert_eq!(second["tools"][0]["description"], "crash tool");
    let result = &second["messages"][2]["content"][0];
    assert_eq!(result["is_error"], true);
    assert!(result["content"]
        .as_str()
        .unwrap()
        .starts_with("server_unavailable"));

    supervisor.stop_all().await;
}

#[tokio::test]
async fn test_deadline_cancels_in_flight_tool_call() {
    let model = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{"type": "tool_use", "id": "toolu_1", "name": "wait", "input": {}}]
        })))
        .mount(&model)
        .await;

    let (address, frames) = spawn_tool_server(plain_tool("wait"), OnCall::Hang).await;
    let (dispatcher, _) = dispatcher_for(vec![ServerConfig::tcp("slow", address)]).await;
    let config = OrchestratorConfig {
        deadline_secs: 1,
        ..OrchestratorConfig::default()
    };
    let orchestrator = Orchestrator::new(Arc::new(claude(&model)), dispatcher.clone(), config).unwrap();

    let err = orchestrator.chat("wait forever").await.unwrap_err();
    assert!(matches!(
        err,
        GatewayError::DeadlineExceeded { deadline_ms: 1000 }
    ));

    let call_id = frames
        .lock()
        .unwrap()
        .iter()
        .find(|f| f["method"] == "tools/call")
        .map(|f| f["id"].clone())
        .unwrap();

    let mut cancelled = None;
    for _ in 0..40 {
        cancelled = frames
            .lock()
            .unwrap()
            .iter()
            .find(|f| f["method"] == "notifications/cancelled")
            .cloned();
        if cancelled.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    let cancelled = cancelled.expect("server was told the call was abandoned");
    assert_eq!(cancelled["params"]["requestId"], call_id);
    assert!(cancelled.get("id").is_none());

    dispatcher.supervisor().stop_all().await;
}
