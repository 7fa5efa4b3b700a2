//! In-process fake tool servers speaking newline-delimited JSON-RPC over TCP.

#![allow(dead_code)]

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use toolgate_mcp::ServerConfig;

/// How the fake server answers one `tools/call`.
pub enum Reply {
    /// Answer immediately with this `tools/call` result.
    Result(Value),
    /// Answer with a JSON-RPC error.
    Error(i64, String),
    /// Answer after a delay, without blocking other requests.
    After(Duration, Value),
    /// Never answer.
    Silent,
    /// Drop the connection.
    Disconnect,
}

type Handler = dyn Fn(&str, &Value) -> Reply + Send + Sync;

pub struct FakeServer {
    pub address: String,
    pub calls: Arc<AtomicUsize>,
    pub connections: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl FakeServer {
    /// Start a server advertising `tools` and answering calls with `handler`.
    pub async fn spawn(
        name: &str,
        tools: Vec<Value>,
        handler: impl Fn(&str, &Value) -> Reply + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let calls = Arc::new(AtomicUsize::new(0));
        let connections = Arc::new(AtomicUsize::new(0));
        let handler: Arc<Handler> = Arc::new(handler);
        let tools = Arc::new(tools);
        let name = name.to_string();

        let task = tokio::spawn({
            let calls = calls.clone();
            let connections = connections.clone();
            async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        stream,
                        name.clone(),
                        tools.clone(),
                        handler.clone(),
                        calls.clone(),
                    ));
                }
            }
        });

        Self {
            address,
            calls,
            connections,
            task,
        }
    }

    pub fn config(&self, name: &str) -> ServerConfig {
        ServerConfig::tcp(name, &self.address)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// An address nothing is listening on.
pub async fn dead_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);
    address
}

/// A tool taking the given required number arguments.
pub fn number_tool(name: &str, args: &[&str]) -> Value {
    let properties: serde_json::Map<String, Value> = args
        .iter()
        .map(|a| (a.to_string(), json!({"type": "number"})))
        .collect();
    json!({
        "name": name,
        "description": format!("{name} tool"),
        "inputSchema": {"type": "object", "properties": properties, "required": args}
    })
}

/// A tool without parameters.
pub fn plain_tool(name: &str) -> Value {
    json!({"name": name, "description": format!("{name} tool"), "inputSchema": {"type": "object"}})
}

/// A successful `tools/call` result with one text block.
pub fn text(value: impl ToString) -> Value {
    json!({"content": [{"type": "text", "text": value.to_string()}], "isError": false})
}

async fn send(writer: &Arc<Mutex<OwnedWriteHalf>>, frame: Value) {
    let mut line = frame.to_string();
    line.push('\n');
    let mut writer = writer.lock().await;
    let _ = writer.write_all(line.as_bytes()).await;
}

async fn serve(
    stream: TcpStream,
    name: String,
    tools: Arc<Vec<Value>>,
    handler: Arc<Handler>,
    calls: Arc<AtomicUsize>,
) {
    let (read_half, write_half) = stream.into_split();
    let writer = Arc::new(Mutex::new(write_half));
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(frame) = serde_json::from_str::<Value>(&line) else {
            break;
        };
        let Some(id) = frame.get("id").cloned() else {
            continue;
        };
        let method = frame["method"].as_str().unwrap_or_default();

        let result = match method {
            "initialize" => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": name, "version": "0.0.1"}
            }),
            "tools/list" => json!({"tools": tools.as_slice()}),
            "ping" => json!({}),
            "tools/call" => {
                calls.fetch_add(1, Ordering::SeqCst);
                let tool = frame["params"]["name"].as_str().unwrap_or_default();
                match handler(tool, &frame["params"]["arguments"]) {
                    Reply::Result(value) => value,
                    Reply::Error(code, message) => {
                        send(
                            &writer,
                            json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}),
                        )
                        .await;
                        continue;
                    }
                    Reply::After(delay, value) => {
                        let writer = writer.clone();
                        tokio::spawn(async move {
                            tokio::time::sleep(delay).await;
                            send(&writer, json!({"jsonrpc": "2.0", "id": id, "result": value})).await;
                        });
                        continue;
                    }
                    Reply::Silent => continue,
                    Reply::Disconnect => return,
                }
            }
            other => {
                send(
                    &writer,
                    json!({"jsonrpc": "2.0", "id": id, "error": {"code": -32601, "message": format!("unknown method {other}")}}),
                )
                .await;
                continue;
            }
        };

        send(&writer, json!({"jsonrpc": "2.0", "id": id, "result": result})).await;
    }
}
