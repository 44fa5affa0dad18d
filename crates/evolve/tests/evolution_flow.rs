//! Evolution against a canned local Ollama endpoint
//!
//! A throwaway HTTP server on a loopback port answers `/api/tags` and
//! `/api/chat` with scripted bodies, so the whole stack - client,
//! bridge, engine, sandbox, pattern store - is exercised without a real
//! model or network.

use sovereign_core::Value;
use sovereign_evolve::{
    Capability, ChatRequest, ClientConfig, ClientError, EvoError, Evolution, EvolutionAdapter,
    ModelRegistry, ModelSpec, OllamaClient, SyncBridge,
};
use sovereign_vm::{Vm, VmConfig};
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// What the scripted endpoint does on `/api/chat`.
enum ChatBehavior {
    Content(String),
    Status500,
    Garbage,
    Hang,
}

fn spawn_server(behavior: ChatBehavior) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let behavior = Arc::new(behavior);
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(stream) = stream else { continue };
            let behavior = behavior.clone();
            thread::spawn(move || handle(stream, &behavior));
        }
    });
    format!("http://{}", addr)
}

fn respond(stream: &mut TcpStream, status: &str, body: &str) {
    let _ = write!(
        stream,
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
}

fn handle(mut stream: TcpStream, behavior: &ChatBehavior) {
    let mut reader = BufReader::new(stream.try_clone().unwrap());
    let mut request_line = String::new();
    if reader.read_line(&mut request_line).is_err() {
        return;
    }
    let path = request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("/")
        .to_string();
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).is_err() {
            return;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.to_lowercase().strip_prefix("content-length:") {
            content_length = value.trim().parse().unwrap_or(0);
        }
    }
    let mut body = vec![0u8; content_length];
    if content_length > 0 {
        let _ = reader.read_exact(&mut body);
    }
    // Echo the requested model back so tests can observe selection
    let requested_model = serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["model"].as_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());

    match path.as_str() {
        "/api/tags" => {
            let body = serde_json::json!({
                "models": [
                    {"name": "qwen2.5-coder:latest"},
                    {"name": "deepseek-coder-v2:latest"},
                    {"name": "codellama:latest"}
                ]
            })
            .to_string();
            respond(&mut stream, "200 OK", &body);
        }
        "/api/chat" => match behavior {
            ChatBehavior::Content(content) => {
                let body = serde_json::json!({
                    "model": requested_model,
                    "message": {"role": "assistant", "content": content},
                    "eval_count": 12,
                    "prompt_eval_count": 34
                })
                .to_string();
                respond(&mut stream, "200 OK", &body);
            }
            ChatBehavior::Status500 => respond(&mut stream, "500 Internal Server Error", "{}"),
            ChatBehavior::Garbage => respond(&mut stream, "200 OK", "this is not json"),
            ChatBehavior::Hang => thread::sleep(Duration::from_secs(10)),
        },
        _ => respond(&mut stream, "404 Not Found", "{}"),
    }
}

fn client_config(endpoint: String) -> ClientConfig {
    ClientConfig {
        endpoint,
        max_retries: 0,
        request_timeout: Duration::from_secs(5),
        ..ClientConfig::default()
    }
}

const FAILING_PROGRAM: &str = "PUSH #10\nPUSH #0\nDIV\nHALT";
const GOOD_CANDIDATE: &str = "PUSH #1\nPUSH #1\nADD\nHALT";

#[tokio::test]
async fn evolve_happy_path_updates_success_rate() {
    let endpoint = spawn_server(ChatBehavior::Content(GOOD_CANDIDATE.to_string()));
    let evolution = Evolution::new(client_config(endpoint)).unwrap();

    let candidate = evolution
        .evolve(FAILING_PROGRAM, "Division by zero: 10 / 0", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(candidate, GOOD_CANDIDATE);

    let store = evolution.store();
    assert_eq!(store.patterns().len(), 1);
    let pattern = store.pattern(0).unwrap();
    assert_eq!(pattern.frequency, 1);
    assert_eq!(pattern.fix_success_rate, 1.0);
    assert_eq!(pattern.fix_templates, vec![GOOD_CANDIDATE.to_string()]);
    let attempt = store.history().next().unwrap();
    assert!(attempt.validated);
    assert_eq!(attempt.candidate, GOOD_CANDIDATE);
    assert!((attempt.score - 1.0).abs() < 1e-9);
}

#[tokio::test]
async fn evolve_rejects_unusable_candidates() {
    let endpoint = spawn_server(ChatBehavior::Content("TOTALLY % BROKEN".to_string()));
    let evolution = Evolution::new(client_config(endpoint)).unwrap();

    let err = evolution
        .evolve(FAILING_PROGRAM, "Division by zero: 10 / 0", Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, EvoError::NoCandidate(_)));

    let store = evolution.store();
    let pattern = store.pattern(0).unwrap();
    assert_eq!(pattern.fix_success_rate, 0.0);
    assert!(pattern.fix_templates.is_empty());
    assert_eq!(store.history_len(), 3);
    assert!(store.history().all(|a| !a.validated && a.score == 0.0));
}

#[tokio::test]
async fn generate_code_scrubs_fences() {
    let endpoint = spawn_server(ChatBehavior::Content(
        "```asm\nPUSH #5\nHALT\n```".to_string(),
    ));
    let evolution = Evolution::new(client_config(endpoint)).unwrap();
    let code = evolution
        .generate_code("push five and halt", Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(code, "PUSH #5\nHALT");
}

/// The registry's fallback chain is walked with the endpoint's tag
/// list as the health probe: an uninstalled primary is skipped in
/// favor of the next healthy candidate.
#[tokio::test]
async fn model_selection_skips_unhealthy_primary() {
    let endpoint = spawn_server(ChatBehavior::Content(GOOD_CANDIDATE.to_string()));
    let mut models = ModelRegistry::new();
    models.register(ModelSpec::new(
        "ghost-model",
        &[Capability::CodeGeneration, Capability::ErrorAnalysis],
    ));
    models.register(ModelSpec::new(
        "codellama",
        &[Capability::CodeGeneration, Capability::ErrorAnalysis],
    ));
    let evolution = Evolution::new(client_config(endpoint))
        .unwrap()
        .with_models(models);

    evolution
        .evolve(FAILING_PROGRAM, "Division by zero: 10 / 0", Duration::from_secs(5))
        .await
        .unwrap();
    // "ghost-model" is not in the tag list; the fallback was used
    let store = evolution.store();
    assert_eq!(store.history().next().unwrap().model, "codellama");
}

/// A chain with no healthy candidate yields `None` from selection and
/// falls back to the client's default model.
#[tokio::test]
async fn model_selection_falls_back_to_default_when_chain_unhealthy() {
    let endpoint = spawn_server(ChatBehavior::Content(GOOD_CANDIDATE.to_string()));
    let mut models = ModelRegistry::new();
    models.register(ModelSpec::new(
        "ghost-model",
        &[Capability::CodeGeneration, Capability::ErrorAnalysis],
    ));
    let config = client_config(endpoint);
    let default_model = config.default_model.clone();
    let evolution = Evolution::new(config).unwrap().with_models(models);

    evolution
        .evolve(FAILING_PROGRAM, "Division by zero: 10 / 0", Duration::from_secs(5))
        .await
        .unwrap();
    let store = evolution.store();
    assert_eq!(store.history().next().unwrap().model, default_model);
}

/// The full loop the VM sees: a failing program's source on the stack,
/// `EVOLVE` with a context operand, candidate pushed back - and the
/// pattern's success rate strictly greater than before the attempt.
#[test]
fn vm_evolve_opcode_end_to_end() {
    let endpoint = spawn_server(ChatBehavior::Content(GOOD_CANDIDATE.to_string()));
    let bridge = Arc::new(SyncBridge::new());
    bridge.initialize().unwrap();
    let evolution = Arc::new(Evolution::new(client_config(endpoint)).unwrap());

    let rate_before = {
        let mut store = evolution.store();
        let index = store.observe("Division by zero: 10 / 0");
        store.pattern(index).unwrap().fix_success_rate
    };

    let mut vm = Vm::new(VmConfig::default()).unwrap();
    vm.set_adapter(Arc::new(EvolutionAdapter::new(evolution.clone(), bridge.clone())));
    let source = "PUSH \"PUSH #10\\nPUSH #0\\nDIV\\nHALT\"\nEVOLVE \"Division by zero: 10 / 0\"\nHALT";
    vm.load(sovereign_asm::parse(source).unwrap()).unwrap();
    vm.run().unwrap();

    let snap = vm.dump_state();
    assert_eq!(snap.data_stack, vec![Value::Str(GOOD_CANDIDATE.to_string())]);

    let rate_after = evolution.store().pattern(0).unwrap().fix_success_rate;
    assert!(rate_after > rate_before);

    bridge.shutdown();
}

#[test]
fn vm_llmgen_opcode_end_to_end() {
    let endpoint = spawn_server(ChatBehavior::Content("PUSH #7\nHALT".to_string()));
    let bridge = Arc::new(SyncBridge::new());
    bridge.initialize().unwrap();
    let evolution = Arc::new(Evolution::new(client_config(endpoint)).unwrap());

    let mut vm = Vm::new(VmConfig::default()).unwrap();
    vm.set_adapter(Arc::new(EvolutionAdapter::new(evolution, bridge.clone())));
    vm.load(sovereign_asm::parse("LLMGEN \"push seven\"\nHALT").unwrap())
        .unwrap();
    vm.run().unwrap();
    assert_eq!(
        vm.dump_state().data_stack,
        vec![Value::Str("PUSH #7\nHALT".to_string())]
    );
    bridge.shutdown();
}

#[tokio::test]
async fn client_surfaces_http_status() {
    let endpoint = spawn_server(ChatBehavior::Status500);
    let client = OllamaClient::new(client_config(endpoint)).unwrap();
    let err = client
        .chat(&ChatRequest::new("m", "hi"))
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::HttpStatus(500));
}

#[tokio::test]
async fn client_surfaces_malformed_body() {
    let endpoint = spawn_server(ChatBehavior::Garbage);
    let client = OllamaClient::new(client_config(endpoint)).unwrap();
    let err = client
        .chat(&ChatRequest::new("m", "hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Malformed(_)));
}

#[tokio::test]
async fn client_times_out_on_hung_endpoint() {
    let endpoint = spawn_server(ChatBehavior::Hang);
    let config = ClientConfig {
        request_timeout: Duration::from_millis(200),
        ..client_config(endpoint)
    };
    let client = OllamaClient::new(config).unwrap();
    let err = client
        .chat(&ChatRequest::new("m", "hi"))
        .await
        .unwrap_err();
    assert_eq!(err, ClientError::Timeout);
}

#[tokio::test]
async fn client_lists_models() {
    let endpoint = spawn_server(ChatBehavior::Status500);
    let client = OllamaClient::new(client_config(endpoint)).unwrap();
    let models = client.list_models().await.unwrap();
    assert!(models.iter().any(|m| m.starts_with("qwen2.5-coder")));
    assert!(client.health().await);
}

/// Adapter faults reach the VM as typed errors and leave its state
/// consistent (the EVOLVE operands stay on the stack).
#[test]
fn vm_state_survives_endpoint_outage() {
    let endpoint = spawn_server(ChatBehavior::Status500);
    let bridge = Arc::new(SyncBridge::new());
    bridge.initialize().unwrap();
    let evolution = Arc::new(Evolution::new(client_config(endpoint)).unwrap());

    let mut vm = Vm::new(VmConfig::default()).unwrap();
    vm.set_adapter(Arc::new(EvolutionAdapter::new(evolution, bridge.clone())));
    let source = "PUSH \"code\"\nPUSH \"error text\"\nEVOLVE\nHALT";
    vm.load(sovereign_asm::parse(source).unwrap()).unwrap();
    let err = vm.run().unwrap_err();
    assert_eq!(err.kind(), sovereign_core::VmErrorKind::LlmUnavailable);

    let snap = vm.dump_state();
    assert_eq!(
        snap.data_stack,
        vec![
            Value::Str("code".to_string()),
            Value::Str("error text".to_string())
        ]
    );
    assert_eq!(snap.pc, 2);
    bridge.shutdown();
}

#[test]
fn pattern_store_round_trips_through_file() {
    let endpoint = spawn_server(ChatBehavior::Status500);
    let evolution = Evolution::new(client_config(endpoint)).unwrap();
    {
        let mut store = evolution.store();
        let index = store.observe("division by zero: 4 / 0");
        store.record_outcome(index, true, Some(GOOD_CANDIDATE));
        store.observe("unknown opcode: FROB");
    }

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patterns.ndjson");
    {
        let file = std::fs::File::create(&path).unwrap();
        evolution.store().export(file).unwrap();
    }

    let fresh = Evolution::new(client_config("http://localhost:11434".to_string())).unwrap();
    {
        let file = std::fs::File::open(&path).unwrap();
        let count = fresh.store().import(BufReader::new(file)).unwrap();
        assert_eq!(count, 2);
    }
    let store = fresh.store();
    assert_eq!(store.patterns().len(), 2);
    assert!(
        store
            .patterns()
            .iter()
            .any(|p| p.fix_templates.contains(&GOOD_CANDIDATE.to_string()))
    );
}
