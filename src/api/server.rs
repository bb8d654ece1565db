use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::application::TraceUsecase;
use crate::infrastructure::config::TraceConfig;
use crate::infrastructure::IndentParser;

#[derive(Debug, Deserialize)]
struct CommandReq {
    command: String,
    params: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct TraceParams {
    definition: String,
    call: String,
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "dot".to_string()
}

pub fn start_server(port: u16, config: TraceConfig) -> Result<()> {
    let address = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&address)
        .with_context(|| format!("Failed to bind to {}", address))?;
    serve(listener, config)
}

/// Accept JSON-lines clients until one sends `SHUTDOWN`.
pub fn serve(listener: TcpListener, config: TraceConfig) -> Result<()> {
    let local = listener.local_addr()?;
    info!(%local, "IPC server listening");
    let stop = Arc::new(AtomicBool::new(false));

    for stream in listener.incoming() {
        if stop.load(Ordering::SeqCst) {
            break;
        }
        match stream {
            Ok(stream) => {
                let stop = Arc::clone(&stop);
                let config = config.clone();
                thread::spawn(move || {
                    if let Err(e) = handle_connection(stream, &config, &stop, local) {
                        warn!(error = %e, "connection error");
                    }
                });
            }
            Err(e) => warn!(error = %e, "accept error"),
        }
    }

    info!("IPC server stopped");
    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    config: &TraceConfig,
    stop: &AtomicBool,
    local: SocketAddr,
) -> Result<()> {
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line)? == 0 {
            break;
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let shutdown = matches!(
            serde_json::from_str::<CommandReq>(trimmed),
            Ok(ref req) if req.command == "SHUTDOWN"
        );

        let response = match process_command(trimmed, config) {
            Ok(data) => json!({ "status": "success", "data": data }),
            Err(e) => json!({ "status": "error", "message": format!("{:#}", e) }),
        };

        let response_str = serde_json::to_string(&response)?;
        stream.write_all(response_str.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;

        if shutdown {
            info!("shutdown requested");
            stop.store(true, Ordering::SeqCst);
            // Wake the accept loop so it sees the flag.
            let _ = TcpStream::connect(local);
            break;
        }
    }
    Ok(())
}

fn process_command(json_str: &str, config: &TraceConfig) -> Result<serde_json::Value> {
    let req: CommandReq = serde_json::from_str(json_str).context("Invalid JSON format")?;

    match req.command.as_str() {
        "PING" => Ok(json!("PONG")),
        "TRACE" => handle_trace(req.params, config),
        "SHUTDOWN" => Ok(json!("Shutting down...")),
        _ => anyhow::bail!("Unknown command: {}", req.command),
    }
}

fn handle_trace(params: Option<serde_json::Value>, config: &TraceConfig) -> Result<serde_json::Value> {
    let params = params.ok_or_else(|| anyhow::anyhow!("Missing params for TRACE"))?;
    let params: TraceParams = serde_json::from_value(params).context("Invalid TRACE params")?;

    let exporter = super::exporter_for(&params.format, config.show_none_returns)
        .ok_or_else(|| anyhow::anyhow!("Unknown format: {}", params.format))?;

    info!(call = %params.call, format = %params.format, "TRACE");
    let usecase = TraceUsecase {
        parser: &IndentParser,
        exporter: exporter.as_ref(),
        config: config.clone(),
    };
    let rendered = usecase.run(&params.definition, &params.call)?;
    Ok(json!(rendered))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_ping_and_unknown() {
        let config = TraceConfig::default();
        assert_eq!(process_command(r#"{"command":"PING"}"#, &config).unwrap(), json!("PONG"));
        assert!(process_command(r#"{"command":"LIST"}"#, &config).is_err());
        assert!(process_command("not json", &config).is_err());
    }

    #[test]
    fn test_process_trace() {
        let config = TraceConfig::default();
        let req = json!({
            "command": "TRACE",
            "params": {
                "definition": "def f(n):\n    return n\n",
                "call": "f(4)",
                "format": "text"
            }
        });
        let data = process_command(&req.to_string(), &config).unwrap();
        assert_eq!(data, json!("4 = f(4)"));
    }

    #[test]
    fn test_process_trace_errors() {
        let config = TraceConfig::default();
        let missing = json!({ "command": "TRACE" });
        assert!(process_command(&missing.to_string(), &config).is_err());

        let bad_format = json!({
            "command": "TRACE",
            "params": { "definition": "def f():\n    pass\n", "call": "f()", "format": "svg" }
        });
        let err = process_command(&bad_format.to_string(), &config).unwrap_err();
        assert!(err.to_string().contains("Unknown format"));
    }
}
