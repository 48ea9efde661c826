//! `crucible serve`: the stdio protocol.
//!
//! Input, one JSON object per line:
//!
//! ```text
//! {"method":"turn","params":{"goal":"..."}}
//! {"method":"approve","params":{"decision":"allow|always|deny"}}
//! {"method":"reset"}
//! {"method":"reload"}
//! ```
//!
//! Output is envelopes only. Malformed input is answered with an error
//! card and the server keeps reading.

use std::collections::VecDeque;
use std::path::Path;

use crucible_core::agent::ApprovalDecision;
use crucible_protocol::ProtocolEvent;
use serde::Deserialize;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::host::{Host, Interjection, load_config, stdin_lines, write_envelope};

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Turn { goal: String },
    Approve(ApprovalDecision),
    Reset,
    Reload,
}

#[derive(Deserialize)]
struct RawRequest {
    method: String,
    #[serde(default)]
    params: serde_json::Value,
}

#[derive(Deserialize)]
struct TurnParams {
    goal: String,
}

#[derive(Deserialize)]
struct ApproveParams {
    decision: String,
}

impl Request {
    pub fn parse(line: &str) -> Result<Self, String> {
        let raw: RawRequest =
            serde_json::from_str(line).map_err(|e| format!("Invalid request: {e}"))?;
        match raw.method.as_str() {
            "turn" => {
                let params: TurnParams = serde_json::from_value(raw.params)
                    .map_err(|e| format!("Invalid turn params: {e}"))?;
                Ok(Self::Turn { goal: params.goal })
            }
            "approve" => {
                let params: ApproveParams = serde_json::from_value(raw.params)
                    .map_err(|e| format!("Invalid approve params: {e}"))?;
                ApprovalDecision::parse(&params.decision)
                    .map(Self::Approve)
                    .ok_or_else(|| format!("Unknown decision '{}'", params.decision))
            }
            "reset" => Ok(Self::Reset),
            "reload" => Ok(Self::Reload),
            other => Err(format!("Unknown method '{other}'")),
        }
    }
}

/// While a turn runs, approvals go to the loop and other requests wait.
fn interpret_in_turn(line: &str) -> Interjection {
    match Request::parse(line) {
        Ok(Request::Approve(decision)) => Interjection::Decision(decision),
        Ok(_) => Interjection::Later,
        Err(message) => Interjection::Invalid(message),
    }
}

pub async fn run(config_path: &Path, session: Option<String>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let mut host = Host::start(config, session, true).await?;
    info!(session_id = %host.agent().session_id().await, "Serving on stdio");

    let mut inbox = stdin_lines();
    let mut stdout = tokio::io::stdout();
    serve(&mut host, &mut inbox, &mut stdout).await
}

/// Handle requests until the inbox closes.
///
/// Requests that arrived during a turn run, in order, once it ends.
pub async fn serve<W>(host: &mut Host, inbox: &mut mpsc::Receiver<String>, out: &mut W) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut backlog: VecDeque<String> = VecDeque::new();
    loop {
        let line = match backlog.pop_front() {
            Some(line) => line,
            None => match inbox.recv().await {
                Some(line) => line,
                None => break,
            },
        };
        if line.trim().is_empty() {
            continue;
        }
        match Request::parse(&line) {
            Ok(Request::Turn { goal }) => {
                let deferred = host.turn(goal, inbox, out, interpret_in_turn).await?;
                backlog.extend(deferred);
            }
            Ok(Request::Approve(_)) => {
                warn!("Approval received outside a turn");
                write_envelope(out, &ProtocolEvent::error_card("No approval is pending")).await?;
            }
            Ok(Request::Reset) => host.reset().await,
            Ok(Request::Reload) => {
                if let Err(e) = host.reload().await {
                    warn!(error = %e, "Reload failed, keeping current configuration");
                    write_envelope(out, &ProtocolEvent::error_card(&format!("Reload failed: {e:#}"))).await?;
                }
            }
            Err(message) => {
                warn!(%message, "Rejected request");
                write_envelope(out, &ProtocolEvent::error_card(&message)).await?;
            }
        }
    }
    info!("Input closed, shutting down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MESSAGE_COUNT_KEY;
    use crate::test_support::{GuardedTool, ScriptedBackend, call, text_response, tool_response};
    use crucible_config::AppConfig;
    use crucible_core::backend::Backend;
    use crucible_core::session::SessionStore;
    use crucible_core::tool::ToolRegistry;
    use crucible_sessions::InMemorySessionStore;
    use std::sync::Arc;

    #[test]
    fn parses_requests() {
        assert_eq!(
            Request::parse(r#"{"method":"turn","params":{"goal":"plot it"}}"#),
            Ok(Request::Turn { goal: "plot it".into() })
        );
        assert_eq!(
            Request::parse(r#"{"method":"approve","params":{"decision":"always"}}"#),
            Ok(Request::Approve(ApprovalDecision::Always))
        );
        assert_eq!(Request::parse(r#"{"method":"reset"}"#), Ok(Request::Reset));
        assert_eq!(Request::parse(r#"{"method":"reload","params":{}}"#), Ok(Request::Reload));
    }

    #[test]
    fn rejects_bad_requests() {
        assert!(Request::parse("not json").unwrap_err().starts_with("Invalid request"));
        assert!(Request::parse(r#"{"method":"turn"}"#).unwrap_err().contains("turn params"));
        assert!(Request::parse(r#"{"method":"approve","params":{"decision":"perhaps"}}"#).is_err());
        assert_eq!(
            Request::parse(r#"{"method":"dance"}"#),
            Err("Unknown method 'dance'".into())
        );
    }

    #[test]
    fn requests_during_a_turn() {
        assert_eq!(
            interpret_in_turn(r#"{"method":"approve","params":{"decision":"deny"}}"#),
            Interjection::Decision(ApprovalDecision::Deny)
        );
        assert_eq!(interpret_in_turn(r#"{"method":"reset"}"#), Interjection::Later);
        assert!(matches!(interpret_in_turn("{"), Interjection::Invalid(_)));
    }

    async fn serve_script(backend: ScriptedBackend, store: Arc<dyn SessionStore>, input: &[&str]) -> Vec<serde_json::Value> {
        let backend: Arc<dyn Backend> = Arc::new(backend);
        let mut host = Host::assemble(
            AppConfig::default(),
            Box::new(move |_| Ok(backend.clone())),
            Arc::new(ToolRegistry::new().with(Arc::new(GuardedTool))),
            store,
            Some("served".into()),
            true,
        )
        .await
        .unwrap();

        let (tx, mut inbox) = mpsc::channel(16);
        for line in input {
            tx.send(line.to_string()).await.unwrap();
        }
        drop(tx);

        let mut out = Vec::new();
        serve(&mut host, &mut inbox, &mut out).await.unwrap();
        String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn serves_turns_with_approval() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let values = serve_script(
            ScriptedBackend::new(vec![
                tool_response(vec![call("c1", "write_file", serde_json::json!({"path": "a.csv"}))]),
                text_response("Saved."),
                text_response("Second answer."),
            ]),
            store.clone(),
            &[
                r#"{"method":"turn","params":{"goal":"save it"}}"#,
                r#"{"method":"approve","params":{"decision":"allow"}}"#,
                r#"{"method":"turn","params":{"goal":"and now?"}}"#,
            ],
        )
        .await;

        let methods: Vec<&str> = values.iter().map(|v| v["method"].as_str().unwrap()).collect();
        assert_eq!(
            methods,
            vec![
                "tool.start", "prompt", "card", "text.delta", "cost", "turn.complete",
                "text.delta", "cost", "turn.complete",
            ]
        );
        assert_eq!(values[1]["params"]["type"], "approval");
        assert_eq!(values[8]["params"]["messageCount"], 2);

        let saved = store.load("served").await.unwrap().unwrap();
        assert_eq!(saved.data[MESSAGE_COUNT_KEY], 2);
    }

    #[tokio::test]
    async fn bad_lines_get_error_cards() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        let values = serve_script(
            ScriptedBackend::new(vec![]),
            store,
            &[
                "garbage",
                "",
                r#"{"method":"approve","params":{"decision":"allow"}}"#,
                r#"{"method":"reload"}"#,
            ],
        )
        .await;

        assert_eq!(values.len(), 3);
        assert!(values.iter().all(|v| v["params"]["cardType"] == "error"));
        assert_eq!(values[1]["params"]["content"], "No approval is pending");
        assert!(values[2]["params"]["content"].as_str().unwrap().starts_with("Reload failed"));
    }

    #[tokio::test]
    async fn reset_clears_persisted_history() {
        let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
        serve_script(
            ScriptedBackend::new(vec![text_response("hi")]),
            store.clone(),
            &[r#"{"method":"turn","params":{"goal":"hello"}}"#, r#"{"method":"reset"}"#],
        )
        .await;

        let saved = store.load("served").await.unwrap().unwrap();
        assert!(saved.history.is_empty());
    }
}
