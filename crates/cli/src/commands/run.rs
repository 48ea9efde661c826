//! `crucible run`: one goal, envelopes on stdout, approvals on stdin.

use std::path::Path;

use crucible_core::agent::ApprovalDecision;
use tracing::info;

use crate::host::{Host, Interjection, load_config, stdin_lines};

pub async fn run(config_path: &Path, goal: String, session: Option<String>) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let persist = session.is_some();
    let mut host = Host::start(config, session, persist).await?;
    info!(session_id = %host.agent().session_id().await, "Running goal");

    let mut inbox = stdin_lines();
    let mut stdout = tokio::io::stdout();
    host.turn(goal, &mut inbox, &mut stdout, parse_answer).await?;
    Ok(())
}

/// A bare `allow`, `always` or `deny` line.
pub fn parse_answer(line: &str) -> Interjection {
    match ApprovalDecision::parse(line) {
        Some(decision) => Interjection::Decision(decision),
        None => Interjection::Invalid(format!(
            "Expected allow, always or deny, got '{}'",
            line.trim()
        )),
    }
}
