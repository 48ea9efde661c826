//! The host side of a session: one agent, one translator, one store.
//!
//! A [`Host`] feeds goals to the agent core, writes every translated
//! envelope as a JSON line, routes approval answers from the input stream
//! back to the waiting loop, and persists the session after each turn.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use crucible_agent::{AgentCore, AgentSettings, ChannelApprover};
use crucible_config::AppConfig;
use crucible_core::agent::ApprovalDecision;
use crucible_core::backend::Backend;
use crucible_core::error::BackendError;
use crucible_core::session::{SessionDocument, SessionStore};
use crucible_core::tool::ToolRegistry;
use crucible_protocol::{PromptKind, ProtocolEvent, Translator};
use crucible_sessions::FileSessionStore;
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Key under which the translator's turn counter is kept in session data.
pub const MESSAGE_COUNT_KEY: &str = "message_count";

/// What an input line means while a turn is running.
#[derive(Debug, Clone, PartialEq)]
pub enum Interjection {
    /// An answer to an approval prompt
    Decision(ApprovalDecision),
    /// A request for after the turn
    Later,
    /// Unusable input; the message goes out as an error card
    Invalid(String),
}

pub type BackendFactory =
    Box<dyn Fn(&AppConfig) -> Result<Arc<dyn Backend>, BackendError> + Send + Sync>;

/// Load the config file at `path` with environment overrides.
pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    AppConfig::load_with_env(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))
}

/// Forward stdin lines into a channel. The channel closes at EOF.
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(32);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to read stdin");
                    break;
                }
            }
        }
        debug!("stdin closed");
    });
    rx
}

/// Write one envelope as a JSON line and flush.
pub async fn write_envelope<W>(out: &mut W, envelope: &ProtocolEvent) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = envelope.to_line()?;
    line.push('\n');
    out.write_all(line.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

pub struct Host {
    config: AppConfig,
    factory: BackendFactory,
    tools: Arc<ToolRegistry>,
    store: Arc<dyn SessionStore>,
    persist: bool,
    agent: AgentCore,
    approvals: mpsc::Sender<ApprovalDecision>,
    translator: Translator,
}

impl Host {
    /// Build from config: the configured backend, no domain tools, and
    /// session files under `sessions.directory`.
    pub async fn start(config: AppConfig, session: Option<String>, persist: bool) -> anyhow::Result<Self> {
        let store = Arc::new(FileSessionStore::new(config.sessions.resolved_directory()));
        Self::assemble(
            config,
            Box::new(crucible_backends::build_from_config),
            Arc::new(ToolRegistry::new()),
            store,
            session,
            persist,
        )
        .await
    }

    /// Build from explicit parts. A `session` id is loaded from the store
    /// when it exists and started empty under that id when it doesn't.
    pub async fn assemble(
        config: AppConfig,
        factory: BackendFactory,
        tools: Arc<ToolRegistry>,
        store: Arc<dyn SessionStore>,
        session: Option<String>,
        persist: bool,
    ) -> anyhow::Result<Self> {
        let backend = factory(&config)?;
        let (agent, approvals) = build_agent(&config, backend, tools.clone());
        let mut translator = Translator::new();

        if let Some(id) = session {
            let document = match store.load(&id).await? {
                Some(document) => document,
                None => {
                    info!(session_id = %id, "Starting new session");
                    SessionDocument::new(&id)
                }
            };
            let message_count = document
                .data
                .get(MESSAGE_COUNT_KEY)
                .and_then(|v| v.as_u64())
                .unwrap_or(0);
            agent.restore(document).await;
            translator = translator.with_totals(agent.session_cost().await, message_count);
        }

        Ok(Self {
            config,
            factory,
            tools,
            store,
            persist,
            agent,
            approvals,
            translator,
        })
    }

    pub fn agent(&self) -> &AgentCore {
        &self.agent
    }

    /// Run one goal to its terminal envelope.
    ///
    /// Lines arriving on `inbox` while the turn runs are classified by
    /// `interpret`. Decisions are matched to approval prompts in order; one
    /// that arrives before its prompt waits for it. Lines meant for later
    /// are returned in arrival order. If the inbox closes, outstanding and
    /// later prompts are denied so the turn can finish.
    pub async fn turn<W, F>(
        &mut self,
        goal: String,
        inbox: &mut mpsc::Receiver<String>,
        out: &mut W,
        interpret: F,
    ) -> anyhow::Result<Vec<String>>
    where
        W: AsyncWrite + Unpin,
        F: Fn(&str) -> Interjection,
    {
        let mut events = self.agent.process_stream(goal);
        let mut pending = 0usize;
        let mut early: VecDeque<ApprovalDecision> = VecDeque::new();
        let mut inbox_open = true;
        let mut deferred = Vec::new();

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    for envelope in self.translator.translate(&event) {
                        if matches!(envelope, ProtocolEvent::Prompt { kind: PromptKind::Approval, .. }) {
                            match early.pop_front() {
                                Some(decision) => self.send_decision(decision).await,
                                None => pending += 1,
                            }
                        }
                        write_envelope(out, &envelope).await?;
                    }
                    if !inbox_open {
                        pending = self.deny_all(pending).await;
                    }
                }
                line = inbox.recv(), if inbox_open => match line {
                    Some(line) if line.trim().is_empty() => {}
                    Some(line) => match interpret(&line) {
                        Interjection::Decision(decision) if pending > 0 => {
                            pending -= 1;
                            self.send_decision(decision).await;
                        }
                        Interjection::Decision(decision) => early.push_back(decision),
                        Interjection::Later => deferred.push(line),
                        Interjection::Invalid(message) => {
                            write_envelope(out, &ProtocolEvent::error_card(&message)).await?;
                        }
                    },
                    None => {
                        inbox_open = false;
                        pending = self.deny_all(pending).await;
                    }
                },
            }
        }

        if !early.is_empty() {
            warn!(count = early.len(), "Discarding approval answers no prompt asked for");
        }
        if self.persist {
            self.save().await;
        }
        Ok(deferred)
    }

    async fn send_decision(&self, decision: ApprovalDecision) {
        debug!(?decision, "Forwarding approval decision");
        if self.approvals.send(decision).await.is_err() {
            warn!("Approver is gone, decision dropped");
        }
    }

    async fn deny_all(&self, pending: usize) -> usize {
        for _ in 0..pending {
            warn!("Input closed, denying pending tool call");
            self.send_decision(ApprovalDecision::Deny).await;
        }
        0
    }

    /// Clear the session and persist the empty state.
    pub async fn reset(&mut self) {
        self.agent.reset().await;
        self.translator.reset();
        if self.persist {
            self.save().await;
        }
    }

    /// Re-read the config and rebuild the agent around the current session.
    ///
    /// History and cost carry over; "always" approvals do not. On failure
    /// the running config and agent are left as they were.
    pub async fn reload(&mut self) -> anyhow::Result<()> {
        let mut fresh = self.config.clone();
        fresh.reload()?;
        let backend = (self.factory)(&fresh)?;

        let snapshot = self.agent.snapshot().await;
        let (agent, approvals) = build_agent(&fresh, backend, self.tools.clone());
        agent.restore(snapshot).await;

        self.agent = agent;
        self.approvals = approvals;
        self.config = fresh;
        info!(model = %self.agent.backend().model(), "Agent rebuilt from reloaded config");
        Ok(())
    }

    /// Persist the current session. Failures are logged, not fatal.
    pub async fn save(&self) {
        let mut document = self.agent.snapshot().await;
        document.data.insert(
            MESSAGE_COUNT_KEY.into(),
            serde_json::json!(self.translator.message_count()),
        );
        match self.store.save(&document).await {
            Ok(()) => debug!(session_id = %document.id, store = %self.store.name(), "Session persisted"),
            Err(e) => warn!(session_id = %document.id, error = %e, "Failed to persist session"),
        }
    }
}

fn build_agent(
    config: &AppConfig,
    backend: Arc<dyn Backend>,
    tools: Arc<ToolRegistry>,
) -> (AgentCore, mpsc::Sender<ApprovalDecision>) {
    let (approver, approvals) = ChannelApprover::new();
    let settings = AgentSettings::from_config(config);
    let agent = AgentCore::new(backend, tools, Arc::new(approver), settings);
    (agent, approvals)
}
