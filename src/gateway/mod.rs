//! Message gateway — turns chat messages into scheduler calls.
//!
//! Each chat has a current directory (the workspace root until it runs
//! `/cd`). Plain text is submitted as a task keyed by that directory.

pub mod command;
pub mod format;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::RwLock;

use crate::channels::{Channel, IncomingMessage, OutgoingResponse};
use crate::error::{ChannelError, SchedulerError};
use crate::rules::HomeFiles;
use crate::scheduler::{Scheduler, StopTarget, Submission, TaskId};
use crate::workspace::Workspace;

pub use command::Command;
pub use format::ChannelSink;

/// Routes parsed commands from one channel into the scheduler.
pub struct Gateway {
    scheduler: Scheduler,
    channel: Arc<dyn Channel>,
    workspace: Workspace,
    home: HomeFiles,
    max_message_len: usize,
    /// reply address → current key.
    current: RwLock<HashMap<String, String>>,
}

impl Gateway {
    pub fn new(
        scheduler: Scheduler,
        channel: Arc<dyn Channel>,
        workspace: Workspace,
        home: HomeFiles,
        max_message_len: usize,
    ) -> Self {
        Self {
            scheduler,
            channel,
            workspace,
            home,
            max_message_len,
            current: RwLock::new(HashMap::new()),
        }
    }

    /// Receive and answer messages until the channel closes or `shutdown` resolves.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) -> Result<(), ChannelError> {
        let mut messages = self.channel.start().await?;
        tracing::info!(channel = self.channel.name(), "Gateway listening");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                msg = messages.next() => {
                    let Some(msg) = msg else {
                        tracing::info!(channel = self.channel.name(), "Channel closed");
                        break;
                    };
                    for reply in self.handle(&msg).await {
                        if let Err(e) = self.channel.respond(&msg, OutgoingResponse::text(reply)).await {
                            tracing::warn!(channel = self.channel.name(), "Failed to send reply: {e}");
                        }
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("Gateway shutting down");
                    break;
                }
            }
        }

        self.channel.shutdown().await?;
        Ok(())
    }

    /// Handle one message, returning the replies to send back in order.
    pub async fn handle(&self, msg: &IncomingMessage) -> Vec<String> {
        let command = Command::parse(&msg.content);
        tracing::debug!(channel = %msg.channel, user = %msg.user_id, ?command, "Message received");

        let replies = match command {
            Command::Task(text) => self.submit(msg, text).await,
            Command::Start => vec![format!(
                "🤖 Ready. Send text to run it as a task.\n\n{}",
                self.projects(msg).await
            )],
            Command::Projects => vec![self.projects(msg).await],
            Command::Cd(name) => vec![self.change_dir(msg, name.as_deref()).await],
            Command::Create(name) => vec![self.create(name.as_deref()).await],
            Command::Status => {
                let snapshot = self.scheduler.snapshot().await;
                vec![format::render_status(&snapshot, &self.workspace)]
            }
            Command::Stop(arg) => vec![self.stop(msg, arg.as_deref()).await],
            Command::Help => vec![command::HELP.to_string()],
            Command::Unknown(name) => vec![format!("Unknown command /{name}.\n\n{}", command::HELP)],
        };

        replies
            .into_iter()
            .map(|reply| format::truncate_message(&reply, self.max_message_len))
            .collect()
    }

    async fn current_key(&self, msg: &IncomingMessage) -> String {
        self.current
            .read()
            .await
            .get(&msg.reply_to)
            .cloned()
            .unwrap_or_else(|| self.workspace.root_key())
    }

    async fn submit(&self, msg: &IncomingMessage, text: String) -> Vec<String> {
        let key = self.current_key(msg).await;
        let rules = self.home.rules().await;

        let mut replies: Vec<String> = rules.warning().into_iter().collect();
        let submission = Submission::new(&key, &text)
            .with_input(rules.apply(&text))
            .with_reply_to(&msg.reply_to);

        match self.scheduler.submit(submission).await {
            Ok(receipt) => {
                let project = self.workspace.display_name(&key);
                replies.push(format::render_receipt(&receipt, &project));
            }
            Err(e) => replies.push(format!("⚠️ {e}")),
        }
        replies
    }

    async fn projects(&self, msg: &IncomingMessage) -> String {
        let current = self.workspace.display_name(&self.current_key(msg).await);
        match self.workspace.list_projects().await {
            Ok(projects) if projects.is_empty() => format!(
                "Workspace is empty. Create one with /create <name>.\nCurrent directory: {current}"
            ),
            Ok(projects) => {
                let lines: Vec<String> = projects.iter().map(|p| format!("/cd {p}")).collect();
                format!(
                    "📁 Projects:\n{}\n/cd (🏠 Root Directory)\n\nCurrent directory: {current}",
                    lines.join("\n")
                )
            }
            Err(e) => {
                tracing::error!("Error listing projects: {e}");
                format!("❌ Failed to list projects: {e}")
            }
        }
    }

    async fn change_dir(&self, msg: &IncomingMessage, name: Option<&str>) -> String {
        let (key, display) = match name {
            None => {
                let root = self.workspace.root_key();
                let display = format!("Root Directory {root}");
                (root, display)
            }
            Some(name) => match self.workspace.project_key(name).await {
                Ok(key) => (key, name.to_string()),
                Err(e) => return format!("⚠️ {e}"),
            },
        };

        self.current.write().await.insert(msg.reply_to.clone(), key);
        format!(
            "✅ Current working directory switched to: {display}\nSubsequent tasks will execute in this folder."
        )
    }

    async fn create(&self, name: Option<&str>) -> String {
        let Some(name) = name else {
            return "Usage: /create <project_name>".to_string();
        };
        match self.workspace.create_project(name).await {
            Ok(_) => format!("✅ Project '{name}' created successfully."),
            Err(e) => format!("⚠️ {e}"),
        }
    }

    async fn stop(&self, msg: &IncomingMessage, arg: Option<&str>) -> String {
        let (target, label) = match self.stop_target(msg, arg).await {
            Ok(resolved) => resolved,
            Err(reply) => return reply,
        };
        let outcome = self.scheduler.stop(target).await;
        format::render_stop(&outcome, &label)
    }

    /// `#12`/`12` names a task, anything else a project; nothing means here.
    async fn stop_target(
        &self,
        msg: &IncomingMessage,
        arg: Option<&str>,
    ) -> Result<(StopTarget, String), String> {
        let Some(arg) = arg else {
            let key = self.current_key(msg).await;
            let label = self.workspace.display_name(&key);
            return Ok((StopTarget::Key(key), label));
        };

        if let Ok(id) = arg.parse::<TaskId>() {
            return Ok((StopTarget::Task(id), format!("#{id}")));
        }
        if arg.starts_with('#') {
            return Err(format!("⚠️ {}", SchedulerError::InvalidIdentifier(arg.to_string())));
        }

        match self.workspace.project_key(arg).await {
            Ok(key) => Ok((StopTarget::Key(key), arg.to_string())),
            Err(e) => Err(format!("⚠️ {e}")),
        }
    }
}
