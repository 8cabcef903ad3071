//! Operator shell for the coordinator

use std::fmt::Write as _;
use std::str::FromStr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

use clocksync_core::{NodeId, SyncError, SyncResult};

use crate::Coordinator;

pub const HELP: &str = "\
Commands:
  sync          run a synchronization round now
  list          show registered nodes
  remove <id>   drop a node from the registry
  clear         drop every node
  report        show the last round report
  report json   same, as JSON
  help          this text
  exit          stop the coordinator";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Sync,
    List,
    Remove(NodeId),
    Clear,
    Report { json: bool },
    Help,
    Exit,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let verb = words.next().ok_or_else(|| "empty command".to_string())?;
        let arg = words.next();
        if words.next().is_some() {
            return Err(format!("too many arguments to {:?}", verb));
        }

        match (verb.to_ascii_lowercase().as_str(), arg) {
            ("sync", None) => Ok(Command::Sync),
            ("list" | "ls", None) => Ok(Command::List),
            ("remove" | "rm", Some(id)) => Ok(Command::Remove(NodeId::new(id))),
            ("remove" | "rm", None) => Err("usage: remove <id>".to_string()),
            ("clear", None) => Ok(Command::Clear),
            ("report", None) => Ok(Command::Report { json: false }),
            ("report", Some("json")) => Ok(Command::Report { json: true }),
            ("help" | "?", None) => Ok(Command::Help),
            ("exit" | "quit", None) => Ok(Command::Exit),
            (other, _) => Err(format!("unknown command {:?}, try \"help\"", other)),
        }
    }
}

/// Result of one command
#[derive(Debug, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Exit,
}

pub struct Shell {
    coordinator: Coordinator,
}

impl Shell {
    pub fn new(coordinator: Coordinator) -> Self {
        Shell { coordinator }
    }

    pub async fn execute(&self, command: Command) -> Reply {
        let registry = self.coordinator.registry();
        let text = match command {
            Command::Sync => match self.coordinator.run_round().await {
                Ok(report) => report.to_string(),
                Err(e) => format!("round failed: {}", e),
            },
            Command::List => {
                let ids = registry.ids();
                if ids.is_empty() {
                    "no nodes registered".to_string()
                } else {
                    let mut out = format!("{} registered:", ids.len());
                    for id in ids {
                        let _ = write!(out, "\n  {}", id);
                    }
                    out
                }
            }
            Command::Remove(id) => match registry.remove(&id) {
                Some(_) => {
                    tracing::info!(node = %id, "Removed by operator");
                    format!("removed {}", id)
                }
                None => format!("{} is not registered", id),
            },
            Command::Clear => {
                let n = registry.clear();
                tracing::info!(removed = n, "Registry cleared by operator");
                format!("removed {} node(s)", n)
            }
            Command::Report { json } => match self.coordinator.last_report() {
                None => "no round has run yet".to_string(),
                Some(report) if json => report
                    .to_json()
                    .unwrap_or_else(|e| format!("cannot encode report: {}", e)),
                Some(report) => report.to_string(),
            },
            Command::Help => HELP.to_string(),
            Command::Exit => return Reply::Exit,
        };
        Reply::Text(text)
    }

    /// Read commands line by line until `exit` or end of input
    pub async fn run<R, W>(&self, input: R, mut output: W) -> SyncResult<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let io = |e: std::io::Error| SyncError::Transport(format!("shell: {}", e));
        let mut lines = input.lines();

        output.write_all(b"> ").await.map_err(io)?;
        output.flush().await.map_err(io)?;
        while let Some(line) = lines.next_line().await.map_err(io)? {
            if !line.trim().is_empty() {
                let text = match line.parse::<Command>() {
                    Ok(command) => match self.execute(command).await {
                        Reply::Text(text) => text,
                        Reply::Exit => break,
                    },
                    Err(e) => e,
                };
                output.write_all(text.as_bytes()).await.map_err(io)?;
                output.write_all(b"\n").await.map_err(io)?;
            }
            output.write_all(b"> ").await.map_err(io)?;
            output.flush().await.map_err(io)?;
        }
        Ok(())
    }
}
