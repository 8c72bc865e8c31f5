//! Line-oriented console for a standalone node
//!
//! Stands in for a game server: join/leave/afk/back feed the roster and AFK
//! set, bind/balance go through the node's command boundary.

use pte_core::{format_amount, ParticipantId};
use pte_node::{AfkSet, CommandReply, OnlineRoster, PteNode};
use std::io::BufRead;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Join(ParticipantId),
    Leave(ParticipantId),
    Afk(ParticipantId),
    Back(ParticipantId),
    Bind(ParticipantId, Option<String>),
    Balance(ParticipantId),
    Status,
    Help,
    Quit,
}

const HELP: &str = "\
commands:
  join <id>            participant comes online
  leave <id>           participant goes offline
  afk <id>             participant stops earning
  back <id>            participant earns again
  bind <id> [address]  set the payout wallet
  balance <id>         show the bound wallet balance
  status               accrual counters
  quit                 flush and stop";

/// Parse one console line. Blank lines parse to `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };

    let mut participant = || {
        words
            .next()
            .map(ParticipantId::new)
            .ok_or_else(|| format!("usage: {} <id>", verb))
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "join" => ConsoleCommand::Join(participant()?),
        "leave" => ConsoleCommand::Leave(participant()?),
        "afk" => ConsoleCommand::Afk(participant()?),
        "back" => ConsoleCommand::Back(participant()?),
        "balance" => ConsoleCommand::Balance(participant()?),
        "bind" => {
            let id = participant()?;
            ConsoleCommand::Bind(id, words.next().map(str::to_string))
        }
        "status" => ConsoleCommand::Status,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => return Err(format!("unknown command '{}', try 'help'", other)),
    };
    Ok(Some(command))
}

/// Everything the console acts on
pub struct Console {
    pub node: Arc<PteNode>,
    pub roster: Arc<OnlineRoster>,
    pub afk: Arc<AfkSet>,
}

impl Console {
    /// Apply a command and return the text to print
    pub fn execute(&self, command: ConsoleCommand) -> String {
        match command {
            ConsoleCommand::Join(id) => {
                if self.roster.join(id.clone()) {
                    format!("{} joined", id)
                } else {
                    format!("{} is already online", id)
                }
            }
            ConsoleCommand::Leave(id) => {
                self.afk.mark_active(&id);
                if self.roster.leave(&id) {
                    format!("{} left", id)
                } else {
                    format!("{} is not online", id)
                }
            }
            ConsoleCommand::Afk(id) => {
                self.afk.mark_afk(id.clone());
                format!("{} is AFK", id)
            }
            ConsoleCommand::Back(id) => {
                self.afk.mark_active(&id);
                format!("{} is back", id)
            }
            ConsoleCommand::Bind(id, address) => {
                CommandReply::for_bind(&self.node.bind(&id, address.as_deref())).to_string()
            }
            ConsoleCommand::Balance(id) => {
                CommandReply::for_balance(&self.node.balance(&id)).to_string()
            }
            ConsoleCommand::Status => {
                let stats = self.node.scheduler().stats();
                format!(
                    "online: {}, ticks: {} completed / {} idle / {} skipped / {} failed, \
                     saves: {} ({} deferred), resyncs: {}, rate: {} PTE/s",
                    self.roster.len(),
                    stats.ticks_completed,
                    stats.ticks_idle,
                    stats.ticks_skipped_busy,
                    stats.ticks_failed,
                    stats.saves,
                    stats.saves_deferred,
                    stats.resyncs,
                    format_amount(self.node.config().accrual.coins_per_second)
                )
            }
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => "stopping".to_string(),
        }
    }

    /// Serve stdin until `quit`. Stdin closing only ends the console.
    pub async fn run(self, quit_tx: oneshot::Sender<()>) {
        let mut lines = spawn_stdin_reader();
        while let Some(line) = lines.recv().await {
            match parse(&line) {
                Ok(Some(ConsoleCommand::Quit)) => {
                    println!("{}", self.execute(ConsoleCommand::Quit));
                    let _ = quit_tx.send(());
                    return;
                }
                Ok(Some(command)) => println!("{}", self.execute(command)),
                Ok(None) => {}
                Err(message) => println!("{}", message),
            }
        }
        tracing::debug!("Console input closed");
    }
}

/// Read stdin on a detached thread so a pending read never holds up exit
fn spawn_stdin_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else {
                break;
            };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });
    rx
}
