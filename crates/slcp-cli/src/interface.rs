//! Interactive chat prompt.
//!
//! Reads slash commands from stdin and prints messenger events as they
//! arrive. Image sends run in the background so the prompt stays usable.

use crate::command::{ChatCommand, HELP};
use crate::progress::TransferBars;
use anyhow::{Context, Result};
use slcp_core::protocol::UserEntry;
use slcp_net::{ChatEvent, Direction, Messenger, NetError};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

/// Outcome of a background image send.
struct SendOutcome {
    to: String,
    path: PathBuf,
    result: Result<u64, NetError>,
}

enum Flow {
    Continue,
    Quit,
}

pub struct ChatInterface {
    messenger: Messenger,
    events: mpsc::UnboundedReceiver<ChatEvent>,
    bars: TransferBars,
    sends_tx: mpsc::UnboundedSender<SendOutcome>,
    sends_rx: mpsc::UnboundedReceiver<SendOutcome>,
}

impl ChatInterface {
    pub fn new(messenger: Messenger, events: mpsc::UnboundedReceiver<ChatEvent>) -> Self {
        let (sends_tx, sends_rx) = mpsc::unbounded_channel();
        Self {
            messenger,
            events,
            bars: TransferBars::new(),
            sends_tx,
            sends_rx,
        }
    }

    /// Announce ourselves, then serve the prompt until `/quit`, Ctrl-C or EOF.
    pub async fn run(mut self) -> Result<()> {
        let identity = self.messenger.identity().clone();
        println!(
            "Chatting as {} on {}. Type /help for commands.",
            identity.handle, identity.addr
        );

        self.messenger.join().await.context("failed to send JOIN")?;
        self.messenger.who().await.context("failed to send WHO")?;

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let Some(line) = line.context("failed to read from stdin")? else {
                        break;
                    };
                    match ChatCommand::parse(&line) {
                        Ok(Some(command)) => {
                            if let Flow::Quit = self.execute(command).await {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(usage) => self.print(&format!("! {usage}")),
                    }
                }
                Some(event) = self.events.recv() => self.show_event(event),
                Some(outcome) = self.sends_rx.recv() => self.show_send_outcome(outcome),
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        if let Err(e) = self.messenger.leave().await {
            tracing::warn!("failed to send LEAVE: {}", e);
        }
        self.messenger.shutdown();
        println!("Bye.");
        Ok(())
    }

    async fn execute(&mut self, command: ChatCommand) -> Flow {
        let result = match command {
            ChatCommand::Join => self.messenger.join().await,
            ChatCommand::Leave => self.messenger.leave().await,
            ChatCommand::Who => self.messenger.who().await,
            ChatCommand::Whois { handle } => self.messenger.whois(&handle).await,
            ChatCommand::Msg { to, text } => self.messenger.send_message(&to, &text).await,
            ChatCommand::Img { to, path } => {
                self.spawn_image_send(to, path);
                Ok(())
            }
            ChatCommand::Peers => {
                let peers = self.messenger.peers().await;
                self.print(&format_peers(&peers));
                Ok(())
            }
            ChatCommand::Help => {
                self.print(HELP);
                Ok(())
            }
            ChatCommand::Quit => return Flow::Quit,
        };
        if let Err(e) = result {
            self.print(&format!("! {e}"));
        }
        Flow::Continue
    }

    fn spawn_image_send(&self, to: String, path: PathBuf) {
        let messenger = self.messenger.clone();
        let outcomes = self.sends_tx.clone();
        tokio::spawn(async move {
            let result = messenger.send_image(&to, &path).await;
            let _ = outcomes.send(SendOutcome { to, path, result });
        });
    }

    fn show_event(&mut self, event: ChatEvent) {
        match &event {
            ChatEvent::Transfer(progress) => {
                self.bars.update(progress);
                return;
            }
            ChatEvent::TransferFailed { peer, .. } => self.bars.abandon(Direction::Receive, peer),
            _ => {}
        }
        if let Some(line) = format_event(&event) {
            self.print(&line);
        }
    }

    fn show_send_outcome(&mut self, outcome: SendOutcome) {
        match outcome.result {
            Ok(size) => self.print(&format!(
                "* sent {} ({} bytes) to {}",
                outcome.path.display(),
                size,
                outcome.to
            )),
            Err(e) => {
                self.bars.abandon(Direction::Send, &outcome.to);
                self.print(&format!("! could not send {}: {e}", outcome.path.display()));
            }
        }
    }

    fn print(&self, line: &str) {
        self.bars.suspend(|| println!("{line}"));
    }
}

/// Render an event for the terminal. Progress reports have no text form.
pub fn format_event(event: &ChatEvent) -> Option<String> {
    let line = match event {
        ChatEvent::PeerJoined { handle, addr } => format!("* {handle} joined ({addr})"),
        ChatEvent::PeerLeft { handle } => format!("* {handle} left"),
        ChatEvent::KnownUsers(users) if users.is_empty() => "* nobody answered".to_string(),
        ChatEvent::KnownUsers(users) => format!("* online: {}", join_users(users)),
        ChatEvent::Message { from, text, at } => {
            format!("[{}] {from}: {text}", at.format("%H:%M:%S"))
        }
        ChatEvent::ImageAnnounced { from, size } => {
            format!("* {from} is sending an image ({size} bytes)")
        }
        ChatEvent::ImageReceived { from, path, size } => {
            format!("* image from {from} saved to {} ({size} bytes)", path.display())
        }
        ChatEvent::Located(user) => format!("* {} is at {}", user.handle, user.addr()),
        ChatEvent::TransferFailed { peer, error } => {
            format!("! transfer with {peer} failed: {error}")
        }
        ChatEvent::Transfer(_) => return None,
    };
    Some(line)
}

pub fn format_peers(peers: &[UserEntry]) -> String {
    if peers.is_empty() {
        "* no known peers; try /who".to_string()
    } else {
        format!("* known peers: {}", join_users(peers))
    }
}

fn join_users(users: &[UserEntry]) -> String {
    users
        .iter()
        .map(|u| format!("{} ({})", u.handle, u.addr()))
        .collect::<Vec<_>>()
        .join(", ")
}
