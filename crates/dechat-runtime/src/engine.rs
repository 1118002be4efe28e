//! Engine Task
//!
//! The single logical owner of the [`ReconciliationEngine`]. Event producers
//! (the composer path, transfer watchers, inbound peer feeds) push
//! [`EngineEvent`]s into a bounded channel; control requests arrive on a
//! separate command channel with oneshot replies.

use std::path::PathBuf;

use dechat_core::{
    DechatError, EngineEvent, EngineStats, HistorySnapshot, ReconciliationEngine, Result,
    StoreDiff,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Producer side of the engine's event channel
pub type EventSender = mpsc::Sender<EngineEvent>;
pub type EventReceiver = mpsc::Receiver<EngineEvent>;

/// Control requests answered by the engine task
#[derive(Debug)]
pub enum EngineCommand {
    /// Apply an event and reply with the diffs it produced
    Apply {
        event: EngineEvent,
        reply: oneshot::Sender<Vec<StoreDiff>>,
    },
    /// Reply once every event queued before this command has been applied
    Flush(oneshot::Sender<()>),
    Stats(oneshot::Sender<EngineStats>),
    Snapshot(oneshot::Sender<HistorySnapshot>),
    /// Persist history and stop, replying with the final snapshot
    Shutdown(oneshot::Sender<HistorySnapshot>),
}

pub type CommandSender = mpsc::Sender<EngineCommand>;
pub type CommandReceiver = mpsc::Receiver<EngineCommand>;

// ----------------------------------------------------------------------------
// Engine Task
// ----------------------------------------------------------------------------

pub struct EngineTask {
    engine: ReconciliationEngine,
    event_receiver: EventReceiver,
    command_receiver: CommandReceiver,
    history_path: Option<PathBuf>,
    autosave: bool,
    running: bool,
}

impl EngineTask {
    pub fn new(
        engine: ReconciliationEngine,
        event_receiver: EventReceiver,
        command_receiver: CommandReceiver,
        history_path: Option<PathBuf>,
        autosave: bool,
    ) -> Self {
        Self {
            engine,
            event_receiver,
            command_receiver,
            history_path,
            autosave,
            running: true,
        }
    }

    /// Run until shutdown or until every producer is gone
    pub async fn run(mut self) -> Result<()> {
        info!("Engine task starting");

        while self.running {
            tokio::select! {
                // Drain queued events before answering control requests
                biased;

                event = self.event_receiver.recv() => {
                    match event {
                        Some(event) => {
                            self.apply(event);
                        }
                        None => {
                            info!("Event channel closed, shutting down");
                            break;
                        }
                    }
                }

                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => self.process_command(command),
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }
            }
        }

        if self.running {
            // Producers went away without an explicit shutdown
            if let Err(e) = self.persist() {
                error!("Failed to persist history on exit: {}", e);
            }
        }

        info!(stats = ?self.engine.stats(), "Engine task stopped");
        Ok(())
    }

    fn apply(&mut self, event: EngineEvent) -> Vec<StoreDiff> {
        let diffs = self.engine.apply(event);
        if self.autosave && !diffs.is_empty() {
            if let Err(e) = self.persist() {
                warn!("Autosave failed: {}", e);
            }
        }
        diffs
    }

    fn process_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Apply { event, reply } => {
                let diffs = self.apply(event);
                let _ = reply.send(diffs);
            }
            EngineCommand::Flush(reply) => {
                let _ = reply.send(());
            }
            EngineCommand::Stats(reply) => {
                let _ = reply.send(self.engine.stats().clone());
            }
            EngineCommand::Snapshot(reply) => {
                let _ = reply.send(self.engine.snapshot());
            }
            EngineCommand::Shutdown(reply) => {
                info!("Shutdown requested");
                if let Err(e) = self.persist() {
                    error!("Failed to persist history on shutdown: {}", e);
                }
                let _ = reply.send(self.engine.snapshot());
                self.running = false;
            }
        }
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.history_path else {
            return Ok(());
        };
        self.engine.snapshot().save(path)?;
        debug!(path = %path.display(), "History persisted");
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Channel helpers
// ----------------------------------------------------------------------------

/// Send a command and await its reply
pub(crate) async fn request<T>(
    commands: &CommandSender,
    build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
) -> Result<T> {
    let (reply, response) = oneshot::channel();
    commands
        .send(build(reply))
        .await
        .map_err(|_| DechatError::channel_error("engine task is not running"))?;
    response
        .await
        .map_err(|_| DechatError::channel_error("engine task dropped the request"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dechat_core::{MessageEnvelope, Payload, Timestamp, WalletAddress};

    fn text(at: u64) -> MessageEnvelope {
        MessageEnvelope::compose(
            WalletAddress::new([1; 20]),
            WalletAddress::new([2; 20]),
            Payload::Text { body: "hi".into() },
            Timestamp::new(at),
        )
    }

    fn spawn(
        history_path: Option<PathBuf>,
        autosave: bool,
    ) -> (EventSender, CommandSender, tokio::task::JoinHandle<Result<()>>) {
        let (events, event_receiver) = mpsc::channel(8);
        let (commands, command_receiver) = mpsc::channel(8);
        let task = EngineTask::new(
            ReconciliationEngine::new(),
            event_receiver,
            command_receiver,
            history_path,
            autosave,
        );
        (events, commands, tokio::spawn(task.run()))
    }

    #[tokio::test]
    async fn test_flush_follows_queued_events() {
        let (events, commands, handle) = spawn(None, false);
        for at in 0..5 {
            events.send(EngineEvent::Inbound(text(at))).await.unwrap();
        }
        request(&commands, EngineCommand::Flush).await.unwrap();
        let stats = request(&commands, EngineCommand::Stats).await.unwrap();
        assert_eq!(stats.inserted, 5);

        let snapshot = request(&commands, EngineCommand::Shutdown).await.unwrap();
        assert_eq!(snapshot.envelopes.len(), 5);
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_apply_replies_with_diffs() {
        let (_events, commands, _handle) = spawn(None, false);
        let diffs = request(&commands, |reply| EngineCommand::Apply {
            event: EngineEvent::Composed(text(1)),
            reply,
        })
        .await
        .unwrap();
        assert_eq!(diffs.len(), 1);
    }

    #[tokio::test]
    async fn test_autosave_writes_history() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let (events, commands, _handle) = spawn(Some(path.clone()), true);

        events.send(EngineEvent::Inbound(text(7))).await.unwrap();
        request(&commands, EngineCommand::Flush).await.unwrap();

        let saved = HistorySnapshot::load(&path).unwrap();
        assert_eq!(saved.envelopes.len(), 1);
    }
}
