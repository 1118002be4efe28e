//! Command handlers for the DeChat CLI

use tracing::info;

use dechat_core::{
    Amount, ConversationKey, DeliveryState, HistorySnapshot, MessageEnvelope, Payload,
    ReconciliationEngine, WalletAddress,
};

use crate::app::{DechatApp, DemoPlan};
use crate::cli::{Cli, Commands};
use crate::config::{address_from_name, AppConfig};
use crate::error::{CliError, Result};

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command; `config` already carries the command line overrides
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        match cli.command {
            Commands::Demo {
                peer,
                amount,
                revert,
            } => Self::handle_demo_command(config, peer, amount, revert).await,
            Commands::History { peer, json } => {
                Self::handle_history_command(&config, peer, json)
            }
            Commands::Config { output } => Self::handle_config_command(output),
        }
    }

    /// Handle the demo command
    async fn handle_demo_command(
        config: AppConfig,
        peer: Option<String>,
        amount: String,
        revert: bool,
    ) -> Result<()> {
        let peer = match peer {
            Some(peer) => Self::parse_address(&peer)?,
            None => address_from_name("dechat-demo-peer"),
        };
        let amount = Amount::parse_ether(&amount)
            .map_err(|e| CliError::InvalidArgument(format!("Invalid amount {amount}: {e}")))?;

        let history_path = config.history_path();
        let max_recent = config.cli.max_recent_messages;
        let mut app = DechatApp::new(config, history_path).await?;
        let local = app.local_address();

        let plan = DemoPlan {
            peer,
            amount,
            revert,
        };
        let result = app.run_demo(&plan).await;
        let snapshot = app.stop().await?;
        let conversation = result?;

        println!("Conversation {}", ConversationKey::new(local, peer));
        for line in render_conversation(&conversation, &local, max_recent) {
            println!("  {line}");
        }
        info!(stored = snapshot.envelopes.len(), "Demo finished");
        Ok(())
    }

    /// Handle the history command
    fn handle_history_command(
        config: &AppConfig,
        peer: Option<String>,
        json: bool,
    ) -> Result<()> {
        let path = config.history_path().ok_or_else(|| {
            CliError::InvalidArgument(
                "No history location: pass --data-dir or set core.persistence.history_path"
                    .to_string(),
            )
        })?;
        let snapshot = HistorySnapshot::load(&path)?;

        if json {
            println!("{}", snapshot.to_json()?);
            return Ok(());
        }

        let local = config.local_address()?;
        let peer = peer.as_deref().map(Self::parse_address).transpose()?;
        let conversations = group_conversations(snapshot, &local, peer.as_ref());
        if conversations.is_empty() {
            println!("No stored messages in {}", path.display());
            return Ok(());
        }

        for (key, envelopes) in conversations {
            println!("Conversation {key} ({} messages)", envelopes.len());
            for line in render_conversation(&envelopes, &local, config.cli.max_recent_messages) {
                println!("  {line}");
            }
        }
        Ok(())
    }

    /// Handle the config command
    fn handle_config_command(output: Option<String>) -> Result<()> {
        match output {
            Some(path) => {
                AppConfig::example().save_to_file(&path)?;
                println!("Configuration written to {path}");
            }
            None => println!("{}", AppConfig::example_config()),
        }
        Ok(())
    }

    fn parse_address(address: &str) -> Result<WalletAddress> {
        address
            .parse()
            .map_err(|e| CliError::InvalidArgument(format!("Invalid wallet address {address}: {e}")))
    }
}

/// Conversations in the snapshot that involve `local`, optionally only the
/// one with `peer`. The snapshot is replayed through the reconciliation
/// engine, so duplicates collapse to their most advanced state and order
/// matches live operation.
pub fn group_conversations(
    snapshot: HistorySnapshot,
    local: &WalletAddress,
    peer: Option<&WalletAddress>,
) -> Vec<(ConversationKey, Vec<MessageEnvelope>)> {
    let mut engine = ReconciliationEngine::new();
    engine.restore(snapshot);
    let reader = engine.reader();

    reader
        .conversations_for(local)
        .into_iter()
        .filter(|key| peer.map_or(true, |peer| key.peer_of(local) == Some(*peer)))
        .map(|key| {
            let envelopes = reader.get(&key);
            (key, envelopes)
        })
        .collect()
}

/// One display line per envelope, keeping the `limit` most recent
pub fn render_conversation(
    envelopes: &[MessageEnvelope],
    local: &WalletAddress,
    limit: usize,
) -> Vec<String> {
    let skip = envelopes.len().saturating_sub(limit);
    envelopes
        .iter()
        .skip(skip)
        .map(|envelope| format_envelope(envelope, local))
        .collect()
}

pub fn format_envelope(envelope: &MessageEnvelope, local: &WalletAddress) -> String {
    let who = if envelope.sender() == *local {
        "me".to_string()
    } else {
        envelope.sender().short()
    };
    let content = match envelope.payload() {
        Payload::Text { body } => body.clone(),
        Payload::ImageRef { locator, .. } => format!("[image] {locator}"),
        Payload::ValueTransfer { amount, .. } => format!("[transfer] {amount} ETH"),
    };
    let status = match envelope.delivery_state() {
        DeliveryState::Pending => "…".to_string(),
        DeliveryState::Confirmed => "✓".to_string(),
        DeliveryState::Failed(reason) => format!("✗ {reason}"),
    };
    format!("{who}: {content} {status}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use dechat_core::{EnvelopeId, Timestamp, TransferId};

    fn envelope(
        from: WalletAddress,
        to: WalletAddress,
        payload: Payload,
        at: u64,
        state: DeliveryState,
    ) -> MessageEnvelope {
        MessageEnvelope::from_parts(
            EnvelopeId::generate(),
            from,
            to,
            payload,
            Timestamp::new(at),
            state,
        )
    }

    fn text(body: &str) -> Payload {
        Payload::Text { body: body.into() }
    }

    #[test]
    fn test_format_envelope() {
        let me = WalletAddress::new([1; 20]);
        let them = WalletAddress::new([2; 20]);

        let sent = envelope(me, them, text("hi"), 1, DeliveryState::Confirmed);
        assert_eq!(format_envelope(&sent, &me), "me: hi ✓");

        let transfer = envelope(
            me,
            them,
            Payload::ValueTransfer {
                amount: Amount::parse_ether("0.5").unwrap(),
                transfer_id: TransferId::generate(),
            },
            2,
            DeliveryState::failed("transfer reverted"),
        );
        assert_eq!(
            format_envelope(&transfer, &me),
            "me: [transfer] 0.5 ETH ✗ transfer reverted"
        );

        let received = envelope(them, me, text("yo"), 3, DeliveryState::Pending);
        assert!(format_envelope(&received, &me).ends_with("yo …"));
    }

    #[test]
    fn test_group_conversations_filters_and_sorts() {
        let me = WalletAddress::new([1; 20]);
        let alice = WalletAddress::new([2; 20]);
        let bob = WalletAddress::new([3; 20]);
        let stranger = WalletAddress::new([4; 20]);

        let snapshot = HistorySnapshot::new(vec![
            envelope(me, alice, text("later"), 20, DeliveryState::Confirmed),
            envelope(bob, me, text("bob"), 5, DeliveryState::Confirmed),
            envelope(alice, me, text("earlier"), 10, DeliveryState::Confirmed),
            envelope(alice, stranger, text("not mine"), 1, DeliveryState::Confirmed),
        ]);

        let all = group_conversations(snapshot.clone(), &me, None);
        assert_eq!(all.len(), 2);

        let with_alice = group_conversations(snapshot, &me, Some(&alice));
        assert_eq!(with_alice.len(), 1);
        let bodies: Vec<_> = with_alice[0]
            .1
            .iter()
            .map(|e| format_envelope(e, &me))
            .collect();
        assert_eq!(bodies.len(), 2);
        assert!(bodies[0].contains("earlier"));
        assert!(bodies[1].contains("later"));
    }

    #[test]
    fn test_group_conversations_collapses_duplicate_ids() {
        let me = WalletAddress::new([1; 20]);
        let them = WalletAddress::new([2; 20]);
        let id = EnvelopeId::generate();
        let copy = |state| {
            MessageEnvelope::from_parts(id, me, them, text("x"), Timestamp::new(1), state)
        };

        let snapshot =
            HistorySnapshot::new(vec![copy(DeliveryState::Confirmed), copy(DeliveryState::Pending)]);
        let conversations = group_conversations(snapshot, &me, None);
        assert_eq!(conversations.len(), 1);

        let lines = render_conversation(&conversations[0].1, &me, 10);
        assert_eq!(lines, vec!["me: x ✓"]);
    }

    #[test]
    fn test_render_keeps_most_recent() {
        let me = WalletAddress::new([1; 20]);
        let them = WalletAddress::new([2; 20]);
        let envelopes: Vec<_> = (0..5)
            .map(|i| envelope(me, them, text(&format!("m{i}")), i, DeliveryState::Confirmed))
            .collect();

        let lines = render_conversation(&envelopes, &me, 2);
        assert_eq!(lines, vec!["me: m3 ✓", "me: m4 ✓"]);
    }

    #[tokio::test]
    async fn test_demo_then_history() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.core = dechat_core::DechatConfig::testing();
        config.cli.data_dir = Some(dir.path().to_path_buf());

        CommandDispatcher::handle_demo_command(
            config.clone(),
            None,
            "0.01".to_string(),
            false,
        )
        .await
        .unwrap();

        let snapshot = HistorySnapshot::load(&dir.path().join("history.json")).unwrap();
        assert_eq!(snapshot.envelopes.len(), 4);

        CommandDispatcher::handle_history_command(&config, None, false).unwrap();
    }
}
