use tracing::trace;

use morsel_gateway::{ConnectionManager, GatewayError};
use morsel_types::GatewayCommand;
use morsel_types::models::{MessageKind, MessageMetadata};

/// Turns user intents into frames on the session's connection.
#[derive(Clone)]
pub struct Encoder {
    manager: ConnectionManager,
}

impl Encoder {
    pub fn new(manager: ConnectionManager) -> Self {
        Self { manager }
    }

    pub fn send_chat(
        &self,
        conversation_id: &str,
        content: &str,
        kind: MessageKind,
        metadata: Option<MessageMetadata>,
    ) -> Result<(), GatewayError> {
        self.send(GatewayCommand::Chat {
            conversation_id: conversation_id.to_string(),
            content: content.to_string(),
            message_type: Some(kind),
            metadata,
        })
    }

    pub fn send_typing(&self, conversation_id: &str) -> Result<(), GatewayError> {
        self.send(GatewayCommand::Typing {
            conversation_id: conversation_id.to_string(),
        })
    }

    pub fn send_read_receipt(&self, conversation_id: &str) -> Result<(), GatewayError> {
        self.send(GatewayCommand::Read {
            conversation_id: conversation_id.to_string(),
        })
    }

    /// Push an already built frame, e.g. one returned by an optimistic send.
    pub fn send(&self, command: GatewayCommand) -> Result<(), GatewayError> {
        trace!(conversation_id = %command.conversation_id(), "Outbound frame");
        self.manager.send(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use morsel_gateway::{GatewayConfig, MemoryConnector, StaticToken};

    #[tokio::test]
    async fn test_frames_on_the_wire() {
        let (connector, mut server) = MemoryConnector::new();
        let manager = ConnectionManager::spawn(
            GatewayConfig::new("ws://gateway.test/api/ws"),
            Arc::new(StaticToken("t".into())),
            connector,
        );
        let encoder = Encoder::new(manager);

        encoder
            .send_chat(
                "c1",
                "12.50 for the lot?",
                MessageKind::PriceOffer,
                Some(MessageMetadata {
                    amount: Some(12.5),
                    currency: Some("EUR".into()),
                    status: Some("pending".into()),
                    ..Default::default()
                }),
            )
            .unwrap();
        encoder.send_typing("c1").unwrap();
        encoder.send_read_receipt("c1").unwrap();

        let mut peer = server.accept().await.unwrap();
        let frames: Vec<serde_json::Value> = [
            peer.recv().await.unwrap(),
            peer.recv().await.unwrap(),
            peer.recv().await.unwrap(),
        ]
        .iter()
        .map(|text| serde_json::from_str(text).unwrap())
        .collect();

        assert_eq!(
            frames[0],
            serde_json::json!({
                "type": "chat",
                "conversationId": "c1",
                "content": "12.50 for the lot?",
                "messageType": "price_offer",
                "metadata": { "amount": 12.5, "currency": "EUR", "status": "pending" }
            })
        );
        assert_eq!(frames[1], serde_json::json!({ "type": "typing", "conversationId": "c1" }));
        assert_eq!(frames[2], serde_json::json!({ "type": "read", "conversationId": "c1" }));
    }
}
