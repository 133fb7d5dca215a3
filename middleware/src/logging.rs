//! Handler that logs each event in before() and the response in after(); always continues.

use async_trait::async_trait;
use classbot_core::{Handler, HandlerResponse, InboundEvent, Result};
use tracing::{debug, info, instrument};

pub struct LoggingHandler;

#[async_trait]
impl Handler for LoggingHandler {
    #[instrument(skip(self, event))]
    async fn before(&self, event: &InboundEvent) -> Result<bool> {
        info!(
            user_id = event.user_id(),
            username = %event.user.username.as_deref().unwrap_or("unknown"),
            kind = ?event.kind,
            payload = %event.payload,
            "Received event"
        );
        Ok(true)
    }

    #[instrument(skip(self, event, response))]
    async fn after(&self, event: &InboundEvent, response: &HandlerResponse) -> Result<()> {
        let intents = match response {
            HandlerResponse::Reply(intents) => intents.len(),
            _ => 0,
        };
        debug!(
            event_id = %event.id,
            response = ?response,
            intents,
            "Processed event"
        );
        Ok(())
    }
}
