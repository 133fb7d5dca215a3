//! # Handler chain
//!
//! The dispatcher between the transport and the core. Every handler's `before` runs in order
//! (any `false` stops the chain), then `handle` runs in order until one returns Stop or Reply,
//! then every `after` runs in reverse order with the final response.

use std::sync::Arc;

use classbot_core::{Handler, HandlerResponse, InboundEvent, Result};
use tracing::{debug, info, instrument};

#[derive(Clone, Default)]
pub struct HandlerChain {
    handlers: Vec<Arc<dyn Handler>>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a handler. Order matters: earlier handlers see the event first.
    pub fn add_handler(mut self, handler: Arc<dyn Handler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the chain for one event. Returns the first Stop or Reply, otherwise Continue.
    #[instrument(skip(self, event))]
    pub async fn handle(&self, event: &InboundEvent) -> Result<HandlerResponse> {
        let user_id = event.user_id();
        info!(user_id, event_id = %event.id, kind = ?event.kind, "step: handler_chain started");

        for handler in &self.handlers {
            let handler_name = std::any::type_name_of_val(handler.as_ref());
            if !handler.before(event).await? {
                info!(
                    user_id,
                    handler = %handler_name,
                    "step: handler before returned false, chain stopped"
                );
                return Ok(HandlerResponse::Stop);
            }
        }

        let mut final_response = HandlerResponse::Continue;
        for handler in &self.handlers {
            let handler_name = std::any::type_name_of_val(handler.as_ref());
            let response = handler.handle(event).await?;
            debug!(handler = %handler_name, response = ?response, "Handler processed");

            match response {
                HandlerResponse::Stop | HandlerResponse::Reply(_) => {
                    let intents = match &response {
                        HandlerResponse::Reply(intents) => intents.len(),
                        _ => 0,
                    };
                    info!(
                        user_id,
                        handler = %handler_name,
                        intents,
                        "step: handler chain stopped by handler"
                    );
                    final_response = response;
                    break;
                }
                HandlerResponse::Continue | HandlerResponse::Ignore => continue,
            }
        }

        for handler in self.handlers.iter().rev() {
            handler.after(event, &final_response).await?;
        }

        info!(user_id, event_id = %event.id, "step: handler_chain finished");
        Ok(final_response)
    }
}
