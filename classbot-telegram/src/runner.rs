//! Dispatcher loop: converts teloxide messages and button presses to core events and hands them to
//! the HandlerChain. Intents returned as `Reply` are delivered through the given [`CoreBot`].

use std::sync::Arc;

use anyhow::Result;
use classbot_core::{Bot as CoreBot, HandlerResponse, InboundEvent, ToCoreEvent};
use handler_chain::HandlerChain;
use teloxide::prelude::*;
use tracing::{debug, error, info, instrument};

use super::adapters::{TelegramCallbackWrapper, TelegramMessageWrapper};

/// Runs the chain for one event and delivers any intents it replied with.
async fn process_event(chain: &HandlerChain, delivery: &dyn CoreBot, event: InboundEvent) {
    info!(
        user_id = event.user_id(),
        event_id = %event.id,
        kind = ?event.kind,
        "step: processing event (handler chain started)"
    );
    match chain.handle(&event).await {
        Ok(HandlerResponse::Reply(intents)) => {
            for intent in &intents {
                let failed = delivery.deliver_each(intent).await;
                if failed > 0 {
                    error!(
                        failed,
                        targets = intent.targets.len(),
                        user_id = event.user_id(),
                        "Failed to deliver reply"
                    );
                }
            }
        }
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, user_id = event.user_id(), "Handler chain failed");
        }
    }
}

async fn on_message(
    msg: Message,
    chain: HandlerChain,
    delivery: Arc<dyn CoreBot>,
) -> ResponseResult<()> {
    match TelegramMessageWrapper(&msg).to_core() {
        Some(event) => {
            info!(user_id = event.user_id(), chat_id = msg.chat.id.0, "Received message");
            process_event(&chain, delivery.as_ref(), event).await;
        }
        None => {
            debug!(chat_id = msg.chat.id.0, "Ignoring message without usable text");
        }
    }
    Ok(())
}

async fn on_callback(
    bot: Bot,
    query: CallbackQuery,
    chain: HandlerChain,
    delivery: Arc<dyn CoreBot>,
) -> ResponseResult<()> {
    // Stops the button's loading indicator; the answer itself goes out as a message.
    bot.answer_callback_query(query.id.clone()).await?;
    if let Some(event) = TelegramCallbackWrapper(&query).to_core() {
        info!(user_id = event.user_id(), "Received button press");
        process_event(&chain, delivery.as_ref(), event).await;
    }
    Ok(())
}

/// Starts the update dispatcher for messages and callback queries until Ctrl-C.
///
/// Updates from one chat are handled one after another, different chats concurrently, so a
/// user's events reach the chain in the order Telegram sent them.
#[instrument(skip(bot, handler_chain, delivery))]
pub async fn run_repl(
    bot: teloxide::Bot,
    handler_chain: HandlerChain,
    delivery: Arc<dyn CoreBot>,
) -> Result<()> {
    match bot.get_me().await {
        Ok(me) => {
            if let Some(username) = &me.user.username {
                info!(username = %username, "Bot identity confirmed");
            }
        }
        Err(e) => {
            error!(error = %e, "get_me failed; continuing");
        }
    }

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![handler_chain, delivery])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Dispatcher stopped");
    Ok(())
}
