//! Component factory: builds the store, gate, scheduler, engine and handler chain from config.
//! Isolates assembly logic from the runners.

use std::sync::Arc;

use classbot_core::{Bot, ClassbotError, Handler, Result};
use conversation::ConversationEngine;
use handler_chain::HandlerChain;
use middleware::{LoggingHandler, RegistryHandler};
use permission_gate::PermissionGate;
use reminder::ReminderScheduler;
use storage::{InMemoryStore, SqliteStore, Store};
use tracing::{error, info, instrument};

use crate::config::{BotConfig, StoreType};

/// Shared services; the engine and scheduler deliver through the same [`Bot`].
#[derive(Clone)]
pub struct ClassbotComponents {
    pub store: Arc<dyn Store>,
    pub gate: Arc<PermissionGate>,
    pub scheduler: Arc<ReminderScheduler>,
    pub engine: Arc<ConversationEngine>,
}

/// Opens the store selected by STORE_TYPE.
#[instrument(skip(config))]
pub async fn create_store(config: &BotConfig) -> Result<Arc<dyn Store>> {
    match config.store_type() {
        StoreType::Sqlite => {
            info!(database_url = %config.database_url(), "Using SQLite store");
            let store = SqliteStore::new(config.database_url()).await.map_err(|e| {
                error!(
                    error = %e,
                    database_url = %config.database_url(),
                    "Failed to initialize storage"
                );
                ClassbotError::Storage(format!("Failed to initialize storage: {}", e))
            })?;
            Ok(Arc::new(store))
        }
        StoreType::Memory => {
            info!("Using in-memory store (state is lost on exit)");
            Ok(Arc::new(InMemoryStore::new()))
        }
    }
}

/// Wires gate, scheduler and engine around `store`, delivering through `bot`.
pub fn build_components(
    config: &BotConfig,
    store: Arc<dyn Store>,
    bot: Arc<dyn Bot>,
) -> ClassbotComponents {
    let gate = Arc::new(PermissionGate::new(
        store.clone(),
        config.unknown_user_policy(),
        config.superadmins().iter().copied(),
    ));
    let scheduler = Arc::new(ReminderScheduler::new(
        store.clone(),
        bot,
        config.reminder_config(),
    ));
    let engine = Arc::new(ConversationEngine::new(
        store.clone(),
        gate.clone(),
        scheduler.clone(),
        config.engine_config(),
    ));
    ClassbotComponents {
        store,
        gate,
        scheduler,
        engine,
    }
}

/// Logging → registry → `handler`. The registry runs before the conversation so the sender
/// exists (and configured super-admins are promoted) when permissions are resolved.
pub fn build_handler_chain(
    config: &BotConfig,
    components: &ClassbotComponents,
    handler: Arc<dyn Handler>,
) -> HandlerChain {
    HandlerChain::new()
        .add_handler(Arc::new(LoggingHandler))
        .add_handler(Arc::new(RegistryHandler::new(
            components.store.clone(),
            config.superadmins().iter().copied(),
        )))
        .add_handler(handler)
}
