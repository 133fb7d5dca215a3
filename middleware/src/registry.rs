//! User registry: every event refreshes (or creates) the sender's user record.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use classbot_core::{
    Handler, HandlerResponse, InboundEvent, OutboundIntent, Result, Role, UserId,
};
use storage::Store;
use tracing::{info, instrument, warn};

const DEACTIVATED: &str = "Your account has been deactivated. Contact an administrator.";

/// Registers senders on first contact as students, promotes configured super-admins, and
/// answers deactivated users with a notice instead of passing their events on.
///
/// Registration failures are logged and the event continues; the permission gate fails closed.
#[derive(Clone)]
pub struct RegistryHandler {
    store: Arc<dyn Store>,
    superadmins: HashSet<UserId>,
}

impl RegistryHandler {
    pub fn new(store: Arc<dyn Store>, superadmins: impl IntoIterator<Item = UserId>) -> Self {
        Self {
            store,
            superadmins: superadmins.into_iter().collect(),
        }
    }
}

#[async_trait]
impl Handler for RegistryHandler {
    #[instrument(skip(self, event))]
    async fn before(&self, event: &InboundEvent) -> Result<bool> {
        let user_id = event.user_id();
        let full_name = event.user.display_name();
        let user = match self
            .store
            .register_user(
                user_id,
                event.user.username.as_deref(),
                &full_name,
                Role::Student,
            )
            .await
        {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, user_id, "Failed to register user");
                return Ok(true);
            }
        };

        if self.superadmins.contains(&user_id) && user.role != Role::SuperAdmin {
            match self.store.set_role(user_id, Role::SuperAdmin).await {
                Ok(_) => info!(user_id, "step: configured super-admin promoted"),
                Err(e) => warn!(error = %e, user_id, "Failed to promote super-admin"),
            }
        }
        Ok(true)
    }

    #[instrument(skip(self, event))]
    async fn handle(&self, event: &InboundEvent) -> Result<HandlerResponse> {
        let user_id = event.user_id();
        if self.superadmins.contains(&user_id) {
            return Ok(HandlerResponse::Continue);
        }
        match self.store.get_user(user_id).await {
            Ok(Some(user)) if !user.active => {
                info!(user_id, "step: event from deactivated user blocked");
                Ok(HandlerResponse::Reply(vec![OutboundIntent::error(
                    user_id,
                    DEACTIVATED,
                )]))
            }
            Ok(_) => Ok(HandlerResponse::Continue),
            Err(e) => {
                warn!(error = %e, user_id, "Failed to look up user");
                Ok(HandlerResponse::Continue)
            }
        }
    }
}
