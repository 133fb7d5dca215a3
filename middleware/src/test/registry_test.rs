//! Unit tests for RegistryHandler over the in-memory store.

use std::sync::Arc;

use classbot_core::{Handler, HandlerResponse, InboundEvent, IntentKind, Role, User};
use storage::{DirectoryStore, InMemoryStore};

use crate::RegistryHandler;

fn event_from(id: i64, first_name: &str) -> InboundEvent {
    let mut user = User::with_id(id);
    user.first_name = Some(first_name.to_string());
    user.username = Some(first_name.to_lowercase());
    InboundEvent::text(user, "hello")
}

/// **Test: First contact registers a student; later contacts refresh the name only.**
#[tokio::test]
async fn test_first_contact_registers_student() {
    let store = Arc::new(InMemoryStore::new());
    let handler = RegistryHandler::new(store.clone(), []);

    assert!(handler.before(&event_from(42, "Amy")).await.unwrap());
    let user = store.get_user(42).await.unwrap().expect("registered");
    assert_eq!(user.role, Role::Student);
    assert_eq!(user.full_name, "Amy");
    assert_eq!(user.username.as_deref(), Some("amy"));

    store.set_role(42, Role::Instructor).await.unwrap();
    handler.before(&event_from(42, "Amelia")).await.unwrap();
    let user = store.get_user(42).await.unwrap().unwrap();
    assert_eq!(user.role, Role::Instructor);
    assert_eq!(user.full_name, "Amelia");
}

/// **Test: A configured super-admin is promoted on contact.**
#[tokio::test]
async fn test_configured_superadmin_is_promoted() {
    let store = Arc::new(InMemoryStore::new());
    let handler = RegistryHandler::new(store.clone(), [7]);

    handler.before(&event_from(7, "Root")).await.unwrap();
    let user = store.get_user(7).await.unwrap().unwrap();
    assert_eq!(user.role, Role::SuperAdmin);
}

/// **Test: Deactivated users get a notice and the chain stops; active users continue.**
#[tokio::test]
async fn test_deactivated_user_is_blocked() {
    let store = Arc::new(InMemoryStore::new());
    let handler = RegistryHandler::new(store.clone(), []);
    let event = event_from(9, "Zed");

    handler.before(&event).await.unwrap();
    assert_eq!(handler.handle(&event).await.unwrap(), HandlerResponse::Continue);

    store.set_active(9, false).await.unwrap();
    match handler.handle(&event).await.unwrap() {
        HandlerResponse::Reply(intents) => {
            assert_eq!(intents.len(), 1);
            assert_eq!(intents[0].kind, IntentKind::Error);
            assert_eq!(intents[0].targets, vec![9]);
        }
        other => panic!("expected Reply, got {:?}", other),
    }
}
