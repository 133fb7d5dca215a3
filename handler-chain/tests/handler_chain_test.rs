//! Integration tests for [`handler_chain::HandlerChain`].
//!
//! Covers: before/after order, before stopping the chain, Reply stopping the handle phase and
//! reaching every after, handler errors propagating.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use classbot_core::{
    ClassbotError, Handler, HandlerError, HandlerResponse, InboundEvent, OutboundIntent, User,
};
use handler_chain::HandlerChain;

fn create_test_event(payload: &str) -> InboundEvent {
    InboundEvent::text(User::with_id(123), payload)
}

/// **Test: before and after run once each; handle runs once.**
///
/// **Setup:** One handler counting before/after, one counting handle.
/// **Action:** `chain.handle(&event)`.
/// **Expected:** Each counter is 1; response is Continue.
#[tokio::test]
async fn test_handler_chain_with_handler() {
    let before_count = Arc::new(AtomicUsize::new(0));
    let after_count = Arc::new(AtomicUsize::new(0));
    let handle_count = Arc::new(AtomicUsize::new(0));

    let chain = HandlerChain::new()
        .add_handler(Arc::new(TestBeforeAfterHandler::new(
            before_count.clone(),
            after_count.clone(),
        )))
        .add_handler(Arc::new(TestHandler::new(handle_count.clone())));

    let result = chain.handle(&create_test_event("test")).await.unwrap();

    assert_eq!(result, HandlerResponse::Continue);
    assert_eq!(before_count.load(Ordering::SeqCst), 1);
    assert_eq!(handle_count.load(Ordering::SeqCst), 1);
    assert_eq!(after_count.load(Ordering::SeqCst), 1);
}

/// **Test: A before returning false stops the chain; handle is not run.**
#[tokio::test]
async fn test_handler_stops_chain() {
    struct BlockingHandler;

    #[async_trait::async_trait]
    impl Handler for BlockingHandler {
        async fn before(&self, _event: &InboundEvent) -> classbot_core::Result<bool> {
            Ok(false)
        }
    }

    let handle_count = Arc::new(AtomicUsize::new(0));
    let chain = HandlerChain::new()
        .add_handler(Arc::new(BlockingHandler))
        .add_handler(Arc::new(TestHandler::new(handle_count.clone())));

    let result = chain.handle(&create_test_event("test")).await.unwrap();

    assert_eq!(result, HandlerResponse::Stop);
    assert_eq!(handle_count.load(Ordering::SeqCst), 0);
}

/// **Test: Reply ends the handle phase and is passed to every after.**
///
/// **Setup:** A capturing handler, a replying handler, then a counting handler.
/// **Expected:** Result is the Reply; the counting handler's handle never runs; after sees the intents.
#[tokio::test]
async fn test_handler_reply_stops_chain_and_passes_to_after() {
    struct ReplyHandler;

    #[async_trait::async_trait]
    impl Handler for ReplyHandler {
        async fn handle(&self, event: &InboundEvent) -> classbot_core::Result<HandlerResponse> {
            Ok(HandlerResponse::Reply(vec![OutboundIntent::prompt(
                event.user_id(),
                "Which course?",
            )]))
        }
    }

    struct CaptureResponseHandler {
        after_count: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Handler for CaptureResponseHandler {
        async fn after(
            &self,
            _event: &InboundEvent,
            response: &HandlerResponse,
        ) -> classbot_core::Result<()> {
            self.after_count.fetch_add(1, Ordering::SeqCst);
            if let HandlerResponse::Reply(intents) = response {
                assert_eq!(intents[0].content, "Which course?");
            }
            Ok(())
        }
    }

    let after_count = Arc::new(AtomicUsize::new(0));
    let handle_count = Arc::new(AtomicUsize::new(0));
    let chain = HandlerChain::new()
        .add_handler(Arc::new(CaptureResponseHandler {
            after_count: after_count.clone(),
        }))
        .add_handler(Arc::new(ReplyHandler))
        .add_handler(Arc::new(TestHandler::new(handle_count.clone())));

    let result = chain.handle(&create_test_event("/enroll")).await.unwrap();

    assert_eq!(
        result,
        HandlerResponse::Reply(vec![OutboundIntent::prompt(123, "Which course?")])
    );
    assert_eq!(after_count.load(Ordering::SeqCst), 1);
    assert_eq!(handle_count.load(Ordering::SeqCst), 0);
}

/// **Test: before runs first→last, after runs last→first.**
#[tokio::test]
async fn test_multiple_handlers_executed_in_order() {
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    struct OrderHandler {
        name: String,
        order: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait::async_trait]
    impl Handler for OrderHandler {
        async fn before(&self, _event: &InboundEvent) -> classbot_core::Result<bool> {
            self.order.lock().unwrap().push(format!("before_{}", self.name));
            Ok(true)
        }

        async fn after(
            &self,
            _event: &InboundEvent,
            _response: &HandlerResponse,
        ) -> classbot_core::Result<()> {
            self.order.lock().unwrap().push(format!("after_{}", self.name));
            Ok(())
        }
    }

    let chain = HandlerChain::new()
        .add_handler(Arc::new(OrderHandler {
            name: "first".to_string(),
            order: order.clone(),
        }))
        .add_handler(Arc::new(OrderHandler {
            name: "second".to_string(),
            order: order.clone(),
        }));

    chain.handle(&create_test_event("test")).await.unwrap();

    let executed = order.lock().unwrap();
    assert_eq!(
        *executed,
        vec!["before_first", "before_second", "after_second", "after_first"]
    );
}

/// **Test: An error from before propagates and skips the rest of the chain.**
#[tokio::test]
async fn test_before_error_propagates() {
    struct DenyHandler;

    #[async_trait::async_trait]
    impl Handler for DenyHandler {
        async fn before(&self, _event: &InboundEvent) -> classbot_core::Result<bool> {
            Err(HandlerError::Unauthorized.into())
        }
    }

    let handle_count = Arc::new(AtomicUsize::new(0));
    let chain = HandlerChain::new()
        .add_handler(Arc::new(DenyHandler))
        .add_handler(Arc::new(TestHandler::new(handle_count.clone())));

    let result = chain.handle(&create_test_event("test")).await;

    assert!(matches!(
        result,
        Err(ClassbotError::Handler(HandlerError::Unauthorized))
    ));
    assert_eq!(handle_count.load(Ordering::SeqCst), 0);
}

// --- Helpers used by tests ---

struct TestBeforeAfterHandler {
    before_count: Arc<AtomicUsize>,
    after_count: Arc<AtomicUsize>,
}

impl TestBeforeAfterHandler {
    fn new(before_count: Arc<AtomicUsize>, after_count: Arc<AtomicUsize>) -> Self {
        Self {
            before_count,
            after_count,
        }
    }
}

#[async_trait::async_trait]
impl Handler for TestBeforeAfterHandler {
    async fn before(&self, _event: &InboundEvent) -> classbot_core::Result<bool> {
        self.before_count.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn after(
        &self,
        _event: &InboundEvent,
        _response: &HandlerResponse,
    ) -> classbot_core::Result<()> {
        self.after_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct TestHandler {
    handle_count: Arc<AtomicUsize>,
}

impl TestHandler {
    fn new(handle_count: Arc<AtomicUsize>) -> Self {
        Self { handle_count }
    }
}

#[async_trait::async_trait]
impl Handler for TestHandler {
    async fn handle(&self, _event: &InboundEvent) -> classbot_core::Result<HandlerResponse> {
        self.handle_count.fetch_add(1, Ordering::SeqCst);
        Ok(HandlerResponse::Continue)
    }
}
