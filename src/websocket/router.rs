use crate::types::Envelope;
use log::*;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Handler for one message type: receives `(payload, envelope)`.
pub type MessageHandler = Arc<dyn Fn(&Value, &Envelope) + Send + Sync + 'static>;
/// Handler for every non-control message.
pub type AnyHandler = Arc<dyn Fn(&Envelope) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

/// Result of routing one inbound text frame.
pub enum Route {
    /// Not an envelope; already logged.
    Malformed,
    /// Heartbeat reply. Never reaches handlers.
    Pong(Envelope),
    /// A message to hand to the handlers captured at routing time.
    Deliver(Delivery),
}

/// An envelope together with the handlers registered when it was routed.
pub struct Delivery {
    envelope: Envelope,
    typed: Vec<MessageHandler>,
    any: Vec<AnyHandler>,
}

impl Delivery {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    /// Runs the type handlers in registration order, then the any-handlers.
    /// A panicking handler is logged and skipped. `active` is checked before
    /// each handler; once it returns `false` (a handler tore the client
    /// down) the remaining handlers are skipped. Returns how many handlers
    /// panicked.
    pub fn dispatch(self, active: impl Fn() -> bool) -> usize {
        let envelope = &self.envelope;
        let mut failures = 0;
        for handler in &self.typed {
            if !active() {
                return failures;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&envelope.payload, envelope))) {
                failures += 1;
                error!(
                    "Handler for '{}' panicked: {}",
                    envelope.kind,
                    panic_message(&*panic)
                );
            }
        }
        for handler in &self.any {
            if !active() {
                return failures;
            }
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(envelope))) {
                failures += 1;
                error!(
                    "Catch-all handler panicked on '{}': {}",
                    envelope.kind,
                    panic_message(&*panic)
                );
            }
        }
        failures
    }
}

/// Handler registry keyed by message type, plus catch-all handlers.
#[derive(Default)]
pub struct MessageRouter {
    next_id: u64,
    typed: HashMap<String, Vec<(HandlerId, MessageHandler)>>,
    any: Vec<(HandlerId, AnyHandler)>,
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> HandlerId {
        self.next_id += 1;
        HandlerId(self.next_id)
    }

    pub fn on(&mut self, kind: &str, handler: MessageHandler) -> HandlerId {
        let id = self.next_id();
        self.typed
            .entry(kind.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub fn on_any(&mut self, handler: AnyHandler) -> HandlerId {
        let id = self.next_id();
        self.any.push((id, handler));
        id
    }

    /// Removes a handler. Returns `false` if it was already gone.
    pub fn remove(&mut self, id: HandlerId) -> bool {
        if let Some(pos) = self.any.iter().position(|(h, _)| *h == id) {
            self.any.remove(pos);
            return true;
        }
        let mut emptied = None;
        let mut removed = false;
        for (kind, handlers) in self.typed.iter_mut() {
            if let Some(pos) = handlers.iter().position(|(h, _)| *h == id) {
                handlers.remove(pos);
                removed = true;
                if handlers.is_empty() {
                    emptied = Some(kind.clone());
                }
                break;
            }
        }
        if let Some(kind) = emptied {
            self.typed.remove(&kind);
        }
        removed
    }

    /// Parses a frame and snapshots the handlers that should see it.
    pub fn route(&self, text: &str) -> Route {
        let envelope = match Envelope::from_text(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Dropping malformed frame ({}): {}", e, truncate(text, 200));
                return Route::Malformed;
            }
        };
        if envelope.is_pong() {
            return Route::Pong(envelope);
        }
        let typed = self
            .typed
            .get(&envelope.kind)
            .map(|handlers| handlers.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        let any = self.any.iter().map(|(_, h)| Arc::clone(h)).collect();
        Route::Deliver(Delivery {
            envelope,
            typed,
            any,
        })
    }

    pub fn clear(&mut self) {
        self.typed.clear();
        self.any.clear();
    }

    /// Total number of registered handlers, typed and catch-all.
    pub fn len(&self) -> usize {
        self.typed.values().map(Vec::len).sum::<usize>() + self.any.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> MessageHandler) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |tag: &str| -> MessageHandler {
                let log = Arc::clone(&log);
                let tag = tag.to_string();
                Arc::new(move |payload: &Value, _env: &Envelope| {
                    log.lock().unwrap().push(format!("{}:{}", tag, payload));
                })
            }
        };
        (log, make)
    }

    fn deliver(router: &MessageRouter, text: &str) -> usize {
        match router.route(text) {
            Route::Deliver(delivery) => delivery.dispatch(|| true),
            _ => panic!("expected a delivery"),
        }
    }

    #[test]
    fn test_typed_handlers_run_in_registration_order() {
        let (log, make) = recorder();
        let mut router = MessageRouter::new();
        router.on("agent:status", make("first"));
        router.on("agent:status", make("second"));
        router.on("task:update", make("other"));

        deliver(&router, r#"{"type":"agent:status","payload":1,"timestamp":"t"}"#);
        assert_eq!(*log.lock().unwrap(), vec!["first:1", "second:1"]);
    }

    #[test]
    fn test_panicking_handler_does_not_stop_siblings_or_any_handlers() {
        let (log, make) = recorder();
        let mut router = MessageRouter::new();
        router.on("agent:status", Arc::new(|_: &Value, _: &Envelope| panic!("boom")));
        router.on("agent:status", make("survivor"));
        let any_log = Arc::clone(&log);
        router.on_any(Arc::new(move |env: &Envelope| {
            any_log.lock().unwrap().push(format!("any:{}", env.kind));
        }));

        let failures = deliver(&router, r#"{"type":"agent:status","payload":"x"}"#);
        assert_eq!(failures, 1);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["survivor:\"x\"", "any:agent:status"]
        );
    }

    #[test]
    fn test_pong_is_intercepted() {
        let (log, make) = recorder();
        let mut router = MessageRouter::new();
        router.on("pong", make("typed"));
        let any_log = Arc::clone(&log);
        router.on_any(Arc::new(move |_: &Envelope| any_log.lock().unwrap().push("any".into())));

        assert!(matches!(router.route(r#"{"type":"pong","timestamp":"t"}"#), Route::Pong(_)));
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let router = MessageRouter::new();
        assert!(matches!(router.route("{not json"), Route::Malformed));
        assert!(matches!(router.route(r#"{"payload":1}"#), Route::Malformed));
    }

    #[test]
    fn test_remove_is_idempotent_and_preserves_order() {
        let (log, make) = recorder();
        let mut router = MessageRouter::new();
        router.on("t", make("a"));
        let b = router.on("t", make("b"));
        router.on("t", make("c"));

        assert!(router.remove(b));
        assert!(!router.remove(b));
        assert_eq!(router.len(), 2);

        deliver(&router, r#"{"type":"t","payload":0}"#);
        assert_eq!(*log.lock().unwrap(), vec!["a:0", "c:0"]);
    }

    #[test]
    fn test_dispatch_stops_once_inactive() {
        let (log, make) = recorder();
        let mut router = MessageRouter::new();
        router.on("t", make("a"));
        router.on("t", make("b"));
        router.on_any(Arc::new(|_: &Envelope| panic!("must not run")));

        let seen = Arc::clone(&log);
        let delivery = match router.route(r#"{"type":"t","payload":0}"#) {
            Route::Deliver(delivery) => delivery,
            _ => panic!("expected a delivery"),
        };
        let failures = delivery.dispatch(|| seen.lock().unwrap().is_empty());
        assert_eq!(failures, 0);
        assert_eq!(*log.lock().unwrap(), vec!["a:0"]);
    }

    #[test]
    fn test_clear_removes_everything() {
        let (_log, make) = recorder();
        let mut router = MessageRouter::new();
        router.on("t", make("a"));
        router.on_any(Arc::new(|_: &Envelope| {}));
        router.clear();
        assert!(router.is_empty());
    }
}
