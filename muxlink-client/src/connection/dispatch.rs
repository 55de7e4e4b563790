//! Typed message dispatch
//!
//! Decouples "a message of type X arrived" from the subscribers that care.
//! Handlers run synchronously against a caller-owned context, in
//! registration order, on the same logical tick; a panicking handler is
//! isolated so its siblings still run.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use muxlink_protocol::{Envelope, MessageKind};

/// Identity token for a registered handler, used to remove it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler<Ctx> = Box<dyn FnMut(&mut Ctx, &Envelope) + Send>;

/// Ordered multimap from message kind to subscriber list
pub struct Registry<Ctx> {
    handlers: HashMap<MessageKind, Vec<(HandlerId, Handler<Ctx>)>>,
    next_id: u64,
}

impl<Ctx> Registry<Ctx> {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            next_id: 0,
        }
    }

    /// Subscribe to a message kind; appended after existing subscribers
    pub fn on(&mut self, kind: MessageKind, handler: Handler<Ctx>) -> HandlerId {
        self.next_id += 1;
        let id = HandlerId(self.next_id);
        self.handlers.entry(kind).or_default().push((id, handler));
        id
    }

    /// Unsubscribe by identity; returns whether a handler was removed
    pub fn off(&mut self, kind: MessageKind, id: HandlerId) -> bool {
        match self.handlers.get_mut(&kind) {
            Some(list) => {
                let before = list.len();
                list.retain(|(handler_id, _)| *handler_id != id);
                before != list.len()
            }
            None => false,
        }
    }

    /// Invoke every subscriber for the envelope's kind, in registration order
    pub fn dispatch(&mut self, ctx: &mut Ctx, envelope: &Envelope) {
        let kind = envelope.message.kind();
        let Some(list) = self.handlers.get_mut(&kind) else {
            return;
        };
        for (id, handler) in list.iter_mut() {
            if catch_unwind(AssertUnwindSafe(|| handler(ctx, envelope))).is_err() {
                tracing::error!(%kind, handler = id.0, "message handler panicked");
            }
        }
    }
}

impl<Ctx> Default for Registry<Ctx> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use muxlink_protocol::Message;

    fn envelope(message: Message) -> Envelope {
        Envelope::new(message)
    }

    fn list_response() -> Envelope {
        envelope(Message::ListSessionsResponse { sessions: vec![] })
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let mut registry: Registry<Vec<&'static str>> = Registry::new();
        registry.on(
            MessageKind::ListSessionsResponse,
            Box::new(|log, _| log.push("first")),
        );
        registry.on(
            MessageKind::ListSessionsResponse,
            Box::new(|log, _| log.push("second")),
        );
        registry.on(
            MessageKind::ListSessionsResponse,
            Box::new(|log, _| log.push("third")),
        );

        let mut log = Vec::new();
        registry.dispatch(&mut log, &list_response());
        assert_eq!(log, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_each_handler_invoked_exactly_once() {
        let mut registry: Registry<Vec<u32>> = Registry::new();
        registry.on(MessageKind::Error, Box::new(|log, _| log.push(1)));
        registry.on(MessageKind::Error, Box::new(|log, _| log.push(2)));
        // Handlers for other kinds must not fire
        registry.on(MessageKind::ConnectAck, Box::new(|log, _| log.push(99)));

        let mut log = Vec::new();
        registry.dispatch(
            &mut log,
            &envelope(Message::Error {
                code: "X".to_string(),
                message: "boom".to_string(),
                original_message_id: None,
            }),
        );
        assert_eq!(log, vec![1, 2]);
    }

    #[test]
    fn test_dispatch_without_subscribers_is_noop() {
        let mut registry: Registry<Vec<u32>> = Registry::new();
        let mut log = Vec::new();
        registry.dispatch(&mut log, &list_response());
        assert!(log.is_empty());
    }

    #[test]
    fn test_off_removes_by_identity() {
        let mut registry: Registry<Vec<&'static str>> = Registry::new();
        let keep = registry.on(
            MessageKind::ListSessionsResponse,
            Box::new(|log, _| log.push("keep")),
        );
        let removed = registry.on(
            MessageKind::ListSessionsResponse,
            Box::new(|log, _| log.push("removed")),
        );

        assert!(registry.off(MessageKind::ListSessionsResponse, removed));

        let mut log = Vec::new();
        registry.dispatch(&mut log, &list_response());
        assert_eq!(log, vec!["keep"]);

        // Removing twice, or from the wrong kind, does nothing
        assert!(!registry.off(MessageKind::ListSessionsResponse, removed));
        assert!(!registry.off(MessageKind::Error, keep));
    }

    #[test]
    fn test_panicking_handler_does_not_starve_siblings() {
        let mut registry: Registry<Vec<&'static str>> = Registry::new();
        registry.on(
            MessageKind::ListSessionsResponse,
            Box::new(|log, _| log.push("before")),
        );
        registry.on(
            MessageKind::ListSessionsResponse,
            Box::new(|_, _| panic!("handler bug")),
        );
        registry.on(
            MessageKind::ListSessionsResponse,
            Box::new(|log, _| log.push("after")),
        );

        // Silence the default panic printout for this test
        let prev = std::panic::take_hook();
        std::panic::set_hook(Box::new(|_| {}));
        let mut log = Vec::new();
        registry.dispatch(&mut log, &list_response());
        std::panic::set_hook(prev);

        assert_eq!(log, vec!["before", "after"]);
    }

    #[test]
    fn test_handler_sees_envelope_payload() {
        let mut registry: Registry<Vec<String>> = Registry::new();
        registry.on(
            MessageKind::CaptureOutputResponse,
            Box::new(|log, env| {
                if let Message::CaptureOutputResponse { output, .. } = &env.message {
                    log.push(output.clone());
                }
            }),
        );

        let mut log = Vec::new();
        registry.dispatch(
            &mut log,
            &envelope(Message::CaptureOutputResponse {
                session_name: "build".to_string(),
                output: "hello".to_string(),
            }),
        );
        assert_eq!(log, vec!["hello".to_string()]);
    }
}
