//! Typed in-process messages from any thread to the main thread.
//!
//! Worker contexts never touch policy or registry state directly; they post
//! a [`MainMessage`] through a [`MainSender`] handle and the main loop
//! dispatches it to whichever handler is registered for the message kind.
//! Messages from a single sender are delivered in the order sent.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::trace;

use crate::core::AuradError;
use crate::services::bluetooth::{monitoring::BusEvent, policy::PolicyCommand};

/// Tag identifying which handler a message is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Host-bus notification about a remote Bluetooth object.
    BtBus,
    /// Bluetooth policy command.
    BtPolicy,
}

/// A message bound for the main thread.
#[derive(Debug)]
pub enum MainMessage {
    /// Host-bus notification about a remote Bluetooth object.
    BtBus(BusEvent),
    /// Bluetooth policy command.
    BtPolicy(PolicyCommand),
}

impl MainMessage {
    /// The routing tag for this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            MainMessage::BtBus(_) => MessageKind::BtBus,
            MainMessage::BtPolicy(_) => MessageKind::BtPolicy,
        }
    }
}

/// Cloneable sending half of the main message bus. Safe to use from any
/// thread.
#[derive(Debug, Clone)]
pub struct MainSender {
    tx: mpsc::UnboundedSender<MainMessage>,
}

impl MainSender {
    /// Posts a message to the main thread.
    ///
    /// # Errors
    /// Returns [`AuradError::BusClosed`] if the main loop has shut down.
    pub fn send(&self, msg: MainMessage) -> Result<(), AuradError> {
        self.tx.send(msg).map_err(|_| AuradError::BusClosed)
    }
}

/// Creates the bus channel: a sender handle and the receiver the main loop
/// drains.
pub fn channel() -> (MainSender, mpsc::UnboundedReceiver<MainMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (MainSender { tx }, rx)
}

/// Handler invoked on the main thread with the message and exclusive access
/// to the owning context.
pub type MessageHandler<C> = Box<dyn FnMut(MainMessage, &mut C) + Send>;

/// Handler table for main-thread dispatch.
///
/// Mutated from the main thread only. A message whose kind has no
/// registered handler is dropped silently.
pub struct MessageBus<C> {
    handlers: HashMap<MessageKind, MessageHandler<C>>,
}

impl<C> Default for MessageBus<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> MessageBus<C> {
    /// Creates an empty handler table.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers the handler for `kind`, replacing any previous one.
    pub fn add_handler(&mut self, kind: MessageKind, handler: MessageHandler<C>) {
        self.handlers.insert(kind, handler);
    }

    /// Removes the handler for `kind`. Returns true if one was registered.
    pub fn rm_handler(&mut self, kind: MessageKind) -> bool {
        self.handlers.remove(&kind).is_some()
    }

    /// Routes a message to its handler, dropping it if none is registered.
    pub fn dispatch(&mut self, msg: MainMessage, ctx: &mut C) {
        let kind = msg.kind();
        match self.handlers.get_mut(&kind) {
            Some(handler) => handler(msg, ctx),
            None => trace!(?kind, "dropping message with no handler"),
        }
    }

    /// Removes every handler. Used at shutdown.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::services::bluetooth::policy::PolicyCommand;

    fn switch_msg(path: &str) -> MainMessage {
        MainMessage::BtPolicy(PolicyCommand::SwitchProfile {
            path: path.to_string(),
            iodev: None,
        })
    }

    #[test]
    fn dispatches_to_registered_handler() {
        let mut bus: MessageBus<Vec<String>> = MessageBus::new();
        bus.add_handler(
            MessageKind::BtPolicy,
            Box::new(|msg, log| {
                if let MainMessage::BtPolicy(PolicyCommand::SwitchProfile { path, .. }) = msg {
                    log.push(path);
                }
            }),
        );

        let mut log = Vec::new();
        bus.dispatch(switch_msg("/bt/D1"), &mut log);

        assert_eq!(log, vec!["/bt/D1".to_string()]);
    }

    #[test]
    fn unhandled_message_dropped_silently() {
        let mut bus: MessageBus<Vec<String>> = MessageBus::new();
        let mut log = Vec::new();

        bus.dispatch(switch_msg("/bt/D1"), &mut log);

        assert!(log.is_empty());
    }

    #[test]
    fn removed_handler_no_longer_receives() {
        let mut bus: MessageBus<Vec<String>> = MessageBus::new();
        bus.add_handler(
            MessageKind::BtPolicy,
            Box::new(|_, log| log.push("seen".to_string())),
        );

        assert!(bus.rm_handler(MessageKind::BtPolicy));
        assert!(!bus.rm_handler(MessageKind::BtPolicy));

        let mut log = Vec::new();
        bus.dispatch(switch_msg("/bt/D1"), &mut log);
        assert!(log.is_empty());
    }

    #[tokio::test]
    async fn channel_preserves_sender_order() {
        let (tx, mut rx) = channel();

        tx.send(switch_msg("/bt/D1")).unwrap();
        tx.send(switch_msg("/bt/D2")).unwrap();

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        match (first, second) {
            (
                MainMessage::BtPolicy(PolicyCommand::SwitchProfile { path: p1, .. }),
                MainMessage::BtPolicy(PolicyCommand::SwitchProfile { path: p2, .. }),
            ) => {
                assert_eq!(p1, "/bt/D1");
                assert_eq!(p2, "/bt/D2");
            }
            other => panic!("unexpected messages: {other:?}"),
        }
    }
}
