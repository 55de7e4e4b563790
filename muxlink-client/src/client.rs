//! Central client driver
//!
//! Owns the connection, the dispatch registry and the reconciler, and runs
//! the single event loop everything else fires into. One event is processed
//! to completion at a time; ordering is arrival order.

use tokio::sync::mpsc;

use muxlink_protocol::{Envelope, MessageKind};
use muxlink_utils::Result;

use crate::connection::{Connection, ConnectionConfig, HandlerId, Registry};
use crate::events::ClientEvent;
use crate::reconciler::{ClientModel, Reconciler, ReconcilerConfig, ScrollbackMode};

/// Handler callback for external subscribers (e.g. a view layer)
pub type Subscriber = Box<dyn FnMut(&mut Reconciler, &Envelope) + Send>;

/// The assembled client: connection + registry + reconciler
pub struct Client {
    connection: Connection,
    registry: Registry<Reconciler>,
    reconciler: Reconciler,
    events: mpsc::UnboundedReceiver<ClientEvent>,
}

impl Client {
    /// Wire up a client; does not connect yet
    pub fn new(
        connection_config: ConnectionConfig,
        reconciler_config: ReconcilerConfig,
        scrollback: ScrollbackMode,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let connection = Connection::new(connection_config, events_tx.clone());

        let mut registry = Registry::new();
        Reconciler::register(&mut registry);

        let reconciler = Reconciler::new(
            reconciler_config,
            connection.sender(),
            events_tx,
            scrollback,
        );

        Self {
            connection,
            registry,
            reconciler,
            events: events_rx,
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.connection.connect().await
    }

    /// User-initiated disconnect; clears the model and stays down
    pub fn disconnect(&mut self) {
        self.connection.disconnect();
        self.reconciler.on_disconnected();
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    pub fn model(&self) -> &ClientModel {
        self.reconciler.model()
    }

    /// The reconciler, for issuing user intents
    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn reconciler_mut(&mut self) -> &mut Reconciler {
        &mut self.reconciler
    }

    /// Subscribe an additional handler for a message kind
    ///
    /// Subscribers run after the reconciler's own handler for that kind, so
    /// they observe the already-updated model.
    pub fn on(&mut self, kind: MessageKind, subscriber: Subscriber) -> HandlerId {
        self.registry.on(kind, subscriber)
    }

    /// Remove a subscriber by identity
    pub fn off(&mut self, kind: MessageKind, id: HandlerId) -> bool {
        self.registry.off(kind, id)
    }

    /// Wait for and process the next event
    ///
    /// Returns `false` once the event stream ends.
    pub async fn step(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    async fn handle_event(&mut self, event: ClientEvent) {
        match event {
            ClientEvent::Inbound(envelope) => {
                self.registry.dispatch(&mut self.reconciler, &envelope);
            }
            ClientEvent::TransportClosed => {
                self.connection.on_transport_closed();
                self.reconciler.on_disconnected();
            }
            ClientEvent::ReconnectDue => {
                self.connection.on_reconnect_due().await;
            }
            ClientEvent::PollTick(tag) => {
                if self.connection.is_connected() {
                    self.reconciler.on_poll_tick(tag);
                }
            }
            ClientEvent::CaptureDue(tag) => {
                if self.connection.is_connected() {
                    self.reconciler.on_capture_due(tag);
                }
            }
        }
    }
}
