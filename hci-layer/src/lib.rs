//! Host side of the Bluetooth HCI
//!
//! This is the protocol layer that sits directly on a controller transport. It owns the three
//! concerns every HCI host has before any profile logic can exist:
//!
//! * command flow control, pacing outbound commands by the credit allowance the controller
//!   reports and matching *Command Complete* / *Command Status* events back to their commands,
//! * event dispatch, routing every other event (and every *LE Meta* subevent) to the single
//!   handler registered for its code,
//! * connection data transport, moving ACL and ISO packets through per-kind queue ends with
//!   single-packet outbound backpressure.
//!
//! All of that state lives in one task, the [`engine`], and an [`HciLayer`] is a cheap cloneable
//! handle posting messages to it. The engine talks to the controller through whatever [`HciHal`]
//! implementation it is started with, and begins by driving the controller through a reset
//! handshake before releasing any traffic.
//!
//! ```
//! # use hci_layer::{HciLayer, HciHal, HalCallbacks, CommandResponse};
//! # use hci_packets::CommandBuilder;
//! # use bytes::Bytes;
//! # struct MyHal;
//! # impl HciHal for MyHal {
//! #     fn register_callbacks(&mut self, _: HalCallbacks) {}
//! #     fn unregister_callbacks(&mut self) {}
//! #     fn send_command(&mut self, _: Bytes) {}
//! #     fn send_acl(&mut self, _: Bytes) {}
//! #     fn send_sco(&mut self, _: Bytes) {}
//! #     fn send_iso(&mut self, _: Bytes) {}
//! # }
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let layer = HciLayer::start(MyHal);
//!
//! layer.enqueue_command(CommandBuilder::read_local_version_information(), |response| {
//!     if let CommandResponse::Complete(complete) = response {
//!         println!("local version: {:02x?}", complete.return_parameter());
//!     }
//! });
//! # }
//! ```

mod data_queue;
mod dispatch;
mod engine;
mod flow_control;
mod hal;

pub use data_queue::{DataQueueEnd, QueueKind};
pub use hal::{HalCallbacks, HciHal};

use engine::{Engine, EngineMessage};
use hci_packets::{
    AclBuilder, AclView, CommandBuilder, CommandCompleteView, CommandStatusView, EventCode, EventView, IsoBuilder,
    IsoView, SubeventCode,
};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// The response a command eventually gets from the controller
#[derive(Debug)]
pub enum CommandResponse {
    /// A *Command Complete* event, carrying the command's return parameters
    Complete(CommandCompleteView),
    /// A *Command Status* event, for commands whose outcome arrives later as a separate event
    Status(CommandStatusView),
}

/// One-shot callback resolving an enqueued command
pub type CommandResponder = Box<dyn FnOnce(CommandResponse) + Send + 'static>;

/// Callback registered for an event code or LE subevent code
pub type EventHandler = Arc<dyn Fn(EventView) + Send + Sync>;

/// Occupied handler slots, tracked on the handle side so conflicts fail in the caller
#[derive(Default)]
struct Registrations {
    events: HashSet<EventCode>,
    le_events: HashSet<SubeventCode>,
}

/// Handle to a running HCI layer
///
/// Cloning is cheap; every clone posts to the same engine. The engine stops when
/// [`shut_down`](Self::shut_down) is called or the last handle is dropped; queue ends and the
/// HAL's callback sink do not keep it alive on their own.
#[derive(Clone)]
pub struct HciLayer {
    tx: mpsc::UnboundedSender<EngineMessage>,
    registrations: Arc<Mutex<Registrations>>,
    acl_queue: DataQueueEnd<AclBuilder, AclView>,
    iso_queue: DataQueueEnd<IsoBuilder, IsoView>,
}

impl HciLayer {
    /// Start an HCI layer on the given controller transport
    ///
    /// Spawns the engine task onto the current tokio runtime. The engine immediately sends a
    /// reset command to the controller; commands enqueued before the reset resolves simply wait
    /// behind it.
    pub fn start<H: HciHal>(hal: H) -> HciLayer {
        let (tx, rx) = mpsc::unbounded_channel();

        let acl_queue = DataQueueEnd::new(QueueKind::Acl, tx.downgrade());
        let iso_queue = DataQueueEnd::new(QueueKind::Iso, tx.downgrade());

        let engine = Engine::new(hal, tx.downgrade(), rx, acl_queue.clone(), iso_queue.clone());

        tokio::spawn(engine.run());

        HciLayer {
            tx,
            registrations: Arc::new(Mutex::new(Registrations::default())),
            acl_queue,
            iso_queue,
        }
    }

    /// Enqueue a command for the controller
    ///
    /// The command goes out once flow control allows it, and `responder` is invoked on the engine
    /// task with whichever of the two response events the controller answers with. If the layer
    /// shuts down first the responder is dropped uninvoked.
    pub fn enqueue_command(&self, builder: CommandBuilder, responder: impl FnOnce(CommandResponse) + Send + 'static) {
        let _ = self.tx.send(EngineMessage::EnqueueCommand {
            builder,
            responder: Box::new(responder),
        });
    }

    /// Register the handler for an event code
    ///
    /// # Panics
    /// Panics if the code already has a handler, or if the code is one of the three the layer
    /// consumes itself (*Command Complete*, *Command Status* and *LE Meta*).
    pub fn register_event_handler(&self, code: EventCode, handler: impl Fn(EventView) + Send + Sync + 'static) {
        assert!(
            !matches!(code, EventCode::CommandComplete | EventCode::CommandStatus | EventCode::LeMeta),
            "{:?} is consumed by the layer and cannot be handled above it",
            code,
        );

        self.claim_event(code);

        let _ = self.tx.send(EngineMessage::RegisterEvent {
            code,
            handler: Arc::new(handler),
        });
    }

    pub fn unregister_event_handler(&self, code: EventCode) {
        self.registrations.lock().unwrap().events.remove(&code);

        let _ = self.tx.send(EngineMessage::UnregisterEvent(code));
    }

    /// Register the handler for an LE subevent code
    ///
    /// # Panics
    /// Panics if the subevent code already has a handler.
    pub fn register_le_event_handler(&self, code: SubeventCode, handler: impl Fn(EventView) + Send + Sync + 'static) {
        self.claim_le_event(code);

        let _ = self.tx.send(EngineMessage::RegisterLeEvent {
            code,
            handler: Arc::new(handler),
        });
    }

    pub fn unregister_le_event_handler(&self, code: SubeventCode) {
        self.registrations.lock().unwrap().le_events.remove(&code);

        let _ = self.tx.send(EngineMessage::UnregisterLeEvent(code));
    }

    // conflicts panic here, on the registering caller, so the engine task never dies over them
    fn claim_event(&self, code: EventCode) {
        assert!(
            self.registrations.lock().unwrap().events.insert(code),
            "a handler is already registered for event {:?}",
            code,
        );
    }

    fn claim_le_event(&self, code: SubeventCode) {
        assert!(
            self.registrations.lock().unwrap().le_events.insert(code),
            "a handler is already registered for LE subevent {:?}",
            code,
        );
    }

    /// The queue end moving ACL data in both directions
    pub fn acl_queue_end(&self) -> DataQueueEnd<AclBuilder, AclView> {
        self.acl_queue.clone()
    }

    /// The queue end moving ISO data in both directions
    pub fn iso_queue_end(&self) -> DataQueueEnd<IsoBuilder, IsoView> {
        self.iso_queue.clone()
    }

    /// Carve out the BR/EDR security surface
    ///
    /// Registers `handler` for the security related events (*Encryption Change* and *Link Key
    /// Notification*) and returns a command handle scoped to that client.
    pub fn security_interface(&self, handler: impl Fn(EventView) + Send + Sync + 'static) -> SecurityInterface {
        let handler: EventHandler = Arc::new(handler);

        for code in [EventCode::EncryptionChange, EventCode::LinkKeyNotification] {
            self.claim_event(code);

            let _ = self.tx.send(EngineMessage::RegisterEvent {
                code,
                handler: handler.clone(),
            });
        }

        SecurityInterface { layer: self.clone() }
    }

    /// Carve out the LE security surface
    ///
    /// Registers `handler` for the *LE Long Term Key Request* subevent and returns a command
    /// handle scoped to that client.
    pub fn le_security_interface(&self, handler: impl Fn(EventView) + Send + Sync + 'static) -> LeSecurityInterface {
        self.claim_le_event(SubeventCode::LongTermKeyRequest);

        let _ = self.tx.send(EngineMessage::RegisterLeEvent {
            code: SubeventCode::LongTermKeyRequest,
            handler: Arc::new(handler),
        });

        LeSecurityInterface { layer: self.clone() }
    }

    /// Stop the engine
    ///
    /// Unresolved commands are abandoned, registrations are dropped and the HAL's callbacks are
    /// unregistered. Posting through any surviving handle after this is a no-op.
    pub fn shut_down(&self) {
        let mut registrations = self.registrations.lock().unwrap();

        registrations.events.clear();
        registrations.le_events.clear();

        drop(registrations);

        let _ = self.tx.send(EngineMessage::Shutdown);
    }
}

/// Command handle for a BR/EDR security client
///
/// Created by [`HciLayer::security_interface`]. Commands go through the same flow control as
/// everything else.
pub struct SecurityInterface {
    layer: HciLayer,
}

impl SecurityInterface {
    pub fn enqueue_command(&self, builder: CommandBuilder, responder: impl FnOnce(CommandResponse) + Send + 'static) {
        self.layer.enqueue_command(builder, responder);
    }
}

/// Command handle for an LE security client
///
/// Created by [`HciLayer::le_security_interface`].
pub struct LeSecurityInterface {
    layer: HciLayer,
}

impl LeSecurityInterface {
    pub fn enqueue_command(&self, builder: CommandBuilder, responder: impl FnOnce(CommandResponse) + Send + 'static) {
        self.layer.enqueue_command(builder, responder);
    }
}
