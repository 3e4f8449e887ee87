//! The task that owns every piece of protocol state
//!
//! All flow control, dispatch and queue state lives inside one task, so none of it needs a lock.
//! Everything that crosses into the engine, whether an API call on [`HciLayer`](crate::HciLayer)
//! or an inbound packet from the HAL, is a message on one unbounded channel, which also fixes a
//! single order in which those crossings are observed.
//!
//! The engine starts by putting the controller through a reset handshake. Commands may be
//! enqueued at any time, they simply wait behind the reset in the command FIFO. Data does not
//! move until the handshake is done.

use crate::data_queue::{DataQueueEnd, QueueKind};
use crate::dispatch::EventDispatcher;
use crate::flow_control::CommandFlowControl;
use crate::hal::{HalCallbacks, HciHal};
use crate::{CommandResponder, CommandResponse, EventHandler};
use bytes::Bytes;
use hci_packets::{
    AclBuilder, AclView, CommandBuilder, CommandCompleteView, CommandStatusView, ErrorCode, EventCode, EventView,
    IsoBuilder, IsoView, SubeventCode,
};
use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant};

/// Time a sent command gets to produce a response before liveness escalation
const COMMAND_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything that crosses into the engine task
pub(crate) enum EngineMessage {
    EnqueueCommand {
        builder: CommandBuilder,
        responder: CommandResponder,
    },
    RegisterEvent {
        code: EventCode,
        handler: EventHandler,
    },
    UnregisterEvent(EventCode),
    RegisterLeEvent {
        code: SubeventCode,
        handler: EventHandler,
    },
    UnregisterLeEvent(SubeventCode),
    PumpOutbound(QueueKind),
    PumpInbound(QueueKind),
    InboundEvent(Bytes),
    InboundAcl(Bytes),
    InboundSco(Bytes),
    InboundIso(Bytes),
    ResetComplete(CommandResponse),
    Shutdown,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Resetting,
    Ready,
}

pub(crate) struct Engine<H: HciHal> {
    hal: H,
    // weak so the engine's own copies never hold its channel open
    tx: mpsc::WeakUnboundedSender<EngineMessage>,
    rx: mpsc::UnboundedReceiver<EngineMessage>,
    flow_control: CommandFlowControl,
    dispatcher: EventDispatcher,
    acl_queue: DataQueueEnd<AclBuilder, AclView>,
    iso_queue: DataQueueEnd<IsoBuilder, IsoView>,
    state: EngineState,
    command_deadline: Option<Instant>,
    escalated: bool,
}

impl<H: HciHal> Engine<H> {
    pub fn new(
        mut hal: H,
        tx: mpsc::WeakUnboundedSender<EngineMessage>,
        rx: mpsc::UnboundedReceiver<EngineMessage>,
        acl_queue: DataQueueEnd<AclBuilder, AclView>,
        iso_queue: DataQueueEnd<IsoBuilder, IsoView>,
    ) -> Engine<H> {
        hal.register_callbacks(HalCallbacks::new(tx.clone()));

        Engine {
            hal,
            tx,
            rx,
            flow_control: CommandFlowControl::new(),
            dispatcher: EventDispatcher::new(),
            acl_queue,
            iso_queue,
            state: EngineState::Resetting,
            command_deadline: None,
            escalated: false,
        }
    }

    pub async fn run(mut self) {
        self.start_reset();

        loop {
            let message = match self.command_deadline {
                Some(deadline) => {
                    tokio::select! {
                        message = self.rx.recv() => message,
                        _ = time::sleep_until(deadline) => {
                            self.on_command_timeout();
                            continue;
                        }
                    }
                }
                None => self.rx.recv().await,
            };

            // the channel closing means every handle is gone, same as an explicit shutdown
            let Some(message) = message else { break };

            if !self.handle(message) {
                break;
            }
        }

        self.shut_down();
    }

    fn start_reset(&mut self) {
        let tx = self.tx.clone();

        self.flow_control.enqueue(
            CommandBuilder::reset(),
            Box::new(move |response| {
                if let Some(tx) = tx.upgrade() {
                    let _ = tx.send(EngineMessage::ResetComplete(response));
                }
            }),
        );

        self.pump_commands();
    }

    /// Process one message, returning `false` to stop the engine
    fn handle(&mut self, message: EngineMessage) -> bool {
        match message {
            EngineMessage::EnqueueCommand { builder, responder } => {
                self.flow_control.enqueue(builder, responder);
                self.pump_commands();
            }
            // occupancy is asserted on the registering handle, a conflict here means the
            // handle-side bookkeeping and the dispatcher have diverged
            EngineMessage::RegisterEvent { code, handler } => {
                if let Err(error) = self.dispatcher.register(code, handler) {
                    log::error!("{error}");
                }
            }
            EngineMessage::UnregisterEvent(code) => self.dispatcher.unregister(code),
            EngineMessage::RegisterLeEvent { code, handler } => {
                if let Err(error) = self.dispatcher.register_le(code, handler) {
                    log::error!("{error}");
                }
            }
            EngineMessage::UnregisterLeEvent(code) => self.dispatcher.unregister_le(code),
            EngineMessage::PumpOutbound(kind) => self.pump_outbound(kind),
            EngineMessage::PumpInbound(kind) => self.pump_inbound(kind),
            EngineMessage::InboundEvent(packet) => self.on_event(packet),
            EngineMessage::InboundAcl(packet) => match AclView::decode(packet) {
                Ok(view) => {
                    self.acl_queue.push_inbound(view);
                    self.acl_queue.notify_dequeue();
                }
                Err(error) => log::warn!("dropping malformed ACL packet: {error}"),
            },
            EngineMessage::InboundSco(_) => {
                log::debug!("dropping inbound SCO packet, synchronous data is not routed");
            }
            EngineMessage::InboundIso(packet) => match IsoView::decode(packet) {
                Ok(view) => {
                    self.iso_queue.push_inbound(view);
                    self.iso_queue.notify_dequeue();
                }
                Err(error) => log::warn!("dropping malformed ISO packet: {error}"),
            },
            EngineMessage::ResetComplete(response) => self.on_reset_complete(response),
            EngineMessage::Shutdown => return false,
        }

        true
    }

    fn on_reset_complete(&mut self, response: CommandResponse) {
        let status = match response {
            CommandResponse::Complete(complete) => complete.status(),
            CommandResponse::Status(status) => Some(status.status()),
        };

        if status != Some(ErrorCode::Success) {
            log::error!("controller reset failed with {:?}", status);
            return;
        }

        log::info!("controller reset complete");

        self.state = EngineState::Ready;

        self.pump_commands();
        self.pump_outbound(QueueKind::Acl);
        self.pump_outbound(QueueKind::Iso);
    }

    fn on_event(&mut self, packet: Bytes) {
        let event = match EventView::decode(packet) {
            Ok(event) => event,
            Err(error) => {
                log::warn!("dropping malformed event packet: {error}");
                return;
            }
        };

        match event.event_code() {
            EventCode::CommandComplete => match CommandCompleteView::try_from(event) {
                Ok(complete) => {
                    if let Err(error) = self.flow_control.on_command_complete(complete) {
                        log::warn!("{error}");
                    }
                    self.on_command_response();
                }
                Err(error) => log::warn!("dropping malformed command complete: {error}"),
            },
            EventCode::CommandStatus => match CommandStatusView::try_from(event) {
                Ok(status) => {
                    if let Err(error) = self.flow_control.on_command_status(status) {
                        log::warn!("{error}");
                    }
                    self.on_command_response();
                }
                Err(error) => log::warn!("dropping malformed command status: {error}"),
            },
            _ => {
                if let Err(error) = self.dispatcher.dispatch(event) {
                    log::warn!("dropping undecodable event: {error}");
                }
            }
        }
    }

    /// Send every command the credit count allows and keep the liveness deadline honest
    fn pump_commands(&mut self) {
        while let Some(packet) = self.flow_control.try_send_next() {
            self.hal.send_command(packet);
        }

        if self.flow_control.awaiting_response() {
            if self.command_deadline.is_none() {
                self.command_deadline = Some(Instant::now() + COMMAND_TIMEOUT);
            }
        } else {
            self.command_deadline = None;
        }
    }

    /// Bookkeeping shared by both command response events
    fn on_command_response(&mut self) {
        self.escalated = false;
        self.command_deadline = self
            .flow_control
            .awaiting_response()
            .then(|| Instant::now() + COMMAND_TIMEOUT);

        self.pump_commands();
    }

    /// A sent command got no response within [`COMMAND_TIMEOUT`]
    ///
    /// Escalation asks the controller for its debug vendor dump, sent around flow control since a
    /// stalled controller's credit reports are exactly what is in doubt. One escalation per stall;
    /// the deadline is re-armed by the next response, should one still arrive.
    fn on_command_timeout(&mut self) {
        log::error!("command timed out with {} credits left", self.flow_control.credits());

        self.command_deadline = None;

        if !self.escalated {
            self.escalated = true;
            self.hal.send_command(CommandBuilder::controller_debug_info().build());
        }
    }

    fn pump_outbound(&mut self, kind: QueueKind) {
        if self.state != EngineState::Ready {
            return;
        }

        match kind {
            QueueKind::Acl => {
                if let Some(supplier) = self.acl_queue.take_supplier() {
                    self.hal.send_acl(supplier().build());
                }
            }
            QueueKind::Iso => {
                if let Some(supplier) = self.iso_queue.take_supplier() {
                    self.hal.send_iso(supplier().build());
                }
            }
        }
    }

    /// Replay the inbound backlog of a queue whose dequeue handler just registered
    fn pump_inbound(&mut self, kind: QueueKind) {
        match kind {
            QueueKind::Acl => {
                for _ in 0..self.acl_queue.backlog() {
                    self.acl_queue.notify_dequeue();
                }
            }
            QueueKind::Iso => {
                for _ in 0..self.iso_queue.backlog() {
                    self.iso_queue.notify_dequeue();
                }
            }
        }
    }

    fn shut_down(&mut self) {
        log::info!("shutting down");

        self.flow_control.abandon_all();
        self.dispatcher.clear();
        self.acl_queue.reset_registrations();
        self.iso_queue.reset_registrations();
        self.hal.unregister_callbacks();
    }
}
