//! The hardware abstraction boundary
//!
//! The engine drives a controller through an implementation of [`HciHal`]. A HAL is only required
//! to do two things: accept framed outbound packets of the four sendable kinds, and hand inbound
//! packets to the [`HalCallbacks`] registered with it. How the bytes actually reach the controller
//! (UART, USB, a virtualized controller, ...) is entirely the HAL's business.
//!
//! Inbound delivery through `HalCallbacks` is a hand-off, not a call into the engine. Each
//! callback posts the packet onto the engine's context and returns immediately, so a HAL may
//! invoke them from any thread or async task without holding up its transport.

use crate::engine::EngineMessage;
use bytes::Bytes;
use tokio::sync::mpsc::WeakUnboundedSender;

/// Interface to a Bluetooth controller transport
///
/// All sends are fire and forget. A transport that fails to deliver is expected to surface that
/// through its own channels (or drop the packet); the engine's only recourse either way is its
/// liveness escalation.
pub trait HciHal: Send + 'static {
    /// Register the sink for inbound packets
    ///
    /// Called by the engine once, before any send.
    fn register_callbacks(&mut self, callbacks: HalCallbacks);

    /// Drop the inbound sink, called on engine shutdown
    fn unregister_callbacks(&mut self);

    fn send_command(&mut self, packet: Bytes);

    fn send_acl(&mut self, packet: Bytes);

    fn send_sco(&mut self, packet: Bytes);

    fn send_iso(&mut self, packet: Bytes);
}

/// Inbound packet sink handed to the HAL
///
/// Cloning is cheap; a HAL split across reader tasks can give every reader its own handle. If the
/// engine has shut down the packets are quietly discarded.
#[derive(Clone)]
pub struct HalCallbacks {
    // weak so that the HAL holding its sink does not keep the engine running
    tx: WeakUnboundedSender<EngineMessage>,
}

impl HalCallbacks {
    pub(crate) fn new(tx: WeakUnboundedSender<EngineMessage>) -> HalCallbacks {
        HalCallbacks { tx }
    }

    fn post(&self, message: EngineMessage) {
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(message);
        }
    }

    pub fn on_event(&self, packet: Bytes) {
        self.post(EngineMessage::InboundEvent(packet));
    }

    pub fn on_acl_data(&self, packet: Bytes) {
        self.post(EngineMessage::InboundAcl(packet));
    }

    pub fn on_sco_data(&self, packet: Bytes) {
        self.post(EngineMessage::InboundSco(packet));
    }

    pub fn on_iso_data(&self, packet: Bytes) {
        self.post(EngineMessage::InboundIso(packet));
    }
}
