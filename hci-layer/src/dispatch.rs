//! Routing of inbound events to registered handlers
//!
//! Every event code (and every LE subevent code) has at most one handler slot. Registering onto
//! an occupied slot is refused, a caller that wants to replace a handler has to unregister first;
//! silently overwriting would hide a wiring bug in the upper layers. An event with no handler is
//! not an error, it is logged and dropped.

use crate::EventHandler;
use hci_packets::{DecodeError, EventCode, EventView, LeMetaEventView, SubeventCode};
use std::collections::HashMap;

/// Error of binding a handler to an already occupied slot
#[derive(Debug, thiserror::Error)]
pub(crate) enum RegistrationError {
    #[error("a handler is already registered for event {0:?}")]
    EventTaken(EventCode),
    #[error("a handler is already registered for LE subevent {0:?}")]
    SubeventTaken(SubeventCode),
}

/// The handler tables for general events and LE subevents
pub(crate) struct EventDispatcher {
    handlers: HashMap<EventCode, EventHandler>,
    le_handlers: HashMap<SubeventCode, EventHandler>,
}

impl EventDispatcher {
    pub fn new() -> EventDispatcher {
        EventDispatcher {
            handlers: HashMap::new(),
            le_handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, code: EventCode, handler: EventHandler) -> Result<(), RegistrationError> {
        if self.handlers.contains_key(&code) {
            return Err(RegistrationError::EventTaken(code));
        }

        self.handlers.insert(code, handler);

        Ok(())
    }

    pub fn unregister(&mut self, code: EventCode) {
        if self.handlers.remove(&code).is_none() {
            log::warn!("unregistering event {:?} which has no handler", code);
        }
    }

    pub fn register_le(&mut self, code: SubeventCode, handler: EventHandler) -> Result<(), RegistrationError> {
        if self.le_handlers.contains_key(&code) {
            return Err(RegistrationError::SubeventTaken(code));
        }

        self.le_handlers.insert(code, handler);

        Ok(())
    }

    pub fn unregister_le(&mut self, code: SubeventCode) {
        if self.le_handlers.remove(&code).is_none() {
            log::warn!("unregistering LE subevent {:?} which has no handler", code);
        }
    }

    /// Route an event to the one handler registered for its code
    ///
    /// *Command Complete* and *Command Status* must never get here, they belong to command flow
    /// control and are not observable through handler registration. *LE Meta* events are resolved
    /// one level further, to the handler registered for their subevent code.
    ///
    /// # Error
    /// An *LE Meta* event whose subevent code cannot be decoded is returned as the decode error
    /// for the caller to absorb.
    pub fn dispatch(&self, event: EventView) -> Result<(), DecodeError> {
        let code = event.event_code();

        debug_assert!(
            !matches!(code, EventCode::CommandComplete | EventCode::CommandStatus),
            "command response events are routed to flow control, not dispatched",
        );

        if code == EventCode::LeMeta {
            let meta = LeMetaEventView::try_from(event)?;
            let subevent_code = meta.subevent_code();

            match self.le_handlers.get(&subevent_code) {
                Some(handler) => handler(meta.event().clone()),
                None => log::debug!("dropping LE subevent {:?} with no handler", subevent_code),
            }
        } else {
            match self.handlers.get(&code) {
                Some(handler) => handler(event),
                None => log::debug!("dropping event {:?} with no handler", code),
            }
        }

        Ok(())
    }

    /// Clear every slot, part of engine shutdown
    pub fn clear(&mut self) {
        self.handlers.clear();
        self.le_handlers.clear();
    }
}
