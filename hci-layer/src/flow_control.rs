//! Flow control of commands to the controller
//!
//! The controller reports how many command packets it is willing to hold with every *Command
//! Complete* and *Command Status* event, in the `num_hci_command_packets` field. That field is the
//! controller's current allowance, not a delta, so the credit count here is overwritten by each
//! report rather than incremented.
//!
//! Commands wait in a FIFO until a credit lets them go out, and move to an *awaiting response*
//! FIFO once sent. Responses are matched back in submission order: a *Command Status* always
//! answers the oldest sent command, while a *Command Complete* answers the oldest sent command
//! with the same opcode. The order-based matching leans on the controller answering commands in
//! the order it received them, which the specification requires of it; the opcode equality check
//! on completions is the one defensive cross-check kept on top of that.

use crate::{CommandResponder, CommandResponse};
use bytes::Bytes;
use hci_packets::{CommandBuilder, CommandCompleteView, CommandStatusView, OpCode};
use std::collections::VecDeque;

/// A command waiting for a credit
struct PendingCommand {
    builder: CommandBuilder,
    responder: CommandResponder,
}

/// A command sent to the controller whose response has not arrived yet
struct SentCommand {
    opcode: OpCode,
    responder: CommandResponder,
}

/// Error of matching a credit-bearing event back to a sent command
#[derive(Debug, thiserror::Error)]
pub(crate) enum MatchError {
    #[error("command complete for {0:?} matches no sent command")]
    NoMatchingOpcode(OpCode),
    #[error("command status received with no command awaiting a response")]
    NothingSent,
}

/// The pending-command FIFO and credit count
pub(crate) struct CommandFlowControl {
    pending: VecDeque<PendingCommand>,
    sent: VecDeque<SentCommand>,
    credits: usize,
}

impl CommandFlowControl {
    /// Create a flow control primed with a single credit
    ///
    /// One credit is the allowance every controller grants before it has reported anything, it is
    /// what lets the initial reset out.
    pub fn new() -> CommandFlowControl {
        CommandFlowControl {
            pending: VecDeque::new(),
            sent: VecDeque::new(),
            credits: 1,
        }
    }

    pub fn credits(&self) -> usize {
        self.credits
    }

    /// Whether any sent command is still awaiting its response
    pub fn awaiting_response(&self) -> bool {
        !self.sent.is_empty()
    }

    pub fn enqueue(&mut self, builder: CommandBuilder, responder: CommandResponder) {
        self.pending.push_back(PendingCommand { builder, responder });
    }

    /// Take the next command allowed out by the credit count
    ///
    /// Returns the serialized packet, with the command accounted as sent and one credit consumed.
    /// `None` when the FIFO is empty or the credits are exhausted; callers drain by looping until
    /// `None`.
    pub fn try_send_next(&mut self) -> Option<Bytes> {
        if self.credits == 0 {
            return None;
        }

        let command = self.pending.pop_front()?;

        self.credits -= 1;

        let opcode = command.builder.opcode();
        let packet = command.builder.build();

        log::debug!("sending command {:?}, {} credits left", opcode, self.credits);

        self.sent.push_back(SentCommand {
            opcode,
            responder: command.responder,
        });

        Some(packet)
    }

    /// Consume a *Command Complete* event
    ///
    /// The credit count takes the event's allowance even when no command matches; a completion
    /// with the [`Nop`](OpCode::Nop) opcode is purely a credit report and resolves nothing.
    pub fn on_command_complete(&mut self, complete: CommandCompleteView) -> Result<(), MatchError> {
        self.credits = complete.num_hci_command_packets() as usize;

        let opcode = complete.command_opcode();

        if opcode == OpCode::Nop {
            return Ok(());
        }

        let position = self
            .sent
            .iter()
            .position(|sent| sent.opcode == opcode)
            .ok_or(MatchError::NoMatchingOpcode(opcode))?;

        if let Some(sent) = self.sent.remove(position) {
            (sent.responder)(CommandResponse::Complete(complete));
        }

        Ok(())
    }

    /// Consume a *Command Status* event
    pub fn on_command_status(&mut self, status: CommandStatusView) -> Result<(), MatchError> {
        self.credits = status.num_hci_command_packets() as usize;

        let sent = self.sent.pop_front().ok_or(MatchError::NothingSent)?;

        (sent.responder)(CommandResponse::Status(status));

        Ok(())
    }

    /// Drop every pending and sent command without invoking any responder
    pub fn abandon_all(&mut self) {
        self.pending.clear();
        self.sent.clear();
    }
}
