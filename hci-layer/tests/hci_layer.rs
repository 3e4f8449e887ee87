//! End to end tests of the protocol engine against a scripted controller

use bytes::Bytes;
use hci_layer::{CommandResponse, HalCallbacks, HciHal, HciLayer};
use hci_packets::{
    AclBroadcastFlag, AclBuilder, AclPacketBoundary, AclView, Address, CommandBuilder, CommandView, ConnectionHandle,
    ErrorCode, EventBuilder, EventCode, EventView, IsoBuilder, IsoPacketBoundary, IsoView, LinkType, OpCode,
    SubeventCode,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

#[derive(Default)]
struct TestHalState {
    callbacks: Option<HalCallbacks>,
    commands: VecDeque<Bytes>,
    acl: VecDeque<Bytes>,
    iso: VecDeque<Bytes>,
}

/// A controller stub recording everything the engine sends
///
/// Clones share state, the engine gets one clone and the test keeps another to script the
/// controller side.
#[derive(Clone, Default)]
struct TestHal {
    state: Arc<Mutex<TestHalState>>,
}

impl HciHal for TestHal {
    fn register_callbacks(&mut self, callbacks: HalCallbacks) {
        self.state.lock().unwrap().callbacks = Some(callbacks);
    }

    fn unregister_callbacks(&mut self) {
        self.state.lock().unwrap().callbacks = None;
    }

    fn send_command(&mut self, packet: Bytes) {
        self.state.lock().unwrap().commands.push_back(packet);
    }

    fn send_acl(&mut self, packet: Bytes) {
        self.state.lock().unwrap().acl.push_back(packet);
    }

    fn send_sco(&mut self, _packet: Bytes) {
        panic!("nothing in these tests sends synchronous data");
    }

    fn send_iso(&mut self, packet: Bytes) {
        self.state.lock().unwrap().iso.push_back(packet);
    }
}

impl TestHal {
    fn callbacks(&self) -> HalCallbacks {
        self.state.lock().unwrap().callbacks.clone().unwrap()
    }

    fn has_callbacks(&self) -> bool {
        self.state.lock().unwrap().callbacks.is_some()
    }

    async fn sent_command(&self) -> CommandView {
        let packet = next(&self.state, |state| state.commands.pop_front()).await;

        CommandView::decode(packet).unwrap()
    }

    async fn sent_acl(&self) -> AclView {
        AclView::decode(next(&self.state, |state| state.acl.pop_front()).await).unwrap()
    }

    async fn sent_iso(&self) -> IsoView {
        IsoView::decode(next(&self.state, |state| state.iso.pop_front()).await).unwrap()
    }

    fn no_command_sent(&self) -> bool {
        self.state.lock().unwrap().commands.is_empty()
    }

    fn pending_commands(&self) -> usize {
        self.state.lock().unwrap().commands.len()
    }

    fn no_acl_sent(&self) -> bool {
        self.state.lock().unwrap().acl.is_empty()
    }

    /// Answer the oldest sent command with a successful *Command Complete*
    async fn complete_command(&self, expected: OpCode, num_hci_command_packets: u8) {
        let command = self.sent_command().await;

        assert_eq!(command.opcode(), expected);

        self.callbacks().on_event(
            EventBuilder::command_complete(num_hci_command_packets, expected, &[ErrorCode::Success.raw()]).build(),
        );
    }
}

/// Take a packet out of the shared state, yielding to let the engine task run
async fn next(state: &Arc<Mutex<TestHalState>>, pop: impl Fn(&mut TestHalState) -> Option<Bytes>) -> Bytes {
    for _ in 0..1000 {
        if let Some(packet) = pop(&mut state.lock().unwrap()) {
            return packet;
        }

        tokio::task::yield_now().await;
    }

    panic!("the engine never sent the awaited packet");
}

/// Let the engine task drain its message queue
async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

/// Start a layer and walk it through the reset handshake
async fn start_layer() -> (HciLayer, TestHal) {
    let hal = TestHal::default();
    let layer = HciLayer::start(hal.clone());

    hal.complete_command(OpCode::Reset, 1).await;
    settle().await;

    (layer, hal)
}

fn recorded_events() -> (Arc<Mutex<Vec<EventView>>>, impl Fn(EventView) + Send + Sync + 'static) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();

    (events, move |event| sink.lock().unwrap().push(event))
}

fn recorded_responses() -> (Arc<Mutex<Vec<CommandResponse>>>, impl FnOnce(CommandResponse) + Send + 'static) {
    let responses = Arc::new(Mutex::new(Vec::new()));
    let sink = responses.clone();

    (responses, move |response| sink.lock().unwrap().push(response))
}

fn handle() -> ConnectionHandle {
    ConnectionHandle::try_from(0x0123).unwrap()
}

#[tokio::test]
async fn init_and_shut_down() {
    let (layer, hal) = start_layer().await;

    assert!(hal.has_callbacks());

    layer.shut_down();
    settle().await;

    assert!(!hal.has_callbacks());
}

#[tokio::test]
async fn le_meta_events_reach_the_subevent_handler() {
    let (layer, hal) = start_layer().await;
    let (events, sink) = recorded_events();

    layer.register_le_event_handler(SubeventCode::ConnectionComplete, sink);
    settle().await;

    hal.callbacks().on_event(
        EventBuilder::le_connection_complete(
            ErrorCode::Success,
            handle(),
            hci_packets::Role::Central,
            hci_packets::AddressType::PublicDevice,
            Address::from_string("A1:A2:A3:A4:A5:A6").unwrap(),
            0x0020,
            0x0000,
            0x0100,
            0x00,
        )
        .build(),
    );
    settle().await;

    let events = events.lock().unwrap();

    assert_eq!(events.len(), 1);

    let meta = hci_packets::LeMetaEventView::try_from(events[0].clone()).unwrap();
    let connection = hci_packets::LeConnectionCompleteView::try_from(meta).unwrap();

    assert_eq!(connection.connection_handle(), handle());
}

#[tokio::test]
async fn no_op_credit_reports_gate_the_command_fifo() {
    let (layer, hal) = start_layer().await;
    let (responses, sink) = recorded_responses();

    // the controller takes every credit away before the command is enqueued
    hal.callbacks().on_event(EventBuilder::no_command_complete(0).build());
    settle().await;

    layer.enqueue_command(CommandBuilder::read_local_version_information(), sink);
    settle().await;

    assert!(hal.no_command_sent());
    assert!(responses.lock().unwrap().is_empty());

    hal.callbacks().on_event(EventBuilder::no_command_complete(1).build());

    hal.complete_command(OpCode::ReadLocalVersionInformation, 1).await;
    settle().await;

    let responses = responses.lock().unwrap();

    assert_eq!(responses.len(), 1);
    assert!(matches!(&responses[0], CommandResponse::Complete(complete)
        if complete.command_opcode() == OpCode::ReadLocalVersionInformation));
}

#[tokio::test]
async fn commands_go_out_one_credit_at_a_time() {
    let (layer, hal) = start_layer().await;

    let opcodes = [
        OpCode::ReadLocalVersionInformation,
        OpCode::ReadLocalSupportedCommands,
        OpCode::ReadLocalSupportedFeatures,
    ];

    let builders = [
        CommandBuilder::read_local_version_information(),
        CommandBuilder::read_local_supported_commands(),
        CommandBuilder::read_local_supported_features(),
    ];

    for builder in builders {
        layer.enqueue_command(builder, |_| {});
    }
    settle().await;

    // never more than the one allowed command in flight
    assert_eq!(hal.pending_commands(), 1);

    for opcode in opcodes {
        hal.complete_command(opcode, 1).await;
        settle().await;

        assert!(hal.pending_commands() <= 1);
    }

    assert!(hal.no_command_sent());
}

#[tokio::test]
async fn security_interface_commands_and_events() {
    let (layer, hal) = start_layer().await;
    let (events, sink) = recorded_events();
    let (responses, response_sink) = recorded_responses();

    let security = layer.security_interface(sink);
    settle().await;

    security.enqueue_command(CommandBuilder::write_simple_pairing_mode(true), response_sink);

    hal.complete_command(OpCode::WriteSimplePairingMode, 1).await;
    settle().await;

    assert_eq!(responses.lock().unwrap().len(), 1);

    hal.callbacks()
        .on_event(EventBuilder::encryption_change(ErrorCode::Success, handle(), true).build());
    settle().await;

    let events = events.lock().unwrap();

    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_code(), EventCode::EncryptionChange);
}

#[tokio::test]
async fn le_security_interface_commands_and_subevents() {
    let (layer, hal) = start_layer().await;
    let (events, sink) = recorded_events();
    let (responses, response_sink) = recorded_responses();

    let security = layer.le_security_interface(sink);
    settle().await;

    security.enqueue_command(CommandBuilder::le_rand(), response_sink);

    let random_number = 0x0102_0304_0506_0708u64.to_le_bytes();

    let command = hal.sent_command().await;

    assert_eq!(command.opcode(), OpCode::LeRand);

    let mut return_parameter = vec![ErrorCode::Success.raw()];
    return_parameter.extend_from_slice(&random_number);

    hal.callbacks()
        .on_event(EventBuilder::command_complete(1, OpCode::LeRand, &return_parameter).build());
    settle().await;

    {
        let responses = responses.lock().unwrap();

        assert!(matches!(&responses[..], [CommandResponse::Complete(complete)]
            if complete.return_parameter()[1..] == random_number));
    }

    hal.callbacks()
        .on_event(EventBuilder::le_long_term_key_request(handle(), 0xABCD, 0x1234).build());
    settle().await;

    assert_eq!(events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn create_connection_and_move_acl_data() {
    let (layer, hal) = start_layer().await;
    let (events, sink) = recorded_events();
    let (responses, response_sink) = recorded_responses();

    layer.register_event_handler(EventCode::ConnectionComplete, sink);
    settle().await;

    let peer = Address::from_string("A1:A2:A3:A4:A5:A6").unwrap();

    layer.enqueue_command(CommandBuilder::create_connection(peer, 0xCC18, 0x01, 0x0000, true), response_sink);

    let command = hal.sent_command().await;

    assert_eq!(command.opcode(), OpCode::CreateConnection);

    hal.callbacks()
        .on_event(EventBuilder::command_status(ErrorCode::Success, 1, OpCode::CreateConnection).build());
    settle().await;

    assert!(matches!(&responses.lock().unwrap()[..], [CommandResponse::Status(status)]
        if status.status() == ErrorCode::Success));

    hal.callbacks()
        .on_event(EventBuilder::connection_complete(ErrorCode::Success, handle(), peer, LinkType::Acl, false).build());
    settle().await;

    {
        let events = events.lock().unwrap();

        assert_eq!(events.len(), 1);

        let connection = hci_packets::ConnectionCompleteView::try_from(events[0].clone()).unwrap();

        assert_eq!(connection.connection_handle(), handle());
        assert_eq!(connection.bd_addr(), peer);
    }

    // outbound: offer one packet and watch it come out of the transport
    let queue = layer.acl_queue_end();
    let payload = Bytes::copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);

    let outbound = payload.clone();
    queue.register_enqueue(move || {
        AclBuilder::new(
            handle(),
            AclPacketBoundary::FirstAutoFlushable,
            AclBroadcastFlag::PointToPoint,
            outbound,
        )
    });

    let sent = hal.sent_acl().await;

    assert_eq!(sent.handle(), handle());
    assert_eq!(sent.payload(), payload);

    // inbound: the controller echoes it back
    let received = Arc::new(Mutex::new(Vec::new()));

    let handler_queue = queue.clone();
    let handler_received = received.clone();

    queue.register_dequeue(move || {
        let view = handler_queue.try_dequeue().unwrap();
        handler_received.lock().unwrap().push(view.payload());
    });

    hal.callbacks().on_acl_data(
        AclBuilder::new(
            handle(),
            AclPacketBoundary::FirstAutoFlushable,
            AclBroadcastFlag::PointToPoint,
            payload.clone(),
        )
        .build(),
    );
    settle().await;

    assert_eq!(received.lock().unwrap().as_slice(), &[payload]);
}

#[tokio::test]
async fn acl_backlog_is_replayed_across_handler_registrations() {
    let (layer, hal) = start_layer().await;

    let inject = |sequence: u16| {
        hal.callbacks().on_acl_data(
            AclBuilder::new(
                handle(),
                AclPacketBoundary::FirstAutoFlushable,
                AclBroadcastFlag::PointToPoint,
                Bytes::copy_from_slice(&sequence.to_le_bytes()),
            )
            .build(),
        );
    };

    // the first half arrives before anyone is listening
    for sequence in 0..50 {
        inject(sequence);
    }
    settle().await;

    let queue = layer.acl_queue_end();
    let received = Arc::new(Mutex::new(Vec::new()));

    let handler_queue = queue.clone();
    let handler_received = received.clone();

    let handler = move || {
        let view = handler_queue.try_dequeue().unwrap();
        let payload = view.payload();

        handler_received
            .lock()
            .unwrap()
            .push(u16::from_le_bytes([payload[0], payload[1]]));
    };

    queue.register_dequeue(handler.clone());
    settle().await;

    assert_eq!(received.lock().unwrap().len(), 50);

    // while unregistered nothing is delivered, only buffered
    queue.unregister_dequeue();

    for sequence in 50..100 {
        inject(sequence);
    }
    settle().await;

    assert_eq!(received.lock().unwrap().len(), 50);

    queue.register_dequeue(handler);
    settle().await;

    let received = received.lock().unwrap();

    assert_eq!(received.len(), 100);
    assert!(received.iter().copied().eq(0..100));
}

#[tokio::test]
async fn iso_data_moves_both_ways() {
    let (layer, hal) = start_layer().await;

    let queue = layer.iso_queue_end();
    let received = Arc::new(Mutex::new(Vec::new()));

    let handler_queue = queue.clone();
    let handler_received = received.clone();

    queue.register_dequeue(move || {
        let view = handler_queue.try_dequeue().unwrap();
        let payload = view.payload();

        handler_received
            .lock()
            .unwrap()
            .push(u16::from_le_bytes([payload[0], payload[1]]));
    });
    settle().await;

    for sequence in 0..100u16 {
        hal.callbacks().on_iso_data(
            IsoBuilder::new(
                handle(),
                IsoPacketBoundary::CompleteSdu,
                None,
                Bytes::copy_from_slice(&sequence.to_le_bytes()),
            )
            .build(),
        );
    }
    settle().await;

    {
        let received = received.lock().unwrap();

        assert_eq!(received.len(), 100);
        assert!(received.iter().copied().eq(0..100));
    }

    queue.register_enqueue(|| {
        IsoBuilder::new(handle(), IsoPacketBoundary::CompleteSdu, Some(0x1234_5678), Bytes::copy_from_slice(&[0x42]))
    });

    let sent = hal.sent_iso().await;

    assert_eq!(sent.timestamp(), Some(0x1234_5678));
    assert_eq!(&sent.payload()[..], &[0x42]);
}

#[tokio::test(start_paused = true)]
async fn unanswered_command_escalates_to_a_debug_dump() {
    let (layer, hal) = start_layer().await;

    layer.enqueue_command(CommandBuilder::le_rand(), |_| {});

    let command = hal.sent_command().await;

    assert_eq!(command.opcode(), OpCode::LeRand);

    // no response; past the liveness deadline the engine asks for the vendor dump
    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;

    let escalation = hal.sent_command().await;

    assert_eq!(escalation.opcode(), OpCode::ControllerDebugInfo);

    // one escalation per stall
    tokio::time::sleep(Duration::from_secs(10)).await;
    settle().await;

    assert!(hal.no_command_sent());
}

#[tokio::test]
async fn shut_down_abandons_unresolved_commands() {
    let (layer, hal) = start_layer().await;
    let (responses, sink) = recorded_responses();

    layer.enqueue_command(CommandBuilder::le_rand(), sink);

    let command = hal.sent_command().await;

    assert_eq!(command.opcode(), OpCode::LeRand);

    layer.shut_down();
    settle().await;

    assert!(responses.lock().unwrap().is_empty());
    assert!(!hal.has_callbacks());

    // handles that survive the shutdown post into the void
    layer.enqueue_command(CommandBuilder::reset(), |_| {});
    settle().await;

    assert!(hal.no_command_sent());
}

#[tokio::test]
async fn dropping_every_handle_stops_the_engine() {
    let (layer, hal) = start_layer().await;
    let queue = layer.acl_queue_end();

    // queue ends are not handles, only the layer keeps the engine running
    drop(layer);
    settle().await;

    assert!(!hal.has_callbacks());

    // a surviving queue end posts into the void
    queue.register_enqueue(|| {
        AclBuilder::new(
            handle(),
            AclPacketBoundary::FirstAutoFlushable,
            AclBroadcastFlag::PointToPoint,
            Bytes::new(),
        )
    });
    settle().await;

    assert!(hal.no_acl_sent());
}

#[tokio::test]
#[should_panic(expected = "already registered")]
async fn duplicate_event_handler_registration_is_refused() {
    let (layer, _hal) = start_layer().await;

    layer.register_event_handler(EventCode::ConnectionComplete, |_| {});
    layer.register_event_handler(EventCode::ConnectionComplete, |_| {});
}

#[tokio::test]
#[should_panic(expected = "already registered")]
async fn duplicate_le_handler_registration_is_refused() {
    let (layer, _hal) = start_layer().await;

    layer.register_le_event_handler(SubeventCode::LongTermKeyRequest, |_| {});

    // the facade claims the same subevent slot
    let _security = layer.le_security_interface(|_| {});
}

#[tokio::test]
async fn malformed_packets_are_dropped() {
    let (layer, hal) = start_layer().await;
    let (events, sink) = recorded_events();

    layer.register_event_handler(EventCode::ConnectionComplete, sink);

    let acl_deliveries = Arc::new(Mutex::new(0usize));

    let queue = layer.acl_queue_end();
    let handler_queue = queue.clone();
    let handler_deliveries = acl_deliveries.clone();

    queue.register_dequeue(move || {
        handler_queue.try_dequeue().unwrap().handle();
        *handler_deliveries.lock().unwrap() += 1;
    });
    settle().await;

    // event claims more parameter bytes than it carries
    hal.callbacks().on_event(Bytes::copy_from_slice(&[0x03, 0x0B, 0x00]));
    // ACL packet cut short
    hal.callbacks().on_acl_data(Bytes::copy_from_slice(&[0x01, 0x00]));
    // ACL packet whose handle bits exceed the 0x0EFF maximum
    hal.callbacks().on_acl_data(Bytes::copy_from_slice(&[0xFF, 0x0F, 0x00, 0x00]));
    settle().await;

    assert!(events.lock().unwrap().is_empty());
    assert_eq!(*acl_deliveries.lock().unwrap(), 0);

    // the engine survives and keeps routing well formed packets
    hal.callbacks().on_event(
        EventBuilder::connection_complete(ErrorCode::Success, handle(), Address::ANY, LinkType::Acl, false).build(),
    );
    settle().await;

    assert_eq!(events.lock().unwrap().len(), 1);
}
