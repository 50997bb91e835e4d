//! Integration tests for request/response correlation.
//!
//! Most tests run the protocol against the simulator; the validation tests
//! use a scripted transport that answers every request with bytes computed
//! from the request frame.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

use controller_link::flags;
use controller_link::frame::encode_response;
use controller_link::protocol::CommandProtocol;
use controller_link::simulator::{SimulatedController, SimulatedTransport, SimulatorConfig};
use controller_link::{
    Command, ControllerAdvert, Criteria, LinkConfig, LinkError, Reply, Transport, TransportEvent,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn connected(config: SimulatorConfig) -> SimulatedTransport {
    let sim = SimulatedTransport::new(config, vec![SimulatedController::new("porch", [1; 6])]);
    sim.select(&Criteria::any(), Duration::from_secs(1))
        .await
        .expect("select");
    sim.connect(Duration::from_secs(1)).await.expect("connect");
    sim
}

fn correlation_id(frame: &[u8]) -> u32 {
    u32::from_le_bytes([frame[1], frame[2], frame[3], frame[4]])
}

type Script = dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync;

/// Answers each request with whatever the script computes from it.
struct ScriptedTransport {
    script: Box<Script>,
    events: broadcast::Sender<TransportEvent>,
}

impl ScriptedTransport {
    fn new(script: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static) -> Self {
        let (events, _) = broadcast::channel(4);
        Self {
            script: Box::new(script),
            events,
        }
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn scan(&self, _: &Criteria, _: Duration) -> Result<Vec<ControllerAdvert>, LinkError> {
        Ok(Vec::new())
    }

    async fn select(&self, _: &Criteria, _: Duration) -> Result<ControllerAdvert, LinkError> {
        Err(LinkError::SelectionFailed)
    }

    async fn connect(&self, _: Duration) -> Result<(), LinkError> {
        Ok(())
    }

    async fn disconnect(&self) {}

    fn is_connected(&self) -> bool {
        true
    }

    async fn deliver(&self, _: &[u8]) -> Result<(), LinkError> {
        Ok(())
    }

    async fn transmit(&self, _: &[u8]) -> Result<(), LinkError> {
        Ok(())
    }

    async fn request(&self, frame: &[u8], _: Duration) -> Result<Option<Vec<u8>>, LinkError> {
        Ok((self.script)(frame))
    }

    async fn read_clock(&self) -> Result<u64, LinkError> {
        Ok(0)
    }

    async fn write_clock(&self, _: u64) -> Result<(), LinkError> {
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

async fn read_version(transport: &dyn Transport) -> (Result<Reply, LinkError>, usize) {
    let protocol = CommandProtocol::new(&LinkConfig::default());
    let result = protocol.call(transport, &Command::ReadFirmwareVersion).await;
    (result, protocol.pending_count())
}

// ---------------------------------------------------------------------------
// Correlation
// ---------------------------------------------------------------------------

/// Two concurrent calls answered in reverse order each get their own reply.
#[tokio::test(start_paused = true)]
async fn responses_match_by_id_not_by_arrival() {
    let mut config = SimulatorConfig::default();
    config
        .flag_latency
        .insert(flags::FW_VERSION_REQUEST, Duration::from_millis(300));
    config
        .flag_latency
        .insert(flags::READ_CONTROLLER_NAME_REQUEST, Duration::from_millis(10));
    let sim = connected(config).await;
    let protocol = CommandProtocol::new(&LinkConfig::default());

    let (version, name) = tokio::join!(
        protocol.call(&sim, &Command::ReadFirmwareVersion),
        protocol.call(&sim, &Command::ReadControllerName),
    );

    assert_eq!(
        version.unwrap(),
        Reply::FirmwareVersion("UNIVERSAL_0.12.4_20231114".into())
    );
    assert_eq!(name.unwrap(), Reply::Name("porch".into()));

    // The controller saw the name request first.
    let arrival = sim.with_controller(0, |c| c.received_flags.clone()).unwrap();
    assert_eq!(
        arrival,
        vec![flags::READ_CONTROLLER_NAME_REQUEST, flags::FW_VERSION_REQUEST]
    );
    assert_eq!(protocol.pending_count(), 0);
}

/// Dropping the link rejects every waiter and empties the table.
#[tokio::test(start_paused = true)]
async fn fail_all_rejects_every_pending_request() {
    let mut config = SimulatorConfig::default();
    config.stalled_flags.insert(flags::FW_VERSION_REQUEST);
    let sim = connected(config).await;
    let protocol = std::sync::Arc::new(CommandProtocol::new(&LinkConfig::default()));

    let mut waiters = Vec::new();
    for _ in 0..3 {
        let protocol = protocol.clone();
        let sim = sim.clone();
        waiters.push(tokio::spawn(async move {
            protocol.call(&sim, &Command::ReadFirmwareVersion).await
        }));
    }
    while protocol.pending_count() < 3 {
        tokio::task::yield_now().await;
    }

    assert_eq!(protocol.fail_all(LinkError::Disconnected), 3);
    for waiter in waiters {
        assert_eq!(waiter.await.unwrap(), Err(LinkError::Disconnected));
    }
    assert_eq!(protocol.pending_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn timed_out_request_leaves_the_table() {
    let mut config = SimulatorConfig::default();
    config.stalled_flags.insert(flags::FW_VERSION_REQUEST);
    let sim = connected(config).await;
    let protocol = CommandProtocol::new(&LinkConfig::default());

    let result = protocol
        .send_and_await(
            &sim,
            flags::FW_VERSION_REQUEST,
            &[],
            flags::FW_VERSION_RESPONSE,
            Duration::from_millis(250),
        )
        .await;

    assert_eq!(
        result,
        Err(LinkError::Timeout {
            flag: flags::FW_VERSION_REQUEST,
            after: Duration::from_millis(250)
        })
    );
    assert_eq!(protocol.pending_count(), 0);
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn wrong_response_flag_is_rejected() {
    let transport = ScriptedTransport::new(|frame| {
        Some(encode_response(flags::READ_CONFIG_RESPONSE, correlation_id(frame), 0, &[]))
    });
    let (result, pending) = read_version(&transport).await;
    assert_eq!(
        result,
        Err(LinkError::InvalidResponseFlag {
            expected: flags::FW_VERSION_RESPONSE,
            got: flags::READ_CONFIG_RESPONSE
        })
    );
    assert_eq!(pending, 0);
}

#[tokio::test]
async fn wrong_correlation_id_is_rejected() {
    let transport = ScriptedTransport::new(|frame| {
        let id = correlation_id(frame);
        Some(encode_response(flags::FW_VERSION_RESPONSE, id.wrapping_add(1), 0, &[]))
    });
    let (result, pending) = read_version(&transport).await;
    assert!(matches!(result, Err(LinkError::InvalidResponseUuid { .. })));
    assert_eq!(pending, 0);
}

#[tokio::test]
async fn device_error_code_is_a_failure() {
    let transport = ScriptedTransport::new(|frame| {
        Some(encode_response(flags::FW_VERSION_RESPONSE, correlation_id(frame), 7, &[]))
    });
    let (result, _) = read_version(&transport).await;
    assert_eq!(
        result,
        Err(LinkError::Fail {
            flag: flags::FW_VERSION_RESPONSE,
            code: 7
        })
    );
}

#[tokio::test]
async fn missing_response_is_reported() {
    let transport = ScriptedTransport::new(|_| None);
    let (result, pending) = read_version(&transport).await;
    assert_eq!(result, Err(LinkError::NoResponseReceived));
    assert_eq!(pending, 0);
}

#[tokio::test]
async fn legacy_marker_is_unsupported() {
    let transport = ScriptedTransport::new(|_| Some(vec![flags::UNSUPPORTED_MARKER]));
    let (result, _) = read_version(&transport).await;
    assert_eq!(result, Err(LinkError::Unsupported));
}

#[tokio::test(start_paused = true)]
async fn simulated_device_error_surfaces_as_fail() {
    let mut config = SimulatorConfig::default();
    config.error_codes.insert(flags::SAVE_STATE_REQUEST, 3);
    let sim = connected(config).await;
    let protocol = CommandProtocol::new(&LinkConfig::default());
    assert_eq!(
        protocol.call(&sim, &Command::SaveState).await,
        Err(LinkError::Fail {
            flag: flags::SAVE_STATE_RESPONSE,
            code: 3
        })
    );
}

// ---------------------------------------------------------------------------
// Programs and fire-and-confirm
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn large_program_is_preceded_by_an_erase() {
    let sim = connected(SimulatorConfig::default()).await;
    let protocol = CommandProtocol::new(&LinkConfig::default());

    let small = Command::WriteProgram {
        clock_ms: 0,
        bytes: vec![254, 255],
    };
    protocol.call(&sim, &small).await.unwrap();
    let large = Command::WriteProgram {
        clock_ms: 0,
        bytes: vec![0; 9000],
    };
    protocol.call(&sim, &large).await.unwrap();

    let (flags_seen, program_len) = sim
        .with_controller(0, |c| (c.received_flags.clone(), c.program.len()))
        .unwrap();
    assert_eq!(
        flags_seen,
        vec![
            flags::WRITE_PROGRAM_REQUEST,
            flags::ERASE_PROGRAM_REQUEST,
            flags::WRITE_PROGRAM_REQUEST
        ]
    );
    assert_eq!(program_len, 9000);
}

#[tokio::test(start_paused = true)]
async fn execute_resolves_on_delivery() {
    let sim = connected(SimulatorConfig::default()).await;
    let protocol = CommandProtocol::new(&LinkConfig::default());

    let reply = protocol
        .call(&sim, &Command::Execute(vec![17, 1, 0]))
        .await
        .unwrap();
    assert_eq!(reply, Reply::Ack);
    let executed = sim.with_controller(0, |c| c.executed.clone()).unwrap();
    assert_eq!(executed, vec![vec![17, 1, 0]]);
}

#[tokio::test(start_paused = true)]
async fn io_mapping_round_trips_through_the_controller() {
    let sim = connected(SimulatorConfig::default()).await;
    let protocol = CommandProtocol::new(&LinkConfig::default());

    let write = Command::WriteIoMapping {
        label: "strip".into(),
        mapping: vec![0, 1, -1, 300],
    };
    assert_eq!(
        protocol.call(&sim, &write).await.unwrap(),
        Reply::IoMapping(vec![0, 1, -1, 300])
    );
    let read = Command::ReadIoMapping {
        label: "strip".into(),
    };
    assert_eq!(
        protocol.call(&sim, &read).await.unwrap(),
        Reply::IoMapping(vec![0, 1, -1, 300])
    );
}
