//! Simulated terminal runs.
//!
//! Wires a [`TapBridge`] to the mock kernel, runs `connect` and `checkCard`
//! the way the application layer does, presents a card and reports what the
//! caller would have received.

use std::sync::Arc;

use serde_json::{Value, json};
use tapbridge_core::{BridgeConfig, Reply, TapBridge};
use tapbridge_hardware::event::{Diagnostics, KEY_CODE, KEY_MESSAGE, KEY_UUID};
use tapbridge_hardware::mock::{HandshakeMode, MockKernel, REPEATED_CALL_CODE};
use tapbridge_hardware::{DeviceDescriptor, HardwareEvent};
use tracing::{debug, info};

/// What the simulated reader does once the check is running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Presentation {
    /// A contactless card is tapped.
    Tap { uuid: String },

    /// The reader reports an error bundle.
    Error {
        code: i32,
        message: Option<String>,
        uuid: Option<String>,
    },

    /// Nothing happens until the watchdog fires.
    Silent,
}

impl Presentation {
    fn event(&self) -> Option<HardwareEvent> {
        match self {
            Self::Tap { uuid } => Some(HardwareEvent::card_found(uuid.clone())),
            Self::Error {
                code,
                message,
                uuid,
            } => {
                let mut bundle = Diagnostics::new().with(KEY_CODE, code.to_string());
                if let Some(message) = message {
                    bundle.insert(KEY_MESSAGE, message.clone());
                }
                if let Some(uuid) = uuid {
                    bundle.insert(KEY_UUID, uuid.clone());
                }
                Some(HardwareEvent::ErrorWithDiagnostics(Some(bundle)))
            }
            Self::Silent => None,
        }
    }
}

/// One simulated run.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub device: DeviceDescriptor,
    pub reader_available: bool,
    pub noise: usize,
    pub presentation: Presentation,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            device: DeviceDescriptor::new("SUNMI").with_service_version(320),
            reader_available: true,
            noise: 0,
            presentation: Presentation::Silent,
        }
    }
}

/// Run `scenario` and return the report printed by the CLI.
///
/// The report carries the action that failed (if any), the connection
/// status, and either the payload or the rejection message.
pub async fn run(config: BridgeConfig, scenario: Scenario) -> Value {
    let mode = if scenario.reader_available {
        HandshakeMode::Auto
    } else {
        HandshakeMode::NoReader
    };
    let (kernel, handle) = MockKernel::with_mode(mode);
    handle.set_reader_available(scenario.reader_available);

    let bridge = TapBridge::new(Arc::new(kernel), Arc::new(scenario.device), config);

    let status = match bridge.execute("connect").await {
        Ok(Reply::Status(status)) => status,
        Ok(other) => return json!({"action": "connect", "error": format!("{:?}", other)}),
        Err(e) => return json!({"action": "connect", "error": e.to_string()}),
    };
    info!(%status, "Simulated terminal connected");

    let pending = match bridge.execute("checkCard").await {
        Ok(Reply::Pending(pending)) => pending,
        Ok(other) => return json!({"action": "checkCard", "error": format!("{:?}", other)}),
        Err(e) => return json!({"action": "checkCard", "error": e.to_string()}),
    };

    for _ in 0..scenario.noise {
        handle
            .reader()
            .emit(HardwareEvent::error_code(REPEATED_CALL_CODE));
    }
    match scenario.presentation.event() {
        Some(event) => {
            debug!(callback = event.callback_name(), "Presenting card");
            handle.reader().finish(event);
        }
        None => info!(
            "No card presented, waiting for the watchdog ({}s scan timeout)",
            bridge.scanner().config().scan_timeout_secs
        ),
    }

    match pending.result().await {
        Some(result) => match result.to_payload() {
            Ok(payload) => json!({"status": status, "payload": payload}),
            Err(message) => json!({"status": status, "action": "checkCard", "error": message}),
        },
        None => json!({"status": status, "action": "checkCard", "error": Value::Null}),
    }
}
