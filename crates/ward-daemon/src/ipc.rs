//! IPC server for the observer and the challenge UI
//!
//! JSON lines over a Unix socket. Every request gets exactly one response,
//! except `Subscribe`, which turns the connection into a stream of
//! [`UiCommand`] events.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use ward_core::{
    AppId, AuthMode, Capability, Decision, EntryOutcome, GuardStatus, InputOutcome, Point,
    SessionTimeout, SetupOutcome,
};

use crate::error::{DaemonError, Result};
use crate::platform::UiCommand;
use crate::service::{now_ms, GuardService};

/// Current credential supplied to authorize a change
///
/// A PIN as a digit string, a pattern as its node indices.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(untagged)]
pub enum CredentialInput {
    Pin(String),
    Pattern(Vec<u8>),
}

impl std::fmt::Debug for CredentialInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CredentialInput(..)")
    }
}

impl CredentialInput {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            CredentialInput::Pin(pin) => pin.as_bytes(),
            CredentialInput::Pattern(nodes) => nodes,
        }
    }
}

/// IPC request types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcRequest {
    /// Check if daemon is running
    Ping,

    /// Raw foreground change from the observer
    ForegroundChanged {
        app_id: String,
        /// Milliseconds; daemon clock when absent
        observed_at: Option<u64>,
    },

    PinPress { digit: u8 },
    PinBackspace,
    PinClear,

    /// Complete drag gesture in normalized grid coordinates
    PatternGesture { points: Vec<Point> },

    /// Outcome of a biometric prompt shown by the UI
    BiometricResult { success: bool },

    /// Whether the UI has an enrolled biometric sensor
    BiometricAvailability { available: bool },

    CancelChallenge,

    BeginSetup {
        mode: AuthMode,
        current: Option<CredentialInput>,
    },

    CancelSetup,

    AddProtectedApp { app_id: String },
    RemoveProtectedApp { app_id: String },
    ListProtectedApps,

    SetSessionTimeout { timeout_ms: u64 },
    SetBiometricEnabled { enabled: bool },

    /// Drop the session of one app
    RelockApp { app_id: String },
    ClearSessions,

    CapabilityChanged {
        capability: Capability,
        granted: bool,
    },

    FactoryReset { current: Option<CredentialInput> },

    Status,

    /// Stream UI commands on this connection
    Subscribe,
}

/// Verifier or setup progress reported to the UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InputReport {
    /// Nothing is waiting for this input
    Idle,
    Ignored,
    Pending,
    Rejected {
        attempts_remaining: u32,
        cooldown_ms: Option<u64>,
    },
    TooShort {
        attempts_remaining: u32,
        cooldown_ms: Option<u64>,
    },
    LockedOut {
        remaining_ms: u64,
    },
    Unlocked {
        app_id: AppId,
    },
    AwaitConfirm,
    Mismatch,
    SetupComplete,
}

impl From<InputOutcome> for InputReport {
    fn from(outcome: InputOutcome) -> Self {
        match outcome {
            InputOutcome::Idle => InputReport::Idle,
            InputOutcome::Unlocked(app_id) => InputReport::Unlocked { app_id },
            InputOutcome::Setup(SetupOutcome::AwaitConfirm) => InputReport::AwaitConfirm,
            InputOutcome::Setup(SetupOutcome::Mismatch) => InputReport::Mismatch,
            InputOutcome::Setup(SetupOutcome::Complete(_)) => InputReport::SetupComplete,
            InputOutcome::Entry(entry) => match entry {
                EntryOutcome::Ignored => InputReport::Ignored,
                // An accepted entry always surfaces as Unlocked or a setup step
                EntryOutcome::Pending | EntryOutcome::Accepted => InputReport::Pending,
                EntryOutcome::Rejected {
                    attempts_remaining,
                    cooldown_ms,
                } => InputReport::Rejected {
                    attempts_remaining,
                    cooldown_ms,
                },
                EntryOutcome::TooShort {
                    attempts_remaining,
                    cooldown_ms,
                } => InputReport::TooShort {
                    attempts_remaining,
                    cooldown_ms,
                },
                EntryOutcome::LockedOut { remaining_ms } => InputReport::LockedOut { remaining_ms },
            },
        }
    }
}

/// IPC response types
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcResponse {
    /// Success with no data
    Ok,

    /// Pong response
    Pong { version: String },

    /// Error response
    Error { message: String },

    /// Engine decision; `None` when the event was debounced or filtered
    Transition { decision: Option<Decision> },

    Input { outcome: InputReport },

    /// Whether a set or session actually changed
    Changed { changed: bool },

    ProtectedApps { app_ids: Vec<AppId> },

    Cleared { count: usize },

    Status { status: GuardStatus },

    /// Subscription accepted; events follow
    Subscribed,

    Event { command: UiCommand },
}

impl IpcResponse {
    fn error(context: &str, e: impl std::fmt::Display) -> Self {
        IpcResponse::Error {
            message: format!("{}: {}", context, e),
        }
    }
}

/// IPC server
pub struct IpcServer {
    /// Socket path
    socket_path: PathBuf,

    service: Arc<GuardService>,
}

impl IpcServer {
    /// Create a new IPC server
    pub fn new(socket_path: PathBuf, service: Arc<GuardService>) -> Self {
        Self {
            socket_path,
            service,
        }
    }

    /// Start the IPC server
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind()?;
        self.serve(listener).await
    }

    /// Bind the socket, replacing a stale one
    pub fn bind(&self) -> Result<UnixListener> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| DaemonError::Ipc(format!("Failed to bind socket: {}", e)))?;

        // Owner-only: the socket accepts credential input
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        info!("IPC server listening on {:?}", self.socket_path);
        Ok(listener)
    }

    /// Accept connections on an already bound listener
    pub async fn serve(&self, listener: UnixListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    let service = Arc::clone(&self.service);

                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, service).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle a single IPC connection
async fn handle_connection(stream: UnixStream, service: Arc<GuardService>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        let request: IpcRequest = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                send_response(&mut writer, &IpcResponse::error("Invalid request", e)).await?;
                line.zeroize();
                continue;
            }
        };
        line.zeroize();

        if let IpcRequest::Subscribe = request {
            let events = service.subscribe();
            send_response(&mut writer, &IpcResponse::Subscribed).await?;
            return stream_events(writer, events).await;
        }

        let response = handle_request(request, &service).await;
        send_response(&mut writer, &response).await?;
    }

    Ok(())
}

/// Forward UI commands until the client goes away
async fn stream_events(
    mut writer: OwnedWriteHalf,
    mut events: broadcast::Receiver<UiCommand>,
) -> Result<()> {
    info!("UI client subscribed");
    loop {
        match events.recv().await {
            Ok(command) => {
                if let Err(e) = send_response(&mut writer, &IpcResponse::Event { command }).await {
                    info!("UI client disconnected: {}", e);
                    return Ok(());
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "UI client lagging, commands dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return Ok(()),
        }
    }
}

/// Handle a single request
async fn handle_request(request: IpcRequest, service: &GuardService) -> IpcResponse {
    debug!("Received IPC request: {}", request_name(&request));
    let now = now_ms();
    let mut guard = service.guard().await;

    match request {
        IpcRequest::Ping => IpcResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        },

        IpcRequest::ForegroundChanged {
            app_id,
            observed_at,
        } => IpcResponse::Transition {
            decision: guard.on_foreground_changed(app_id, observed_at.unwrap_or(now)),
        },

        IpcRequest::PinPress { digit } => match guard.pin_press(digit, now) {
            Ok(outcome) => IpcResponse::Input {
                outcome: outcome.into(),
            },
            Err(e) => IpcResponse::error("PIN entry failed", e),
        },

        IpcRequest::PinBackspace => IpcResponse::Input {
            outcome: guard.pin_backspace().into(),
        },

        IpcRequest::PinClear => IpcResponse::Input {
            outcome: guard.pin_clear().into(),
        },

        IpcRequest::PatternGesture { points } => match guard.pattern_gesture(&points, now) {
            Ok(outcome) => IpcResponse::Input {
                outcome: outcome.into(),
            },
            Err(e) => IpcResponse::error("Pattern entry failed", e),
        },

        IpcRequest::BiometricResult { success } => IpcResponse::Input {
            outcome: guard.complete_biometric(success, now).into(),
        },

        IpcRequest::BiometricAvailability { available } => {
            guard.biometric_mut().available = available;
            IpcResponse::Ok
        }

        IpcRequest::CancelChallenge => match guard.cancel_challenge() {
            Ok(_) => IpcResponse::Ok,
            Err(e) => IpcResponse::error("Cancel failed", e),
        },

        IpcRequest::BeginSetup { mode, current } => {
            match guard.begin_setup(mode, current.as_ref().map(CredentialInput::as_bytes), now) {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::error("Setup refused", e),
            }
        }

        IpcRequest::CancelSetup => IpcResponse::Changed {
            changed: guard.cancel_setup(),
        },

        IpcRequest::AddProtectedApp { app_id } => match guard.protect(AppId::new(app_id)) {
            Ok(changed) => IpcResponse::Changed { changed },
            Err(e) => IpcResponse::error("Failed to protect app", e),
        },

        IpcRequest::RemoveProtectedApp { app_id } => {
            match guard.unprotect(&AppId::new(app_id)) {
                Ok(changed) => IpcResponse::Changed { changed },
                Err(e) => IpcResponse::error("Failed to unprotect app", e),
            }
        }

        IpcRequest::ListProtectedApps => IpcResponse::ProtectedApps {
            app_ids: guard.protected_apps().iter().cloned().collect(),
        },

        IpcRequest::SetSessionTimeout { timeout_ms } => {
            match SessionTimeout::from_millis(timeout_ms)
                .and_then(|timeout| guard.set_session_timeout(timeout))
            {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::error("Invalid session timeout", e),
            }
        }

        IpcRequest::SetBiometricEnabled { enabled } => match guard.set_biometric_enabled(enabled) {
            Ok(()) => IpcResponse::Ok,
            Err(e) => IpcResponse::error("Failed to update biometric setting", e),
        },

        IpcRequest::RelockApp { app_id } => match guard.relock(&AppId::new(app_id)) {
            Ok(changed) => IpcResponse::Changed { changed },
            Err(e) => IpcResponse::error("Failed to relock app", e),
        },

        IpcRequest::ClearSessions => match guard.clear_sessions() {
            Ok(count) => IpcResponse::Cleared { count },
            Err(e) => IpcResponse::error("Failed to clear sessions", e),
        },

        IpcRequest::CapabilityChanged {
            capability,
            granted,
        } => {
            info!(?capability, granted, "Capability changed");
            guard.platform_mut().set_capability(capability, granted);
            IpcResponse::Ok
        }

        IpcRequest::FactoryReset { current } => {
            match guard.factory_reset(current.as_ref().map(CredentialInput::as_bytes), now) {
                Ok(()) => IpcResponse::Ok,
                Err(e) => IpcResponse::error("Reset refused", e),
            }
        }

        IpcRequest::Status => IpcResponse::Status {
            status: guard.status(now),
        },

        IpcRequest::Subscribe => IpcResponse::Error {
            message: "Subscribe is only valid as a connection request".to_string(),
        },
    }
}

/// Request label for logs; never includes credential input
fn request_name(request: &IpcRequest) -> &'static str {
    match request {
        IpcRequest::Ping => "Ping",
        IpcRequest::ForegroundChanged { .. } => "ForegroundChanged",
        IpcRequest::PinPress { .. } => "PinPress",
        IpcRequest::PinBackspace => "PinBackspace",
        IpcRequest::PinClear => "PinClear",
        IpcRequest::PatternGesture { .. } => "PatternGesture",
        IpcRequest::BiometricResult { .. } => "BiometricResult",
        IpcRequest::BiometricAvailability { .. } => "BiometricAvailability",
        IpcRequest::CancelChallenge => "CancelChallenge",
        IpcRequest::BeginSetup { .. } => "BeginSetup",
        IpcRequest::CancelSetup => "CancelSetup",
        IpcRequest::AddProtectedApp { .. } => "AddProtectedApp",
        IpcRequest::RemoveProtectedApp { .. } => "RemoveProtectedApp",
        IpcRequest::ListProtectedApps => "ListProtectedApps",
        IpcRequest::SetSessionTimeout { .. } => "SetSessionTimeout",
        IpcRequest::SetBiometricEnabled { .. } => "SetBiometricEnabled",
        IpcRequest::RelockApp { .. } => "RelockApp",
        IpcRequest::ClearSessions => "ClearSessions",
        IpcRequest::CapabilityChanged { .. } => "CapabilityChanged",
        IpcRequest::FactoryReset { .. } => "FactoryReset",
        IpcRequest::Status => "Status",
        IpcRequest::Subscribe => "Subscribe",
    }
}

/// Send a response over the socket
async fn send_response(writer: &mut OwnedWriteHalf, response: &IpcResponse) -> Result<()> {
    let json = serde_json::to_string(response)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

/// IPC client for the observer and UI processes
pub struct IpcClient {
    socket_path: PathBuf,
}

impl IpcClient {
    /// Create a new IPC client
    pub fn new(socket_path: PathBuf) -> Self {
        Self { socket_path }
    }

    async fn connect(&self, request: &IpcRequest) -> Result<BufReader<OwnedReadHalf>> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| DaemonError::Ipc(format!("Failed to connect: {}", e)))?;

        let (reader, mut writer) = stream.into_split();

        let json = serde_json::to_string(request)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        Ok(BufReader::new(reader))
    }

    /// Send a request and get a response
    pub async fn request(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let mut reader = self.connect(request).await?;
        read_response(&mut reader).await
    }

    /// Check if daemon is running
    pub async fn ping(&self) -> bool {
        matches!(
            self.request(&IpcRequest::Ping).await,
            Ok(IpcResponse::Pong { .. })
        )
    }

    /// Open a UI command stream
    pub async fn subscribe(&self) -> Result<Subscription> {
        let mut reader = self.connect(&IpcRequest::Subscribe).await?;
        match read_response(&mut reader).await? {
            IpcResponse::Subscribed => Ok(Subscription { reader }),
            other => Err(DaemonError::Ipc(format!(
                "Unexpected subscribe response: {:?}",
                other
            ))),
        }
    }
}

/// Stream of UI commands from the daemon
pub struct Subscription {
    reader: BufReader<OwnedReadHalf>,
}

impl Subscription {
    /// Next command, or `None` once the daemon closes the stream
    pub async fn next(&mut self) -> Result<Option<UiCommand>> {
        let mut line = String::new();
        if self.reader.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        match serde_json::from_str(&line)? {
            IpcResponse::Event { command } => Ok(Some(command)),
            other => Err(DaemonError::Ipc(format!("Unexpected event: {:?}", other))),
        }
    }
}

async fn read_response(reader: &mut BufReader<OwnedReadHalf>) -> Result<IpcResponse> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Err(DaemonError::Ipc("Connection closed".to_string()));
    }
    let response: IpcResponse = serde_json::from_str(&line)?;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DaemonConfig;
    use tempfile::TempDir;

    async fn start() -> (TempDir, IpcClient) {
        let dir = TempDir::new().unwrap();
        let config = DaemonConfig {
            store_path: dir.path().join("store.json"),
            ipc_socket_path: dir.path().join("ward.sock"),
            ..DaemonConfig::default()
        };
        let service = Arc::new(GuardService::open(&config).unwrap());
        let server = IpcServer::new(config.ipc_socket_path.clone(), service);
        let listener = server.bind().unwrap();
        tokio::spawn(async move {
            let _ = server.serve(listener).await;
        });

        (dir, IpcClient::new(config.ipc_socket_path))
    }

    async fn setup_pin(client: &IpcClient, pin: &[u8]) {
        let response = client
            .request(&IpcRequest::BeginSetup {
                mode: AuthMode::Pin,
                current: None,
            })
            .await
            .unwrap();
        assert!(matches!(response, IpcResponse::Ok));

        let mut last = None;
        for _ in 0..2 {
            for &digit in pin {
                last = Some(client.request(&IpcRequest::PinPress { digit }).await.unwrap());
            }
        }
        assert!(matches!(
            last,
            Some(IpcResponse::Input {
                outcome: InputReport::SetupComplete
            })
        ));
    }

    async fn protect(client: &IpcClient, app_id: &str) {
        let response = client
            .request(&IpcRequest::AddProtectedApp {
                app_id: app_id.to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(response, IpcResponse::Changed { changed: true }));
    }

    #[tokio::test]
    async fn test_ping() {
        let (_dir, client) = start().await;
        assert!(client.ping().await);
    }

    #[tokio::test]
    async fn test_no_ui_client_fails_open() {
        let (_dir, client) = start().await;
        setup_pin(&client, &[1, 2, 3, 4]).await;
        protect(&client, "com.bank.app").await;

        let response = client
            .request(&IpcRequest::ForegroundChanged {
                app_id: "com.bank.app".to_string(),
                observed_at: Some(1_000),
            })
            .await
            .unwrap();
        assert!(matches!(
            response,
            IpcResponse::Transition {
                decision: Some(Decision::FailedOpen)
            }
        ));
    }

    #[tokio::test]
    async fn test_subscribed_challenge_and_unlock() {
        let (_dir, client) = start().await;
        setup_pin(&client, &[1, 2, 3, 4]).await;
        protect(&client, "com.bank.app").await;
        let mut ui = client.subscribe().await.unwrap();

        let response = client
            .request(&IpcRequest::ForegroundChanged {
                app_id: "com.bank.app".to_string(),
                observed_at: Some(1_000),
            })
            .await
            .unwrap();
        assert!(matches!(
            response,
            IpcResponse::Transition {
                decision: Some(Decision::Challenge)
            }
        ));
        assert!(matches!(
            ui.next().await.unwrap(),
            Some(UiCommand::ShowChallenge { .. })
        ));

        let mut last = None;
        for digit in [1, 2, 3, 4] {
            last = Some(client.request(&IpcRequest::PinPress { digit }).await.unwrap());
        }
        match last {
            Some(IpcResponse::Input {
                outcome: InputReport::Unlocked { app_id },
            }) => assert_eq!(app_id, AppId::from("com.bank.app")),
            other => panic!("unexpected response: {:?}", other),
        }
        assert_eq!(ui.next().await.unwrap(), Some(UiCommand::DismissChallenge));

        let response = client.request(&IpcRequest::Status).await.unwrap();
        match response {
            IpcResponse::Status { status } => assert_eq!(status.live_sessions.len(), 1),
            other => panic!("unexpected response: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_change_requires_current_credential() {
        let (_dir, client) = start().await;
        setup_pin(&client, &[1, 2, 3, 4]).await;

        let response = client
            .request(&IpcRequest::BeginSetup {
                mode: AuthMode::Pattern,
                current: Some(CredentialInput::Pin("9999".to_string())),
            })
            .await
            .unwrap();
        assert!(matches!(response, IpcResponse::Error { .. }));

        let response = client
            .request(&IpcRequest::BeginSetup {
                mode: AuthMode::Pattern,
                current: Some(CredentialInput::Pin("1234".to_string())),
            })
            .await
            .unwrap();
        assert!(matches!(response, IpcResponse::Ok));
    }

    #[tokio::test]
    async fn test_invalid_request() {
        let (_dir, client) = start().await;
        let response = client
            .request(&IpcRequest::SetSessionTimeout { timeout_ms: 0 })
            .await
            .unwrap();
        assert!(matches!(response, IpcResponse::Error { .. }));
    }

    #[test]
    fn test_request_wire_format() {
        let request: IpcRequest = serde_json::from_str(r#"{"type":"PinPress","digit":3}"#).unwrap();
        assert!(matches!(request, IpcRequest::PinPress { digit: 3 }));

        let request: IpcRequest = serde_json::from_str(
            r#"{"type":"FactoryReset","current":[0,1,2,5]}"#,
        )
        .unwrap();
        match request {
            IpcRequest::FactoryReset {
                current: Some(current),
            } => assert_eq!(current.as_bytes(), &[0, 1, 2, 5]),
            other => panic!("unexpected request: {:?}", other),
        }
    }
}
