//! The scan session controller.
//!
//! A [`ScanSession`] owns the scanner and sequences every decode through
//! stop → parse → build → deliver-or-queue → feedback → delayed resume.
//! Scanning is stopped before a decode is processed, so at most one record
//! is in construction at any time; decodes that arrive while not scanning are
//! duplicates of the code still in frame and are dropped.
//!
//! [`ScanSession::run`] is the event loop. It multiplexes scanner events,
//! operator commands, connectivity edges, and the pending resume deadline.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};

use crate::config::Config;
use crate::connectivity::{probe_endpoint, Connectivity, ConnectivityWatch};
use crate::delivery::{DeliveryClient, DeliveryOutcome};
use crate::error::{Error, Result};
use crate::feedback::Feedback;
use crate::identifier::{self, Identifier};
use crate::queue::{FlushOutcome, OfflineQueue};
use crate::record::AttendanceRecord;
use crate::scanner::{CameraInfo, CameraSelector, ScanEvent, ScanOptions, Scanner};
use crate::storage::KeyValueStore;

/// Capacity of the scanner event channel.
const EVENT_CHANNEL_CAPACITY: usize = 32;

/// Shown when a scan cannot be sent because no endpoint is configured.
pub const ENDPOINT_MISSING_MESSAGE: &str = "Add GAS_ENDPOINT to the configuration to send records.";

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Never started.
    Idle,
    /// Acquiring the camera.
    Starting,
    /// Waiting for a decode.
    Scanning,
    /// Handling a decode; scanning is paused.
    Processing,
    /// Stopped by the operator or by a failed start.
    Stopped,
    /// Cycling to another camera.
    SwitchingCamera,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Scanning => write!(f, "scanning"),
            Self::Processing => write!(f, "processing"),
            Self::Stopped => write!(f, "stopped"),
            Self::SwitchingCamera => write!(f, "switching-camera"),
        }
    }
}

/// Operator-adjustable session settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSettings {
    /// Attendance mode stamped on records.
    pub mode: String,
    /// Lab stamped on records.
    pub lab: String,
    /// Pause between a processed scan and resumed scanning.
    pub restart_delay: Duration,
    /// Options passed to the scanner.
    pub scan_options: ScanOptions,
    /// Camera to start with.
    pub camera_index: usize,
}

impl SessionSettings {
    /// Settings from the loaded configuration.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            mode: config.session.default_mode.clone(),
            lab: config.session.lab.clone(),
            restart_delay: config.restart_delay(),
            scan_options: config.scan_options(),
            camera_index: config.session.camera_index,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// What became of one decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    /// The record was handed to the endpoint.
    Delivered(AttendanceRecord),
    /// Delivery failed; the record is in the offline queue.
    Queued(AttendanceRecord),
    /// No endpoint is configured; the record was dropped.
    NotConfigured(AttendanceRecord),
    /// Delivery failed and the record could not be queued either.
    QueueFailed {
        /// The record that was lost.
        record: AttendanceRecord,
        /// Why queuing failed.
        error: String,
    },
    /// The event was noise or a duplicate and nothing was done.
    Ignored,
}

/// A command from the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Start scanning.
    Start,
    /// Stop scanning.
    Stop,
    /// Cycle to the next camera.
    SwitchCamera,
    /// Use the camera at this index.
    SelectCamera(usize),
    /// Toggle the torch.
    ToggleTorch,
    /// Change the attendance mode.
    SetMode(String),
    /// Change the lab.
    SetLab(String),
    /// Flush the offline queue now.
    Flush,
    /// End the session.
    Shutdown,
}

impl FromStr for SessionCommand {
    type Err = String;

    /// Parse a `:command [argument]` line typed at the kiosk.
    fn from_str(line: &str) -> std::result::Result<Self, Self::Err> {
        let line = line.trim();
        let body = line
            .strip_prefix(':')
            .ok_or_else(|| format!("commands start with ':', got {line:?}"))?;
        let (name, arg) = match body.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (body, ""),
        };

        match name {
            "start" => Ok(Self::Start),
            "stop" => Ok(Self::Stop),
            "switch" => Ok(Self::SwitchCamera),
            "camera" => arg
                .parse()
                .map(Self::SelectCamera)
                .map_err(|_| format!("camera index must be a number, got {arg:?}")),
            "torch" => Ok(Self::ToggleTorch),
            "mode" => Ok(Self::SetMode(arg.to_string())),
            "lab" => Ok(Self::SetLab(arg.to_string())),
            "flush" => Ok(Self::Flush),
            "quit" | "exit" => Ok(Self::Shutdown),
            other => Err(format!("unknown command :{other}")),
        }
    }
}

/// The scan session controller.
#[derive(Debug)]
pub struct ScanSession<C, S> {
    scanner: C,
    cameras: Vec<CameraInfo>,
    camera_index: usize,
    torch_on: bool,
    state: SessionState,
    settings: SessionSettings,
    client: DeliveryClient,
    queue: Arc<OfflineQueue<S>>,
    feedback: Box<dyn Feedback>,
    events_tx: mpsc::Sender<ScanEvent>,
    events_rx: Option<mpsc::Receiver<ScanEvent>>,
    resume_at: Option<Instant>,
    connectivity: Option<ConnectivityWatch>,
}

impl<C: Scanner, S: KeyValueStore> ScanSession<C, S> {
    /// Create an idle session.
    pub fn new(
        scanner: C,
        client: DeliveryClient,
        queue: Arc<OfflineQueue<S>>,
        feedback: Box<dyn Feedback>,
        settings: SessionSettings,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            scanner,
            cameras: Vec::new(),
            camera_index: settings.camera_index,
            torch_on: false,
            state: SessionState::Idle,
            settings,
            client,
            queue,
            feedback,
            events_tx,
            events_rx: Some(events_rx),
            resume_at: None,
            connectivity: None,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Cameras found by the last enumeration.
    #[must_use]
    pub fn cameras(&self) -> &[CameraInfo] {
        &self.cameras
    }

    /// Index of the selected camera.
    #[must_use]
    pub fn camera_index(&self) -> usize {
        self.camera_index
    }

    /// Whether the torch is on.
    #[must_use]
    pub fn torch_on(&self) -> bool {
        self.torch_on
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// When scanning will resume, if a resume is pending.
    #[must_use]
    pub fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }

    /// Enumerate the scanner's cameras.
    ///
    /// A failed enumeration leaves the list empty; starting then falls back
    /// to an environment-facing camera.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CameraUnavailable`] if enumeration fails.
    pub async fn load_cameras(&mut self) -> Result<()> {
        match self.scanner.enumerate_cameras().await {
            Ok(cameras) => {
                for (i, camera) in cameras.iter().enumerate() {
                    debug!(index = i, id = %camera.id, label = %camera.display_label(i), "Camera found");
                }
                self.cameras = cameras;
                if self.camera_index >= self.cameras.len() {
                    self.camera_index = 0;
                }
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Camera enumeration failed");
                self.cameras.clear();
                Err(e.into())
            }
        }
    }

    /// Start scanning with the selected camera.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CameraUnavailable`] if the camera cannot be started.
    /// The session is then `Stopped` and is not retried.
    pub async fn start(&mut self) -> Result<()> {
        if self.scanner.is_scanning() {
            self.state = SessionState::Scanning;
            return Ok(());
        }

        self.state = SessionState::Starting;
        let selector = self.selector();
        debug!(?selector, "Starting scanner");

        let events = self.events_tx.clone();
        match self
            .scanner
            .start(&selector, &self.settings.scan_options, events)
            .await
        {
            Ok(()) => {
                self.state = SessionState::Scanning;
                self.feedback.status("Scanning…");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Stopped;
                error!(error = %e, "Could not start the camera");
                self.feedback
                    .status(&format!("Could not start the camera: {e}"));
                Err(Error::camera_unavailable(e.to_string()))
            }
        }
    }

    /// Stop scanning. Cancels any pending resume.
    pub async fn stop(&mut self) {
        self.resume_at = None;
        if self.scanner.is_scanning() {
            if let Err(e) = self.scanner.stop().await {
                warn!(error = %e, "Scanner did not stop cleanly");
            }
            self.feedback.status("Scanner stopped");
        }
        self.state = SessionState::Stopped;
    }

    /// Stop, advance to the next camera (wrapping), and start.
    ///
    /// Does nothing with fewer than two cameras.
    ///
    /// # Errors
    ///
    /// Returns an error if the next camera cannot be started.
    pub async fn switch_camera(&mut self) -> Result<()> {
        if self.cameras.len() < 2 {
            return Ok(());
        }
        let next = (self.camera_index + 1) % self.cameras.len();
        self.restart_with(next).await
    }

    /// Stop, select the camera at `index`, and start.
    ///
    /// # Errors
    ///
    /// Returns an error if `index` is out of range or the camera cannot be started.
    pub async fn select_camera(&mut self, index: usize) -> Result<()> {
        if index >= self.cameras.len() {
            return Err(Error::camera_unavailable(format!(
                "no camera at index {index} ({} available)",
                self.cameras.len()
            )));
        }
        self.restart_with(index).await
    }

    async fn restart_with(&mut self, index: usize) -> Result<()> {
        self.state = SessionState::SwitchingCamera;
        self.resume_at = None;
        if self.scanner.is_scanning() {
            if let Err(e) = self.scanner.stop().await {
                warn!(error = %e, "Scanner did not stop cleanly");
            }
        }
        self.camera_index = index;
        info!(
            index,
            camera = %self.cameras[index].display_label(index),
            "Camera selected"
        );
        self.start().await
    }

    /// Toggle the torch. Unsupported torches are logged, never fatal.
    pub async fn toggle_torch(&mut self) {
        let wanted = !self.torch_on;
        match self.scanner.set_torch(wanted).await {
            Ok(()) => self.torch_on = wanted,
            Err(e) => {
                debug!(error = %e, "Torch toggle failed");
                self.feedback.log("Torch not supported");
            }
        }
    }

    /// Handle one scanner event.
    pub async fn handle_event(&mut self, event: ScanEvent) -> ScanOutcome {
        match event {
            ScanEvent::Decoded(text) => self.handle_decode(&text).await,
            ScanEvent::DecodeError(reason) => {
                trace!(%reason, "Decode miss");
                ScanOutcome::Ignored
            }
        }
    }

    /// Process one decoded scan.
    ///
    /// Scanning is stopped first and a resume is scheduled after
    /// the restart delay, whatever the delivery outcome.
    pub async fn handle_decode(&mut self, text: &str) -> ScanOutcome {
        if self.state != SessionState::Scanning {
            trace!("Decode while not scanning dropped");
            return ScanOutcome::Ignored;
        }
        if text.trim().is_empty() {
            trace!("Blank decode dropped");
            return ScanOutcome::Ignored;
        }

        self.state = SessionState::Processing;
        if let Err(e) = self.scanner.stop().await {
            warn!(error = %e, "Scanner did not stop cleanly");
        }

        let student = identifier::parse(text);
        self.report_read(&student);

        let record = AttendanceRecord::build(
            &student,
            Some(&self.settings.mode),
            Some(&self.settings.lab),
        );
        let outcome = self.deliver_or_queue(record).await;

        self.resume_at = Some(Instant::now() + self.settings.restart_delay);
        outcome
    }

    fn report_read(&mut self, student: &Identifier) {
        info!(code = %student.code, "Code read");
        self.feedback
            .status(&format!("Read: {} - {}", student.code, student.name));
        self.feedback.log(&format!(
            "Code read: {} | {} | {}",
            student.code, student.name, student.document
        ));
    }

    async fn deliver_or_queue(&mut self, record: AttendanceRecord) -> ScanOutcome {
        match self.client.send(&record).await {
            DeliveryOutcome::Delivered => {
                let lab = if record.lab.is_empty() {
                    "no lab"
                } else {
                    record.lab.as_str()
                };
                self.feedback.status(&format!(
                    "Record sent for {}.",
                    if record.name.is_empty() {
                        &record.code
                    } else {
                        &record.name
                    }
                ));
                self.feedback.log(&format!(
                    "{} → {} ({lab})",
                    record.code,
                    record.mode.to_uppercase()
                ));
                self.feedback.confirm();
                ScanOutcome::Delivered(record)
            }
            DeliveryOutcome::Failed { reason } => match self.queue.enqueue(&record).await {
                Ok(()) => {
                    debug!(%reason, "Delivery deferred");
                    self.mark_offline();
                    self.feedback.log("Saved to send later.");
                    self.feedback.status("Not sent (offline). Queued.");
                    ScanOutcome::Queued(record)
                }
                Err(e) => {
                    error!(code = %record.code, error = %e, "Record could not be queued");
                    self.feedback
                        .status(&format!("Not sent and could not be queued: {e}"));
                    ScanOutcome::QueueFailed {
                        record,
                        error: e.to_string(),
                    }
                }
            },
            DeliveryOutcome::NotConfigured => {
                warn!("{}", Error::EndpointNotConfigured);
                self.feedback.log(ENDPOINT_MISSING_MESSAGE);
                self.feedback.status("Not sent: no endpoint configured.");
                ScanOutcome::NotConfigured(record)
            }
        }
    }

    /// A failed send means the network is down whatever the last probe said.
    /// Going offline here lets the next successful probe publish an edge.
    fn mark_offline(&self) {
        if let Some(connectivity) = &self.connectivity {
            connectivity.set_online(false);
        }
    }

    /// Resume scanning if a processed scan is waiting for it.
    pub async fn resume(&mut self) {
        self.resume_at = None;
        if self.state == SessionState::Processing {
            // A failed start is already reported and leaves the session stopped.
            let _ = self.start().await;
        }
    }

    /// Flush the offline queue, reporting the result to the operator.
    pub async fn flush(&mut self, connectivity: &ConnectivityWatch) -> Option<FlushOutcome> {
        match self.queue.flush(&self.client, connectivity).await {
            Ok(outcome) => {
                if let FlushOutcome::Flushed(report) = outcome {
                    self.feedback
                        .log(&format!("Sent {} pending records.", report.attempted));
                    if report.failed > 0 {
                        connectivity.set_online(false);
                    }
                }
                Some(outcome)
            }
            Err(e) => {
                error!(error = %e, "Flush failed");
                None
            }
        }
    }

    /// Apply one operator command. Returns `false` for [`SessionCommand::Shutdown`].
    pub async fn handle_command(
        &mut self,
        command: SessionCommand,
        connectivity: &ConnectivityWatch,
    ) -> bool {
        debug!(?command, "Operator command");
        // Start failures are reported by `start` itself.
        match command {
            SessionCommand::Start => {
                let _ = self.start().await;
            }
            SessionCommand::Stop => self.stop().await,
            SessionCommand::SwitchCamera => {
                let _ = self.switch_camera().await;
            }
            SessionCommand::SelectCamera(index) => {
                if let Err(e) = self.select_camera(index).await {
                    self.feedback.log(&e.to_string());
                }
            }
            SessionCommand::ToggleTorch => self.toggle_torch().await,
            SessionCommand::SetMode(mode) => {
                self.feedback.log(&format!("Mode: {mode}"));
                self.settings.mode = mode;
            }
            SessionCommand::SetLab(lab) => {
                self.feedback.log(&format!("Lab: {lab}"));
                self.settings.lab = lab;
            }
            SessionCommand::Flush => {
                // Re-check a stale offline belief before trying.
                if !connectivity.is_online() {
                    if let Some(url) = self.client.endpoint() {
                        connectivity.set_online(probe_endpoint(url).await);
                    }
                }
                self.flush(connectivity).await;
            }
            SessionCommand::Shutdown => return false,
        }
        true
    }

    /// Run the session until shut down.
    ///
    /// Flushes the queue once, enumerates cameras, starts scanning, then
    /// serves events until a [`SessionCommand::Shutdown`] arrives or the
    /// command channel closes.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is already running.
    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        connectivity: ConnectivityWatch,
    ) -> Result<()> {
        let mut events = self
            .events_rx
            .take()
            .ok_or_else(|| Error::internal("scan session is already running"))?;
        let mut online = connectivity.subscribe();
        self.connectivity = Some(connectivity.clone());

        // Only flushes if the caller's connectivity check found the network.
        self.flush(&connectivity).await;
        if self.load_cameras().await.is_err() {
            self.feedback
                .log("No cameras found; using an environment-facing camera");
        }
        let _ = self.start().await;

        loop {
            let resume_at = self.resume_at;
            tokio::select! {
                Some(event) = events.recv() => {
                    self.handle_event(event).await;
                }
                command = commands.recv() => {
                    let keep_running = match command {
                        Some(command) => self.handle_command(command, &connectivity).await,
                        None => false,
                    };
                    if !keep_running {
                        break;
                    }
                }
                true = online.became_online() => {
                    self.flush(&connectivity).await;
                }
                () = sleep_until(resume_at) => {
                    self.resume().await;
                }
            }
        }

        self.stop().await;
        self.connectivity = None;
        self.events_rx = Some(events);
        info!("Scan session ended");
        Ok(())
    }

    fn selector(&self) -> CameraSelector {
        self.cameras
            .get(self.camera_index)
            .map_or(CameraSelector::FacingEnvironment, |camera| {
                CameraSelector::Device(camera.id.clone())
            })
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
