//! Scanner abstraction.
//!
//! Decoding is owned by an external scanner; this module defines the narrow
//! interface the session drives, plus [`LineScanner`], which treats each line
//! of text from a keyboard-wedge barcode reader as one decode.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Errors reported by a scanner.
#[derive(Debug, Error)]
pub enum ScannerError {
    /// The camera could not be enumerated or started.
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),

    /// The active camera has no torch.
    #[error("torch not supported")]
    TorchUnsupported,

    /// `start` was called while already scanning.
    #[error("scanner already running")]
    AlreadyScanning,

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ScannerError> for crate::error::Error {
    fn from(err: ScannerError) -> Self {
        match err {
            ScannerError::CameraUnavailable(message) => Self::CameraUnavailable { message },
            ScannerError::TorchUnsupported => Self::TorchUnsupported,
            other => Self::Internal(other.to_string()),
        }
    }
}

/// A camera the scanner can use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CameraInfo {
    /// Device identifier passed back to [`Scanner::start`].
    pub id: String,
    /// Human-readable label; may be empty.
    pub label: String,
}

impl CameraInfo {
    /// Label to show the operator, numbering unlabeled cameras from 1.
    #[must_use]
    pub fn display_label(&self, index: usize) -> String {
        if self.label.is_empty() {
            format!("Camera {}", index + 1)
        } else {
            self.label.clone()
        }
    }
}

/// Which camera to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraSelector {
    /// A specific enumerated device.
    Device(String),
    /// Any camera facing away from the operator.
    FacingEnvironment,
}

/// Decoder settings passed through to the scanner.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOptions {
    /// Frames per second to decode.
    pub fps: u32,
    /// Width of the scan region in pixels.
    pub qrbox_width: u32,
    /// Height of the scan region in pixels.
    pub qrbox_height: u32,
    /// Preview aspect ratio.
    pub aspect_ratio: f64,
    /// Use a platform barcode detector when one exists.
    pub prefer_native_barcode_detector: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            fps: 12,
            qrbox_width: 300,
            qrbox_height: 200,
            aspect_ratio: 1.77,
            prefer_native_barcode_detector: true,
        }
    }
}

/// Something the scanner observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEvent {
    /// A code was decoded.
    Decoded(String),
    /// A frame could not be decoded (usually: no code in view).
    DecodeError(String),
}

/// An external code scanner.
#[async_trait]
pub trait Scanner: Send + std::fmt::Debug {
    /// List the cameras available to the scanner.
    ///
    /// # Errors
    ///
    /// Returns an error if the cameras cannot be enumerated.
    async fn enumerate_cameras(&mut self) -> Result<Vec<CameraInfo>, ScannerError>;

    /// Start scanning with `camera`, sending events to `events`.
    ///
    /// # Errors
    ///
    /// Returns an error if the camera cannot be acquired.
    async fn start(
        &mut self,
        camera: &CameraSelector,
        options: &ScanOptions,
        events: mpsc::Sender<ScanEvent>,
    ) -> Result<(), ScannerError>;

    /// Stop scanning and release the camera.
    ///
    /// # Errors
    ///
    /// Returns an error if the camera cannot be released cleanly.
    async fn stop(&mut self) -> Result<(), ScannerError>;

    /// Check if the scanner is currently scanning.
    fn is_scanning(&self) -> bool;

    /// Switch the active camera's torch.
    ///
    /// # Errors
    ///
    /// Returns [`ScannerError::TorchUnsupported`] unless overridden.
    async fn set_torch(&mut self, _on: bool) -> Result<(), ScannerError> {
        Err(ScannerError::TorchUnsupported)
    }
}

/// Device id reported by [`LineScanner`].
pub const LINE_SCANNER_ID: &str = "line";

type Sink = Arc<Mutex<Option<mpsc::Sender<ScanEvent>>>>;

/// Scanner fed with lines of text.
///
/// Hardware barcode readers in keyboard mode type each decoded code followed
/// by Enter. Lines handed to the paired [`LineFeeder`] become
/// [`ScanEvent::Decoded`] while the scanner is started and are dropped while
/// it is stopped, just as a camera scanner ignores codes it is not looking at.
#[derive(Debug, Default)]
pub struct LineScanner {
    sink: Sink,
}

impl LineScanner {
    /// Create a stopped scanner.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for feeding lines into this scanner.
    #[must_use]
    pub fn feeder(&self) -> LineFeeder {
        LineFeeder {
            sink: Arc::clone(&self.sink),
        }
    }

    fn set_sink(&self, events: Option<mpsc::Sender<ScanEvent>>) {
        *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = events;
    }
}

#[async_trait]
impl Scanner for LineScanner {
    async fn enumerate_cameras(&mut self) -> Result<Vec<CameraInfo>, ScannerError> {
        Ok(vec![CameraInfo {
            id: LINE_SCANNER_ID.to_string(),
            label: "Keyboard barcode reader".to_string(),
        }])
    }

    async fn start(
        &mut self,
        camera: &CameraSelector,
        _options: &ScanOptions,
        events: mpsc::Sender<ScanEvent>,
    ) -> Result<(), ScannerError> {
        if let CameraSelector::Device(id) = camera {
            if id != LINE_SCANNER_ID {
                return Err(ScannerError::CameraUnavailable(format!("no device {id}")));
            }
        }
        if self.is_scanning() {
            return Err(ScannerError::AlreadyScanning);
        }
        debug!("Line scanner started");
        self.set_sink(Some(events));
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), ScannerError> {
        self.set_sink(None);
        debug!("Line scanner stopped");
        Ok(())
    }

    fn is_scanning(&self) -> bool {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Cloneable handle that pushes lines into a [`LineScanner`].
#[derive(Debug, Clone)]
pub struct LineFeeder {
    sink: Sink,
}

impl LineFeeder {
    /// Offer one line to the scanner.
    ///
    /// Returns `true` if the scanner was started and took the line.
    pub async fn feed(&self, line: &str) -> bool {
        let events = self
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(events) = events else {
            trace!("Scanner stopped; line dropped");
            return false;
        };
        events
            .send(ScanEvent::Decoded(line.to_string()))
            .await
            .is_ok()
    }

    /// Check if the scanner is currently taking lines.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_label() {
        let unnamed = CameraInfo {
            id: "a".into(),
            label: String::new(),
        };
        assert_eq!(unnamed.display_label(1), "Camera 2");

        let named = CameraInfo {
            id: "b".into(),
            label: "Rear".into(),
        };
        assert_eq!(named.display_label(0), "Rear");
    }

    #[test]
    fn test_scan_options_default() {
        let options = ScanOptions::default();
        assert_eq!(options.fps, 12);
        assert_eq!((options.qrbox_width, options.qrbox_height), (300, 200));
    }

    #[test]
    fn test_error_conversion() {
        let err: crate::Error = ScannerError::CameraUnavailable("denied".into()).into();
        assert!(err.is_operator_visible());

        let err: crate::Error = ScannerError::TorchUnsupported.into();
        assert!(matches!(err, crate::Error::TorchUnsupported));
    }

    #[tokio::test]
    async fn test_line_scanner_forwards_while_started() {
        let mut scanner = LineScanner::new();
        let feeder = scanner.feeder();
        let (tx, mut rx) = mpsc::channel(4);

        assert!(!feeder.feed("dropped").await);

        scanner
            .start(&CameraSelector::FacingEnvironment, &ScanOptions::default(), tx)
            .await
            .unwrap();
        assert!(scanner.is_scanning());
        assert!(feeder.is_listening());
        assert!(feeder.feed("1 Ana 2").await);
        assert_eq!(rx.recv().await, Some(ScanEvent::Decoded("1 Ana 2".into())));

        scanner.stop().await.unwrap();
        assert!(!feeder.feed("late").await);
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_line_scanner_rejects_unknown_device() {
        let mut scanner = LineScanner::new();
        let (tx, _rx) = mpsc::channel(1);
        let err = scanner
            .start(
                &CameraSelector::Device("usb-cam".into()),
                &ScanOptions::default(),
                tx,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScannerError::CameraUnavailable(_)));
    }

    #[tokio::test]
    async fn test_line_scanner_double_start() {
        let mut scanner = LineScanner::new();
        let (tx, _rx) = mpsc::channel(1);
        let device = CameraSelector::Device(LINE_SCANNER_ID.into());
        scanner
            .start(&device, &ScanOptions::default(), tx.clone())
            .await
            .unwrap();
        assert!(matches!(
            scanner.start(&device, &ScanOptions::default(), tx).await,
            Err(ScannerError::AlreadyScanning)
        ));
    }

    #[tokio::test]
    async fn test_line_scanner_has_no_torch() {
        let mut scanner = LineScanner::new();
        assert!(matches!(
            scanner.set_torch(true).await,
            Err(ScannerError::TorchUnsupported)
        ));
        assert_eq!(scanner.enumerate_cameras().await.unwrap().len(), 1);
    }
}
