//! `qrattend` - Attendance kiosk with offline queueing
//!
//! This library turns scanned QR and barcode payloads into attendance records,
//! delivers them to a remote endpoint, and keeps undelivered records in a
//! persistent queue until the network comes back.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod connectivity;
pub mod delivery;
pub mod error;
pub mod feedback;
pub mod identifier;
pub mod logging;
pub mod queue;
pub mod record;
pub mod scanner;
pub mod session;
pub mod storage;

pub use config::Config;
pub use connectivity::{AlwaysOnline, Connectivity, ConnectivityWatch};
pub use delivery::{DeliveryClient, DeliveryOutcome, HttpTransport, Transport};
pub use error::{Error, Result};
pub use feedback::{Feedback, TerminalFeedback};
pub use identifier::Identifier;
pub use logging::init_logging;
pub use queue::{FlushOutcome, FlushPolicy, FlushReport, OfflineQueue};
pub use record::AttendanceRecord;
pub use scanner::{LineFeeder, LineScanner, Scanner};
pub use session::{ScanOutcome, ScanSession, SessionCommand, SessionSettings, SessionState};
pub use storage::{KeyValueStore, MemoryStore, SqliteStore};
