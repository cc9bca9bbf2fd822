//! Operator feedback: status line, log feed, and confirmation tone.

use std::io::Write;

use chrono::Local;

/// Where the session reports to the operator.
pub trait Feedback: Send + std::fmt::Debug {
    /// Replace the status line.
    fn status(&mut self, message: &str);

    /// Append a line to the log feed.
    fn log(&mut self, message: &str);

    /// Signal a successful delivery.
    fn confirm(&mut self);
}

/// Feedback on the terminal.
///
/// The log feed is timestamped; the confirmation tone is the terminal bell.
#[derive(Debug, Clone)]
pub struct TerminalFeedback {
    bell: bool,
}

impl TerminalFeedback {
    /// Create terminal feedback, optionally ringing the bell on success.
    #[must_use]
    pub fn new(bell: bool) -> Self {
        Self { bell }
    }
}

impl Default for TerminalFeedback {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Feedback for TerminalFeedback {
    fn status(&mut self, message: &str) {
        println!("» {message}");
    }

    fn log(&mut self, message: &str) {
        println!("[{}] {message}", Local::now().format("%Y-%m-%d %H:%M:%S"));
    }

    fn confirm(&mut self) {
        if self.bell {
            let mut out = std::io::stdout();
            // A closed terminal only loses the beep.
            let _ = out.write_all(b"\x07").and_then(|()| out.flush());
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use super::Feedback;

    /// Everything the operator would have seen.
    #[derive(Debug, Default)]
    pub struct Seen {
        pub statuses: Vec<String>,
        pub logs: Vec<String>,
        pub tones: usize,
    }

    /// Feedback that records into a shared [`Seen`].
    #[derive(Debug, Clone, Default)]
    pub struct RecordingFeedback {
        pub seen: Arc<Mutex<Seen>>,
    }

    impl RecordingFeedback {
        pub fn last_status(&self) -> String {
            self.seen
                .lock()
                .unwrap()
                .statuses
                .last()
                .cloned()
                .unwrap_or_default()
        }

        pub fn logs_contain(&self, needle: &str) -> bool {
            self.seen.lock().unwrap().logs.iter().any(|l| l.contains(needle))
        }

        pub fn tones(&self) -> usize {
            self.seen.lock().unwrap().tones
        }
    }

    impl Feedback for RecordingFeedback {
        fn status(&mut self, message: &str) {
            self.seen.lock().unwrap().statuses.push(message.to_string());
        }

        fn log(&mut self, message: &str) {
            self.seen.lock().unwrap().logs.push(message.to_string());
        }

        fn confirm(&mut self) {
            self.seen.lock().unwrap().tones += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_feedback_does_not_panic() {
        let mut feedback = TerminalFeedback::new(false);
        feedback.status("Scanning…");
        feedback.log("Code read: 1");
        feedback.confirm();
    }

    #[test]
    fn test_recording_feedback() {
        let recorder = testing::RecordingFeedback::default();
        let mut boxed: Box<dyn Feedback> = Box::new(recorder.clone());
        boxed.status("a");
        boxed.status("b");
        boxed.log("sent 3");
        boxed.confirm();

        assert_eq!(recorder.last_status(), "b");
        assert!(recorder.logs_contain("sent"));
        assert_eq!(recorder.tones(), 1);
    }
}
