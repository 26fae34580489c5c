//! Unit tests for log.rs
//!
//! Tests Logger trait, LogEntry, LogSeverity, DefaultLogger and the macros.

use crate::error::Error;
use crate::log::{self, DefaultLogger, LogEntry, LogSeverity, Logger};
use serial_test::serial;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

/// Test logger that captures log entries for verification
struct CaptureLogger {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl CaptureLogger {
    fn new() -> (Self, Arc<Mutex<Vec<LogEntry>>>) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        (Self { entries: entries.clone() }, entries)
    }
}

impl Logger for CaptureLogger {
    fn log(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

// ============================================================================
// LOG SEVERITY TESTS
// ============================================================================

#[test]
fn test_log_severity_ordering() {
    assert!(LogSeverity::Trace < LogSeverity::Debug);
    assert!(LogSeverity::Debug < LogSeverity::Info);
    assert!(LogSeverity::Info < LogSeverity::Warn);
    assert!(LogSeverity::Warn < LogSeverity::Error);
}

#[test]
fn test_log_severity_debug() {
    assert_eq!(format!("{:?}", LogSeverity::Trace), "Trace");
    assert_eq!(format!("{:?}", LogSeverity::Error), "Error");
}

// ============================================================================
// DEFAULT LOGGER TESTS
// ============================================================================

#[test]
fn test_format_plain_without_location() {
    let entry = LogEntry {
        severity: LogSeverity::Info,
        timestamp: SystemTime::now(),
        source: "lumen::Context".to_string(),
        message: "Device created".to_string(),
        file: None,
        line: None,
    };

    let text = DefaultLogger::format_plain(&entry);
    assert!(text.contains("[INFO ]"));
    assert!(text.contains("[lumen::Context]"));
    assert!(text.ends_with("Device created"));
}

#[test]
fn test_format_plain_with_location() {
    let entry = LogEntry {
        severity: LogSeverity::Error,
        timestamp: SystemTime::now(),
        source: "lumen::vulkan".to_string(),
        message: "lost".to_string(),
        file: Some("vulkan_graphics_device.rs"),
        line: Some(42),
    };

    let text = DefaultLogger::format_plain(&entry);
    assert!(text.contains("[ERROR]"));
    assert!(text.ends_with("lost (vulkan_graphics_device.rs:42)"));
}

#[test]
fn test_default_logger_does_not_panic() {
    let entry = LogEntry {
        severity: LogSeverity::Warn,
        timestamp: SystemTime::now(),
        source: "lumen::test".to_string(),
        message: "colored output".to_string(),
        file: None,
        line: None,
    };
    DefaultLogger.log(&entry);
}

// ============================================================================
// GLOBAL LOGGER + MACRO TESTS
// ============================================================================

#[test]
#[serial]
fn test_custom_logger_receives_macros() {
    let (logger, entries) = CaptureLogger::new();
    log::set_logger(logger);

    crate::engine_info!("lumen::test", "value = {}", 7);
    crate::engine_error!("lumen::test", "broken {}", "thing");

    log::reset_logger();

    let entries = entries.lock().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].severity, LogSeverity::Info);
    assert_eq!(entries[0].message, "value = 7");
    assert!(entries[0].file.is_none());
    assert_eq!(entries[1].severity, LogSeverity::Error);
    assert!(entries[1].file.is_some());
    assert!(entries[1].line.is_some());
}

#[test]
#[serial]
fn test_engine_err_logs_and_builds_error() {
    let (logger, entries) = CaptureLogger::new();
    log::set_logger(logger);

    let err = crate::engine_err!("lumen::test", "fence wait failed: {}", -4);

    log::reset_logger();

    assert_eq!(err, Error::BackendError("fence wait failed: -4".to_string()));
    assert_eq!(entries.lock().unwrap().len(), 1);
}

#[test]
#[serial]
fn test_engine_bail_returns_early() {
    fn bails(flag: bool) -> crate::error::Result<u32> {
        if flag {
            crate::engine_bail!("lumen::test", "bailing out");
        }
        Ok(1)
    }

    let (logger, _entries) = CaptureLogger::new();
    log::set_logger(logger);
    let result = bails(true);
    log::reset_logger();

    assert!(matches!(result, Err(Error::BackendError(_))));
    assert_eq!(bails(false), Ok(1));
}

#[test]
#[serial]
#[should_panic(expected = "double destroy")]
fn test_engine_fatal_panics() {
    let (logger, _entries) = CaptureLogger::new();
    log::set_logger(logger);
    crate::engine_fatal!("lumen::test", "double destroy of buffer {}", 3);
}
