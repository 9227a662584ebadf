use crate::severity::LogSeverity;
use crate::time::now;
use once_cell::sync::Lazy;
use std::sync::atomic::{AtomicU8, Ordering};

static MIN_SEVERITY: Lazy<AtomicU8> = Lazy::new(|| AtomicU8::new(LogSeverity::Info as u8));

/// Sets the minimum severity that will be printed. Messages below it are dropped.
pub fn set_min_severity(severity: LogSeverity) {
    MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
}

pub fn log(msg: String, log_severity: LogSeverity) {
    if (log_severity as u8) < MIN_SEVERITY.load(Ordering::Relaxed) {
        return;
    }
    println!("[{}] {} {}", log_severity, now(), msg);
}
