//! Captured error events
//!
//! An `Event` is a flattened stack trace plus the error's string form and
//! the capture time.
//!
//! Capture only walks the stack. Symbol resolution reads debug info from
//! disk, so it is deferred to `Event::resolve` on an agent worker.

use backtrace::Backtrace;
use serde::Serialize;
use std::error::Error;

/// Frames from these paths describe the capture itself, not the failure
const SKIPPED_PREFIXES: &[&str] = &[
    "faultline::",
    "<faultline::",
    "backtrace::",
    "std::backtrace",
    "std::panicking",
    "core::panicking",
    "std::panic::",
    "std::sys_common::backtrace",
    "std::sys::backtrace",
];

const UNKNOWN_SYMBOL: &str = "<unknown>";

/// One resolved stack frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub function_name: String,
    pub class_name: String,
    pub file_path: String,
    pub line_number: u32,
}

impl StackFrame {
    /// Split a demangled symbol into module path and function name
    pub fn from_symbol(symbol: &str, file_path: String, line_number: u32) -> Self {
        let (class_name, function_name) = match symbol.rsplit_once("::") {
            Some((path, function)) => (path.to_string(), function.to_string()),
            None => (String::new(), symbol.to_string()),
        };

        Self {
            function_name,
            class_name,
            file_path,
            line_number,
        }
    }
}

/// A captured error, ready to be delivered
#[derive(Debug, Clone, Default)]
pub struct Event {
    frames: Vec<StackFrame>,
    exc_type: String,
    timestamp_ms: i64,
    pending_trace: Option<Backtrace>,
}

impl Event {
    pub fn new(exc_type: impl Into<String>, frames: Vec<StackFrame>) -> Self {
        Self {
            frames,
            exc_type: exc_type.into(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            pending_trace: None,
        }
    }

    /// Capture the current stack for `err`
    ///
    /// `excType` starts with the concrete type name. Behind a trait object
    /// (`&dyn Error`) that name says nothing, so the `Debug` form is used.
    pub fn from_error<E: Error + ?Sized>(err: &E) -> Self {
        let type_name = std::any::type_name::<E>();
        let mut description = if type_name.starts_with("dyn ") {
            format!("{:?}", err)
        } else {
            format!("{}: {}", type_name, err)
        };

        let mut source = err.source();
        while let Some(cause) = source {
            description.push_str(&format!("\nCaused by: {}", cause));
            source = cause.source();
        }

        Self::new(description, Vec::new()).with_unresolved_trace()
    }

    /// Capture the current stack for a panic with `message` raised at `location`
    pub fn from_panic(message: &str, location: Option<(&str, u32)>) -> Self {
        let description = match location {
            Some((file, line)) => format!("panic at {}:{}: {}", file, line, message),
            None => format!("panic: {}", message),
        };

        Self::new(description, Vec::new()).with_unresolved_trace()
    }

    fn with_unresolved_trace(mut self) -> Self {
        self.pending_trace = Some(Backtrace::new_unresolved());
        self
    }

    /// Symbolize a captured stack into frames; no-op once resolved
    pub fn resolve(&mut self) {
        if let Some(mut trace) = self.pending_trace.take() {
            trace.resolve();
            self.frames = frames_of(&trace);
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.pending_trace.is_none()
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    pub fn exc_type(&self) -> &str {
        &self.exc_type
    }

    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp_ms
    }

    /// Nothing worth delivering
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.pending_trace.is_none() && self.exc_type.trim().is_empty()
    }
}

/// Flatten a resolved trace, innermost first, dropping capture frames
fn frames_of(trace: &Backtrace) -> Vec<StackFrame> {
    let mut frames = Vec::new();

    for frame in trace.frames() {
        for symbol in frame.symbols() {
            let name = symbol
                .name()
                .map(|name| format!("{:#}", name))
                .unwrap_or_else(|| UNKNOWN_SYMBOL.to_string());

            if SKIPPED_PREFIXES.iter().any(|prefix| name.starts_with(prefix)) {
                continue;
            }

            let file_path = symbol
                .filename()
                .map(|path| path.display().to_string())
                .unwrap_or_default();

            frames.push(StackFrame::from_symbol(&name, file_path, symbol.lineno().unwrap_or(0)));
        }
    }

    frames
}
