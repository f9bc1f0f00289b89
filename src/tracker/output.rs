//! Per-code output channels.
//!
//! An output channel is a named text sink the host UI renders. The tracker
//! only appends to it; showing, clearing, and disposing are requests passed
//! through to whatever sink the host installed.
//!
//! [`OutputChannels`] is the registry: one sink per code, created on first
//! access and reused across respawns until disposed.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Default number of lines retained by [`MemoryOutput`].
pub const DEFAULT_OUTPUT_CAPACITY: usize = 1000;

/// A text sink for one code's process output.
pub trait OutputSink: Send + Sync {
    fn append_line(&self, line: &str);
    /// Ask the host to bring this channel into view.
    fn show(&self);
    fn clear(&self);
    /// Release any resources held by the sink. Called once, on disposal.
    fn dispose(&self);
}

/// Creates the sink for a code the first time it is needed.
pub type SinkFactory = Arc<dyn Fn(&str) -> Arc<dyn OutputSink> + Send + Sync>;

/// Bounded in-memory ring buffer of output lines.
pub struct MemoryOutput {
    name: String,
    capacity: usize,
    lines: Mutex<VecDeque<String>>,
    show_requested: AtomicBool,
    disposed: AtomicBool,
}

impl MemoryOutput {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity: capacity.max(1),
            lines: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_OUTPUT_CAPACITY))),
            show_requested: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The last `n` retained lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let buf = self.lines.lock().unwrap();
        let start = buf.len().saturating_sub(n);
        buf.iter().skip(start).cloned().collect()
    }

    /// All retained lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().cloned().collect()
    }

    pub fn show_requested(&self) -> bool {
        self.show_requested.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }
}

impl OutputSink for MemoryOutput {
    fn append_line(&self, line: &str) {
        let mut buf = self.lines.lock().unwrap();
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(line.to_string());
    }

    fn show(&self) {
        self.show_requested.store(true, Ordering::SeqCst);
    }

    fn clear(&self) {
        self.lines.lock().unwrap().clear();
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::SeqCst);
        self.lines.lock().unwrap().clear();
    }
}

/// Sink that prints each line to stdout prefixed with the code.
pub struct ConsoleOutput {
    code: String,
}

impl ConsoleOutput {
    pub fn new(code: impl Into<String>) -> Self {
        Self { code: code.into() }
    }
}

impl OutputSink for ConsoleOutput {
    fn append_line(&self, line: &str) {
        println!("[{}] {line}", self.code);
    }

    fn show(&self) {}

    fn clear(&self) {}

    fn dispose(&self) {}
}

/// Registry of output sinks keyed by code.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct OutputChannels {
    sinks: Arc<Mutex<HashMap<String, Arc<dyn OutputSink>>>>,
    factory: SinkFactory,
}

impl OutputChannels {
    pub fn new(factory: SinkFactory) -> Self {
        Self {
            sinks: Arc::new(Mutex::new(HashMap::new())),
            factory,
        }
    }

    /// Registry backed by [`MemoryOutput`] sinks of the given capacity.
    pub fn in_memory(capacity: usize) -> Self {
        Self::new(Arc::new(move |code: &str| {
            Arc::new(MemoryOutput::new(code, capacity)) as Arc<dyn OutputSink>
        }))
    }

    /// Registry backed by [`ConsoleOutput`] sinks.
    pub fn console() -> Self {
        Self::new(Arc::new(|code: &str| {
            Arc::new(ConsoleOutput::new(code)) as Arc<dyn OutputSink>
        }))
    }

    /// The sink for `code`, created on first use.
    pub fn get(&self, code: &str) -> Arc<dyn OutputSink> {
        let mut sinks = self.sinks.lock().unwrap();
        sinks
            .entry(code.to_string())
            .or_insert_with(|| (self.factory)(code))
            .clone()
    }

    /// The sink for `code` if one has been created.
    pub fn existing(&self, code: &str) -> Option<Arc<dyn OutputSink>> {
        self.sinks.lock().unwrap().get(code).cloned()
    }

    /// Dispose the sink for `code` and forget it. Returns whether one existed.
    pub fn dispose(&self, code: &str) -> bool {
        let removed = self.sinks.lock().unwrap().remove(code);
        match removed {
            Some(sink) => {
                sink.dispose();
                true
            }
            None => false,
        }
    }

    /// Dispose and forget every sink.
    pub fn dispose_all(&self) {
        let drained: Vec<_> = self.sinks.lock().unwrap().drain().collect();
        for (code, sink) in drained {
            tracing::debug!(code, "Disposing output channel");
            sink.dispose();
        }
    }

    pub fn len(&self) -> usize {
        self.sinks.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for OutputChannels {
    fn default() -> Self {
        Self::in_memory(DEFAULT_OUTPUT_CAPACITY)
    }
}
