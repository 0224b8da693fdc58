//! The AX.25 router (C4): binds callbacks to destination-callsign
//! patterns and fans a received frame out to every matching binding, in
//! the order bindings were registered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use regex::Regex;

use crate::ax25::Frame;
use crate::callsign::Callsign;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingId(u64);

enum Pattern {
    Exact(String),
    Regex(Regex),
}

impl Pattern {
    fn matches(&self, base: &str) -> bool {
        match self {
            Pattern::Exact(s) => s == base,
            Pattern::Regex(re) => re.is_match(base),
        }
    }
}

struct Binding {
    id: BindingId,
    pattern: Pattern,
    ssid: Option<u8>,
    callback: Box<dyn Fn(&Frame) + Send + Sync>,
}

impl Binding {
    fn matches(&self, call: &Callsign) -> bool {
        self.pattern.matches(call.base()) && self.ssid.map_or(true, |s| s == call.ssid())
    }
}

/// Binds callbacks to the destination callsign of incoming frames.
/// Matching dispatch must not block the caller — a callback that needs
/// to transmit schedules it through C5 rather than sending synchronously
/// from inside `dispatch`.
pub struct Router {
    bindings: Mutex<Vec<Binding>>,
    next_id: AtomicU64,
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}

impl Router {
    pub fn new() -> Self {
        Router {
            bindings: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Binds on an exact base-callsign match. `ssid = None` matches any
    /// SSID.
    pub fn bind_exact<F>(&self, base: &str, ssid: Option<u8>, callback: F) -> BindingId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        self.insert(Pattern::Exact(base.to_ascii_uppercase()), ssid, callback)
    }

    /// Binds on a regex matched against the whole base-callsign string,
    /// compiled once at bind time.
    pub fn bind_regex<F>(&self, pattern: &str, ssid: Option<u8>, callback: F) -> Result<BindingId, Error>
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let re = Regex::new(pattern).map_err(|e| Error::MalformedAprsPayload(e.to_string()))?;
        Ok(self.insert(Pattern::Regex(re), ssid, callback))
    }

    fn insert<F>(&self, pattern: Pattern, ssid: Option<u8>, callback: F) -> BindingId
    where
        F: Fn(&Frame) + Send + Sync + 'static,
    {
        let id = BindingId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.bindings.lock().unwrap().push(Binding {
            id,
            pattern,
            ssid,
            callback: Box::new(callback),
        });
        id
    }

    pub fn unbind(&self, id: BindingId) {
        self.bindings.lock().unwrap().retain(|b| b.id != id);
    }

    /// Invokes every binding whose pattern matches the frame's
    /// destination, in registration order.
    pub fn dispatch(&self, frame: &Frame) {
        let destination = &frame.path().destination;
        let guard = self.bindings.lock().unwrap();
        for binding in guard.iter().filter(|b| b.matches(destination)) {
            (binding.callback)(frame);
        }
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.lock().unwrap().len()
    }
}
