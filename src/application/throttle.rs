//! Per-symbol cooldown gate for the quote handler: after any action is
//! dispatched for a symbol, further actions for that symbol are suppressed
//! for `orderCooldownSeconds`, preventing duplicate orders while a previous
//! request races the trade-update stream.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

pub struct SymbolThrottle {
    cooldown_seconds: i64,
    last_action: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SymbolThrottle {
    pub fn new(cooldown_seconds: u64) -> Self {
        Self {
            cooldown_seconds: cooldown_seconds as i64,
            last_action: Mutex::new(HashMap::new()),
        }
    }

    pub fn is_throttled(&self, symbol: &str) -> bool {
        let guard = self.last_action.lock().unwrap();
        match guard.get(symbol) {
            Some(last) => Utc::now().signed_duration_since(*last).num_seconds() < self.cooldown_seconds,
            None => false,
        }
    }

    /// Records a throttle entry for `symbol`, starting a fresh cooldown
    /// window. Called both on successful order placement and on rejection,
    /// per the error-handling policy's "clear the throttle" vs "record an
    /// entry to prevent a retry storm" distinction — callers choose which
    /// by calling `mark` (record) or `clear` (release) as appropriate.
    pub fn mark(&self, symbol: &str) {
        self.last_action.lock().unwrap().insert(symbol.to_string(), Utc::now());
    }

    /// Releases the throttle early, e.g. after an `OrderRejected` error so
    /// the next tick can reassess immediately.
    pub fn clear(&self, symbol: &str) {
        self.last_action.lock().unwrap().remove(symbol);
    }
}
