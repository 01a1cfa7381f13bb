//! Idempotency ledger for redelivered work messages.
//!
//! The broker delivers at least once. Without a record of what already went
//! through, a redelivered message would be resized again and stored a second
//! time under a new content id. The ledger remembers, per message, the id the
//! storage sink returned and whether the completion notification went out.
//!
//! # Keys
//!
//! The key is the SHA-256 of the raw message payload, as lowercase hex. It is
//! content-based, so two uploads of the same file at the same zoom share a key
//! and the second is answered from the ledger. The same key is sent to the
//! storage sink as `X-Unique-ID`, which lets a sink that keeps its own index
//! deduplicate across orchestrator restarts.
//!
//! # Redelivery
//!
//! | Ledger state | Action |
//! |---|---|
//! | absent | full pipeline |
//! | stored, not notified | publish only |
//! | stored and notified | nothing |
//!
//! # Storage
//!
//! The ledger is bounded: once `capacity` keys are held, the oldest insertion
//! is evicted. When a path is configured it is saved as versioned JSON after
//! every change and loaded at startup; a missing, corrupt, or outdated file
//! yields an empty ledger.

use crate::types::ContentId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::io;
use std::path::Path;

/// Version of the on-disk format. Bump to invalidate existing files.
const LEDGER_VERSION: u32 = 1;

/// SHA-256 of a raw message payload, as lowercase hex.
pub fn message_key(payload: &str) -> String {
    format!("{:x}", Sha256::digest(payload.as_bytes()))
}

/// What the ledger knows about one message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub content_id: ContentId,
    pub notified: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub version: u32,
    pub entries: HashMap<String, LedgerEntry>,
    /// Insertion order, oldest first. Rebuilt from `entries` on load when absent.
    #[serde(default)]
    order: VecDeque<String>,
    #[serde(skip)]
    capacity: usize,
}

impl Ledger {
    pub fn empty(capacity: usize) -> Self {
        Self {
            version: LEDGER_VERSION,
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    /// Load from disk. Returns an empty ledger if the file doesn't exist or
    /// can't be parsed (version mismatch, corruption).
    pub fn load(path: &Path, capacity: usize) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return Self::empty(capacity),
        };
        let mut ledger: Self = match serde_json::from_str(&content) {
            Ok(l) => l,
            Err(_) => return Self::empty(capacity),
        };
        if ledger.version != LEDGER_VERSION {
            return Self::empty(capacity);
        }
        ledger.capacity = capacity.max(1);
        ledger.order.retain(|key| ledger.entries.contains_key(key));
        for key in ledger.entries.keys() {
            if !ledger.order.contains(key) {
                ledger.order.push_back(key.clone());
            }
        }
        ledger.evict();
        ledger
    }

    pub fn save(&self, path: &Path) -> io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)
    }

    pub fn get(&self, key: &str) -> Option<LedgerEntry> {
        self.entries.get(key).copied()
    }

    /// Record a successful store. Notification is still pending.
    pub fn record_stored(&mut self, key: &str, content_id: ContentId) {
        let previous = self.entries.insert(
            key.to_string(),
            LedgerEntry {
                content_id,
                notified: false,
            },
        );
        if previous.is_none() {
            self.order.push_back(key.to_string());
            self.evict();
        }
    }

    /// Record that the completion event went out. No-op for unknown keys.
    pub fn mark_notified(&mut self, key: &str) {
        if let Some(entry) = self.entries.get_mut(key) {
            entry.notified = true;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self) {
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }
}
