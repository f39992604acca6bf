//! Session access state derived from a persisted role marker.
//!
//! The hosting application's sign-in flow persists an opaque role marker;
//! at session start the host reads that marker back and initializes an
//! [`AccessStore`] from it. The store then answers which navigation and
//! action keys the session may use, and accepts explicit replacement of
//! the permitted set. Share one store per session (typically behind an
//! `Arc`); setter effects are visible to every sharer immediately.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Marker values that resolve to the admin tier.
const ADMIN_MARKERS: [&str; 2] = ["SYS_ADMIN", "BIZ_ADMIN"];

/// Stock permitted-key sequence shipped with the console.
const STOCK_KEYS: [&str; 6] = ["0", "11", "12", "13", "7", "8"];

/// Access tier resolved from a role marker.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AccessTier {
    /// System or business administrators.
    Admin,
    /// Everyone else, including absent and unrecognized markers.
    Standard,
}

impl AccessTier {
    /// Resolves the tier for a raw marker value.
    ///
    /// Total over all inputs: the known admin markers map to
    /// [`AccessTier::Admin`] and everything else, including a missing or
    /// empty marker, degrades to [`AccessTier::Standard`]. An unknown
    /// marker is not an error; the session simply gets the
    /// least-privileged table.
    pub fn from_marker(marker: Option<&str>) -> Self {
        match marker {
            Some(value) if ADMIN_MARKERS.contains(&value) => AccessTier::Admin,
            _ => AccessTier::Standard,
        }
    }
}

/// Immutable mapping from access tier to permitted-key sequence.
///
/// Fixed once the owning [`AccessStore`] is built. Hosts usually load
/// their own tables from configuration; [`AccessTables::default`] carries
/// the console's stock key set.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AccessTables {
    admin: Vec<String>,
    standard: Vec<String>,
}

impl AccessTables {
    /// Builds tables from explicit key sequences.
    pub fn new(admin: Vec<String>, standard: Vec<String>) -> Self {
        Self { admin, standard }
    }

    /// Returns the key sequence for a tier.
    pub fn keys_for(&self, tier: AccessTier) -> &[String] {
        match tier {
            AccessTier::Admin => &self.admin,
            AccessTier::Standard => &self.standard,
        }
    }
}

impl Default for AccessTables {
    /// Stock console tables. Both tiers currently carry the same key
    /// sequence; deployments that separate the tiers supply their own
    /// tables via [`AccessTables::new`].
    fn default() -> Self {
        let keys: Vec<String> = STOCK_KEYS.iter().map(|key| (*key).to_string()).collect();
        Self {
            admin: keys.clone(),
            standard: keys,
        }
    }
}

/// Permitted-key state for one console session.
///
/// Constructed once per session from the persisted role marker, mutated
/// only through [`set_permitted`](AccessStore::set_permitted), and torn
/// down with the session. The store owns no read or write path to
/// persistent storage; the host's authentication flow owns that key and
/// passes the marker in opaquely.
#[derive(Debug)]
pub struct AccessStore {
    tables: AccessTables,
    permitted: RwLock<Vec<String>>,
}

impl AccessStore {
    /// Initializes a store from the persisted marker and stock tables.
    pub fn from_marker(marker: Option<&str>) -> Self {
        Self::with_tables(marker, AccessTables::default())
    }

    /// Initializes a store from the persisted marker and explicit tables.
    pub fn with_tables(marker: Option<&str>, tables: AccessTables) -> Self {
        let tier = AccessTier::from_marker(marker);
        let permitted = tables.keys_for(tier).to_vec();
        Self {
            tables,
            permitted: RwLock::new(permitted),
        }
    }

    /// Replaces the permitted set unconditionally.
    ///
    /// No validation against the tables is performed; callers may set any
    /// sequence, including an empty one. Checks made after this call
    /// observe the new set.
    pub fn set_permitted(&self, keys: Vec<String>) {
        *self.permitted.write() = keys;
    }

    /// Snapshot of the current permitted-key sequence.
    pub fn permitted(&self) -> Vec<String> {
        self.permitted.read().clone()
    }

    /// Whether the session currently holds `key`.
    pub fn is_permitted(&self, key: &str) -> bool {
        self.permitted.read().iter().any(|held| held == key)
    }

    /// The tables this store was built with.
    pub fn tables(&self) -> &AccessTables {
        &self.tables
    }
}
