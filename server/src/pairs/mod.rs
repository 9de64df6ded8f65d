//! Pair graph and presence broadcast.
//!
//! Pairing is stored as two independent directed edges. Whether a pair is
//! synced, and what each side sees of the other's pause flag, is derived at
//! query time.

pub mod engine;
pub mod store;

use serde::{Deserialize, Serialize};

/// One side's view of a pair, sent in responses and `update_client_pair` events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientPairDto {
    pub other_uid: String,
    /// Vanity alias, empty when there is none
    #[serde(default)]
    pub vanity_uid: String,
    #[serde(default)]
    pub is_paused: bool,
    #[serde(default)]
    pub is_paused_from_others: bool,
    #[serde(default)]
    pub is_synced: bool,
    #[serde(default)]
    pub is_removed: bool,
}
