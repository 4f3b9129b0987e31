//! Connection profiles: everything needed to reach one ECU on one bus.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::j2534::types::{SConfig, CAN_ID_BOTH, ISO15765_CAN_ID_29, ISO15765_FRAME_PAD};
use crate::j2534::types::{T1_MAX, T2_MAX, T4_MAX, T5_MAX};
use crate::protocol::ProtocolFamily;

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("unknown connection profile '{0}'")]
    UnknownProfile(String),
    #[error("invalid profile table: {0}")]
    Json(#[from] serde_json::Error),
    #[error("cannot read profile table: {0}")]
    Io(#[from] std::io::Error),
}

/// Static per-ECU channel configuration. Connect flags and transmit flags are
/// independent fields even where they both carry the 29-bit bits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProfile {
    pub name: String,
    pub protocol: ProtocolFamily,
    /// Write timeout handed to PassThruWriteMsgs
    pub tx_delay_ms: u32,
    /// Per-read timeout handed to PassThruReadMsgs
    pub rx_timeout_ms: u32,
    pub tx_id: u32,
    pub rx_id: u32,
    pub mask: u32,
    pub connect_flags: u32,
    pub tx_flags: u32,
    pub baud_rate: u32,
    /// Probe that a matching ECU answers positively
    pub comm_check: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t1_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t2_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t4_max: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t5_max: Option<u32>,
}

impl ConnectionProfile {
    /// ISO15765 profile with the usual padding, 500 ms receive timeout and a
    /// TesterPresent probe unless one is given.
    pub fn custom_can(
        name: impl Into<String>,
        tx_id: u32,
        rx_id: u32,
        baud_rate: u32,
        extended_ids: bool,
        comm_check: Option<Vec<u8>>,
    ) -> Self {
        let (connect_flags, tx_flags) = if extended_ids {
            (CAN_ID_BOTH, ISO15765_CAN_ID_29)
        } else {
            (0, ISO15765_FRAME_PAD)
        };
        Self {
            name: name.into(),
            protocol: ProtocolFamily::Iso15765,
            tx_delay_ms: 0,
            rx_timeout_ms: 500,
            tx_id,
            rx_id,
            mask: 0xFFFF_FFFF,
            connect_flags,
            tx_flags,
            baud_rate,
            comm_check: comm_check.unwrap_or_else(|| vec![0x3E, 0x00]),
            t1_max: None,
            t2_max: None,
            t4_max: None,
            t5_max: None,
        }
    }

    /// SET_CONFIG entries for the timing maxima that are set, in T1, T2, T4, T5 order
    pub fn timing_params(&self) -> Vec<SConfig> {
        [
            (T1_MAX, self.t1_max),
            (T2_MAX, self.t2_max),
            (T4_MAX, self.t4_max),
            (T5_MAX, self.t5_max),
        ]
        .into_iter()
        .filter_map(|(parameter, value)| value.map(|value| SConfig { parameter, value }))
        .collect()
    }
}

/// One row of a JSON profile table
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProfileEntry {
    key: String,
    #[serde(flatten)]
    profile: ConnectionProfile,
}

/// Profiles keyed by short identifiers, kept in declaration order
#[derive(Debug, Clone, Default)]
pub struct ProfileTable {
    entries: Vec<(String, ConnectionProfile)>,
}

/// Number of leading built-in profiles tried by auto-connect: the CAN
/// profiles followed by SCI A and SCI B engine.
const AUTO_CONNECT_CANDIDATES: usize = 7;

impl ProfileTable {
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for (key, profile) in builtin_profiles() {
            table.insert(key, profile);
        }
        table
    }

    /// Load a JSON array of `{ "key": ..., <profile fields> }` rows
    pub fn from_json_str(json: &str) -> Result<Self, ProfileError> {
        let rows: Vec<ProfileEntry> = serde_json::from_str(json)?;
        let mut table = Self::default();
        for row in rows {
            table.insert(row.key, row.profile);
        }
        Ok(table)
    }

    pub fn from_path(path: &Path) -> Result<Self, ProfileError> {
        let json = std::fs::read_to_string(path)?;
        let table = Self::from_json_str(&json)?;
        log::info!(
            "Loaded {} connection profile(s) from {}",
            table.len(),
            path.display()
        );
        Ok(table)
    }

    /// Add or replace a profile. A replaced profile keeps its position.
    pub fn insert(&mut self, key: impl Into<String>, profile: ConnectionProfile) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => *existing = profile,
            None => self.entries.push((key, profile)),
        }
    }

    /// Merge `other` into this table, later entries overriding by key
    pub fn extend(&mut self, other: ProfileTable) {
        for (key, profile) in other.entries {
            self.insert(key, profile);
        }
    }

    pub fn get(&self, key: &str) -> Result<&ConnectionProfile, ProfileError> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, p)| p)
            .ok_or_else(|| ProfileError::UnknownProfile(key.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ConnectionProfile)> {
        self.entries.iter().map(|(k, p)| (k.as_str(), p))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Leading profiles in declaration order, as auto-connect walks them
    pub fn auto_connect_candidates(&self) -> Vec<(&str, &ConnectionProfile)> {
        self.iter().take(AUTO_CONNECT_CANDIDATES).collect()
    }
}

fn iso15765(name: &str, tx_id: u32, rx_id: u32, comm_check: &[u8]) -> ConnectionProfile {
    ConnectionProfile::custom_can(name, tx_id, rx_id, 500_000, false, Some(comm_check.to_vec()))
}

fn iso15765_29bit(name: &str, tx_id: u32, rx_id: u32, comm_check: &[u8]) -> ConnectionProfile {
    ConnectionProfile::custom_can(name, tx_id, rx_id, 500_000, true, Some(comm_check.to_vec()))
}

/// SCI at 7812.5 baud, 500 ms write / 1000 ms read
fn sci(
    name: &str,
    protocol: ProtocolFamily,
    comm_check: &[u8],
    timings: [Option<u32>; 4],
) -> ConnectionProfile {
    let [t1_max, t2_max, t4_max, t5_max] = timings;
    ConnectionProfile {
        name: name.to_string(),
        protocol,
        tx_delay_ms: 500,
        rx_timeout_ms: 1000,
        tx_id: 0,
        rx_id: 0,
        mask: 0,
        connect_flags: 0,
        tx_flags: 0,
        baud_rate: 7813,
        comm_check: comm_check.to_vec(),
        t1_max,
        t2_max,
        t4_max,
        t5_max,
    }
}

fn builtin_profiles() -> Vec<(&'static str, ConnectionProfile)> {
    use ProtocolFamily::*;

    let read_ecu_id = [0x1A, 0x87];
    let read_vin = [0x22, 0xF1, 0x90];
    let obd_pids = [0x01, 0x00];

    let mut obd2_250k = iso15765("OBD-II CAN 250kbps", 0x7DF, 0x7E8, &obd_pids);
    obd2_250k.baud_rate = 250_000;

    vec![
        // CAN
        ("chrys1", iso15765("CHRYSLER ECU CAN 11-BIT", 0x7E0, 0x7E8, &read_ecu_id)),
        (
            "chrys2",
            iso15765_29bit("CHRYSLER ECU CAN 29-BIT", 0x18DA10F1, 0x18DAF110, &read_ecu_id),
        ),
        ("chrys6", iso15765("CHRYSLER TIPM", 0x620, 0x504, &read_ecu_id)),
        ("chrys7", iso15765("CHRYSLER BCM", 0x620, 0x504, &read_vin)),
        ("chrys10", iso15765("CHRYSLER TRANS CAN 11-BIT", 0x7E1, 0x7E9, &read_ecu_id)),
        // SCI
        (
            "chrys3",
            sci("CHRYSLER ECU SCI A ENGINE", SciAEngine, &[0x2A, 0x0F], [None, None, Some(200), None]),
        ),
        (
            "chrys4",
            sci(
                "CHRYSLER ECU SCI B ENGINE",
                SciBEngine,
                &[0x22, 0x20, 0x07, 0x49],
                [Some(75), Some(5), Some(50), Some(1)],
            ),
        ),
        (
            "chrys5",
            sci(
                "CHRYSLER ECU SCI B CUMMINS",
                SciBEngine,
                &[0x2A, 0x0F],
                [Some(75), Some(50), Some(50), Some(10)],
            ),
        ),
        (
            "chrys8",
            sci(
                "CHRYSLER ECU SCI B TRANS",
                SciBTrans,
                &obd_pids,
                [Some(75), Some(5), Some(50), Some(1)],
            ),
        ),
        ("chrys9", sci("CHRYSLER ECU SCI A TRANS", SciATrans, &[0x2A, 0x0F], [None; 4])),
        // OBD-II
        ("obd2_can_11bit", iso15765("OBD-II Standard CAN 11-bit", 0x7DF, 0x7E8, &obd_pids)),
        (
            "obd2_can_29bit",
            iso15765_29bit("OBD-II Extended CAN 29-bit", 0x18DB33F1, 0x18DAF110, &obd_pids),
        ),
        ("obd2_can_250k", obd2_250k),
    ]
}
