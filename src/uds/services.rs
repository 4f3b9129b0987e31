use crate::uds::error::TransactionError;
use crate::uds::transaction::TransactionEngine;

/// Extra reads granted to service wrappers on top of the base read loop
pub const SERVICE_RETRY_BUDGET: u32 = 2;

/// Diagnostic session types
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum DiagSession {
    Default = 0x01,
    Programming = 0x02,
    Extended = 0x03,
}

/// Known DID identifiers
pub mod did {
    pub const VIN: u16 = 0xF190;
    pub const SPARE_PART: u16 = 0xF187;
    pub const ECU_SERIAL: u16 = 0xF18C;
    pub const HARDWARE_PART: u16 = 0xF191;
    pub const SOFTWARE_PART: u16 = 0xF188;
    pub const ACTIVE_DIAG_SESSION: u16 = 0xF186;
}

/// ReadEcuIdentification (0x1A) default identifier
pub const ECU_ID_DEFAULT: u8 = 0x87;

// ─── Diagnostic Session Control (0x10) ──────────────────────────────

pub fn diagnostic_session(
    engine: &TransactionEngine,
    session: DiagSession,
) -> Result<Vec<u8>, TransactionError> {
    let request = vec![0x10, session as u8];
    engine.execute(&request, SERVICE_RETRY_BUDGET)
}

// ─── TesterPresent (0x3E) ───────────────────────────────────────────

pub fn tester_present(engine: &TransactionEngine) -> Result<Vec<u8>, TransactionError> {
    let request = vec![0x3E, 0x00];
    engine.execute(&request, 0)
}

/// suppressPosMsgIndicationBit set, nothing is read back
pub fn tester_present_no_response(engine: &TransactionEngine) -> Result<(), TransactionError> {
    let request = vec![0x3E, 0x80];
    engine.transmit_only(&request)
}

// ─── ReadDataByIdentifier (0x22) ────────────────────────────────────

pub fn read_did(engine: &TransactionEngine, did_id: u16) -> Result<Vec<u8>, TransactionError> {
    let request = vec![0x22, (did_id >> 8) as u8, (did_id & 0xFF) as u8];
    let response = engine.execute(&request, SERVICE_RETRY_BUDGET)?;
    // Response: 0x62 DID_HI DID_LO DATA...
    if response.len() < 3 {
        return Err(TransactionError::InvalidResponse(
            "ReadDID response too short".into(),
        ));
    }
    if response[1..3] != request[1..3] {
        return Err(TransactionError::InvalidResponse(format!(
            "ReadDID answered 0x{:02X}{:02X}, asked 0x{:04X}",
            response[1], response[2], did_id
        )));
    }
    Ok(response)
}

/// Read a DID and return just the data portion (after service ID + DID bytes)
pub fn read_did_data(engine: &TransactionEngine, did_id: u16) -> Result<Vec<u8>, TransactionError> {
    let response = read_did(engine, did_id)?;
    Ok(response[3..].to_vec())
}

pub fn read_vin(engine: &TransactionEngine) -> Result<String, TransactionError> {
    let data = read_did_data(engine, did::VIN)?;
    Ok(String::from_utf8_lossy(&data).trim().to_string())
}

// ─── ReadEcuIdentification (0x1A) ───────────────────────────────────

/// Returns the identification data without the `5A xx` header
pub fn read_ecu_id(engine: &TransactionEngine, identifier: u8) -> Result<Vec<u8>, TransactionError> {
    let request = vec![0x1A, identifier];
    let response = engine.execute(&request, SERVICE_RETRY_BUDGET)?;
    if response.len() < 2 {
        return Err(TransactionError::InvalidResponse(
            "ReadEcuIdentification response too short".into(),
        ));
    }
    Ok(response[2..].to_vec())
}

// ─── Diagnostic Trouble Codes (0x14 / 0x19) ─────────────────────────

/// One entry of a reportDTCByStatusMask answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct DtcRecord {
    /// Two-byte DTC number
    pub code: u16,
    pub status: u8,
}

impl DtcRecord {
    /// SAE J2012 form, e.g. `P0123` or `U0100`
    pub fn display_code(&self) -> String {
        let [high, low] = self.code.to_be_bytes();
        let system = match high >> 6 {
            0 => 'P',
            1 => 'C',
            2 => 'B',
            _ => 'U',
        };
        format!(
            "{}{:01X}{:01X}{:02X}",
            system,
            (high >> 4) & 0x03,
            high & 0x0F,
            low
        )
    }
}

/// DTC_HI DTC_LO STATUS
const DTC_RECORD_LEN: usize = 3;

/// ReadDTCInformation, sub-function reportDTCByStatusMask
pub fn read_dtcs(engine: &TransactionEngine, status_mask: u8) -> Result<Vec<DtcRecord>, TransactionError> {
    let request = vec![0x19, 0x02, status_mask];
    let response = engine.execute(&request, SERVICE_RETRY_BUDGET)?;
    // Response: 0x59 0x02 AVAILABILITY_MASK (DTC_HI DTC_LO STATUS)*
    if response.len() < 3 {
        return Err(TransactionError::InvalidResponse(
            "ReadDTCInformation response too short".into(),
        ));
    }

    let records = &response[3..];
    if records.len() % DTC_RECORD_LEN != 0 {
        log::warn!(
            "Ignoring {} trailing DTC byte(s)",
            records.len() % DTC_RECORD_LEN
        );
    }
    Ok(records
        .chunks_exact(DTC_RECORD_LEN)
        .map(|r| DtcRecord {
            code: u16::from_be_bytes([r[0], r[1]]),
            status: r[2],
        })
        .collect())
}

/// ClearDiagnosticInformation for all groups
pub fn clear_dtcs(engine: &TransactionEngine) -> Result<(), TransactionError> {
    let request = vec![0x14, 0xFF, 0xFF, 0xFF];
    engine.execute(&request, SERVICE_RETRY_BUDGET)?;
    Ok(())
}

// ─── SecurityAccess (0x27) ──────────────────────────────────────────

/// Request security seed from ECU. Returns the seed bytes only.
pub fn security_request_seed(engine: &TransactionEngine, level: u8) -> Result<Vec<u8>, TransactionError> {
    let request = vec![0x27, level];
    let response = engine.execute(&request, SERVICE_RETRY_BUDGET)?;
    // Response: 0x67 LEVEL SEED[0..N]
    if response.len() < 2 {
        return Err(TransactionError::InvalidResponse(
            "SecurityAccess seed response too short".into(),
        ));
    }
    Ok(response[2..].to_vec())
}

/// Send the key for the seed requested at `level` (sent as `level + 1`)
pub fn security_send_key(engine: &TransactionEngine, level: u8, key: &[u8]) -> Result<(), TransactionError> {
    let mut request = vec![0x27, level.wrapping_add(1)];
    request.extend_from_slice(key);
    engine.execute(&request, SERVICE_RETRY_BUDGET)?;
    Ok(())
}

// ─── ECUReset (0x11) ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum ResetType {
    HardReset = 0x01,
    KeyOffOnReset = 0x02,
    SoftReset = 0x03,
}

pub fn ecu_reset(engine: &TransactionEngine, reset_type: ResetType) -> Result<Vec<u8>, TransactionError> {
    let request = vec![0x11, reset_type as u8];
    engine.execute(&request, SERVICE_RETRY_BUDGET)
}
