//! Transaction Engine: one request, one decisive response.
//!
//! CAN/ISO15765 exchanges write the request and then read at most
//! `3 + retry_budget` frames. Indications are skipped, NRC 0x78 keeps the
//! loop going, any other NRC or the matching positive response ends it.
//! Legacy serial exchanges write once and read once.

use crate::j2534::types::{J2534Error, PassThruMsg};
use crate::profiles::ConnectionProfile;
use crate::protocol::{build_frame, response_payload, to_hex, FrameError, ProtocolFamily, RxKind};
use crate::session::{ChannelSession, SessionError};
use crate::uds::error::{NegativeResponseCode, TransactionError};

/// Reads every CAN exchange gets before the caller's retry budget
pub const BASE_READ_ITERATIONS: u32 = 3;

const NEGATIVE_RESPONSE_SID: u8 = 0x7F;
const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Log entry direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum LogDirection {
    Tx,
    Rx,
    Error,
    Pending,
}

impl std::fmt::Display for LogDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogDirection::Tx => write!(f, "TX"),
            LogDirection::Rx => write!(f, "RX"),
            LogDirection::Error => write!(f, "ERR"),
            LogDirection::Pending => write!(f, "..."),
        }
    }
}

/// One line of diagnostic traffic
#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    pub direction: LogDirection,
    pub data_hex: String,
    pub timestamp: String,
    pub description: String,
}

/// Callback type for logging diagnostic traffic
pub type LogCallback = Box<dyn Fn(LogEntry) + Send + Sync>;

/// Runs request/response exchanges over the channel of a connected session.
pub struct TransactionEngine<'s> {
    session: &'s ChannelSession,
    log_callback: Option<LogCallback>,
}

impl<'s> TransactionEngine<'s> {
    pub fn new(session: &'s ChannelSession) -> Self {
        Self {
            session,
            log_callback: None,
        }
    }

    pub fn set_log_callback(&mut self, callback: LogCallback) {
        self.log_callback = Some(callback);
    }

    pub fn session(&self) -> &ChannelSession {
        self.session
    }

    fn log(&self, direction: LogDirection, data: &[u8], description: &str) {
        let data_hex = to_hex(data);
        log::debug!("{} [{}] {}", direction, data_hex, description);
        if let Some(ref cb) = self.log_callback {
            cb(LogEntry {
                direction,
                data_hex,
                timestamp: chrono::Local::now().format("%H:%M:%S%.3f").to_string(),
                description: description.to_string(),
            });
        }
    }

    fn profile(&self) -> Result<&ConnectionProfile, TransactionError> {
        self.session
            .active_profile()
            .ok_or(TransactionError::NotConnected)
    }

    /// Send `request` and wait for its response using the profile's receive timeout.
    ///
    /// Returns the response from the service byte on.
    pub fn execute(&self, request: &[u8], retry_budget: u32) -> Result<Vec<u8>, TransactionError> {
        let rx_timeout_ms = self.profile()?.rx_timeout_ms;
        self.execute_with_timeout(request, retry_budget, rx_timeout_ms)
    }

    /// [`execute`](Self::execute) with a per-read timeout override
    pub fn execute_with_timeout(
        &self,
        request: &[u8],
        retry_budget: u32,
        rx_timeout_ms: u32,
    ) -> Result<Vec<u8>, TransactionError> {
        let profile = self.profile()?;
        match profile.protocol {
            ProtocolFamily::Can | ProtocolFamily::Iso15765 => {
                self.transmit(profile, request)?;
                self.read_loop(profile.protocol, request[0], retry_budget, rx_timeout_ms)
            }
            p if p.is_legacy_serial() => self.serial_exchange(profile, request, rx_timeout_ms),
            p => Err(TransactionError::UnsupportedProtocol(p)),
        }
    }

    /// Write without waiting for an answer (e.g. suppressed TesterPresent).
    ///
    /// SCI is half-duplex, so there the full exchange runs and its answer is dropped.
    pub fn transmit_only(&self, request: &[u8]) -> Result<(), TransactionError> {
        let profile = self.profile()?;
        match profile.protocol {
            ProtocolFamily::Can | ProtocolFamily::Iso15765 => self.transmit(profile, request),
            p if p.is_legacy_serial() => self
                .serial_exchange(profile, request, profile.rx_timeout_ms)
                .map(|_| ()),
            p => Err(TransactionError::UnsupportedProtocol(p)),
        }
    }

    /// Run the read loop for an earlier `request` without sending anything.
    ///
    /// SCI cannot listen without asking, so there `request` is sent again.
    pub fn receive_only(
        &self,
        request: &[u8],
        retry_budget: u32,
    ) -> Result<Vec<u8>, TransactionError> {
        let profile = self.profile()?;
        let service_id = *request
            .first()
            .ok_or(TransactionError::InvalidRequest(FrameError::EmptyPayload))?;
        match profile.protocol {
            ProtocolFamily::Can | ProtocolFamily::Iso15765 => {
                self.read_loop(profile.protocol, service_id, retry_budget, profile.rx_timeout_ms)
            }
            p if p.is_legacy_serial() => {
                self.serial_exchange(profile, request, profile.rx_timeout_ms)
            }
            p => Err(TransactionError::UnsupportedProtocol(p)),
        }
    }

    fn transmit(&self, profile: &ConnectionProfile, request: &[u8]) -> Result<(), TransactionError> {
        let frame = build_frame(profile.protocol, profile.tx_id, profile.tx_flags, request)?;
        self.log(LogDirection::Tx, request, &describe_service(request[0]));
        self.write(&frame, profile.tx_delay_ms)
    }

    fn write(&self, frame: &PassThruMsg, timeout_ms: u32) -> Result<(), TransactionError> {
        self.session.write_frame(frame, timeout_ms).map_err(|e| {
            self.log(LogDirection::Error, &[], &e.to_string());
            TransactionError::from(e)
        })
    }

    fn read_loop(
        &self,
        protocol: ProtocolFamily,
        service_id: u8,
        retry_budget: u32,
        rx_timeout_ms: u32,
    ) -> Result<Vec<u8>, TransactionError> {
        let expected = service_id.wrapping_add(POSITIVE_RESPONSE_OFFSET);
        let iterations = BASE_READ_ITERATIONS.saturating_add(retry_budget);

        for attempt in 1..=iterations {
            let frame = match self.session.read_frame(rx_timeout_ms) {
                Ok(frame) => frame,
                Err(e) => match e.j2534() {
                    Some(J2534Error::BufferEmpty) => {
                        self.log(LogDirection::Error, &[], "Receive buffer empty");
                        return Err(TransactionError::BufferEmpty);
                    }
                    Some(J2534Error::Timeout) => {
                        log::trace!("Read {}/{} timed out", attempt, iterations);
                        continue;
                    }
                    _ => {
                        self.log(LogDirection::Error, &[], &e.to_string());
                        return Err(e.into());
                    }
                },
            };

            match RxKind::classify(frame.rx_status) {
                RxKind::Data => {}
                kind => {
                    log::trace!(
                        "Read {}/{}: skipping {:?} frame (RxStatus 0x{:X})",
                        attempt,
                        iterations,
                        kind,
                        frame.rx_status
                    );
                    continue;
                }
            }

            let payload = response_payload(protocol, &frame);
            match payload {
                [NEGATIVE_RESPONSE_SID, rejected, code, ..] => {
                    let nrc = NegativeResponseCode::from_byte(*code);
                    if nrc.is_pending() {
                        self.log(LogDirection::Pending, payload, "Response pending...");
                        continue;
                    }
                    self.log(LogDirection::Error, payload, &format!("NRC: {}", nrc));
                    return Err(TransactionError::NegativeResponse {
                        service_id: *rejected,
                        nrc,
                    });
                }
                [NEGATIVE_RESPONSE_SID, ..] => {
                    self.log(LogDirection::Error, payload, "Truncated negative response");
                    return Err(TransactionError::InvalidResponse(format!(
                        "negative response without NRC: {}",
                        to_hex(payload)
                    )));
                }
                [first, ..] if *first == expected => {
                    self.log(LogDirection::Rx, payload, &describe_service(service_id));
                    return Ok(payload.to_vec());
                }
                _ => {
                    self.log(
                        LogDirection::Error,
                        payload,
                        &format!("Unexpected response: expected 0x{:02X}", expected),
                    );
                }
            }
        }

        self.log(
            LogDirection::Error,
            &[],
            &format!("No decisive response after {} reads", iterations),
        );
        Err(TransactionError::Timeout)
    }

    /// Legacy serial: one write, one read, anything longer than a byte is an answer
    fn serial_exchange(
        &self,
        profile: &ConnectionProfile,
        request: &[u8],
        rx_timeout_ms: u32,
    ) -> Result<Vec<u8>, TransactionError> {
        self.transmit(profile, request)?;

        let frame = match self.session.read_frame(rx_timeout_ms) {
            Ok(frame) => frame,
            Err(e) => {
                self.log(LogDirection::Error, &[], &e.to_string());
                return Err(serial_read_error(e));
            }
        };
        let payload = response_payload(profile.protocol, &frame);
        if payload.len() > 1 {
            self.log(LogDirection::Rx, payload, &describe_service(request[0]));
            Ok(payload.to_vec())
        } else {
            self.log(LogDirection::Error, payload, "No response");
            Err(TransactionError::Timeout)
        }
    }
}

fn serial_read_error(e: SessionError) -> TransactionError {
    match e.j2534() {
        Some(J2534Error::BufferEmpty) => TransactionError::BufferEmpty,
        Some(J2534Error::Timeout) => TransactionError::Timeout,
        _ => e.into(),
    }
}

fn describe_service(service_id: u8) -> String {
    match service_id {
        0x01 => "OBD ShowCurrentData".to_string(),
        0x10 => "DiagnosticSessionControl".to_string(),
        0x11 => "ECUReset".to_string(),
        0x14 => "ClearDiagnosticInformation".to_string(),
        0x19 => "ReadDTCInformation".to_string(),
        0x1A => "ReadEcuIdentification".to_string(),
        0x22 => "ReadDataByIdentifier".to_string(),
        0x27 => "SecurityAccess".to_string(),
        0x2A => "ReadDataByPeriodicIdentifier".to_string(),
        0x2E => "WriteDataByIdentifier".to_string(),
        0x31 => "RoutineControl".to_string(),
        0x3E => "TesterPresent".to_string(),
        _ => format!("Service 0x{:02X}", service_id),
    }
}
