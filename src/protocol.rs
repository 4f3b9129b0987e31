//! Protocol families and the message framer.
//!
//! CAN and ISO15765 frames carry an address header ahead of the diagnostic
//! bytes. The legacy SCI variants carry the raw byte stream only.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::j2534::types::*;

/// Length of the echoed CAN identifier at the start of every received CAN/ISO15765 frame
pub const RX_HEADER_LEN: usize = 4;

/// Transport protocol of a channel, one variant per supported PassThru protocol id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ProtocolFamily {
    J1850Vpw,
    Can,
    Iso15765,
    SciAEngine,
    SciATrans,
    SciBEngine,
    SciBTrans,
}

/// A protocol id outside the supported set
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unsupported protocol id {0}")]
pub struct UnknownProtocol(pub u32);

impl ProtocolFamily {
    pub const ALL: [ProtocolFamily; 7] = [
        Self::J1850Vpw,
        Self::Can,
        Self::Iso15765,
        Self::SciAEngine,
        Self::SciATrans,
        Self::SciBEngine,
        Self::SciBTrans,
    ];

    pub fn id(self) -> u32 {
        match self {
            Self::J1850Vpw => PROTOCOL_J1850VPW,
            Self::Can => PROTOCOL_CAN,
            Self::Iso15765 => PROTOCOL_ISO15765,
            Self::SciAEngine => PROTOCOL_SCI_A_ENGINE,
            Self::SciATrans => PROTOCOL_SCI_A_TRANS,
            Self::SciBEngine => PROTOCOL_SCI_B_ENGINE,
            Self::SciBTrans => PROTOCOL_SCI_B_TRANS,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::J1850Vpw => "J1850VPW",
            Self::Can => "CAN",
            Self::Iso15765 => "ISO15765",
            Self::SciAEngine => "SCI_A_ENGINE",
            Self::SciATrans => "SCI_A_TRANS",
            Self::SciBEngine => "SCI_B_ENGINE",
            Self::SciBTrans => "SCI_B_TRANS",
        }
    }

    /// SCI A/B, engine or transmission
    pub fn is_legacy_serial(self) -> bool {
        matches!(
            self,
            Self::SciAEngine | Self::SciATrans | Self::SciBEngine | Self::SciBTrans
        )
    }

    /// Frames start with an address header (CAN and ISO15765)
    pub fn is_addressed(self) -> bool {
        matches!(self, Self::Can | Self::Iso15765)
    }

    /// Receive filter installed after connect, if any.
    ///
    /// ISO15765 needs a flow-control target for segmented transfers; the
    /// unsegmented buses take a plain pass filter. Raw CAN is left unfiltered.
    pub fn filter_type(self) -> Option<FilterType> {
        match self {
            Self::Iso15765 => Some(FilterType::FlowControl),
            Self::J1850Vpw
            | Self::SciAEngine
            | Self::SciATrans
            | Self::SciBEngine
            | Self::SciBTrans => Some(FilterType::Pass),
            Self::Can => None,
        }
    }

    /// Bytes of header to strip from a received frame
    pub fn rx_header_len(self) -> usize {
        if self.is_addressed() {
            RX_HEADER_LEN
        } else {
            0
        }
    }
}

impl TryFrom<u32> for ProtocolFamily {
    type Error = UnknownProtocol;

    fn try_from(id: u32) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|p| p.id() == id)
            .ok_or(UnknownProtocol(id))
    }
}

impl From<ProtocolFamily> for u32 {
    fn from(p: ProtocolFamily) -> u32 {
        p.id()
    }
}

impl fmt::Display for ProtocolFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds the {max}-byte PassThru buffer")]
    TooLarge { len: usize, max: usize },
    #[error("invalid hex data: {0}")]
    InvalidHex(String),
    #[error("empty payload")]
    EmptyPayload,
}

/// How the read loop treats a received frame, judged by its RxStatus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxKind {
    /// Start-of-message or TX confirmation, 11- or 29-bit
    Indication,
    /// A complete received message
    Data,
    Other,
}

impl RxKind {
    pub fn classify(rx_status: u32) -> Self {
        match rx_status {
            RX_START_OF_MESSAGE
            | RX_TX_INDICATION
            | RX_29BIT_START_OF_MESSAGE
            | RX_29BIT_TX_INDICATION => Self::Indication,
            RX_MSG_RECEIVED | RX_29BIT_MSG_RECEIVED => Self::Data,
            _ => Self::Other,
        }
    }
}

/// Addresses above 254 go out as four big-endian bytes, anything else as one
pub fn encode_address(address: u32) -> Vec<u8> {
    if address > 254 {
        address.to_be_bytes().to_vec()
    } else {
        vec![address as u8]
    }
}

/// Build a transmit frame: address header (addressed protocols only) followed by `payload`
pub fn build_frame(
    protocol: ProtocolFamily,
    address: u32,
    tx_flags: u32,
    payload: &[u8],
) -> Result<PassThruMsg, FrameError> {
    if payload.is_empty() {
        return Err(FrameError::EmptyPayload);
    }

    let mut data = if protocol.is_addressed() {
        encode_address(address)
    } else {
        Vec::with_capacity(payload.len())
    };
    data.extend_from_slice(payload);

    if data.len() > MAX_DATA_SIZE {
        return Err(FrameError::TooLarge {
            len: data.len(),
            max: MAX_DATA_SIZE,
        });
    }
    Ok(PassThruMsg::new(protocol.id(), tx_flags, &data))
}

/// Diagnostic bytes of a frame we built, i.e. everything after its encoded address
pub fn request_payload(protocol: ProtocolFamily, address: u32, msg: &PassThruMsg) -> &[u8] {
    let header = if protocol.is_addressed() {
        encode_address(address).len()
    } else {
        0
    };
    msg.data().get(header..).unwrap_or(&[])
}

/// Diagnostic bytes of a received frame. Frames shorter than the header decode to nothing.
pub fn response_payload(protocol: ProtocolFamily, msg: &PassThruMsg) -> &[u8] {
    msg.data().get(protocol.rx_header_len()..).unwrap_or(&[])
}

/// Canonical uppercase hex-pair form, no separators
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Parse user hex input; whitespace between pairs is ignored
pub fn parse_hex(input: &str) -> Result<Vec<u8>, FrameError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let compact = compact
        .strip_prefix("0x")
        .or_else(|| compact.strip_prefix("0X"))
        .unwrap_or(compact.as_str());
    hex::decode(compact).map_err(|e| FrameError::InvalidHex(format!("'{}': {}", input, e)))
}
