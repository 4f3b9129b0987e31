use std::fmt;

use crate::j2534::types::J2534Error;
use crate::protocol::{FrameError, ProtocolFamily};
use crate::session::SessionError;

/// UDS Negative Response Codes (ISO 14229)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegativeResponseCode {
    GeneralReject,                               // 0x10
    ServiceNotSupported,                         // 0x11
    SubFunctionNotSupported,                     // 0x12
    IncorrectMessageLengthOrInvalidFormat,       // 0x13
    ResponseTooLong,                             // 0x14
    BusyRepeatRequest,                           // 0x21
    ConditionsNotCorrect,                        // 0x22
    RequestSequenceError,                        // 0x24
    NoResponseFromSubnetComponent,               // 0x25
    FailurePreventsExecutionOfRequestedAction,   // 0x26
    RequestOutOfRange,                           // 0x31
    SecurityAccessDenied,                        // 0x33
    AuthenticationRequired,                      // 0x34
    InvalidKey,                                  // 0x35
    ExceededNumberOfAttempts,                    // 0x36
    RequiredTimeDelayNotExpired,                 // 0x37
    SecureDataTransmissionRequired,              // 0x38
    SecureDataTransmissionNotAllowed,            // 0x39
    SecureDataVerificationFailed,                // 0x3A
    DownloadNotAccepted,                         // 0x40
    UploadNotAccepted,                           // 0x50
    UploadDownloadNotAccepted,                   // 0x70
    TransferDataSuspended,                       // 0x71
    GeneralProgrammingFailure,                   // 0x72
    WrongBlockSequenceCounter,                   // 0x73
    RequestCorrectlyReceivedResponsePending,     // 0x78
    SubFunctionNotSupportedInActiveSession,      // 0x7E
    ServiceNotSupportedInActiveSession,          // 0x7F
    ServiceNotSupportedInActiveDiagnosticMode,   // 0x80
    VoltageTooHigh,                              // 0x92
    VoltageTooLow,                               // 0x93
    DataDecompressionFailed,                     // 0x9A
    DataDecryptionFailed,                        // 0x9B
    EcuNotResponding,                            // 0xA0
    EcuAddressUnknown,                           // 0xA1
    RevokedKey,                                  // 0xFA
    ExpiredKey,                                  // 0xFB
    Unknown(u8),
}

impl NegativeResponseCode {
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0x10 => Self::GeneralReject,
            0x11 => Self::ServiceNotSupported,
            0x12 => Self::SubFunctionNotSupported,
            0x13 => Self::IncorrectMessageLengthOrInvalidFormat,
            0x14 => Self::ResponseTooLong,
            0x21 => Self::BusyRepeatRequest,
            0x22 => Self::ConditionsNotCorrect,
            0x24 => Self::RequestSequenceError,
            0x25 => Self::NoResponseFromSubnetComponent,
            0x26 => Self::FailurePreventsExecutionOfRequestedAction,
            0x31 => Self::RequestOutOfRange,
            0x33 => Self::SecurityAccessDenied,
            0x34 => Self::AuthenticationRequired,
            0x35 => Self::InvalidKey,
            0x36 => Self::ExceededNumberOfAttempts,
            0x37 => Self::RequiredTimeDelayNotExpired,
            0x38 => Self::SecureDataTransmissionRequired,
            0x39 => Self::SecureDataTransmissionNotAllowed,
            0x3A => Self::SecureDataVerificationFailed,
            0x40 => Self::DownloadNotAccepted,
            0x50 => Self::UploadNotAccepted,
            0x70 => Self::UploadDownloadNotAccepted,
            0x71 => Self::TransferDataSuspended,
            0x72 => Self::GeneralProgrammingFailure,
            0x73 => Self::WrongBlockSequenceCounter,
            0x78 => Self::RequestCorrectlyReceivedResponsePending,
            0x7E => Self::SubFunctionNotSupportedInActiveSession,
            0x7F => Self::ServiceNotSupportedInActiveSession,
            0x80 => Self::ServiceNotSupportedInActiveDiagnosticMode,
            0x92 => Self::VoltageTooHigh,
            0x93 => Self::VoltageTooLow,
            0x9A => Self::DataDecompressionFailed,
            0x9B => Self::DataDecryptionFailed,
            0xA0 => Self::EcuNotResponding,
            0xA1 => Self::EcuAddressUnknown,
            0xFA => Self::RevokedKey,
            0xFB => Self::ExpiredKey,
            other => Self::Unknown(other),
        }
    }

    pub fn to_byte(&self) -> u8 {
        match self {
            Self::GeneralReject => 0x10,
            Self::ServiceNotSupported => 0x11,
            Self::SubFunctionNotSupported => 0x12,
            Self::IncorrectMessageLengthOrInvalidFormat => 0x13,
            Self::ResponseTooLong => 0x14,
            Self::BusyRepeatRequest => 0x21,
            Self::ConditionsNotCorrect => 0x22,
            Self::RequestSequenceError => 0x24,
            Self::NoResponseFromSubnetComponent => 0x25,
            Self::FailurePreventsExecutionOfRequestedAction => 0x26,
            Self::RequestOutOfRange => 0x31,
            Self::SecurityAccessDenied => 0x33,
            Self::AuthenticationRequired => 0x34,
            Self::InvalidKey => 0x35,
            Self::ExceededNumberOfAttempts => 0x36,
            Self::RequiredTimeDelayNotExpired => 0x37,
            Self::SecureDataTransmissionRequired => 0x38,
            Self::SecureDataTransmissionNotAllowed => 0x39,
            Self::SecureDataVerificationFailed => 0x3A,
            Self::DownloadNotAccepted => 0x40,
            Self::UploadNotAccepted => 0x50,
            Self::UploadDownloadNotAccepted => 0x70,
            Self::TransferDataSuspended => 0x71,
            Self::GeneralProgrammingFailure => 0x72,
            Self::WrongBlockSequenceCounter => 0x73,
            Self::RequestCorrectlyReceivedResponsePending => 0x78,
            Self::SubFunctionNotSupportedInActiveSession => 0x7E,
            Self::ServiceNotSupportedInActiveSession => 0x7F,
            Self::ServiceNotSupportedInActiveDiagnosticMode => 0x80,
            Self::VoltageTooHigh => 0x92,
            Self::VoltageTooLow => 0x93,
            Self::DataDecompressionFailed => 0x9A,
            Self::DataDecryptionFailed => 0x9B,
            Self::EcuNotResponding => 0xA0,
            Self::EcuAddressUnknown => 0xA1,
            Self::RevokedKey => 0xFA,
            Self::ExpiredKey => 0xFB,
            Self::Unknown(code) => *code,
        }
    }

    /// Human-readable text from the NRC table
    pub fn description(&self) -> String {
        let text = match self {
            Self::GeneralReject => "General Reject",
            Self::ServiceNotSupported => "Service Not Supported",
            Self::SubFunctionNotSupported => "Sub-Function Not Supported / Invalid Format",
            Self::IncorrectMessageLengthOrInvalidFormat => {
                "Incorrect Message Length or Invalid Format"
            }
            Self::ResponseTooLong => "Response Too Long",
            Self::BusyRepeatRequest => "Busy - Repeat Request",
            Self::ConditionsNotCorrect => "Conditions Not Correct",
            Self::RequestSequenceError => "Request Sequence Error",
            Self::NoResponseFromSubnetComponent => "No Response From Subnet Component",
            Self::FailurePreventsExecutionOfRequestedAction => {
                "Failure Prevents Execution of Requested Action"
            }
            Self::RequestOutOfRange => "Request Out Of Range",
            Self::SecurityAccessDenied => "Security Access Denied",
            Self::AuthenticationRequired => "Authentication Required",
            Self::InvalidKey => "Invalid Key",
            Self::ExceededNumberOfAttempts => "Exceeded Number of Attempts",
            Self::RequiredTimeDelayNotExpired => "Required Time Delay Not Expired",
            Self::SecureDataTransmissionRequired => "Secure Data Transmission Required",
            Self::SecureDataTransmissionNotAllowed => "Secure Data Transmission Not Allowed",
            Self::SecureDataVerificationFailed => "Secure Data Verification Failed",
            Self::DownloadNotAccepted => "Download Not Accepted",
            Self::UploadNotAccepted => "Upload Not Accepted",
            Self::UploadDownloadNotAccepted => "Upload/Download Not Accepted",
            Self::TransferDataSuspended => "Transfer Data Suspended",
            Self::GeneralProgrammingFailure => "General Programming Failure",
            Self::WrongBlockSequenceCounter => "Wrong Block Sequence Counter",
            Self::RequestCorrectlyReceivedResponsePending => {
                "Request Correctly Received - Response Pending"
            }
            Self::SubFunctionNotSupportedInActiveSession => {
                "Sub-Function Not Supported In Active Session"
            }
            Self::ServiceNotSupportedInActiveSession => "Service Not Supported In Active Session",
            Self::ServiceNotSupportedInActiveDiagnosticMode => {
                "Service Not Supported In Active Diagnostic Mode"
            }
            Self::VoltageTooHigh => "Voltage Too High",
            Self::VoltageTooLow => "Voltage Too Low",
            Self::DataDecompressionFailed => "Data Decompression Failed",
            Self::DataDecryptionFailed => "Data Decryption Failed",
            Self::EcuNotResponding => "ECU Not Responding",
            Self::EcuAddressUnknown => "ECU Address Unknown",
            Self::RevokedKey => "Revoked Key",
            Self::ExpiredKey => "Expired Key",
            Self::Unknown(code) => return format!("Unknown NRC: 0x{:02X}", code),
        };
        text.to_string()
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::RequestCorrectlyReceivedResponsePending)
    }
}

impl fmt::Display for NegativeResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(_) => f.write_str(&self.description()),
            _ => write!(f, "{} (0x{:02X})", self.description(), self.to_byte()),
        }
    }
}

/// Failure of one request/response exchange
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("Response timeout")]
    Timeout,
    #[error("Receive buffer empty")]
    BufferEmpty,
    #[error("Negative response for service 0x{service_id:02X}: {nrc}")]
    NegativeResponse {
        service_id: u8,
        nrc: NegativeResponseCode,
    },
    #[error("{operation} failed: {source}")]
    Protocol {
        operation: &'static str,
        source: J2534Error,
    },
    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] FrameError),
    #[error("Not connected to ECU")]
    NotConnected,
    #[error("Transactions are not supported on {0}")]
    UnsupportedProtocol(ProtocolFamily),
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl TransactionError {
    /// NRC carried by a negative response
    pub fn nrc(&self) -> Option<NegativeResponseCode> {
        match self {
            Self::NegativeResponse { nrc, .. } => Some(*nrc),
            _ => None,
        }
    }
}

impl From<SessionError> for TransactionError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Binding { operation, source } => Self::Protocol { operation, source },
            _ => Self::NotConnected,
        }
    }
}
