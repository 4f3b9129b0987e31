use std::fmt;

// J2534 Protocol IDs
pub const PROTOCOL_J1850VPW: u32 = 1;
pub const PROTOCOL_CAN: u32 = 5;
pub const PROTOCOL_ISO15765: u32 = 6;
pub const PROTOCOL_SCI_A_ENGINE: u32 = 7;
pub const PROTOCOL_SCI_A_TRANS: u32 = 8;
pub const PROTOCOL_SCI_B_ENGINE: u32 = 9;
pub const PROTOCOL_SCI_B_TRANS: u32 = 10;

// J2534 Connect Flags
pub const CAN_29BIT_ID: u32 = 0x0100;
pub const CAN_ID_BOTH: u32 = 0x0800;

// J2534 TxFlags
pub const ISO15765_FRAME_PAD: u32 = 0x0040;
pub const ISO15765_CAN_ID_29: u32 = 0x0140;

// J2534 RxStatus values seen on a receive
pub const RX_MSG_RECEIVED: u32 = 0x0000;
pub const RX_START_OF_MESSAGE: u32 = 0x0002;
pub const RX_TX_INDICATION: u32 = 0x0009;
pub const RX_29BIT_MSG_RECEIVED: u32 = CAN_29BIT_ID | RX_MSG_RECEIVED;
pub const RX_29BIT_START_OF_MESSAGE: u32 = CAN_29BIT_ID | RX_START_OF_MESSAGE;
pub const RX_29BIT_TX_INDICATION: u32 = CAN_29BIT_ID | RX_TX_INDICATION;

// J2534 IOCTL IDs
pub const SET_CONFIG: u32 = 0x02;
pub const READ_VBATT: u32 = 0x03;
pub const CLEAR_TX_BUFFER: u32 = 0x07;
pub const CLEAR_RX_BUFFER: u32 = 0x08;

// Config Parameter IDs (SCI timing)
pub const T1_MAX: u32 = 0x1A;
pub const T2_MAX: u32 = 0x1B;
pub const T4_MAX: u32 = 0x1C;
pub const T5_MAX: u32 = 0x1D;

pub const MAX_DATA_SIZE: usize = 4128;

/// Opaque device id returned by PassThruOpen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u32);

/// Opaque channel id returned by PassThruConnect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelHandle(pub u32);

/// Opaque filter id returned by PassThruStartMsgFilter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterHandle(pub u32);

/// J2534 filter types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterType {
    Pass,
    Block,
    FlowControl,
}

impl FilterType {
    pub fn id(self) -> u32 {
        match self {
            Self::Pass => 0x01,
            Self::Block => 0x02,
            Self::FlowControl => 0x03,
        }
    }
}

/// PASSTHRU_MSG structure matching the J2534 04.04 C layout
#[repr(C)]
#[derive(Clone)]
pub struct PassThruMsg {
    pub protocol_id: u32,
    pub rx_status: u32,
    pub tx_flags: u32,
    pub timestamp: u32,
    pub data_size: u32,
    pub extra_data_index: u32,
    pub data: [u8; MAX_DATA_SIZE],
}

impl Default for PassThruMsg {
    fn default() -> Self {
        Self {
            protocol_id: 0,
            rx_status: 0,
            tx_flags: 0,
            timestamp: 0,
            data_size: 0,
            extra_data_index: 0,
            data: [0u8; MAX_DATA_SIZE],
        }
    }
}

impl PassThruMsg {
    /// Build a message from a raw data block. Callers check the size against `MAX_DATA_SIZE`.
    pub fn new(protocol_id: u32, tx_flags: u32, data: &[u8]) -> Self {
        let len = data.len().min(MAX_DATA_SIZE);
        let mut msg = Self {
            protocol_id,
            tx_flags,
            data_size: len as u32,
            ..Default::default()
        };
        msg.data[..len].copy_from_slice(&data[..len]);
        msg
    }

    /// The valid part of the data buffer
    pub fn data(&self) -> &[u8] {
        let len = (self.data_size as usize).min(MAX_DATA_SIZE);
        &self.data[..len]
    }
}

impl fmt::Debug for PassThruMsg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PassThruMsg")
            .field("protocol_id", &self.protocol_id)
            .field("rx_status", &format_args!("0x{:X}", self.rx_status))
            .field("data_size", &self.data_size)
            .field("data", &format_args!("[{}]", hex::encode_upper(self.data())))
            .finish()
    }
}

/// J2534 status codes returned by the vendor library
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum J2534Error {
    #[error("Not supported")]
    NotSupported,
    #[error("Invalid channel ID")]
    InvalidChannelId,
    #[error("Invalid protocol ID")]
    InvalidProtocolId,
    #[error("Null parameter")]
    NullParameter,
    #[error("Invalid IOCTL value")]
    InvalidIoctlValue,
    #[error("Invalid flags")]
    InvalidFlags,
    #[error("Failed")]
    Failed,
    #[error("Device not connected")]
    DeviceNotConnected,
    #[error("Timeout")]
    Timeout,
    #[error("Invalid message")]
    InvalidMsg,
    #[error("Invalid time interval")]
    InvalidTimeInterval,
    #[error("Exceeded limit")]
    ExceededLimit,
    #[error("Invalid message ID")]
    InvalidMsgId,
    #[error("Device in use")]
    DeviceInUse,
    #[error("Invalid IOCTL ID")]
    InvalidIoctlId,
    #[error("Buffer empty")]
    BufferEmpty,
    #[error("Buffer full")]
    BufferFull,
    #[error("Buffer overflow")]
    BufferOverflow,
    #[error("Pin invalid")]
    PinInvalid,
    #[error("Channel in use")]
    ChannelInUse,
    #[error("Message protocol ID mismatch")]
    MsgProtocolId,
    #[error("Invalid filter ID")]
    InvalidFilterId,
    #[error("No flow control")]
    NoFlowControl,
    #[error("Not unique")]
    NotUnique,
    #[error("Invalid baudrate")]
    InvalidBaudrate,
    #[error("Invalid device ID")]
    InvalidDeviceId,
    #[error("Unknown J2534 error (0x{0:02X})")]
    Unknown(u32),
}

impl J2534Error {
    pub fn from_code(code: u32) -> Self {
        match code {
            0x01 => Self::NotSupported,
            0x02 => Self::InvalidChannelId,
            0x03 => Self::InvalidProtocolId,
            0x04 => Self::NullParameter,
            0x05 => Self::InvalidIoctlValue,
            0x06 => Self::InvalidFlags,
            0x07 => Self::Failed,
            0x08 => Self::DeviceNotConnected,
            0x09 => Self::Timeout,
            0x0A => Self::InvalidMsg,
            0x0B => Self::InvalidTimeInterval,
            0x0C => Self::ExceededLimit,
            0x0D => Self::InvalidMsgId,
            0x0E => Self::DeviceInUse,
            0x0F => Self::InvalidIoctlId,
            0x10 => Self::BufferEmpty,
            0x11 => Self::BufferFull,
            0x12 => Self::BufferOverflow,
            0x13 => Self::PinInvalid,
            0x14 => Self::ChannelInUse,
            0x15 => Self::MsgProtocolId,
            0x16 => Self::InvalidFilterId,
            0x17 => Self::NoFlowControl,
            0x18 => Self::NotUnique,
            0x19 => Self::InvalidBaudrate,
            0x1A => Self::InvalidDeviceId,
            other => Self::Unknown(other),
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::NotSupported => 0x01,
            Self::InvalidChannelId => 0x02,
            Self::InvalidProtocolId => 0x03,
            Self::NullParameter => 0x04,
            Self::InvalidIoctlValue => 0x05,
            Self::InvalidFlags => 0x06,
            Self::Failed => 0x07,
            Self::DeviceNotConnected => 0x08,
            Self::Timeout => 0x09,
            Self::InvalidMsg => 0x0A,
            Self::InvalidTimeInterval => 0x0B,
            Self::ExceededLimit => 0x0C,
            Self::InvalidMsgId => 0x0D,
            Self::DeviceInUse => 0x0E,
            Self::InvalidIoctlId => 0x0F,
            Self::BufferEmpty => 0x10,
            Self::BufferFull => 0x11,
            Self::BufferOverflow => 0x12,
            Self::PinInvalid => 0x13,
            Self::ChannelInUse => 0x14,
            Self::MsgProtocolId => 0x15,
            Self::InvalidFilterId => 0x16,
            Self::NoFlowControl => 0x17,
            Self::NotUnique => 0x18,
            Self::InvalidBaudrate => 0x19,
            Self::InvalidDeviceId => 0x1A,
            Self::Unknown(code) => *code,
        }
    }

    /// Map a raw PassThru return value, where zero means success
    pub fn check(code: u32) -> Result<(), Self> {
        if code == 0 {
            Ok(())
        } else {
            Err(Self::from_code(code))
        }
    }
}

/// SCONFIG structure for IOCTL
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SConfig {
    pub parameter: u32,
    pub value: u32,
}

/// SCONFIG_LIST structure for IOCTL
#[repr(C)]
pub struct SConfigList {
    pub num_of_params: u32,
    pub config_ptr: *mut SConfig,
}

/// Version info from a J2534 device
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceVersion {
    pub firmware: String,
    pub dll: String,
    pub api: String,
}
