pub mod device;
pub mod dll;
#[cfg(test)]
pub mod mock;
pub mod registry;
pub mod types;

use std::path::PathBuf;

use registry::DeviceInfo;
use types::{
    ChannelHandle, DeviceHandle, DeviceVersion, FilterHandle, FilterType, J2534Error, PassThruMsg,
    SConfig,
};

/// The PassThru entry points of one loaded vendor library.
///
/// Every call maps one-to-one onto a `PassThru*` export. Implementations only
/// translate handles and status codes; sequencing rules live in the session.
pub trait PassThruApi: Send {
    fn open(&self) -> Result<DeviceHandle, J2534Error>;
    fn close(&self, device: DeviceHandle) -> Result<(), J2534Error>;

    fn connect(
        &self,
        device: DeviceHandle,
        protocol_id: u32,
        flags: u32,
        baud_rate: u32,
    ) -> Result<ChannelHandle, J2534Error>;
    fn disconnect(&self, channel: ChannelHandle) -> Result<(), J2534Error>;

    /// Read at most one message. An empty queue is reported as `BufferEmpty`.
    fn read(&self, channel: ChannelHandle, timeout_ms: u32) -> Result<PassThruMsg, J2534Error>;
    fn write(
        &self,
        channel: ChannelHandle,
        msg: &PassThruMsg,
        timeout_ms: u32,
    ) -> Result<(), J2534Error>;

    fn start_filter(
        &self,
        channel: ChannelHandle,
        filter_type: FilterType,
        mask: &PassThruMsg,
        pattern: &PassThruMsg,
        flow_control: Option<&PassThruMsg>,
    ) -> Result<FilterHandle, J2534Error>;
    fn stop_filter(&self, channel: ChannelHandle, filter: FilterHandle) -> Result<(), J2534Error>;

    fn set_config(&self, channel: ChannelHandle, params: &[SConfig]) -> Result<(), J2534Error>;
    fn clear_rx_buffer(&self, channel: ChannelHandle) -> Result<(), J2534Error>;
    fn clear_tx_buffer(&self, channel: ChannelHandle) -> Result<(), J2534Error>;

    /// Battery voltage on pin 16 in millivolts
    fn read_battery_voltage(&self, device: DeviceHandle) -> Result<u32, J2534Error>;
    fn read_version(&self, device: DeviceHandle) -> Result<DeviceVersion, J2534Error>;
    fn get_last_error(&self) -> Result<String, J2534Error>;
    fn set_programming_voltage(
        &self,
        device: DeviceHandle,
        pin: u32,
        millivolts: u32,
    ) -> Result<(), J2534Error>;
}

/// Turns a registry entry into a live binding
pub trait BindingLoader: Send {
    fn load(&self, device: &DeviceInfo) -> Result<Box<dyn PassThruApi>, LoadError>;
}

/// A vendor library could not be loaded or is missing a required export
#[derive(Debug, thiserror::Error)]
#[error("failed to load J2534 library '{}': {reason}", path.display())]
pub struct LoadError {
    pub path: PathBuf,
    pub reason: String,
}
