use std::ffi::{c_char, c_void};

use crate::j2534::dll::J2534Lib;
use crate::j2534::types::*;
use crate::j2534::PassThruApi;

/// Decode a NUL-terminated string buffer filled in by the DLL
fn c_buffer_to_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).to_string()
}

impl J2534Lib {
    fn ioctl_no_args(&self, channel: ChannelHandle, ioctl_id: u32) -> Result<(), J2534Error> {
        let ret = unsafe {
            (self.pass_thru_ioctl)(channel.0, ioctl_id, std::ptr::null(), std::ptr::null_mut())
        };
        J2534Error::check(ret)
    }
}

impl PassThruApi for J2534Lib {
    fn open(&self) -> Result<DeviceHandle, J2534Error> {
        let mut device_id: u32 = 0;
        let ret = unsafe { (self.pass_thru_open)(std::ptr::null(), &mut device_id) };
        J2534Error::check(ret)?;
        Ok(DeviceHandle(device_id))
    }

    fn close(&self, device: DeviceHandle) -> Result<(), J2534Error> {
        let ret = unsafe { (self.pass_thru_close)(device.0) };
        J2534Error::check(ret)
    }

    fn connect(
        &self,
        device: DeviceHandle,
        protocol_id: u32,
        flags: u32,
        baud_rate: u32,
    ) -> Result<ChannelHandle, J2534Error> {
        let mut channel_id: u32 = 0;
        let ret = unsafe {
            (self.pass_thru_connect)(device.0, protocol_id, flags, baud_rate, &mut channel_id)
        };
        J2534Error::check(ret)?;
        Ok(ChannelHandle(channel_id))
    }

    fn disconnect(&self, channel: ChannelHandle) -> Result<(), J2534Error> {
        let ret = unsafe { (self.pass_thru_disconnect)(channel.0) };
        J2534Error::check(ret)
    }

    fn read(&self, channel: ChannelHandle, timeout_ms: u32) -> Result<PassThruMsg, J2534Error> {
        let mut msg = PassThruMsg::default();
        let mut num_msgs: u32 = 1;
        let ret =
            unsafe { (self.pass_thru_read_msgs)(channel.0, &mut msg, &mut num_msgs, timeout_ms) };
        J2534Error::check(ret)?;
        // Some drivers return NOERROR with zero messages instead of ERR_BUFFER_EMPTY
        if num_msgs == 0 {
            return Err(J2534Error::BufferEmpty);
        }
        Ok(msg)
    }

    fn write(
        &self,
        channel: ChannelHandle,
        msg: &PassThruMsg,
        timeout_ms: u32,
    ) -> Result<(), J2534Error> {
        let mut num_msgs: u32 = 1;
        let ret = unsafe { (self.pass_thru_write_msgs)(channel.0, msg, &mut num_msgs, timeout_ms) };
        J2534Error::check(ret)
    }

    fn start_filter(
        &self,
        channel: ChannelHandle,
        filter_type: FilterType,
        mask: &PassThruMsg,
        pattern: &PassThruMsg,
        flow_control: Option<&PassThruMsg>,
    ) -> Result<FilterHandle, J2534Error> {
        let flow_control_ptr = flow_control.map_or(std::ptr::null(), |fc| fc as *const PassThruMsg);
        let mut filter_id: u32 = 0;
        let ret = unsafe {
            (self.pass_thru_start_msg_filter)(
                channel.0,
                filter_type.id(),
                mask,
                pattern,
                flow_control_ptr,
                &mut filter_id,
            )
        };
        J2534Error::check(ret)?;
        Ok(FilterHandle(filter_id))
    }

    fn stop_filter(&self, channel: ChannelHandle, filter: FilterHandle) -> Result<(), J2534Error> {
        let ret = unsafe { (self.pass_thru_stop_msg_filter)(channel.0, filter.0) };
        J2534Error::check(ret)
    }

    fn set_config(&self, channel: ChannelHandle, params: &[SConfig]) -> Result<(), J2534Error> {
        let mut configs = params.to_vec();
        let config_list = SConfigList {
            num_of_params: configs.len() as u32,
            config_ptr: configs.as_mut_ptr(),
        };
        let ret = unsafe {
            (self.pass_thru_ioctl)(
                channel.0,
                SET_CONFIG,
                &config_list as *const SConfigList as *const c_void,
                std::ptr::null_mut(),
            )
        };
        J2534Error::check(ret)
    }

    fn clear_rx_buffer(&self, channel: ChannelHandle) -> Result<(), J2534Error> {
        self.ioctl_no_args(channel, CLEAR_RX_BUFFER)
    }

    fn clear_tx_buffer(&self, channel: ChannelHandle) -> Result<(), J2534Error> {
        self.ioctl_no_args(channel, CLEAR_TX_BUFFER)
    }

    fn read_battery_voltage(&self, device: DeviceHandle) -> Result<u32, J2534Error> {
        let mut voltage: u32 = 0;
        let ret = unsafe {
            (self.pass_thru_ioctl)(
                device.0,
                READ_VBATT,
                std::ptr::null(),
                &mut voltage as *mut u32 as *mut c_void,
            )
        };
        J2534Error::check(ret)?;
        Ok(voltage)
    }

    fn read_version(&self, device: DeviceHandle) -> Result<DeviceVersion, J2534Error> {
        let mut firmware = [0u8; 80];
        let mut dll = [0u8; 80];
        let mut api = [0u8; 80];
        let ret = unsafe {
            (self.pass_thru_read_version)(
                device.0,
                firmware.as_mut_ptr(),
                dll.as_mut_ptr(),
                api.as_mut_ptr(),
            )
        };
        J2534Error::check(ret)?;
        Ok(DeviceVersion {
            firmware: c_buffer_to_string(&firmware),
            dll: c_buffer_to_string(&dll),
            api: c_buffer_to_string(&api),
        })
    }

    fn get_last_error(&self) -> Result<String, J2534Error> {
        let mut description = [0u8; 80];
        let ret = unsafe { (self.pass_thru_get_last_error)(description.as_mut_ptr() as *mut c_char) };
        J2534Error::check(ret)?;
        Ok(c_buffer_to_string(&description))
    }

    fn set_programming_voltage(
        &self,
        device: DeviceHandle,
        pin: u32,
        millivolts: u32,
    ) -> Result<(), J2534Error> {
        let ret = unsafe { (self.pass_thru_set_programming_voltage)(device.0, pin, millivolts) };
        J2534Error::check(ret)
    }
}
