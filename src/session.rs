//! Channel Session: one open PassThru device and at most one channel on it.
//!
//! States run `Closed → DeviceOpen → ChannelConnected → FilterActive`; every
//! state can fall back to `Closed` through [`ChannelSession::close`]. The
//! session owns its binding exclusively and is `Send` but not `Sync`.

use std::fmt;

use crate::j2534::registry::{DeviceInfo, DeviceRegistry};
use crate::j2534::types::*;
use crate::j2534::{BindingLoader, LoadError, PassThruApi};
use crate::profiles::ConnectionProfile;
use crate::protocol::encode_address;

/// Inclusive battery window checked right after PassThruOpen
pub const MIN_BATTERY_MV: u32 = 11_000;
pub const MAX_BATTERY_MV: u32 = 14_700;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no PassThru device at index {0}")]
    UnknownDevice(usize),
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error("{operation} failed: {source}")]
    Binding {
        operation: &'static str,
        source: J2534Error,
    },
    #[error(
        "battery voltage {:.2} V outside {:.1}-{:.1} V",
        volts(.millivolts),
        volts(&MIN_BATTERY_MV),
        volts(&MAX_BATTERY_MV)
    )]
    VoltageOutOfRange { millivolts: u32 },
    #[error("device {0} is already open on this session")]
    AlreadyOpen(usize),
    #[error("no device open")]
    NotOpen,
    #[error("no channel connected")]
    NotConnected,
}

fn volts(millivolts: &u32) -> f32 {
    *millivolts as f32 / 1000.0
}

impl SessionError {
    fn binding(operation: &'static str) -> impl FnOnce(J2534Error) -> Self {
        move |source| Self::Binding { operation, source }
    }

    /// The J2534 status behind a binding failure
    pub fn j2534(&self) -> Option<J2534Error> {
        match self {
            Self::Binding { source, .. } => Some(*source),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SessionState {
    Closed,
    DeviceOpen,
    ChannelConnected,
    FilterActive,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::DeviceOpen => "device open",
            Self::ChannelConnected => "channel connected",
            Self::FilterActive => "filter active",
        };
        f.write_str(s)
    }
}

struct ActiveChannel {
    handle: ChannelHandle,
    profile: ConnectionProfile,
    filter: Option<FilterHandle>,
}

struct OpenDevice {
    index: usize,
    info: DeviceInfo,
    api: Box<dyn PassThruApi>,
    handle: DeviceHandle,
    channel: Option<ActiveChannel>,
}

pub struct ChannelSession {
    loader: Box<dyn BindingLoader>,
    devices: Vec<DeviceInfo>,
    device: Option<OpenDevice>,
}

impl ChannelSession {
    pub fn new(devices: Vec<DeviceInfo>, loader: Box<dyn BindingLoader>) -> Self {
        Self {
            loader,
            devices,
            device: None,
        }
    }

    pub fn from_registry(registry: &dyn DeviceRegistry, loader: Box<dyn BindingLoader>) -> Self {
        Self::new(registry.list_devices(), loader)
    }

    pub fn devices(&self) -> &[DeviceInfo] {
        &self.devices
    }

    pub fn state(&self) -> SessionState {
        match &self.device {
            None => SessionState::Closed,
            Some(dev) => match &dev.channel {
                None => SessionState::DeviceOpen,
                Some(ch) if ch.filter.is_some() => SessionState::FilterActive,
                Some(_) => SessionState::ChannelConnected,
            },
        }
    }

    /// Registry entry and index of the open device
    pub fn device(&self) -> Option<(usize, &DeviceInfo)> {
        self.device.as_ref().map(|d| (d.index, &d.info))
    }

    pub fn active_profile(&self) -> Option<&ConnectionProfile> {
        self.channel().ok().map(|ch| &ch.profile)
    }

    /// Load the library for `device_index`, open it and check battery voltage.
    ///
    /// Opening the device that is already open is a no-op. A failed voltage
    /// read or a reading outside the window closes the device again.
    pub fn open(&mut self, device_index: usize) -> Result<(), SessionError> {
        if let Some(dev) = &self.device {
            if dev.index == device_index {
                return Ok(());
            }
            return Err(SessionError::AlreadyOpen(dev.index));
        }

        let info = self
            .devices
            .get(device_index)
            .cloned()
            .ok_or(SessionError::UnknownDevice(device_index))?;
        let api = self.loader.load(&info)?;
        let handle = api.open().map_err(SessionError::binding("PassThruOpen"))?;

        let millivolts = match api.read_battery_voltage(handle) {
            Ok(mv) => mv,
            Err(e) => {
                rollback_open(api.as_ref(), handle, &info);
                return Err(SessionError::Binding {
                    operation: "PassThruIoctl(READ_VBATT)",
                    source: e,
                });
            }
        };
        if !(MIN_BATTERY_MV..=MAX_BATTERY_MV).contains(&millivolts) {
            log::warn!(
                "'{}' reports {:.2} V battery, closing",
                info.name,
                volts(&millivolts)
            );
            rollback_open(api.as_ref(), handle, &info);
            return Err(SessionError::VoltageOutOfRange { millivolts });
        }

        log::info!(
            "Opened '{}' (device {:?}, {:.2} V)",
            info.name,
            handle,
            volts(&millivolts)
        );
        self.device = Some(OpenDevice {
            index: device_index,
            info,
            api,
            handle,
            channel: None,
        });
        Ok(())
    }

    /// Connect a channel for `profile`. Already connected is a no-op success.
    ///
    /// Legacy serial protocols also get their timing maxima, one SET_CONFIG
    /// per parameter that is set.
    pub fn connect(&mut self, profile: &ConnectionProfile) -> Result<(), SessionError> {
        let dev = self.device.as_mut().ok_or(SessionError::NotOpen)?;
        if let Some(ch) = &dev.channel {
            log::debug!(
                "Channel {:?} already connected for '{}'",
                ch.handle,
                ch.profile.name
            );
            return Ok(());
        }

        let handle = dev
            .api
            .connect(
                dev.handle,
                profile.protocol.id(),
                profile.connect_flags,
                profile.baud_rate,
            )
            .map_err(SessionError::binding("PassThruConnect"))?;

        if profile.protocol.is_legacy_serial() {
            for param in profile.timing_params() {
                if let Err(e) = dev.api.set_config(handle, &[param]) {
                    if let Err(de) = dev.api.disconnect(handle) {
                        log::warn!("Disconnect after failed SET_CONFIG also failed: {}", de);
                    }
                    return Err(SessionError::Binding {
                        operation: "PassThruIoctl(SET_CONFIG)",
                        source: e,
                    });
                }
            }
        }

        log::info!(
            "Connected {} at {} baud for '{}' (channel {:?})",
            profile.protocol,
            profile.baud_rate,
            profile.name,
            handle
        );
        dev.channel = Some(ActiveChannel {
            handle,
            profile: profile.clone(),
            filter: None,
        });
        Ok(())
    }

    /// Install the receive filter for the connected profile.
    ///
    /// Returns `None` for protocols that take no filter. A filter that is
    /// already active is returned as is.
    pub fn install_filter(&mut self) -> Result<Option<FilterHandle>, SessionError> {
        let dev = self.device.as_mut().ok_or(SessionError::NotOpen)?;
        let ch = dev.channel.as_mut().ok_or(SessionError::NotConnected)?;
        if ch.filter.is_some() {
            return Ok(ch.filter);
        }

        let profile = &ch.profile;
        let Some(filter_type) = profile.protocol.filter_type() else {
            log::debug!("{} takes no receive filter", profile.protocol);
            return Ok(None);
        };

        let protocol_id = profile.protocol.id();
        let tx_flags = match filter_type {
            FilterType::FlowControl => profile.tx_flags,
            _ => 0,
        };
        let filter_msg = |id: u32| PassThruMsg::new(protocol_id, tx_flags, &encode_address(id));
        let mask = filter_msg(profile.mask);
        let pattern = filter_msg(profile.rx_id);
        let flow_control = match filter_type {
            FilterType::FlowControl => Some(filter_msg(profile.tx_id)),
            _ => None,
        };

        let filter = dev
            .api
            .start_filter(ch.handle, filter_type, &mask, &pattern, flow_control.as_ref())
            .map_err(SessionError::binding("PassThruStartMsgFilter"))?;
        log::info!(
            "{:?} filter {:?} active (mask {:#X}, pattern {:#X})",
            filter_type,
            filter,
            profile.mask,
            profile.rx_id
        );
        ch.filter = Some(filter);
        Ok(Some(filter))
    }

    /// Stop the active filter, then disconnect. No channel is a no-op success.
    pub fn disconnect(&mut self) -> Result<(), SessionError> {
        let Some(dev) = self.device.as_mut() else {
            return Ok(());
        };
        let Some(mut ch) = dev.channel.take() else {
            return Ok(());
        };

        if let Some(filter) = ch.filter {
            if let Err(e) = dev.api.stop_filter(ch.handle, filter) {
                dev.channel = Some(ch);
                return Err(SessionError::Binding {
                    operation: "PassThruStopMsgFilter",
                    source: e,
                });
            }
            ch.filter = None;
        }

        if let Err(e) = dev.api.disconnect(ch.handle) {
            // Filter is gone on the hardware, the channel is not
            dev.channel = Some(ch);
            return Err(SessionError::Binding {
                operation: "PassThruDisconnect",
                source: e,
            });
        }
        log::info!("Disconnected channel {:?}", ch.handle);
        Ok(())
    }

    /// Close the device. Any channel is torn down best-effort first; the
    /// session ends up `Closed` even when PassThruClose reports an error.
    pub fn close(&mut self) -> Result<(), SessionError> {
        let Some(dev) = self.device.take() else {
            return Ok(());
        };

        if let Some(ch) = &dev.channel {
            if let Some(filter) = ch.filter {
                if let Err(e) = dev.api.stop_filter(ch.handle, filter) {
                    log::warn!("PassThruStopMsgFilter during close failed: {}", e);
                }
            }
            if let Err(e) = dev.api.disconnect(ch.handle) {
                log::warn!("PassThruDisconnect during close failed: {}", e);
            }
        }

        let result = dev.api.close(dev.handle);
        log::info!("Closed '{}'", dev.info.name);
        result.map_err(SessionError::binding("PassThruClose"))
    }

    // ─── Channel I/O used by the transaction engine ───

    pub fn write_frame(&self, msg: &PassThruMsg, timeout_ms: u32) -> Result<(), SessionError> {
        let (dev, ch) = self.open_channel()?;
        dev.api
            .write(ch.handle, msg, timeout_ms)
            .map_err(SessionError::binding("PassThruWriteMsgs"))
    }

    pub fn read_frame(&self, timeout_ms: u32) -> Result<PassThruMsg, SessionError> {
        let (dev, ch) = self.open_channel()?;
        dev.api
            .read(ch.handle, timeout_ms)
            .map_err(SessionError::binding("PassThruReadMsgs"))
    }

    pub fn clear_rx_buffer(&self) -> Result<(), SessionError> {
        let (dev, ch) = self.open_channel()?;
        dev.api
            .clear_rx_buffer(ch.handle)
            .map_err(SessionError::binding("PassThruIoctl(CLEAR_RX_BUFFER)"))
    }

    pub fn clear_tx_buffer(&self) -> Result<(), SessionError> {
        let (dev, ch) = self.open_channel()?;
        dev.api
            .clear_tx_buffer(ch.handle)
            .map_err(SessionError::binding("PassThruIoctl(CLEAR_TX_BUFFER)"))
    }

    // ─── Device queries ───

    pub fn read_version(&self) -> Result<DeviceVersion, SessionError> {
        let dev = self.open_device()?;
        dev.api
            .read_version(dev.handle)
            .map_err(SessionError::binding("PassThruReadVersion"))
    }

    /// Battery voltage in volts
    pub fn battery_voltage(&self) -> Result<f32, SessionError> {
        let dev = self.open_device()?;
        let mv = dev
            .api
            .read_battery_voltage(dev.handle)
            .map_err(SessionError::binding("PassThruIoctl(READ_VBATT)"))?;
        Ok(volts(&mv))
    }

    /// Vendor text for the last failed call
    pub fn last_error(&self) -> Result<String, SessionError> {
        let dev = self.open_device()?;
        dev.api
            .get_last_error()
            .map_err(SessionError::binding("PassThruGetLastError"))
    }

    pub fn set_programming_voltage(&self, pin: u32, millivolts: u32) -> Result<(), SessionError> {
        let dev = self.open_device()?;
        log::info!("Programming voltage pin {} -> {} mV", pin, millivolts);
        dev.api
            .set_programming_voltage(dev.handle, pin, millivolts)
            .map_err(SessionError::binding("PassThruSetProgrammingVoltage"))
    }

    fn open_device(&self) -> Result<&OpenDevice, SessionError> {
        self.device.as_ref().ok_or(SessionError::NotOpen)
    }

    fn channel(&self) -> Result<&ActiveChannel, SessionError> {
        self.open_channel().map(|(_, ch)| ch)
    }

    fn open_channel(&self) -> Result<(&OpenDevice, &ActiveChannel), SessionError> {
        let dev = self.open_device()?;
        let ch = dev.channel.as_ref().ok_or(SessionError::NotConnected)?;
        Ok((dev, ch))
    }
}

fn rollback_open(api: &dyn PassThruApi, handle: DeviceHandle, info: &DeviceInfo) {
    if let Err(e) = api.close(handle) {
        log::warn!("Closing '{}' after failed open check failed: {}", info.name, e);
    }
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("Closing session on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::j2534::mock::{Call, MockBench, MockDevice};
    use crate::profiles::ProfileTable;

    fn bench_with(device: MockDevice) -> (MockBench, ChannelSession) {
        let bench = MockBench::new();
        bench.add_device("Bench", device);
        let session = ChannelSession::new(bench.devices(), bench.loader());
        (bench, session)
    }

    fn profile(key: &str) -> ConnectionProfile {
        ProfileTable::builtin().get(key).unwrap().clone()
    }

    #[test]
    fn test_voltage_gate_boundaries() {
        for (mv, ok) in [(10_900, false), (11_000, true), (14_700, true), (14_800, false)] {
            let (bench, mut session) = bench_with(MockDevice::new().voltage(mv));
            let result = session.open(0);
            assert_eq!(result.is_ok(), ok, "{} mV", mv);
            if ok {
                assert_eq!(session.state(), SessionState::DeviceOpen);
            } else {
                assert!(matches!(
                    result,
                    Err(SessionError::VoltageOutOfRange { millivolts }) if millivolts == mv
                ));
                assert_eq!(session.state(), SessionState::Closed);
                // Rolled back: the device was closed again
                assert_eq!(bench.count(|c| matches!(c, Call::Close(_))), 1);
            }
        }
    }

    #[test]
    fn test_voltage_read_failure_closes_device() {
        let (bench, mut session) =
            bench_with(MockDevice::new().vbatt_error(J2534Error::InvalidIoctlId));
        let err = session.open(0).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Binding {
                operation: "PassThruIoctl(READ_VBATT)",
                source: J2534Error::InvalidIoctlId
            }
        ));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            bench.calls(),
            vec![
                Call::Load("Bench".into()),
                Call::Open("Bench".into()),
                Call::ReadVbatt("Bench".into()),
                Call::Close("Bench".into())
            ]
        );
    }

    #[test]
    fn test_open_failure_stays_closed() {
        let (bench, mut session) = bench_with(MockDevice::new().fail_open(1));
        let err = session.open(0).unwrap_err();
        assert_eq!(err.j2534(), Some(J2534Error::DeviceNotConnected));
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(bench.count(|c| matches!(c, Call::ReadVbatt(_))), 0);
    }

    #[test]
    fn test_open_unknown_index_and_load_error() {
        let (_bench, mut session) = bench_with(MockDevice::new());
        assert!(matches!(session.open(3), Err(SessionError::UnknownDevice(3))));

        let (_bench, mut session) = bench_with(MockDevice::new().fail_load());
        assert!(matches!(session.open(0), Err(SessionError::Load(_))));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[test]
    fn test_open_same_device_twice_is_noop() {
        let bench = MockBench::new();
        bench.add_device("A", MockDevice::new());
        bench.add_device("B", MockDevice::new());
        let mut session = ChannelSession::new(bench.devices(), bench.loader());

        session.open(0).unwrap();
        session.open(0).unwrap();
        assert_eq!(bench.count(|c| matches!(c, Call::Open(_))), 1);
        assert!(matches!(session.open(1), Err(SessionError::AlreadyOpen(0))));
        assert_eq!(session.device().map(|(i, d)| (i, d.name.as_str())), Some((0, "A")));
    }

    #[test]
    fn test_connect_is_idempotent() {
        let (bench, mut session) = bench_with(MockDevice::new());
        let chrys1 = profile("chrys1");
        session.open(0).unwrap();
        session.connect(&chrys1).unwrap();
        session.connect(&chrys1).unwrap();

        assert_eq!(session.state(), SessionState::ChannelConnected);
        let connects: Vec<_> = bench
            .calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Connect { .. }))
            .collect();
        assert_eq!(
            connects,
            vec![Call::Connect {
                device: "Bench".into(),
                protocol_id: 6,
                flags: 0,
                baud_rate: 500_000
            }]
        );
    }

    #[test]
    fn test_connect_requires_open_device() {
        let (_bench, mut session) = bench_with(MockDevice::new());
        assert!(matches!(
            session.connect(&profile("chrys1")),
            Err(SessionError::NotOpen)
        ));
    }

    #[test]
    fn test_connect_failure_keeps_device_open() {
        let (_bench, mut session) =
            bench_with(MockDevice::new().connect_error(J2534Error::InvalidBaudrate));
        session.open(0).unwrap();
        let err = session.connect(&profile("chrys1")).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Binding {
                operation: "PassThruConnect",
                source: J2534Error::InvalidBaudrate
            }
        ));
        assert_eq!(session.state(), SessionState::DeviceOpen);
    }

    #[test]
    fn test_sci_connect_pushes_set_timings_one_at_a_time() {
        let (bench, mut session) = bench_with(MockDevice::new());
        session.open(0).unwrap();
        session.connect(&profile("chrys4")).unwrap();

        let configs: Vec<_> = bench
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::SetConfig(_, params) => Some(params),
                _ => None,
            })
            .collect();
        assert_eq!(
            configs,
            vec![
                vec![SConfig { parameter: T1_MAX, value: 75 }],
                vec![SConfig { parameter: T2_MAX, value: 5 }],
                vec![SConfig { parameter: T4_MAX, value: 50 }],
                vec![SConfig { parameter: T5_MAX, value: 1 }],
            ]
        );
    }

    #[test]
    fn test_sci_set_config_failure_disconnects() {
        let (bench, mut session) =
            bench_with(MockDevice::new().config_error(J2534Error::InvalidIoctlValue));
        session.open(0).unwrap();
        bench.clear_calls();

        let err = session.connect(&profile("chrys4")).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Binding {
                operation: "PassThruIoctl(SET_CONFIG)",
                source: J2534Error::InvalidIoctlValue
            }
        ));
        assert_eq!(session.state(), SessionState::DeviceOpen);
        assert!(session.active_profile().is_none());

        // First parameter fails, nothing after it is pushed
        let calls = bench.calls();
        assert_eq!(calls.len(), 3);
        assert!(matches!(calls[0], Call::Connect { protocol_id: PROTOCOL_SCI_B_ENGINE, .. }));
        assert!(matches!(&calls[1], Call::SetConfig(_, params) if params[0].parameter == T1_MAX));
        assert_eq!(calls[2], Call::Disconnect("Bench".into()));
    }

    #[test]
    fn test_sci_connect_skips_unset_timings() {
        let (bench, mut session) = bench_with(MockDevice::new());
        session.open(0).unwrap();
        session.connect(&profile("chrys9")).unwrap();
        assert_eq!(bench.count(|c| matches!(c, Call::SetConfig(..))), 0);
    }

    #[test]
    fn test_can_connect_sends_no_timings() {
        let (bench, mut session) = bench_with(MockDevice::new());
        session.open(0).unwrap();
        session.connect(&profile("chrys1")).unwrap();
        assert_eq!(bench.count(|c| matches!(c, Call::SetConfig(..))), 0);
    }

    #[test]
    fn test_iso15765_installs_flow_control_filter() {
        let (bench, mut session) = bench_with(MockDevice::new());
        session.open(0).unwrap();
        session.connect(&profile("chrys1")).unwrap();
        assert!(session.install_filter().unwrap().is_some());
        assert_eq!(session.state(), SessionState::FilterActive);

        let filter = bench
            .calls()
            .into_iter()
            .find(|c| matches!(c, Call::StartFilter { .. }))
            .unwrap();
        assert_eq!(
            filter,
            Call::StartFilter {
                device: "Bench".into(),
                filter_type: FilterType::FlowControl,
                mask: vec![0xFF, 0xFF, 0xFF, 0xFF],
                pattern: vec![0x00, 0x00, 0x07, 0xE8],
                flow_control: Some(vec![0x00, 0x00, 0x07, 0xE0]),
                tx_flags: ISO15765_FRAME_PAD,
            }
        );
    }

    #[test]
    fn test_sci_installs_pass_filter_without_flow_control() {
        let (bench, mut session) = bench_with(MockDevice::new());
        session.open(0).unwrap();
        session.connect(&profile("chrys3")).unwrap();
        session.install_filter().unwrap();

        let filter = bench
            .calls()
            .into_iter()
            .find(|c| matches!(c, Call::StartFilter { .. }))
            .unwrap();
        assert!(matches!(
            filter,
            Call::StartFilter {
                filter_type: FilterType::Pass,
                flow_control: None,
                tx_flags: 0,
                ..
            }
        ));
    }

    #[test]
    fn test_raw_can_takes_no_filter() {
        let (bench, mut session) = bench_with(MockDevice::new());
        let mut raw = profile("chrys1");
        raw.protocol = crate::protocol::ProtocolFamily::Can;
        session.open(0).unwrap();
        session.connect(&raw).unwrap();

        assert_eq!(session.install_filter().unwrap(), None);
        assert_eq!(session.state(), SessionState::ChannelConnected);
        assert_eq!(bench.count(|c| matches!(c, Call::StartFilter { .. })), 0);
    }

    #[test]
    fn test_filter_failure_leaves_channel_connected() {
        let (_bench, mut session) =
            bench_with(MockDevice::new().filter_error(J2534Error::ExceededLimit));
        session.open(0).unwrap();
        session.connect(&profile("chrys1")).unwrap();
        assert!(matches!(
            session.install_filter(),
            Err(SessionError::Binding {
                operation: "PassThruStartMsgFilter",
                source: J2534Error::ExceededLimit
            })
        ));
        assert_eq!(session.state(), SessionState::ChannelConnected);
    }

    #[test]
    fn test_clear_buffers() {
        let (bench, mut session) = bench_with(MockDevice::new());
        session.open(0).unwrap();
        assert!(matches!(session.clear_rx_buffer(), Err(SessionError::NotConnected)));
        session.connect(&profile("chrys1")).unwrap();
        session.clear_rx_buffer().unwrap();
        session.clear_tx_buffer().unwrap();
        assert_eq!(bench.count(|c| matches!(c, Call::ClearRx(_) | Call::ClearTx(_))), 2);
    }

    #[test]
    fn test_install_filter_requires_channel() {
        let (_bench, mut session) = bench_with(MockDevice::new());
        session.open(0).unwrap();
        assert!(matches!(
            session.install_filter(),
            Err(SessionError::NotConnected)
        ));
    }

    #[test]
    fn test_disconnect_stops_filter_first() {
        let (bench, mut session) = bench_with(MockDevice::new());
        session.open(0).unwrap();
        session.connect(&profile("chrys1")).unwrap();
        session.install_filter().unwrap();
        bench.clear_calls();

        session.disconnect().unwrap();
        assert_eq!(
            bench.calls(),
            vec![
                Call::StopFilter("Bench".into()),
                Call::Disconnect("Bench".into())
            ]
        );
        assert_eq!(session.state(), SessionState::DeviceOpen);

        // Nothing connected any more
        session.disconnect().unwrap();
        assert_eq!(bench.count(|c| matches!(c, Call::Disconnect(_))), 1);
    }

    #[test]
    fn test_stop_filter_failure_keeps_filter_active() {
        let (bench, mut session) =
            bench_with(MockDevice::new().stop_filter_error(J2534Error::InvalidFilterId));
        session.open(0).unwrap();
        session.connect(&profile("chrys1")).unwrap();
        session.install_filter().unwrap();
        bench.clear_calls();

        assert!(matches!(
            session.disconnect(),
            Err(SessionError::Binding {
                operation: "PassThruStopMsgFilter",
                source: J2534Error::InvalidFilterId
            })
        ));
        assert_eq!(session.state(), SessionState::FilterActive);
        assert_eq!(bench.calls(), vec![Call::StopFilter("Bench".into())]);
    }

    #[test]
    fn test_disconnect_failure_keeps_channel_without_filter() {
        let (bench, mut session) =
            bench_with(MockDevice::new().disconnect_error(J2534Error::InvalidChannelId));
        session.open(0).unwrap();
        session.connect(&profile("chrys1")).unwrap();
        session.install_filter().unwrap();
        bench.clear_calls();

        assert!(matches!(
            session.disconnect(),
            Err(SessionError::Binding {
                operation: "PassThruDisconnect",
                source: J2534Error::InvalidChannelId
            })
        ));
        assert_eq!(session.state(), SessionState::ChannelConnected);
        assert_eq!(
            bench.calls(),
            vec![
                Call::StopFilter("Bench".into()),
                Call::Disconnect("Bench".into())
            ]
        );

        // Close still gets the session to Closed
        bench.clear_calls();
        session.close().unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(
            bench.calls(),
            vec![Call::Disconnect("Bench".into()), Call::Close("Bench".into())]
        );
    }

    #[test]
    fn test_close_tears_down_channel_and_is_unconditional() {
        let (bench, mut session) = bench_with(MockDevice::new());
        session.open(0).unwrap();
        session.connect(&profile("chrys1")).unwrap();
        session.install_filter().unwrap();
        bench.clear_calls();

        session.close().unwrap();
        assert_eq!(
            bench.calls(),
            vec![
                Call::StopFilter("Bench".into()),
                Call::Disconnect("Bench".into()),
                Call::Close("Bench".into())
            ]
        );
        assert_eq!(session.state(), SessionState::Closed);
        session.close().unwrap();
        assert_eq!(bench.count(|c| matches!(c, Call::Close(_))), 1);
    }

    #[test]
    fn test_drop_closes_device() {
        let (bench, mut session) = bench_with(MockDevice::new());
        session.open(0).unwrap();
        drop(session);
        assert_eq!(bench.count(|c| matches!(c, Call::Close(_))), 1);
    }

    #[test]
    fn test_io_requires_channel() {
        let (_bench, mut session) = bench_with(MockDevice::new());
        assert!(matches!(session.read_frame(10), Err(SessionError::NotOpen)));
        session.open(0).unwrap();
        assert!(matches!(
            session.read_frame(10),
            Err(SessionError::NotConnected)
        ));
    }

    #[test]
    fn test_device_queries() {
        let (bench, mut session) = bench_with(MockDevice::new().voltage(12_600));
        session.open(0).unwrap();

        assert!((session.battery_voltage().unwrap() - 12.6).abs() < 1e-3);
        assert_eq!(session.read_version().unwrap().api, "04.04");
        assert_eq!(session.last_error().unwrap(), "no error");
        session.set_programming_voltage(12, 18_000).unwrap();
        assert!(bench
            .calls()
            .contains(&Call::SetProgrammingVoltage("Bench".into(), 12, 18_000)));
    }

    #[test]
    fn test_session_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<ChannelSession>();
    }
}
