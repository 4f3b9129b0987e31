use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::j2534::registry::DeviceInfo;
use crate::j2534::types::*;
use crate::j2534::{BindingLoader, LoadError, PassThruApi};

/// Every binding call the bench saw, in order, tagged with the device name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Load(String),
    Open(String),
    Close(String),
    Connect {
        device: String,
        protocol_id: u32,
        flags: u32,
        baud_rate: u32,
    },
    Disconnect(String),
    StartFilter {
        device: String,
        filter_type: FilterType,
        mask: Vec<u8>,
        pattern: Vec<u8>,
        flow_control: Option<Vec<u8>>,
        tx_flags: u32,
    },
    StopFilter(String),
    SetConfig(String, Vec<SConfig>),
    ReadVbatt(String),
    ReadVersion(String),
    Read(String),
    Write(String, Vec<u8>),
    ClearRx(String),
    ClearTx(String),
    GetLastError(String),
    SetProgrammingVoltage(String, u32, u32),
}

/// Scripted behaviour of one fake interface
#[derive(Debug, Clone)]
pub struct MockDevice {
    load_error: bool,
    open_failures: u32,
    voltage_mv: u32,
    vbatt_error: Option<J2534Error>,
    connect_error: Option<J2534Error>,
    filter_error: Option<J2534Error>,
    write_error: Option<J2534Error>,
    config_error: Option<J2534Error>,
    stop_filter_error: Option<J2534Error>,
    disconnect_error: Option<J2534Error>,
    /// Frame data suffix → frames queued when a matching write arrives
    responders: Vec<(Vec<u8>, Vec<Result<PassThruMsg, J2534Error>>)>,
    reads: VecDeque<Result<PassThruMsg, J2534Error>>,
    /// Returned once `reads` runs dry
    idle: Result<PassThruMsg, J2534Error>,
}

impl Default for MockDevice {
    fn default() -> Self {
        Self {
            load_error: false,
            open_failures: 0,
            voltage_mv: 12_600,
            vbatt_error: None,
            connect_error: None,
            filter_error: None,
            write_error: None,
            config_error: None,
            stop_filter_error: None,
            disconnect_error: None,
            responders: Vec::new(),
            reads: VecDeque::new(),
            idle: Err(J2534Error::BufferEmpty),
        }
    }
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_load(mut self) -> Self {
        self.load_error = true;
        self
    }

    /// Fail the next `count` PassThruOpen calls with DeviceNotConnected
    pub fn fail_open(mut self, count: u32) -> Self {
        self.open_failures = count;
        self
    }

    pub fn voltage(mut self, millivolts: u32) -> Self {
        self.voltage_mv = millivolts;
        self
    }

    pub fn vbatt_error(mut self, err: J2534Error) -> Self {
        self.vbatt_error = Some(err);
        self
    }

    pub fn connect_error(mut self, err: J2534Error) -> Self {
        self.connect_error = Some(err);
        self
    }

    pub fn filter_error(mut self, err: J2534Error) -> Self {
        self.filter_error = Some(err);
        self
    }

    pub fn write_error(mut self, err: J2534Error) -> Self {
        self.write_error = Some(err);
        self
    }

    pub fn config_error(mut self, err: J2534Error) -> Self {
        self.config_error = Some(err);
        self
    }

    pub fn stop_filter_error(mut self, err: J2534Error) -> Self {
        self.stop_filter_error = Some(err);
        self
    }

    /// Every PassThruDisconnect fails with `err`
    pub fn disconnect_error(mut self, err: J2534Error) -> Self {
        self.disconnect_error = Some(err);
        self
    }

    /// Queue `frames` whenever a written frame's data ends with `request`
    pub fn on_request(mut self, request: &[u8], frames: Vec<PassThruMsg>) -> Self {
        self.responders
            .push((request.to_vec(), frames.into_iter().map(Ok).collect()));
        self
    }

    /// Queue reads that are delivered regardless of what was written
    pub fn reads(mut self, reads: Vec<Result<PassThruMsg, J2534Error>>) -> Self {
        self.reads.extend(reads);
        self
    }

    pub fn idle(mut self, idle: Result<PassThruMsg, J2534Error>) -> Self {
        self.idle = idle;
        self
    }
}

#[derive(Default)]
struct BenchState {
    devices: HashMap<String, MockDevice>,
    order: Vec<DeviceInfo>,
    calls: Vec<Call>,
    next_handle: u32,
}

impl BenchState {
    fn handle(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// A set of fake PassThru interfaces sharing one call log.
///
/// Cloning the bench shares the state, so a test can hand a clone to the
/// session as its loader and keep another for assertions.
#[derive(Clone, Default)]
pub struct MockBench {
    state: Arc<Mutex<BenchState>>,
}

impl MockBench {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_device(&self, name: &str, device: MockDevice) -> DeviceInfo {
        let info = DeviceInfo::new(name, format!(r"C:\PassThru\{}.dll", name));
        let mut state = self.lock();
        state.devices.insert(name.to_string(), device);
        state.order.push(info.clone());
        info
    }

    pub fn devices(&self) -> Vec<DeviceInfo> {
        self.lock().order.clone()
    }

    pub fn loader(&self) -> Box<dyn BindingLoader> {
        Box::new(self.clone())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.lock().calls.clone()
    }

    /// Number of calls matching the predicate
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn reads(&self) -> usize {
        self.count(|c| matches!(c, Call::Read(_)))
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Write(_, data) => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> MutexGuard<'_, BenchState> {
        self.state.lock().unwrap()
    }
}

impl BindingLoader for MockBench {
    fn load(&self, device: &DeviceInfo) -> Result<Box<dyn PassThruApi>, LoadError> {
        let mut state = self.lock();
        state.calls.push(Call::Load(device.name.clone()));
        match state.devices.get(&device.name) {
            Some(d) if !d.load_error => Ok(Box::new(MockBinding {
                name: device.name.clone(),
                state: self.state.clone(),
            })),
            _ => Err(LoadError {
                path: device.library_path.clone(),
                reason: "mock library unavailable".to_string(),
            }),
        }
    }
}

/// One loaded fake library
struct MockBinding {
    name: String,
    state: Arc<Mutex<BenchState>>,
}

impl MockBinding {
    fn with<T>(&self, call: Call, f: impl FnOnce(&mut MockDevice, &mut BenchState) -> T) -> T {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        let mut device = state.devices.remove(&self.name).unwrap();
        let out = f(&mut device, &mut *state);
        state.devices.insert(self.name.clone(), device);
        out
    }
}

impl PassThruApi for MockBinding {
    fn open(&self) -> Result<DeviceHandle, J2534Error> {
        self.with(Call::Open(self.name.clone()), |d, s| {
            if d.open_failures > 0 {
                d.open_failures -= 1;
                return Err(J2534Error::DeviceNotConnected);
            }
            Ok(DeviceHandle(s.handle()))
        })
    }

    fn close(&self, _device: DeviceHandle) -> Result<(), J2534Error> {
        self.with(Call::Close(self.name.clone()), |_, _| Ok(()))
    }

    fn connect(
        &self,
        _device: DeviceHandle,
        protocol_id: u32,
        flags: u32,
        baud_rate: u32,
    ) -> Result<ChannelHandle, J2534Error> {
        let call = Call::Connect {
            device: self.name.clone(),
            protocol_id,
            flags,
            baud_rate,
        };
        self.with(call, |d, s| match d.connect_error {
            Some(err) => Err(err),
            None => Ok(ChannelHandle(s.handle())),
        })
    }

    fn disconnect(&self, _channel: ChannelHandle) -> Result<(), J2534Error> {
        self.with(Call::Disconnect(self.name.clone()), |d, _| match d.disconnect_error {
            Some(err) => Err(err),
            None => Ok(()),
        })
    }

    fn read(&self, _channel: ChannelHandle, _timeout_ms: u32) -> Result<PassThruMsg, J2534Error> {
        self.with(Call::Read(self.name.clone()), |d, _| {
            d.reads.pop_front().unwrap_or_else(|| d.idle.clone())
        })
    }

    fn write(
        &self,
        _channel: ChannelHandle,
        msg: &PassThruMsg,
        _timeout_ms: u32,
    ) -> Result<(), J2534Error> {
        let data = msg.data().to_vec();
        self.with(Call::Write(self.name.clone(), data.clone()), |d, _| {
            if let Some(err) = d.write_error {
                return Err(err);
            }
            if let Some((_, frames)) = d.responders.iter().find(|(req, _)| data.ends_with(req)) {
                d.reads.extend(frames.iter().cloned());
            }
            Ok(())
        })
    }

    fn start_filter(
        &self,
        _channel: ChannelHandle,
        filter_type: FilterType,
        mask: &PassThruMsg,
        pattern: &PassThruMsg,
        flow_control: Option<&PassThruMsg>,
    ) -> Result<FilterHandle, J2534Error> {
        let call = Call::StartFilter {
            device: self.name.clone(),
            filter_type,
            mask: mask.data().to_vec(),
            pattern: pattern.data().to_vec(),
            flow_control: flow_control.map(|fc| fc.data().to_vec()),
            tx_flags: mask.tx_flags,
        };
        self.with(call, |d, s| match d.filter_error {
            Some(err) => Err(err),
            None => Ok(FilterHandle(s.handle())),
        })
    }

    fn stop_filter(&self, _channel: ChannelHandle, _filter: FilterHandle) -> Result<(), J2534Error> {
        self.with(Call::StopFilter(self.name.clone()), |d, _| match d.stop_filter_error {
            Some(err) => Err(err),
            None => Ok(()),
        })
    }

    fn set_config(&self, _channel: ChannelHandle, params: &[SConfig]) -> Result<(), J2534Error> {
        self.with(Call::SetConfig(self.name.clone(), params.to_vec()), |d, _| {
            match d.config_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        })
    }

    fn clear_rx_buffer(&self, _channel: ChannelHandle) -> Result<(), J2534Error> {
        self.with(Call::ClearRx(self.name.clone()), |d, _| {
            d.reads.clear();
            Ok(())
        })
    }

    fn clear_tx_buffer(&self, _channel: ChannelHandle) -> Result<(), J2534Error> {
        self.with(Call::ClearTx(self.name.clone()), |_, _| Ok(()))
    }

    fn read_battery_voltage(&self, _device: DeviceHandle) -> Result<u32, J2534Error> {
        self.with(Call::ReadVbatt(self.name.clone()), |d, _| match d.vbatt_error {
            Some(err) => Err(err),
            None => Ok(d.voltage_mv),
        })
    }

    fn read_version(&self, _device: DeviceHandle) -> Result<DeviceVersion, J2534Error> {
        self.with(Call::ReadVersion(self.name.clone()), |_, _| {
            Ok(DeviceVersion {
                firmware: "1.0.0".to_string(),
                dll: "2.1.0".to_string(),
                api: "04.04".to_string(),
            })
        })
    }

    fn get_last_error(&self) -> Result<String, J2534Error> {
        self.with(Call::GetLastError(self.name.clone()), |_, _| {
            Ok("no error".to_string())
        })
    }

    fn set_programming_voltage(
        &self,
        _device: DeviceHandle,
        pin: u32,
        millivolts: u32,
    ) -> Result<(), J2534Error> {
        let call = Call::SetProgrammingVoltage(self.name.clone(), pin, millivolts);
        self.with(call, |_, _| Ok(()))
    }
}

/// A received ISO15765 frame: 4-byte big-endian CAN id followed by `payload`
pub fn can_frame(can_id: u32, rx_status: u32, payload: &[u8]) -> PassThruMsg {
    let mut data = can_id.to_be_bytes().to_vec();
    data.extend_from_slice(payload);
    let mut msg = PassThruMsg::new(PROTOCOL_ISO15765, 0, &data);
    msg.rx_status = rx_status;
    msg
}

/// A received SCI frame with no address header
pub fn sci_frame(protocol_id: u32, payload: &[u8]) -> PassThruMsg {
    PassThruMsg::new(protocol_id, 0, payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_api(bench: &MockBench, name: &str) -> Box<dyn PassThruApi> {
        let info = bench
            .devices()
            .into_iter()
            .find(|d| d.name == name)
            .unwrap();
        bench.load(&info).unwrap()
    }

    #[test]
    fn test_mock_request_queues_response() {
        let bench = MockBench::new();
        bench.add_device(
            "Bench",
            MockDevice::new().on_request(
                &[0x22, 0xF1, 0x90],
                vec![can_frame(0x7E8, 0, &[0x62, 0xF1, 0x90, 0x41])],
            ),
        );
        let api = open_api(&bench, "Bench");
        let dev = api.open().unwrap();
        let ch = api.connect(dev, PROTOCOL_ISO15765, 0, 500_000).unwrap();

        assert_eq!(api.read(ch, 100).unwrap_err(), J2534Error::BufferEmpty);

        let tx = PassThruMsg::new(PROTOCOL_ISO15765, 0, &[0, 0, 0x07, 0xE0, 0x22, 0xF1, 0x90]);
        api.write(ch, &tx, 100).unwrap();
        let rx = api.read(ch, 100).unwrap();
        assert_eq!(rx.data(), &[0, 0, 0x07, 0xE8, 0x62, 0xF1, 0x90, 0x41]);
        assert_eq!(bench.writes().len(), 1);
    }

    #[test]
    fn test_mock_open_failures_are_counted_down() {
        let bench = MockBench::new();
        bench.add_device("Flaky", MockDevice::new().fail_open(1));
        let api = open_api(&bench, "Flaky");

        assert_eq!(api.open().unwrap_err(), J2534Error::DeviceNotConnected);
        assert!(api.open().is_ok());
    }

    #[test]
    fn test_mock_load_error() {
        let bench = MockBench::new();
        let info = bench.add_device("Broken", MockDevice::new().fail_load());
        assert!(bench.load(&info).is_err());
        assert_eq!(bench.calls(), vec![Call::Load("Broken".into())]);
    }

    #[test]
    fn test_mock_idle_frame_repeats() {
        let bench = MockBench::new();
        let indication = can_frame(0x7E8, RX_TX_INDICATION, &[]);
        bench.add_device("Echo", MockDevice::new().idle(Ok(indication)));
        let api = open_api(&bench, "Echo");
        let ch = ChannelHandle(1);

        for _ in 0..5 {
            assert_eq!(api.read(ch, 10).unwrap().rx_status, RX_TX_INDICATION);
        }
        assert_eq!(bench.reads(), 5);
    }
}
