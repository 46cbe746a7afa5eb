//! Simulated bus implementing [`MasterTransport`].

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use servo_common::consts::MAX_SLAVES;
use servo_common::pdo::{
    PdoDirection, RX_FRAME_SIZE, RxFrame, TX_FRAME_SIZE, TxFrame, mapped_bytes,
};
use servo_common::transport::{LinkState, MasterTransport, SlaveRecord, TransportError};
use tracing::{debug, info, trace};

use super::drive::SimDrive;

/// SDO abort: object does not exist.
const ABORT_NO_OBJECT: u32 = 0x0602_0000;
/// SDO abort: general error.
const ABORT_GENERAL: u32 = 0x0800_0000;

#[derive(Debug, Clone, Copy)]
pub struct SimConfig {
    pub slave_count: u16,
    /// Reference clock step per exchange.
    pub cycle_time: Duration,
    pub has_dc: bool,
    /// Cycles a drive takes to display a requested mode.
    pub mode_delay_ticks: u32,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            slave_count: 1,
            cycle_time: Duration::from_millis(1),
            has_dc: true,
            mode_delay_ticks: 2,
        }
    }
}

/// One successful SDO download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdoRecord {
    pub slave: u16,
    pub index: u16,
    pub subindex: u8,
    pub data: Vec<u8>,
}

#[derive(Debug)]
struct SimSlave {
    record: SlaveRecord,
    connected: bool,
    /// Silent, but answers the master's recovery call.
    revive_on_recovery: bool,
    /// Injected failure: requesting this state yields it with ERROR and the AL code.
    fail_transition: Option<(LinkState, u16)>,
    objects: HashMap<(u16, u8), Vec<u8>>,
    drive: SimDrive,
    outputs: [u8; RX_FRAME_SIZE],
    inputs: [u8; TX_FRAME_SIZE],
}

impl SimSlave {
    fn new(index: u16, config: &SimConfig) -> Self {
        let drive = SimDrive::new(config.mode_delay_ticks);
        Self {
            record: SlaveRecord {
                index,
                state: LinkState::INIT,
                has_dc: config.has_dc,
                ..SlaveRecord::default()
            },
            connected: true,
            revive_on_recovery: false,
            fail_transition: None,
            objects: HashMap::new(),
            inputs: drive.feedback().encode(),
            drive,
            outputs: [0; RX_FRAME_SIZE],
        }
    }

    fn object_count(&self, index: u16) -> Option<u8> {
        self.objects
            .get(&(index, 0))
            .and_then(|v| v.first().copied())
    }

    fn is_mapped(&self) -> bool {
        [PdoDirection::Rx, PdoDirection::Tx].iter().all(|dir| {
            self.object_count(dir.mapping_object()) == Some(dir.entries().len() as u8)
                && self.object_count(dir.assign_object()) == Some(1)
        })
    }

    fn request(&mut self, state: LinkState) {
        if !self.connected {
            return;
        }
        if state.has_error() {
            // Acknowledge: the error clears, the slave stays in the written state.
            self.record.state = state.base();
            self.record.al_status = 0;
            return;
        }
        match self.fail_transition {
            Some((failing, code)) if failing == state => {
                self.fail_transition = None;
                self.record.state = state.with_ack();
                self.record.al_status = code;
                return;
            }
            _ => {}
        }
        self.record.state = state;
        if state == LinkState::INIT {
            self.record.dc_active = false;
        }
    }

    /// Working-counter contribution of one exchange.
    fn wkc(&self) -> u16 {
        if !self.connected {
            return 0;
        }
        match self.record.state {
            s if s == LinkState::OPERATIONAL => 3,
            s if s == LinkState::SAFE_OP => 1,
            _ => 0,
        }
    }
}

#[derive(Debug)]
struct BusState {
    interface: Option<String>,
    discovered: bool,
    slaves: Vec<SimSlave>,
    mapped: bool,
    dc_configured: bool,
    dc_time_ns: i64,
    sdo_failures: Vec<u16>,
    sdo_log: Vec<SdoRecord>,
    shortfalls_pending: u32,
    in_flight: Option<u16>,
    exchanges: u64,
}

pub struct SimulatedBus {
    config: SimConfig,
    state: Mutex<BusState>,
}

impl SimulatedBus {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BusState {
                interface: None,
                discovered: false,
                slaves: Vec::new(),
                mapped: false,
                dc_configured: false,
                dc_time_ns: 0,
                sdo_failures: Vec::new(),
                sdo_log: Vec::new(),
                shortfalls_pending: 0,
                in_flight: None,
                exchanges: 0,
            }),
        }
    }

    // ─── Fault Injection ────────────────────────────────────────────

    /// The next `count` exchanges return one less than the expected working counter.
    pub fn inject_wkc_shortfall(&self, count: u32) {
        self.state.lock().shortfalls_pending += count;
    }

    /// The slave stops answering: state reads NONE, no WKC, SDO timeouts.
    pub fn disconnect_slave(&self, slave: u16) {
        if let Some(s) = self.slave_mut(&mut self.state.lock(), slave) {
            s.connected = false;
        }
    }

    /// The slave answers again, power-cycled into INIT.
    pub fn reconnect_slave(&self, slave: u16) {
        let mut state = self.state.lock();
        let config = self.config;
        if let Some(s) = self.slave_mut(&mut state, slave) {
            let objects = std::mem::take(&mut s.objects);
            *s = SimSlave::new(slave, &config);
            s.objects = objects;
        }
    }

    /// The slave stays silent until the master's recovery call, which
    /// power-cycles it back into INIT.
    pub fn reconnect_on_recovery(&self, slave: u16) {
        if let Some(s) = self.slave_mut(&mut self.state.lock(), slave) {
            s.revive_on_recovery = true;
        }
    }

    /// Force a link state, e.g. `SAFE_OP+ERROR` after a watchdog.
    pub fn set_slave_state(&self, slave: u16, link: LinkState, al_status: u16) {
        if let Some(s) = self.slave_mut(&mut self.state.lock(), slave) {
            s.record.state = link;
            s.record.al_status = al_status;
        }
    }

    /// The next request of `link` on `slave` ends in `link+ERROR` with `al_status`.
    pub fn fail_state_transition(&self, slave: u16, link: LinkState, al_status: u16) {
        if let Some(s) = self.slave_mut(&mut self.state.lock(), slave) {
            s.fail_transition = Some((link, al_status));
        }
    }

    /// Every SDO download to `index` aborts.
    pub fn fail_sdo(&self, index: u16) {
        self.state.lock().sdo_failures.push(index);
    }

    pub fn clear_sdo_failures(&self) {
        self.state.lock().sdo_failures.clear();
    }

    pub fn inject_drive_fault(&self, slave: u16) {
        if let Some(s) = self.slave_mut(&mut self.state.lock(), slave) {
            s.drive.inject_fault();
            s.inputs = s.drive.feedback().encode();
        }
    }

    /// Cycles every drive takes to display a newly requested mode.
    pub fn set_mode_delay(&self, ticks: u32) {
        for s in self.state.lock().slaves.iter_mut() {
            s.drive.set_mode_delay(ticks);
        }
    }

    // ─── Inspection ─────────────────────────────────────────────────

    /// Successful SDO downloads in order.
    pub fn sdo_log(&self) -> Vec<SdoRecord> {
        self.state.lock().sdo_log.clone()
    }

    /// Inputs the slave last produced.
    pub fn feedback(&self, slave: u16) -> Option<TxFrame> {
        let state = self.state.lock();
        let s = state.slaves.get(usize::from(slave).checked_sub(1)?)?;
        Some(TxFrame::decode(&s.inputs))
    }

    /// Outputs the slave last received.
    pub fn outputs(&self, slave: u16) -> Option<RxFrame> {
        let state = self.state.lock();
        let s = state.slaves.get(usize::from(slave).checked_sub(1)?)?;
        Some(RxFrame::decode(&s.outputs))
    }

    pub fn drive_position(&self, slave: u16) -> Option<f64> {
        let state = self.state.lock();
        let s = state.slaves.get(usize::from(slave).checked_sub(1)?)?;
        Some(s.drive.position())
    }

    pub fn exchanges(&self) -> u64 {
        self.state.lock().exchanges
    }

    pub fn interface(&self) -> Option<String> {
        self.state.lock().interface.clone()
    }

    fn slave_mut<'s>(&self, state: &'s mut BusState, slave: u16) -> Option<&'s mut SimSlave> {
        let idx = usize::from(slave).checked_sub(1)?;
        state.slaves.get_mut(idx)
    }

    fn exchange(&self, state: &mut BusState) {
        let dt = self.config.cycle_time;
        for s in state.slaves.iter_mut().filter(|s| s.connected) {
            if s.record.state == LinkState::OPERATIONAL {
                let rx = RxFrame::decode(&s.outputs);
                s.inputs = s.drive.step(&rx, dt).encode();
            } else if s.record.state == LinkState::SAFE_OP {
                s.inputs = s.drive.feedback().encode();
            }
        }
    }
}

impl MasterTransport for SimulatedBus {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn init(&self, interface: &str) -> Result<(), TransportError> {
        if interface.is_empty() {
            return Err(TransportError::InitFailed {
                interface: interface.to_string(),
                reason: "empty interface name".to_string(),
            });
        }
        self.state.lock().interface = Some(interface.to_string());
        info!(interface, slaves = self.config.slave_count, "simulated bus opened");
        Ok(())
    }

    fn discover_and_configure(&self) -> Result<u16, TransportError> {
        let mut state = self.state.lock();
        if state.interface.is_none() {
            return Err(TransportError::Io("interface not initialized".to_string()));
        }
        let count = self.config.slave_count.min(MAX_SLAVES as u16);
        if count == 0 {
            return Err(TransportError::NoSlaves);
        }
        state.slaves = (1..=count)
            .map(|i| {
                let mut s = SimSlave::new(i, &self.config);
                s.record.state = LinkState::PRE_OP;
                s
            })
            .collect();
        state.discovered = true;
        state.mapped = false;
        debug!(count, "simulated slaves discovered");
        Ok(count)
    }

    fn slave_count(&self) -> u16 {
        self.state.lock().slaves.len() as u16
    }

    fn slave(&self, index: u16) -> Option<SlaveRecord> {
        let state = self.state.lock();
        let idx = usize::from(index).checked_sub(1)?;
        state.slaves.get(idx).map(|s| s.record)
    }

    fn read_state(&self) -> LinkState {
        let mut state = self.state.lock();
        let mut lowest: Option<LinkState> = None;
        for s in state.slaves.iter_mut() {
            if !s.connected {
                s.record.state = LinkState::NONE;
            }
            let base = s.record.state.base();
            if lowest.is_none_or(|l| base.raw() < l.raw()) {
                lowest = Some(base);
            }
        }
        lowest.unwrap_or(LinkState::NONE)
    }

    fn write_state(&self, slave: u16, link: LinkState) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if slave == 0 {
            for s in state.slaves.iter_mut() {
                s.request(link);
            }
            return Ok(());
        }
        let s = self
            .slave_mut(&mut state, slave)
            .ok_or(TransportError::InvalidSlave(slave))?;
        s.request(link);
        Ok(())
    }

    fn sdo_read(
        &self,
        slave: u16,
        index: u16,
        subindex: u8,
        buf: &mut [u8],
        _timeout: Duration,
    ) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        let s = self
            .slave_mut(&mut state, slave)
            .ok_or(TransportError::InvalidSlave(slave))?;
        if !s.connected {
            return Err(TransportError::SdoTimeout { slave, index, subindex });
        }
        let data = s
            .drive
            .read_object(index)
            .or_else(|| s.objects.get(&(index, subindex)).cloned())
            .ok_or(TransportError::SdoAbort {
                slave,
                index,
                subindex,
                abort_code: ABORT_NO_OBJECT,
            })?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn sdo_write(
        &self,
        slave: u16,
        index: u16,
        subindex: u8,
        data: &[u8],
        _timeout: Duration,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let failing = state.sdo_failures.contains(&index);
        let s = self
            .slave_mut(&mut state, slave)
            .ok_or(TransportError::InvalidSlave(slave))?;
        if !s.connected {
            return Err(TransportError::SdoTimeout { slave, index, subindex });
        }
        if failing {
            return Err(TransportError::SdoAbort {
                slave,
                index,
                subindex,
                abort_code: ABORT_GENERAL,
            });
        }
        s.objects.insert((index, subindex), data.to_vec());
        s.drive.write_object(index, data);
        state.sdo_log.push(SdoRecord {
            slave,
            index,
            subindex,
            data: data.to_vec(),
        });
        Ok(())
    }

    fn map_process_image(&self) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if !state.discovered || !state.slaves.iter().all(SimSlave::is_mapped) {
            return Err(TransportError::NotMapped);
        }
        state.mapped = true;
        let per_slave = mapped_bytes(PdoDirection::Rx.entries())
            + mapped_bytes(PdoDirection::Tx.entries());
        Ok(per_slave * state.slaves.len())
    }

    fn expected_wkc(&self) -> u16 {
        let state = self.state.lock();
        if state.mapped {
            state.slaves.len() as u16 * 3
        } else {
            0
        }
    }

    fn dc_sync0(
        &self,
        slave: u16,
        active: bool,
        cycle: Duration,
        shift_ns: i32,
    ) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        let s = self
            .slave_mut(&mut state, slave)
            .ok_or(TransportError::InvalidSlave(slave))?;
        s.record.dc_active = active && s.record.has_dc && s.connected;
        trace!(slave, active, cycle_ns = cycle.as_nanos() as u64, shift_ns, "SYNC0");
        Ok(())
    }

    fn configure_dc(&self) -> Result<(), TransportError> {
        self.state.lock().dc_configured = true;
        Ok(())
    }

    fn dc_time(&self) -> i64 {
        self.state.lock().dc_time_ns
    }

    fn send_process_data(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.mapped {
            return Err(TransportError::NotMapped);
        }
        self.exchange(&mut state);

        let mut wkc: u16 = state.slaves.iter().map(SimSlave::wkc).sum();
        if state.shortfalls_pending > 0 {
            state.shortfalls_pending -= 1;
            wkc = wkc.saturating_sub(1);
        }
        state.in_flight = Some(wkc);
        state.exchanges += 1;
        if state.dc_configured {
            state.dc_time_ns += self.config.cycle_time.as_nanos() as i64;
        }
        Ok(())
    }

    fn receive_process_data(&self, _timeout: Duration) -> u16 {
        self.state.lock().in_flight.take().unwrap_or(0)
    }

    fn write_outputs(&self, slave: u16, data: &[u8]) -> Result<(), TransportError> {
        if data.len() != RX_FRAME_SIZE {
            return Err(TransportError::FrameLength {
                expected: RX_FRAME_SIZE,
                actual: data.len(),
            });
        }
        let mut state = self.state.lock();
        let s = self
            .slave_mut(&mut state, slave)
            .ok_or(TransportError::InvalidSlave(slave))?;
        s.outputs.copy_from_slice(data);
        Ok(())
    }

    fn read_inputs(&self, slave: u16, buf: &mut [u8]) -> Result<(), TransportError> {
        if buf.len() < TX_FRAME_SIZE {
            return Err(TransportError::FrameLength {
                expected: TX_FRAME_SIZE,
                actual: buf.len(),
            });
        }
        let mut state = self.state.lock();
        let s = self
            .slave_mut(&mut state, slave)
            .ok_or(TransportError::InvalidSlave(slave))?;
        buf[..TX_FRAME_SIZE].copy_from_slice(&s.inputs);
        Ok(())
    }

    fn reconfigure_slave(&self, slave: u16, _timeout: Duration) -> bool {
        let mut state = self.state.lock();
        match self.slave_mut(&mut state, slave) {
            Some(s) if s.connected => {
                s.record.state = LinkState::SAFE_OP;
                s.record.al_status = 0;
                true
            }
            _ => false,
        }
    }

    fn recover_slave(&self, slave: u16, _timeout: Duration) -> bool {
        let mut state = self.state.lock();
        let config = self.config;
        match self.slave_mut(&mut state, slave) {
            Some(s) if s.connected => {
                s.record.state = LinkState::INIT;
                true
            }
            Some(s) if s.revive_on_recovery => {
                let objects = std::mem::take(&mut s.objects);
                let lost = s.record.lost;
                *s = SimSlave::new(slave, &config);
                s.objects = objects;
                s.record.lost = lost;
                true
            }
            _ => false,
        }
    }

    fn mark_lost(&self, slave: u16, lost: bool) {
        if let Some(s) = self.slave_mut(&mut self.state.lock(), slave) {
            s.record.lost = lost;
        }
    }

    fn close(&self) {
        let mut state = self.state.lock();
        if let Some(interface) = state.interface.take() {
            state.mapped = false;
            state.in_flight = None;
            info!(interface, exchanges = state.exchanges, "simulated bus closed");
        }
    }
}
