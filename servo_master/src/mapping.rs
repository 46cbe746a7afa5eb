//! PDO mapping over SDO.
//!
//! Per slave and direction the sequence is:
//!
//! 1. mapping object sub 0 := 0 (unlock)
//! 2. mapping object sub 1..=6 := entry words
//! 3. mapping object sub 0 := 6
//! 4. assignment object sub 0 := 0
//! 5. assignment object sub 1 := mapping object index
//! 6. assignment object sub 0 := 1
//!
//! Any failed write aborts bring-up; nothing is retried.

use std::time::Duration;

use servo_common::pdo::PdoDirection;
use servo_common::transport::{MasterTransport, TransportError};
use tracing::{debug, info};

use crate::error::MasterError;

/// The I/O image built after every slave is mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessImage {
    pub slaves: u16,
    pub image_bytes: usize,
    pub expected_wkc: u16,
}

pub struct PdoMapper<'a, T: MasterTransport + ?Sized> {
    transport: &'a T,
    sdo_timeout: Duration,
}

impl<'a, T: MasterTransport + ?Sized> PdoMapper<'a, T> {
    pub fn new(transport: &'a T, sdo_timeout: Duration) -> Self {
        Self {
            transport,
            sdo_timeout,
        }
    }

    /// Program the output (RxPDO) mapping of one slave.
    pub fn configure_rx(&self, slave: u16) -> Result<(), MasterError> {
        self.program(slave, PdoDirection::Rx)
    }

    /// Program the input (TxPDO) mapping of one slave.
    pub fn configure_tx(&self, slave: u16) -> Result<(), MasterError> {
        self.program(slave, PdoDirection::Tx)
    }

    /// Map every slave, build the I/O image, then wait `settle`.
    pub fn configure_all(&self, settle: Duration) -> Result<ProcessImage, MasterError> {
        let slaves = self.transport.slave_count();
        for slave in 1..=slaves {
            self.configure_rx(slave)?;
            self.configure_tx(slave)?;
            debug!(slave, "PDO mapping programmed");
        }

        let image_bytes = self.transport.map_process_image()?;
        let expected_wkc = self.transport.expected_wkc();
        std::thread::sleep(settle);

        info!(slaves, image_bytes, expected_wkc, "process image mapped");
        Ok(ProcessImage {
            slaves,
            image_bytes,
            expected_wkc,
        })
    }

    fn program(&self, slave: u16, direction: PdoDirection) -> Result<(), MasterError> {
        let mapping = direction.mapping_object();
        let assign = direction.assign_object();
        let entries = direction.entries();

        self.write(slave, mapping, 0, &[0])?;
        for (sub, entry) in (1u8..).zip(entries.iter()) {
            self.write(slave, mapping, sub, &entry.word().to_le_bytes())?;
        }
        self.write(slave, mapping, 0, &[entries.len() as u8])?;

        self.write(slave, assign, 0, &[0])?;
        self.write(slave, assign, 1, &mapping.to_le_bytes())?;
        self.write(slave, assign, 0, &[1])?;
        Ok(())
    }

    fn write(&self, slave: u16, object: u16, subindex: u8, data: &[u8]) -> Result<(), MasterError> {
        self.transport
            .sdo_write(slave, object, subindex, data, self.sdo_timeout)
            .map_err(|source: TransportError| MasterError::Mapping {
                slave,
                object,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimConfig, SimulatedBus};

    fn bus() -> SimulatedBus {
        let bus = SimulatedBus::new(SimConfig {
            slave_count: 2,
            ..SimConfig::default()
        });
        bus.init("sim0").unwrap();
        bus.discover_and_configure().unwrap();
        bus
    }

    #[test]
    fn rx_sequence_matches_object_protocol() {
        let bus = bus();
        PdoMapper::new(&bus, Duration::from_millis(10))
            .configure_rx(1)
            .unwrap();

        let log: Vec<(u16, u8, Vec<u8>)> = bus
            .sdo_log()
            .into_iter()
            .map(|r| (r.index, r.subindex, r.data))
            .collect();
        assert_eq!(log.len(), 11);
        assert_eq!(log[0], (0x1600, 0, vec![0]));
        assert_eq!(log[1], (0x1600, 1, 0x6040_0010u32.to_le_bytes().to_vec()));
        assert_eq!(log[6], (0x1600, 6, 0x0000_0008u32.to_le_bytes().to_vec()));
        assert_eq!(log[7], (0x1600, 0, vec![6]));
        assert_eq!(log[8], (0x1C12, 0, vec![0]));
        assert_eq!(log[9], (0x1C12, 1, vec![0x00, 0x16]));
        assert_eq!(log[10], (0x1C12, 0, vec![1]));
    }

    #[test]
    fn configure_all_builds_image() {
        let bus = bus();
        let image = PdoMapper::new(&bus, Duration::from_millis(10))
            .configure_all(Duration::ZERO)
            .unwrap();
        assert_eq!(image.slaves, 2);
        assert_eq!(image.image_bytes, 2 * 28);
        assert_eq!(image.expected_wkc, 6);
    }

    #[test]
    fn failed_write_names_slave_and_object() {
        let bus = bus();
        bus.fail_sdo(0x1C13);
        let err = PdoMapper::new(&bus, Duration::from_millis(10))
            .configure_all(Duration::ZERO)
            .unwrap_err();
        assert!(matches!(
            err,
            MasterError::Mapping {
                slave: 1,
                object: 0x1C13,
                ..
            }
        ));
    }
}
