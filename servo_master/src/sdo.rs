//! Mode parameter downloads.
//!
//! A confirmed parameter block is written to every slave in bus order,
//! object by object. The first failure stops the download and is
//! returned; nothing is rolled back or retried.

use std::time::Duration;

use servo_common::drive::params::ModeParams;
use servo_common::transport::MasterTransport;
use tracing::{debug, info};

use crate::error::RequestError;

/// Write `params` to every slave.
pub fn apply_params<T: MasterTransport + ?Sized>(
    transport: &T,
    params: &ModeParams,
    timeout: Duration,
) -> Result<(), RequestError> {
    params.validate()?;
    let writes = params.sdo_writes();
    if writes.is_empty() {
        return Ok(());
    }

    for slave in 1..=transport.slave_count() {
        for w in &writes {
            let (bytes, len) = w.value.to_le_bytes();
            transport
                .sdo_write(slave, w.index, w.subindex, &bytes[..len], timeout)
                .map_err(|source| RequestError::ParamWrite {
                    slave,
                    index: w.index,
                    subindex: w.subindex,
                    source,
                })?;
            debug!(slave, index = format_args!("{:#06x}", w.index), value = ?w.value, "parameter written");
        }
    }

    info!(mode = %params.mode(), objects = writes.len(), "mode parameters applied");
    Ok(())
}
