//! Region-failover machine creation

use crate::error::MachinesError;
use crate::operations::MachineOperations;
use crate::types::{Machine, MachineConfig};
use tracing::{debug, error, info};

/// Create a machine in the first region that accepts it.
///
/// Regions are tried strictly in the given order, one at a time. Each failed
/// attempt is logged with its region and index; the individual errors are not
/// kept. When every region fails (or `regions` is empty) the result is
/// `MachinesError::AllRegionsFailed`.
pub async fn create_with_failover<M>(
    machines: &M,
    app: &str,
    config: &MachineConfig,
    regions: &[String],
) -> Result<Machine, MachinesError>
where
    M: MachineOperations + ?Sized,
{
    for (attempt, region) in regions.iter().enumerate() {
        debug!(app = %app, image = %config.image, region = %region, attempt, "Creating machine");

        let request = Machine::in_region(region.clone(), config.clone());
        match machines.create_machine(app, &request).await {
            Ok(machine) => {
                info!(
                    app = %app,
                    machine_id = %machine.id,
                    region = %region,
                    attempt,
                    "Created machine"
                );
                return Ok(machine);
            }
            Err(e) => {
                error!(
                    app = %app,
                    region = %region,
                    attempt,
                    error = %e,
                    "Could not create machine"
                );
            }
        }
    }

    Err(MachinesError::AllRegionsFailed {
        regions: regions.to_vec(),
    })
}
