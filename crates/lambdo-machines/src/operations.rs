//! Machine operations trait for testing

use crate::client::MachinesClient;
use crate::error::MachinesError;
use crate::transport::HttpSend;
use crate::types::Machine;
use async_trait::async_trait;

/// Trait for machine operations that can be mocked in tests.
///
/// Failover, readiness polling and the dispatch engine only depend on this
/// trait, so they can be exercised without the Machines API.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MachineOperations: Send + Sync {
    /// Create a machine in `machine.region`
    async fn create_machine(&self, app: &str, machine: &Machine) -> Result<Machine, MachinesError>;

    /// Fetch a single machine
    async fn get_machine(&self, app: &str, machine_id: &str) -> Result<Machine, MachinesError>;

    /// List every machine of an app
    async fn list_machines(&self, app: &str) -> Result<Vec<Machine>, MachinesError>;

    /// Destroy a machine; `force` kills it if it is still running
    async fn delete_machine(
        &self,
        app: &str,
        machine_id: &str,
        force: bool,
    ) -> Result<(), MachinesError>;

    async fn start_machine(&self, app: &str, machine_id: &str) -> Result<(), MachinesError>;

    async fn stop_machine(&self, app: &str, machine_id: &str) -> Result<(), MachinesError>;
}

#[async_trait]
impl<S: HttpSend> MachineOperations for MachinesClient<S> {
    async fn create_machine(&self, app: &str, machine: &Machine) -> Result<Machine, MachinesError> {
        MachinesClient::create_machine(self, app, machine).await
    }

    async fn get_machine(&self, app: &str, machine_id: &str) -> Result<Machine, MachinesError> {
        MachinesClient::get_machine(self, app, machine_id).await
    }

    async fn list_machines(&self, app: &str) -> Result<Vec<Machine>, MachinesError> {
        MachinesClient::list_machines(self, app).await
    }

    async fn delete_machine(
        &self,
        app: &str,
        machine_id: &str,
        force: bool,
    ) -> Result<(), MachinesError> {
        MachinesClient::delete_machine(self, app, machine_id, force).await
    }

    async fn start_machine(&self, app: &str, machine_id: &str) -> Result<(), MachinesError> {
        MachinesClient::start_machine(self, app, machine_id).await
    }

    async fn stop_machine(&self, app: &str, machine_id: &str) -> Result<(), MachinesError> {
        MachinesClient::stop_machine(self, app, machine_id).await
    }
}
