//! Mocks shared by the unit tests of this crate

use async_trait::async_trait;
use lambdo_machines::{Machine, MachineOperations, MachinesError};

mockall::mock! {
    pub Machines {}

    #[async_trait]
    impl MachineOperations for Machines {
        async fn create_machine(&self, app: &str, machine: &Machine) -> Result<Machine, MachinesError>;
        async fn get_machine(&self, app: &str, machine_id: &str) -> Result<Machine, MachinesError>;
        async fn list_machines(&self, app: &str) -> Result<Vec<Machine>, MachinesError>;
        async fn delete_machine(
            &self,
            app: &str,
            machine_id: &str,
            force: bool,
        ) -> Result<(), MachinesError>;
        async fn start_machine(&self, app: &str, machine_id: &str) -> Result<(), MachinesError>;
        async fn stop_machine(&self, app: &str, machine_id: &str) -> Result<(), MachinesError>;
    }
}

/// A machine as the API would return it after creation
pub fn created(request: &Machine, id: &str) -> Machine {
    Machine {
        id: id.to_string(),
        ..request.clone()
    }
}
