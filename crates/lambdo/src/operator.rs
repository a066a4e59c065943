//! Operator commands against the Machines API

use anyhow::{Context, Result};
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, ContentArrangement, Table};
use lambdo_machines::{HttpSend, Machine, MachinesClient, WaitConfig};
use std::io::Write;
use tokio_util::sync::CancellationToken;

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum AppCommand {
    /// Show the configured app
    Show,
    /// Create the app unless it already exists
    Ensure,
    /// Delete the app and all of its machines
    Destroy,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum MachinesCommand {
    /// List machines of the app
    List,
    /// Show one machine
    Status { machine_id: String },
    /// Wait until a machine is started, stopping or stopped
    Wait { machine_id: String },
    Start { machine_id: String },
    Stop { machine_id: String },
    /// Destroy a machine
    Destroy {
        machine_id: String,
        /// Kill the machine if it is still running
        #[arg(long)]
        force: bool,
    },
}

pub async fn run_app_command<S: HttpSend>(
    client: &MachinesClient<S>,
    app: &str,
    org: &str,
    command: &AppCommand,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        AppCommand::Show => {
            let found = client
                .get_app(app)
                .await
                .with_context(|| format!("Failed to get app {app}"))?;
            writeln!(out, "{}\t{}", found.name, found.organization.slug)?;
        }
        AppCommand::Ensure => {
            let found = client
                .find_or_create_app(app, org)
                .await
                .with_context(|| format!("Failed to ensure app {app}"))?;
            writeln!(out, "{}\t{}", found.name, found.organization.slug)?;
        }
        AppCommand::Destroy => {
            client
                .delete_app(app)
                .await
                .with_context(|| format!("Failed to delete app {app}"))?;
            writeln!(out, "Deleted {app}")?;
        }
    }
    Ok(())
}

pub async fn run_machines_command<S: HttpSend>(
    client: &MachinesClient<S>,
    app: &str,
    command: &MachinesCommand,
    cancel: &CancellationToken,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        MachinesCommand::List => {
            let machines = client
                .list_machines(app)
                .await
                .with_context(|| format!("Failed to list machines of {app}"))?;
            write_machine_table(out, &machines)?;
        }
        MachinesCommand::Status { machine_id } => {
            let machine = client
                .get_machine(app, machine_id)
                .await
                .with_context(|| format!("Failed to get machine {machine_id}"))?;
            write_machine_table(out, std::slice::from_ref(&machine))?;
        }
        MachinesCommand::Wait { machine_id } => {
            let machine = client
                .wait_for_machine(app, machine_id, WaitConfig::default(), Some(cancel))
                .await
                .with_context(|| format!("Machine {machine_id} did not initialize"))?;
            write_machine_table(out, std::slice::from_ref(&machine))?;
        }
        MachinesCommand::Start { machine_id } => {
            client
                .start_machine(app, machine_id)
                .await
                .with_context(|| format!("Failed to start machine {machine_id}"))?;
            writeln!(out, "Started {machine_id}")?;
        }
        MachinesCommand::Stop { machine_id } => {
            client
                .stop_machine(app, machine_id)
                .await
                .with_context(|| format!("Failed to stop machine {machine_id}"))?;
            writeln!(out, "Stopped {machine_id}")?;
        }
        MachinesCommand::Destroy { machine_id, force } => {
            client
                .delete_machine(app, machine_id, *force)
                .await
                .with_context(|| format!("Failed to destroy machine {machine_id}"))?;
            writeln!(out, "Destroyed {machine_id}")?;
        }
    }
    Ok(())
}

fn write_machine_table(out: &mut impl Write, machines: &[Machine]) -> std::io::Result<()> {
    if machines.is_empty() {
        return writeln!(out, "No machines");
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID"),
            Cell::new("State"),
            Cell::new("Region"),
            Cell::new("Name"),
            Cell::new("Image"),
        ]);

    for machine in machines {
        table.add_row(vec![
            Cell::new(&machine.id),
            Cell::new(machine.state.map_or("-", |s| s.as_str())),
            Cell::new(&machine.region),
            Cell::new(&machine.name),
            Cell::new(&machine.config.image),
        ]);
    }

    writeln!(out, "{table}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use lambdo_machines::{ApiRequest, ApiResponse, RetryPolicy, SendError, Transport};
    use reqwest::{Method, StatusCode};
    use std::sync::{Arc, Mutex};

    /// Answers every request with the same status and body and records URLs
    #[derive(Clone)]
    struct FixedSender {
        status: StatusCode,
        body: &'static str,
        seen: Arc<Mutex<Vec<(Method, String)>>>,
    }

    #[async_trait]
    impl HttpSend for FixedSender {
        async fn send(&self, request: &ApiRequest) -> Result<ApiResponse, SendError> {
            self.seen
                .lock()
                .unwrap()
                .push((request.method.clone(), request.url.clone()));
            Ok(ApiResponse::new(self.status, self.body.as_bytes().to_vec()))
        }
    }

    fn client(
        status: StatusCode,
        body: &'static str,
    ) -> (MachinesClient<FixedSender>, Arc<Mutex<Vec<(Method, String)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sender = FixedSender {
            status,
            body,
            seen: seen.clone(),
        };
        let client = MachinesClient::with_transport(
            Transport::with_sender(sender, RetryPolicy::without_delays()),
            "https://machines.test",
            "t",
        );
        (client, seen)
    }

    #[tokio::test]
    async fn test_lists_machines_as_a_table() {
        let (client, _) = client(
            StatusCode::OK,
            r#"[{"id":"m1","name":"quiet-sun","state":"started","region":"bos","config":{"image":"worker:1"}}]"#,
        );
        let mut out = Vec::new();
        run_machines_command(
            &client,
            "jobs",
            &MachinesCommand::List,
            &CancellationToken::new(),
            &mut out,
        )
        .await
        .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("ID"));
        assert!(text.contains("Image"));
        let row = text.lines().find(|l| l.contains("m1")).unwrap();
        assert!(row.contains("started"));
        assert!(row.contains("bos"));
        assert!(row.contains("quiet-sun"));
        assert!(row.contains("worker:1"));
    }

    #[tokio::test]
    async fn test_empty_machine_list() {
        let (client, _) = client(StatusCode::OK, "[]");
        let mut out = Vec::new();
        run_machines_command(
            &client,
            "jobs",
            &MachinesCommand::List,
            &CancellationToken::new(),
            &mut out,
        )
        .await
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "No machines\n");
    }

    #[tokio::test]
    async fn test_forced_destroy_kills() {
        let (client, seen) = client(StatusCode::OK, "");
        let mut out = Vec::new();
        run_machines_command(
            &client,
            "jobs",
            &MachinesCommand::Destroy {
                machine_id: "m1".into(),
                force: true,
            },
            &CancellationToken::new(),
            &mut out,
        )
        .await
        .unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![(
                Method::DELETE,
                "https://machines.test/v1/apps/jobs/machines/m1?kill=true".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_missing_app_is_an_error() {
        let (client, _) = client(StatusCode::NOT_FOUND, "");
        let mut out = Vec::new();
        let err = run_app_command(&client, "jobs", "personal", &AppCommand::Show, &mut out)
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("jobs"));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_start_failure_is_reported() {
        let (client, _) = client(StatusCode::INTERNAL_SERVER_ERROR, "");
        let mut out = Vec::new();
        let err = run_machines_command(
            &client,
            "jobs",
            &MachinesCommand::Start {
                machine_id: "m1".into(),
            },
            &CancellationToken::new(),
            &mut out,
        )
        .await
        .unwrap_err();
        assert!(format!("{err:#}").contains("500"));
    }
}
