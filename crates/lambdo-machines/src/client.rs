//! Typed Machines API operations
//!
//! Thin wrappers around `Transport` that build the request for each endpoint
//! and translate HTTP statuses into `MachinesError`.

use crate::error::MachinesError;
use crate::transport::{ApiRequest, ApiResponse, HttpSend, ReqwestSender, Transport};
use crate::types::{App, CreateAppBody, Machine, Organization};
use crate::wait::{wait_for_machine, WaitConfig};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Public Machines API endpoint
pub const DEFAULT_API_BASE_URL: &str = "https://api.machines.dev";

/// Organization used when creating apps without an explicit one
pub const DEFAULT_ORG: &str = "personal";

/// Machines API client
pub struct MachinesClient<S = ReqwestSender> {
    transport: Transport<S>,
    base_url: String,
    token: String,
}

impl MachinesClient<ReqwestSender> {
    /// Create a client with the default transport and retry policy
    pub fn new(base_url: &str, token: &str) -> Result<Self, MachinesError> {
        Ok(Self::with_transport(Transport::new()?, base_url, token))
    }
}

impl<S: HttpSend> MachinesClient<S> {
    pub fn with_transport(transport: Transport<S>, base_url: &str, token: &str) -> Self {
        Self {
            transport,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> ApiRequest {
        ApiRequest::new(method, format!("{}/v1{}", self.base_url, path), &self.token)
    }

    fn json_request<T: Serialize>(
        &self,
        method: Method,
        path: &str,
        operation: &'static str,
        body: &T,
    ) -> Result<ApiRequest, MachinesError> {
        let body =
            serde_json::to_vec(body).map_err(|source| MachinesError::Encode { operation, source })?;
        debug!(operation, body = %String::from_utf8_lossy(&body), "Request body");
        Ok(self.request(method, path).with_body(body))
    }

    async fn call(&self, request: ApiRequest) -> Result<ApiResponse, MachinesError> {
        Ok(self.transport.execute(&request).await?)
    }

    fn decode<T: DeserializeOwned>(
        operation: &'static str,
        response: &ApiResponse,
    ) -> Result<T, MachinesError> {
        serde_json::from_slice(&response.body)
            .map_err(|source| MachinesError::Decode { operation, source })
    }

    fn status_error(operation: &'static str, response: &ApiResponse) -> MachinesError {
        MachinesError::Status {
            operation,
            status: response.status.as_u16(),
        }
    }

    // ── Apps ────────────────────────────────────────────────────────────

    /// Create an app on its own `<name>-net` network
    pub async fn create_app(&self, name: &str, org: &str) -> Result<App, MachinesError> {
        let body = CreateAppBody {
            app_name: name,
            org_slug: org,
            network: format!("{name}-net"),
        };
        let request = self.json_request(Method::POST, "/apps", "create app", &body)?;
        let response = self.call(request).await?;

        if response.is_failure() {
            return Err(Self::status_error("create app", &response));
        }

        info!(app = %name, org = %org, "Created app");
        Ok(App {
            name: name.to_string(),
            organization: Organization {
                slug: org.to_string(),
                ..Default::default()
            },
        })
    }

    pub async fn get_app(&self, name: &str) -> Result<App, MachinesError> {
        let response = self
            .call(self.request(Method::GET, &format!("/apps/{name}")))
            .await?;

        if response.status == StatusCode::NOT_FOUND {
            return Err(MachinesError::AppNotFound {
                app: name.to_string(),
            });
        }
        if response.is_failure() {
            return Err(Self::status_error("get app", &response));
        }

        debug!(app = %name, body = %response.body_text(), "GetApp response");
        Self::decode("get app", &response)
    }

    /// Delete an app and its machines. Error statuses are logged, not returned.
    pub async fn delete_app(&self, name: &str) -> Result<(), MachinesError> {
        let response = self
            .call(self.request(Method::DELETE, &format!("/apps/{name}")))
            .await?;

        if response.is_failure() {
            error!(app = %name, status = response.status.as_u16(), "Could not delete app");
        }
        Ok(())
    }

    /// Return the app if it exists, otherwise create it
    pub async fn find_or_create_app(&self, name: &str, org: &str) -> Result<App, MachinesError> {
        match self.get_app(name).await {
            Ok(app) => Ok(app),
            Err(e) if e.is_app_not_found() => {
                info!(app = %name, "App not found, creating it");
                self.create_app(name, org).await
            }
            Err(e) => Err(e),
        }
    }

    // ── Machines ────────────────────────────────────────────────────────

    pub async fn create_machine(&self, app: &str, machine: &Machine) -> Result<Machine, MachinesError> {
        let request = self.json_request(
            Method::POST,
            &format!("/apps/{app}/machines"),
            "create machine",
            machine,
        )?;
        let response = self.call(request).await?;

        if response.status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(MachinesError::Unprocessable {
                status: response.status.as_u16(),
                body: response.body_text(),
            });
        }
        if response.is_failure() {
            return Err(Self::status_error("create machine", &response));
        }

        Self::decode("create machine", &response)
    }

    pub async fn get_machine(&self, app: &str, machine_id: &str) -> Result<Machine, MachinesError> {
        let response = self
            .call(self.request(Method::GET, &format!("/apps/{app}/machines/{machine_id}")))
            .await?;

        // Malformed machine ids come back as 400 rather than 404
        if matches!(
            response.status,
            StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST
        ) {
            return Err(MachinesError::MachineNotFound {
                app: app.to_string(),
                machine: machine_id.to_string(),
            });
        }
        if response.is_failure() {
            return Err(Self::status_error("get machine", &response));
        }

        debug!(app = %app, machine_id = %machine_id, body = %response.body_text(), "GetMachine response");
        Self::decode("get machine", &response)
    }

    pub async fn list_machines(&self, app: &str) -> Result<Vec<Machine>, MachinesError> {
        let response = self
            .call(self.request(Method::GET, &format!("/apps/{app}/machines")))
            .await?;

        if response.is_failure() {
            return Err(Self::status_error("list machines", &response));
        }

        Self::decode("list machines", &response)
    }

    /// Destroy a machine. Error statuses are logged, not returned.
    pub async fn delete_machine(
        &self,
        app: &str,
        machine_id: &str,
        force: bool,
    ) -> Result<(), MachinesError> {
        let kill = if force { "?kill=true" } else { "" };
        let response = self
            .call(self.request(
                Method::DELETE,
                &format!("/apps/{app}/machines/{machine_id}{kill}"),
            ))
            .await?;

        if response.is_failure() {
            error!(
                app = %app,
                machine_id = %machine_id,
                status = response.status.as_u16(),
                "Could not delete machine"
            );
        }
        Ok(())
    }

    pub async fn start_machine(&self, app: &str, machine_id: &str) -> Result<(), MachinesError> {
        let response = self
            .call(self.request(
                Method::POST,
                &format!("/apps/{app}/machines/{machine_id}/start"),
            ))
            .await?;

        if response.is_failure() {
            return Err(Self::status_error("start machine", &response));
        }
        Ok(())
    }

    pub async fn stop_machine(&self, app: &str, machine_id: &str) -> Result<(), MachinesError> {
        let response = self
            .call(self.request(
                Method::POST,
                &format!("/apps/{app}/machines/{machine_id}/stop"),
            ))
            .await?;

        if response.is_failure() {
            return Err(Self::status_error("stop machine", &response));
        }
        Ok(())
    }

    /// Poll a machine until it is initialized. See [`wait_for_machine`].
    pub async fn wait_for_machine(
        &self,
        app: &str,
        machine_id: &str,
        config: WaitConfig,
        cancel: Option<&CancellationToken>,
    ) -> Result<Machine, MachinesError> {
        wait_for_machine(self, app, machine_id, config, cancel).await
    }
}

impl<S> std::fmt::Debug for MachinesClient<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MachinesClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}
