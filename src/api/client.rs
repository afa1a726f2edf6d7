use crate::error::ApiError;
use crate::model::{
    validation, ClientConfig, CreatePlanInput, Plan, PlanWithPhases, RunWithPhases,
    StartRunInput, UpdatePlanInput, API_PREFIX,
};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

/// Error body convention of the backend: `{ "message": "..." }`, all optional.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

#[derive(Clone)]
pub struct OrchestratorClient {
    http: reqwest::Client,
    base: String,
}

impl OrchestratorClient {
    pub fn new(cfg: &ClientConfig) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder().user_agent(cfg.user_agent.clone());
        if let Some(timeout) = cfg.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build().map_err(|source| ApiError::Transport {
            context: "Failed to build HTTP client",
            source,
        })?;
        Ok(Self {
            http,
            base: format!("{}{}", cfg.base_url.trim_end_matches('/'), API_PREFIX),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http.request(method, self.url(path))
    }

    /// Send and map non-2xx responses onto `ApiError::Backend`.
    async fn send(&self, req: RequestBuilder, context: &'static str) -> Result<Response, ApiError> {
        let resp = req
            .send()
            .await
            .map_err(|source| ApiError::Transport { context, source })?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let message = resp
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.message)
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| context.to_string());
        debug!(%status, %message, "backend rejected request");
        Err(ApiError::Backend { status, message })
    }

    async fn json<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
        context: &'static str,
    ) -> Result<T, ApiError> {
        self.send(req, context)
            .await?
            .json::<T>()
            .await
            .map_err(|source| ApiError::Decode { context, source })
    }

    pub async fn list_plans(&self) -> Result<Vec<Plan>, ApiError> {
        self.json(self.request(Method::GET, "/plans"), "Failed to fetch plans")
            .await
    }

    pub async fn create_plan(&self, input: &CreatePlanInput) -> Result<Plan, ApiError> {
        validation::validate_create_plan(input)?;
        self.json(
            self.request(Method::POST, "/plans").json(input),
            "Failed to create plan",
        )
        .await
    }

    pub async fn get_plan(&self, plan_id: &str) -> Result<PlanWithPhases, ApiError> {
        self.json(
            self.request(Method::GET, &format!("/plans/{plan_id}")),
            "Failed to fetch plan",
        )
        .await
    }

    pub async fn update_plan(
        &self,
        plan_id: &str,
        input: &UpdatePlanInput,
    ) -> Result<PlanWithPhases, ApiError> {
        validation::validate_update_plan(input)?;
        self.json(
            self.request(Method::PATCH, &format!("/plans/{plan_id}"))
                .json(input),
            "Failed to update plan",
        )
        .await
    }

    pub async fn delete_plan(&self, plan_id: &str) -> Result<(), ApiError> {
        self.send(
            self.request(Method::DELETE, &format!("/plans/{plan_id}")),
            "Failed to delete plan",
        )
        .await
        .map(|_| ())
    }

    pub async fn start_run(&self, plan_id: &str) -> Result<RunWithPhases, ApiError> {
        let input = StartRunInput {
            plan_id: plan_id.to_string(),
        };
        validation::validate_start_run(&input)?;
        self.json(
            self.request(Method::POST, "/runs").json(&input),
            "Failed to start run",
        )
        .await
    }

    pub async fn get_run(&self, run_id: &str) -> Result<RunWithPhases, ApiError> {
        self.json(
            self.request(Method::GET, &format!("/runs/{run_id}")),
            "Failed to fetch run",
        )
        .await
    }

    pub async fn cancel_run(&self, run_id: &str) -> Result<(), ApiError> {
        self.send(
            self.request(Method::POST, &format!("/runs/{run_id}/cancel")),
            "Failed to cancel run",
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RunStatus;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    const PLAN_ID: &str = "7c9e6679-7425-40de-944b-e07fc1f90ae7";

    fn client_for(server: &MockServer) -> OrchestratorClient {
        OrchestratorClient::new(&ClientConfig {
            base_url: server.base_url(),
            poll_interval: Duration::from_secs(2),
            request_timeout: Some(Duration::from_secs(5)),
            user_agent: "phase-orchestrator-cli/test".into(),
        })
        .unwrap()
    }

    fn run_body(status: &str) -> serde_json::Value {
        json!({
            "id": "R1",
            "planId": PLAN_ID,
            "status": status,
            "currentPhase": 0,
            "errorMessage": null,
            "startedAt": null,
            "completedAt": null,
            "createdAt": "2025-01-01T00:00:00Z",
            "updatedAt": "2025-01-01T00:00:00Z",
            "phaseExecutions": []
        })
    }

    #[tokio::test]
    async fn start_run_posts_plan_id() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/phase-orchestrator/runs")
                .json_body(json!({ "planId": PLAN_ID }));
            then.status(201)
                .header("content-type", "application/json")
                .json_body(run_body("pending"));
        });

        let run = client_for(&server).start_run(PLAN_ID).await.unwrap();

        mock.assert();
        assert_eq!(run.run.id, "R1");
        assert_eq!(run.status(), RunStatus::Pending);
    }

    #[tokio::test]
    async fn start_run_rejects_non_uuid_without_request() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(POST).path("/phase-orchestrator/runs");
            then.status(201);
        });

        let err = client_for(&server).start_run("P1").await.unwrap_err();

        mock.assert_hits(0);
        assert!(matches!(err, ApiError::Validation(_)));
    }

    #[tokio::test]
    async fn backend_message_is_surfaced() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/phase-orchestrator/runs/R1/cancel");
            then.status(409)
                .header("content-type", "application/json")
                .json_body(json!({ "message": "Run is not active" }));
        });

        let err = client_for(&server).cancel_run("R1").await.unwrap_err();

        assert_eq!(err.to_string(), "Run is not active");
    }

    #[tokio::test]
    async fn missing_error_body_falls_back_to_generic_message() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/phase-orchestrator/runs/R1");
            then.status(500).body("upstream exploded");
        });

        let err = client_for(&server).get_run("R1").await.unwrap_err();

        assert_eq!(err.to_string(), "Failed to fetch run");
    }

    #[tokio::test]
    async fn malformed_success_body_is_a_decode_error() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/phase-orchestrator/plans");
            then.status(200)
                .header("content-type", "application/json")
                .body("{\"not\": \"a list\"}");
        });

        let err = client_for(&server).list_plans().await.unwrap_err();

        assert!(matches!(err, ApiError::Decode { .. }));
    }

    #[tokio::test]
    async fn delete_plan_accepts_empty_204() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(DELETE).path(format!("/phase-orchestrator/plans/{PLAN_ID}"));
            then.status(204);
        });

        client_for(&server).delete_plan(PLAN_ID).await.unwrap();

        mock.assert();
    }

    #[tokio::test]
    async fn update_plan_sends_only_changed_fields() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(httpmock::Method::PATCH)
                .path(format!("/phase-orchestrator/plans/{PLAN_ID}"))
                .json_body(json!({ "name": "Renamed" }));
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "id": PLAN_ID,
                    "name": "Renamed",
                    "content": "## Phase 1: Foundation\n- task",
                    "phaseCount": 1,
                    "createdAt": "2025-01-01T00:00:00Z",
                    "updatedAt": "2025-01-02T00:00:00Z",
                    "parsedPhases": [
                        { "number": 1, "name": "Foundation", "tasks": ["task"], "rawContent": "- task" }
                    ]
                }));
        });

        let input = UpdatePlanInput {
            name: Some("Renamed".into()),
            ..Default::default()
        };
        let plan = client_for(&server)
            .update_plan(PLAN_ID, &input)
            .await
            .unwrap();

        mock.assert();
        assert_eq!(plan.plan.name, "Renamed");
        assert_eq!(plan.parsed_phases[0].tasks, vec!["task".to_string()]);
    }

    #[tokio::test]
    async fn unreachable_backend_is_a_transport_error() {
        let client = OrchestratorClient::new(&ClientConfig {
            base_url: "http://127.0.0.1:1".into(),
            poll_interval: Duration::from_secs(2),
            request_timeout: Some(Duration::from_secs(2)),
            user_agent: "phase-orchestrator-cli/test".into(),
        })
        .unwrap();

        let err = client.list_plans().await.unwrap_err();

        assert!(matches!(err, ApiError::Transport { .. }));
        assert!(err.to_string().starts_with("Failed to fetch plans"));
    }
}
