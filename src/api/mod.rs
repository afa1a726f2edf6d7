//! Backend REST access.
//!
//! `OrchestratorClient` covers the whole REST surface; the sync core only sees
//! the narrower `RunBackend` trait so it can run against a fake in tests.

mod client;

pub use client::OrchestratorClient;

use crate::error::ApiError;
use crate::model::RunWithPhases;
use async_trait::async_trait;

/// Run-side operations the sync core needs from the backend.
#[async_trait]
pub trait RunBackend: Send + Sync {
    async fn get_run(&self, run_id: &str) -> Result<RunWithPhases, ApiError>;
    async fn start_run(&self, plan_id: &str) -> Result<RunWithPhases, ApiError>;
    async fn cancel_run(&self, run_id: &str) -> Result<(), ApiError>;
}

#[async_trait]
impl RunBackend for OrchestratorClient {
    async fn get_run(&self, run_id: &str) -> Result<RunWithPhases, ApiError> {
        OrchestratorClient::get_run(self, run_id).await
    }

    async fn start_run(&self, plan_id: &str) -> Result<RunWithPhases, ApiError> {
        OrchestratorClient::start_run(self, plan_id).await
    }

    async fn cancel_run(&self, run_id: &str) -> Result<(), ApiError> {
        OrchestratorClient::cancel_run(self, run_id).await
    }
}
