use std::sync::Arc;

use tonic::{Request, Response, Status};

use crate::{
    core::{domain::TestCase, errors::SandboxError, manager::SessionManager},
    grpc::{
        mappers::{error_info, parse_execution_id},
        models::{
            Empty, ExecuteRequest, ExecuteResponse, ExecuteTestsRequest, ExecuteTestsResponse,
            HealthResponse, SendInputRequest, SendInputResponse, StatusRequest, StatusResponse,
            StopRequest, StopResponse, sandbox_server::Sandbox,
        },
    },
};

#[derive(Clone, Debug)]
pub struct SandboxServiceImpl {
    manager: Arc<SessionManager>,
}

impl SandboxServiceImpl {
    pub fn new(manager: Arc<SessionManager>) -> Self {
        Self { manager }
    }
}

#[tonic::async_trait]
impl Sandbox for SandboxServiceImpl {
    #[tracing::instrument(skip_all)]
    async fn execute(
        &self,
        request: Request<ExecuteRequest>,
    ) -> Result<Response<ExecuteResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(
            "Execute request: language={} cases={} stdin={}",
            req.language,
            req.test_cases.len(),
            req.stdin.is_some()
        );

        let test_cases: Vec<TestCase> = req.test_cases.into_iter().map(Into::into).collect();
        let result = self
            .manager
            .start(&req.code, &req.language, req.stdin.as_deref(), &test_cases)
            .await;

        match result {
            Ok(report) => Ok(Response::new(report.into())),
            Err(err) => match error_info(&err) {
                Some(error) => Ok(Response::new(ExecuteResponse {
                    success: false,
                    error: Some(error),
                    ..ExecuteResponse::default()
                })),
                None => Err(err.into()),
            },
        }
    }

    #[tracing::instrument(skip_all)]
    async fn send_input(
        &self,
        request: Request<SendInputRequest>,
    ) -> Result<Response<SendInputResponse>, Status> {
        let req = request.into_inner();
        let id = parse_execution_id(&req.execution_id)?;

        let report = self.manager.send_input(id, &req.input).await?;
        Ok(Response::new(report.into()))
    }

    #[tracing::instrument(skip_all)]
    async fn stop(&self, request: Request<StopRequest>) -> Result<Response<StopResponse>, Status> {
        let id = parse_execution_id(&request.into_inner().execution_id)?;

        let report = self.manager.stop(id).await?;
        Ok(Response::new(report.into()))
    }

    #[tracing::instrument(skip_all)]
    async fn status(
        &self,
        request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let id = parse_execution_id(&request.into_inner().execution_id)?;

        let snapshot = self.manager.status(id)?;
        Ok(Response::new(snapshot.into()))
    }

    #[tracing::instrument(skip_all)]
    async fn execute_tests(
        &self,
        request: Request<ExecuteTestsRequest>,
    ) -> Result<Response<ExecuteTestsResponse>, Status> {
        let req = request.into_inner();
        tracing::info!(
            "ExecuteTests request: language={} cases={}",
            req.language,
            req.test_cases.len()
        );

        let test_cases: Vec<TestCase> = req.test_cases.into_iter().map(Into::into).collect();
        let result = self
            .manager
            .execute_tests(&req.code, &req.language, &test_cases)
            .await;

        match result {
            Ok(report) => Ok(Response::new(ExecuteTestsResponse {
                success: report.all_passed(),
                data: Some(report.into()),
                error: None,
            })),
            Err(err) => unsuccessful_battery(err),
        }
    }

    async fn health(&self, _request: Request<Empty>) -> Result<Response<HealthResponse>, Status> {
        Ok(Response::new(self.manager.health().into()))
    }
}

fn unsuccessful_battery(err: SandboxError) -> Result<Response<ExecuteTestsResponse>, Status> {
    match error_info(&err) {
        Some(error) => Ok(Response::new(ExecuteTestsResponse {
            success: false,
            data: None,
            error: Some(error),
        })),
        None => Err(err.into()),
    }
}
