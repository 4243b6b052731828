mod cli;
mod demo;
mod infra;
mod routes;
mod server;
mod stages;

use loan_orchestrator::error::AppError;

pub async fn run() -> Result<(), AppError> {
    cli::run().await
}
