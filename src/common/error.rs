// SPDX-License-Identifier: MIT

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Initialization failed: {0}")]
    Initialization(String),

    #[error("Connection failed to endpoint: {0}")]
    Connection(String),

    #[error("Chain read failed: {0}")]
    Chain(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("Log parse failed: {0}")]
    Parse(String),

    #[error("Simulation failed: {0}")]
    Simulation(String),

    #[error("Prover call failed: {0}")]
    Prover(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error(transparent)]
    Unknown(#[from] anyhow::Error),
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}
