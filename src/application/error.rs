use thiserror::Error;

use crate::application::factory::FactoryError;
use crate::application::repos::RepoError;
use crate::config::LoadError;
use crate::domain::error::DomainError;
use crate::infra::error::InfraError;

/// Top-level error for the operator binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Factory(#[from] FactoryError),
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("failed to encode output: {0}")]
    Output(#[from] serde_json::Error),
}

impl AppError {
    pub fn not_found(entity: &'static str, id: u64) -> Self {
        Self::NotFound { entity, id }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Exit code reported by the binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) | AppError::Validation(_) => 2,
            AppError::NotFound { .. } | AppError::Repo(RepoError::NotFound) => 3,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_distinguish_usage_and_lookup_failures() {
        assert_eq!(AppError::validation("bad").exit_code(), 2);
        assert_eq!(AppError::not_found("post", 7).exit_code(), 3);
        assert_eq!(AppError::from(RepoError::Timeout).exit_code(), 1);
        assert_eq!(AppError::not_found("post", 7).to_string(), "post 7 not found");
    }
}
