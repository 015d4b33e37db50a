use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    FileNotFound,
    IoError,
    InvalidRequest,
    NoVersions,
    CheckoutFailed,
    ExtractFailed,
    RegistryUnavailable,
    HistoryUnavailable,
    RuleError,
    DeobfuscationFailed,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FileNotFound => write!(f, "FILE_NOT_FOUND"),
            Self::IoError => write!(f, "IO_ERROR"),
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::NoVersions => write!(f, "NO_VERSIONS"),
            Self::CheckoutFailed => write!(f, "CHECKOUT_FAILED"),
            Self::ExtractFailed => write!(f, "EXTRACT_FAILED"),
            Self::RegistryUnavailable => write!(f, "REGISTRY_UNAVAILABLE"),
            Self::HistoryUnavailable => write!(f, "HISTORY_UNAVAILABLE"),
            Self::RuleError => write!(f, "RULE_ERROR"),
            Self::DeobfuscationFailed => write!(f, "DEOBFUSCATION_FAILED"),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SightError {
    pub code: ErrorCode,
    pub message: String,
}

impl fmt::Display for SightError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for SightError {}

impl SightError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn file_not_found(path: &str) -> Self {
        Self::new(ErrorCode::FileNotFound, format!("File not found: {path}"))
    }

    pub fn no_versions(package: &str) -> Self {
        Self::new(
            ErrorCode::NoVersions,
            format!("No versions resolved for package: {package}"),
        )
    }

    pub fn checkout_failed(version: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::CheckoutFailed,
            format!("Failed to check out {version}: {reason}"),
        )
    }

    pub fn extract_failed(path: &str, reason: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::ExtractFailed,
            format!("Failed to extract {path}: {reason}"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_code() {
        let e = SightError::no_versions("left-pad");
        assert_eq!(
            e.to_string(),
            "[NO_VERSIONS] No versions resolved for package: left-pad"
        );
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = SightError::checkout_failed("v1.0.0", "boom").into();
        let se = err.downcast_ref::<SightError>().unwrap();
        assert_eq!(se.code, ErrorCode::CheckoutFailed);
    }
}
