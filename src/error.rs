use thiserror::Error;

/// Errors surfaced by the monitor library.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid {kind} quantity {input:?}")]
    Quantity { kind: &'static str, input: String },

    #[error("kubernetes api: {0}")]
    Kubernetes(#[from] kube::Error),

    #[error("vsphere: {0}")]
    Vsphere(String),

    #[error("configuration: {0}")]
    Config(String),
}

impl From<reqwest::Error> for MonitorError {
    fn from(err: reqwest::Error) -> Self {
        MonitorError::Vsphere(err.to_string())
    }
}

pub type Result<T, E = MonitorError> = std::result::Result<T, E>;
