use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;

/// Something the KMS session wants the owner of the session to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum KmsEvent {
    HealthCheck(HealthCheckRequest),
    Inquiry(InquiryRequest),
    Disconnected {
        epoch: u64,
        code: Option<u16>,
        reason: String,
    },
    TransportError {
        epoch: u64,
        message: String,
    },
    /// The transport came back after an unexpected close. Registration must be redone.
    Reconnected {
        epoch: u64,
    },
}

pub type KmsEvents = mpsc::UnboundedReceiver<KmsEvent>;

/// A `healthcheck` request sent by the KMS.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthCheckRequest {
    pub id: Value,
    pub level: String,
}

/// An `inquiry` request: which batches were created in a time window.
#[derive(Debug, Clone, PartialEq)]
pub struct InquiryRequest {
    pub id: Value,
    pub inquiry: Value,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InquiryParams {
    pub inquiry: Value,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct HealthCheckParams {
    pub level: String,
}
