//! Remote academic-portal collaborator.
//!
//! The grab loop only sees the [`Portal`] trait; [`PortalClient`] is the HTTP
//! implementation resolved once at startup.

mod http;
#[cfg(test)]
pub(crate) mod testing;

pub use http::PortalClient;

use crate::error::PortalError;
use crate::model::SeatStatus;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Portal response code meaning "ok".
pub const SUCCESS_CODE: i64 = 1000;

/// Decoded `{code, msg, data}` envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiReply<T> {
    pub code: i64,
    #[serde(default, alias = "msg")]
    pub message: String,
    #[serde(default)]
    pub data: Option<T>,
}

impl<T> ApiReply<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: SUCCESS_CODE,
            message: String::new(),
            data: Some(data),
        }
    }

    pub fn failed(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// Success payload, or the reason there is none.
    pub fn into_data(self) -> Result<T, PortalError> {
        if !self.is_success() {
            return Err(PortalError::Api {
                code: self.code,
                message: self.message,
            });
        }
        self.data
            .ok_or_else(|| PortalError::decode("success reply without data"))
    }
}

/// The two operations the grab loop needs from the portal.
#[async_trait]
pub trait Portal: Send + Sync + 'static {
    async fn query_status(
        &self,
        section_id: &str,
        execution_id: &str,
    ) -> Result<ApiReply<SeatStatus>, PortalError>;

    async fn attempt_enroll(
        &self,
        section_id: &str,
        execution_id: &str,
    ) -> Result<ApiReply<()>, PortalError>;
}
