//! JSON response envelope shared by every endpoint.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::report::{ModuleStamp, ServerError, ServerFault};

/// `{"data", "errors", "module"}`. Any error turns the status into 400.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerResponse {
    pub data: serde_json::Value,
    pub errors: Vec<ServerError>,
    pub module: ModuleStamp,
}

impl ServerResponse {
    pub fn new(module: ModuleStamp) -> Self {
        Self {
            data: serde_json::Value::Object(Default::default()),
            errors: Vec::new(),
            module,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Log `fault` and append it to `errors`.
    pub fn with_fault(mut self, fault: ServerFault) -> Self {
        error!("{}", fault.log_message());
        self.errors.push(ServerError::from(fault));
        self
    }

    pub fn status_code(&self) -> StatusCode {
        if self.errors.is_empty() {
            StatusCode::OK
        } else {
            StatusCode::BAD_REQUEST
        }
    }
}

impl IntoResponse for ServerResponse {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{ErrorKind, ModuleInfo};

    #[test]
    fn status_follows_errors() {
        let module = ModuleInfo::algorithms_server().stamp("1003", "AIR_ALGORITHM");
        let ok = ServerResponse::new(module.clone());
        assert_eq!(ok.status_code(), StatusCode::OK);

        let failed = ok.with_fault(ServerFault::new(ErrorKind::InputEmpty, 1, "missing"));
        assert_eq!(failed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(failed.errors[0].code, "100.001.001");
    }

    #[test]
    fn envelope_shape() {
        let module = ModuleInfo::algorithms_server().stamp("1001", "PING");
        let json = serde_json::to_value(ServerResponse::new(module)).unwrap();
        assert!(json["data"].is_object());
        assert!(json["errors"].as_array().unwrap().is_empty());
        assert_eq!(json["module"]["name"], "ALGORITHMS_SERVER.PING");
    }
}
