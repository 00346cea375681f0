//! HTTP surface: routes and the response envelope.

pub mod response;
pub mod routes;

pub use response::ServerResponse;
pub use routes::{AppState, routes};

use crate::report::{ModuleInfo, ModuleStamp};

pub(crate) const TASK_ID: &str = "taskId";
pub(crate) const S3_DIR: &str = "s3Dir";

/// Operators (endpoints) exposed by this module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Ping,
    GetConfig,
    AirAlgorithm,
    Tasks,
}

impl Operator {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ping => "1001",
            Self::GetConfig => "1002",
            Self::AirAlgorithm => "1003",
            Self::Tasks => "1004",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ping => "PING",
            Self::GetConfig => "GET_CONFIG",
            Self::AirAlgorithm => "AIR_ALGORITHM",
            Self::Tasks => "TASKS",
        }
    }

    pub fn stamp(&self, module: &ModuleInfo) -> ModuleStamp {
        module.stamp(self.code(), self.name())
    }
}
