//! Server error codes and the status payloads published for a task.
//!
//! Every externally visible failure is reported as a [`ServerError`] whose
//! `code` is `TTT.SSS.EEE`: the zero-padded error type, sub-type and the
//! exclusive code chosen by the failing component.

use serde::{Deserialize, Serialize};

/// Top-level error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    Input,
    General,
    Config,
    TaskManager,
    Redis,
    Aws,
    Data,
    Algorithms,
}

impl ErrorType {
    pub fn code(&self) -> u16 {
        match self {
            Self::Input => 100,
            Self::General => 101,
            Self::Config => 102,
            Self::TaskManager => 103,
            Self::Redis => 104,
            Self::Aws => 105,
            Self::Data => 106,
            Self::Algorithms => 107,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Input => "Input",
            Self::General => "Algorithms Server",
            Self::Config => "Config",
            Self::TaskManager => "Task Manager",
            Self::Redis => "Redis",
            Self::Aws => "Aws",
            Self::Data => "Data",
            Self::Algorithms => "Algorithms",
        }
    }
}

/// Error sub-type; each belongs to exactly one [`ErrorType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InputEmpty,
    Unexpected,
    SegmentationFault,
    ConfigParse,
    TaskAdd,
    RedisConnect,
    RedisSet,
    RedisPub,
    GetObject,
    PutObject,
    GetInputData,
    ParseOutput,
    SerializeOutput,
    PutOutputData,
    Execute,
}

impl ErrorKind {
    pub fn error_type(&self) -> ErrorType {
        match self {
            Self::InputEmpty => ErrorType::Input,
            Self::Unexpected | Self::SegmentationFault => ErrorType::General,
            Self::ConfigParse => ErrorType::Config,
            Self::TaskAdd => ErrorType::TaskManager,
            Self::RedisConnect | Self::RedisSet | Self::RedisPub => ErrorType::Redis,
            Self::GetObject | Self::PutObject => ErrorType::Aws,
            Self::GetInputData | Self::ParseOutput | Self::SerializeOutput | Self::PutOutputData => {
                ErrorType::Data
            }
            Self::Execute => ErrorType::Algorithms,
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Self::InputEmpty
            | Self::Unexpected
            | Self::ConfigParse
            | Self::TaskAdd
            | Self::RedisConnect
            | Self::GetInputData
            | Self::Execute => 1,
            Self::SegmentationFault | Self::RedisSet | Self::GetObject | Self::ParseOutput => 2,
            Self::PutObject | Self::SerializeOutput => 3,
            Self::PutOutputData => 4,
            Self::RedisPub => 5,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::InputEmpty => "Input Empty",
            Self::Unexpected => "Unexpected",
            Self::SegmentationFault => "Segmentation Fault",
            Self::ConfigParse => "Parse",
            Self::TaskAdd => "Add",
            Self::RedisConnect => "Connect",
            Self::RedisSet => "Set",
            Self::RedisPub => "Pub",
            Self::GetObject => "Get S3 Object",
            Self::PutObject => "Put S3 Object",
            Self::GetInputData => "Get Input Data",
            Self::ParseOutput => "Parse Output",
            Self::SerializeOutput => "Serialize Output",
            Self::PutOutputData => "Put Output Data",
            Self::Execute => "Execute",
        }
    }
}

/// A failure raised somewhere in the server, before it is rendered.
#[derive(Debug, Clone)]
pub struct ServerFault {
    pub kind: ErrorKind,
    pub exclusive_code: u16,
    pub message: String,
}

impl ServerFault {
    pub fn new(kind: ErrorKind, exclusive_code: u16, message: impl Into<String>) -> Self {
        Self {
            kind,
            exclusive_code,
            message: message.into(),
        }
    }

    /// `Type.SubType.message`, the form used in log lines.
    pub fn log_message(&self) -> String {
        format!(
            "{}.{}.{}",
            self.kind.error_type().name(),
            self.kind.name(),
            self.message
        )
    }
}

impl std::fmt::Display for ServerFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.log_message())
    }
}

/// Rendered error entry as it appears in responses and status payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    pub code: String,
    pub message: String,
    pub name: String,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl From<&ServerFault> for ServerError {
    fn from(fault: &ServerFault) -> Self {
        let error_type = fault.kind.error_type();
        Self {
            code: format!(
                "{:03}.{:03}.{:03}",
                error_type.code(),
                fault.kind.code(),
                fault.exclusive_code
            ),
            message: fault.message.clone(),
            name: fault.kind.name().to_string(),
            error_type: error_type.name().to_string(),
        }
    }
}

impl From<ServerFault> for ServerError {
    fn from(fault: ServerFault) -> Self {
        Self::from(&fault)
    }
}

/// Identity of this server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    pub system_code: String,
    pub module_code: String,
    pub module_name: String,
    pub version: String,
}

impl ModuleInfo {
    /// The module identity used by the shipped binary.
    pub fn algorithms_server() -> Self {
        Self {
            system_code: "402".to_string(),
            module_code: "110".to_string(),
            module_name: "ALGORITHMS_SERVER".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Stamp identifying one operator (endpoint) of this module.
    pub fn stamp(&self, operator_code: &str, operator_name: &str) -> ModuleStamp {
        ModuleStamp {
            code: format!("{}.{}.{}", self.system_code, self.module_code, operator_code),
            name: format!("{}.{}", self.module_name, operator_name),
            version: self.version.clone(),
        }
    }
}

/// `{code, name, version}` block attached to responses and status payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleStamp {
    pub code: String,
    pub name: String,
    pub version: String,
}

/// Document written under `<taskId>:error` when a task fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub errors: Vec<ServerError>,
    pub module: ModuleStamp,
}

impl ErrorReport {
    pub fn new(module: ModuleStamp, errors: Vec<ServerError>) -> Self {
        Self { errors, module }
    }

    /// The generic report synthesized for every outstanding task on a fatal signal.
    pub fn segmentation_fault(module: ModuleStamp, signal: &str) -> Self {
        let fault = ServerFault::new(ErrorKind::SegmentationFault, 1, signal);
        Self::new(module, vec![ServerError::from(fault)])
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_code_is_zero_padded() {
        let err = ServerError::from(ServerFault::new(ErrorKind::TaskAdd, 3, "Not enough memory"));
        assert_eq!(err.code, "103.001.003");
        assert_eq!(err.name, "Add");
        assert_eq!(err.error_type, "Task Manager");
    }

    #[test]
    fn log_message_joins_type_kind_and_message() {
        let fault = ServerFault::new(ErrorKind::RedisPub, 1, "broken pipe");
        assert_eq!(fault.log_message(), "Redis.Pub.broken pipe");
    }

    #[test]
    fn module_stamp_composes_codes() {
        let module = ModuleInfo {
            system_code: "402".into(),
            module_code: "110".into(),
            module_name: "ALGORITHMS_SERVER".into(),
            version: "1.2.3".into(),
        };
        let stamp = module.stamp("1003", "AIR_ALGORITHM");
        assert_eq!(stamp.code, "402.110.1003");
        assert_eq!(stamp.name, "ALGORITHMS_SERVER.AIR_ALGORITHM");
        assert_eq!(stamp.version, "1.2.3");
    }

    #[test]
    fn segmentation_fault_report_shape() {
        let stamp = ModuleInfo::algorithms_server().stamp("1003", "AIR_ALGORITHM");
        let report = ErrorReport::segmentation_fault(stamp, "SIGSEGV");
        let json: serde_json::Value = serde_json::from_str(&report.to_json()).unwrap();
        assert_eq!(json["errors"][0]["code"], "101.002.001");
        assert_eq!(json["errors"][0]["type"], "Algorithms Server");
        assert_eq!(json["errors"][0]["message"], "SIGSEGV");
        assert_eq!(json["module"]["code"], "402.110.1003");
    }
}
