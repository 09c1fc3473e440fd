use crate::domain::result::DomainResult;
use async_trait::async_trait;

/// HTTP-style status a device returns for a handled direct method.
pub const METHOD_STATUS_OK: i32 = 200;

/// A direct method call addressed to a device, or to one module on it when
/// `module_id` is non-empty.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceMethodRequest {
    pub device_id: String,
    pub module_id: String,
    pub method_name: String,
    pub operation: String,
    /// JSON body delivered to the device
    pub payload: String,
}

/// Result reported by the device for a direct method call.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodResult {
    pub status_code: i32,
    pub payload: Option<serde_json::Value>,
}

impl MethodResult {
    pub fn is_success(&self) -> bool {
        self.status_code == METHOD_STATUS_OK
    }
}

/// Capability for invoking direct methods on devices
///
/// Implementations should:
/// - Address the device (or module) named in the request
/// - Wait for the device's response
/// - Return an error for transport failures and timeouts, never for a
///   non-success status the device reported
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DeviceMethodInvoker: Send + Sync {
    async fn invoke(&self, request: DeviceMethodRequest) -> DomainResult<MethodResult>;
}
