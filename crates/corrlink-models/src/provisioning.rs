//! Zero-touch provisioning (ZTP) wire types and the durable identity they
//! produce.
//!
//! A device exchanges its ZTP token for MQTT client credentials once; the
//! resulting [`ProvisioningIdentity`] is stored in the configuration store
//! and reused on every subsequent MQTT connect.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag the provisioning service expects on every ZTP request.
pub const ZTP_TAG: &str = "ztp";

/// Body of the ZTP credential request.
///
/// ```
/// use corrlink_models::ZtpRequest;
///
/// let req = ZtpRequest::new("tok", "0102030405", "rover-1");
/// let json = serde_json::to_value(&req).unwrap();
/// assert_eq!(json["tags"][0], "ztp");
/// assert_eq!(json["hardwareId"], "0102030405");
/// assert_eq!(json["givenName"], "rover-1");
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ZtpRequest {
    /// Always `["ztp"]`.
    pub tags: Vec<String>,
    /// Device token issued by the correction service.
    pub token: String,
    /// Unique hardware identifier (typically a MAC address).
    pub hardware_id: String,
    /// Friendly device name shown in the service console.
    pub given_name: String,
}

impl ZtpRequest {
    /// Build a request with the mandatory `ztp` tag.
    pub fn new(token: &str, hardware_id: &str, given_name: &str) -> Self {
        Self {
            tags: vec![ZTP_TAG.to_string()],
            token: token.to_string(),
            hardware_id: hardware_id.to_string(),
            given_name: given_name.to_string(),
        }
    }
}

/// Successful ZTP response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ZtpResponse {
    /// MQTT client identifier.
    pub client_id: String,
    /// PEM client certificate.
    pub certificate: String,
    /// PEM private key matching `certificate`.
    pub private_key: String,
    /// MQTT broker host name.
    pub broker_host: String,
    /// Whether the plan includes the L-band satellite channel.
    #[serde(default)]
    pub supports_lband: bool,
}

/// Durable MQTT identity obtained through provisioning.
///
/// * `client_id`   – MQTT client identifier.
/// * `root_ca`     – trust anchor used to validate the broker.
/// * `certificate` / `private_key` – TLS client credentials.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningIdentity {
    /// MQTT client identifier.
    pub client_id: String,
    /// PEM trust anchor fetched before the ZTP request.
    pub root_ca: String,
    /// PEM client certificate.
    pub certificate: String,
    /// PEM private key.
    pub private_key: String,
    /// MQTT broker host name.
    pub broker_host: String,
    /// Whether the plan includes the L-band satellite channel.
    pub supports_lband: bool,
    /// When the identity was issued.
    pub provisioned_at: DateTime<Utc>,
}

impl ProvisioningIdentity {
    /// Combine a ZTP response with the trust anchor fetched beforehand.
    pub fn from_response(response: ZtpResponse, root_ca: String) -> Self {
        Self {
            client_id: response.client_id,
            root_ca,
            certificate: response.certificate,
            private_key: response.private_key,
            broker_host: response.broker_host,
            supports_lband: response.supports_lband,
            provisioned_at: Utc::now(),
        }
    }

    /// `true` when every credential needed for an MQTT connect is present.
    pub fn is_complete(&self) -> bool {
        !self.client_id.is_empty()
            && !self.certificate.is_empty()
            && !self.private_key.is_empty()
            && !self.broker_host.is_empty()
    }
}
