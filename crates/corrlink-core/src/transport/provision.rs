//! Zero-touch provisioning handshake.
//!
//! Two HTTPS transactions: download the broker trust anchor, then exchange
//! the device token for MQTT credentials. The resulting identity is stored
//! in the configuration store by the caller.

use corrlink_models::{ProvisioningIdentity, ZtpRequest, ZtpResponse};
use tracing::{debug, info};

use crate::config::ProvisioningSettings;
use crate::drivers::HttpsClient;
use crate::error::{DriverError, ProvisionError};

/// Run the full handshake over `http`.
pub async fn provision<H>(http: &mut H, settings: &ProvisioningSettings) -> Result<ProvisioningIdentity, ProvisionError>
where
    H: HttpsClient + ?Sized,
{
    if settings.token.is_empty() {
        return Err(ProvisionError::MissingToken);
    }

    let anchor = http
        .get(&settings.trust_anchor_url)
        .await
        .and_then(|resp| {
            if resp.is_success() {
                Ok(resp)
            } else {
                Err(DriverError::Status(resp.status))
            }
        })
        .map_err(ProvisionError::TrustAnchor)?;
    let root_ca = String::from_utf8_lossy(&anchor.body).into_owned();
    debug!(url = %settings.trust_anchor_url, len = root_ca.len(), "trust anchor fetched");

    let request = ZtpRequest::new(&settings.token, &settings.hardware_id, &settings.given_name);
    let body = serde_json::to_string(&request)?;
    let resp = http
        .post_json(&settings.ztp_url, &body)
        .await
        .and_then(|resp| {
            if resp.is_success() {
                Ok(resp)
            } else {
                Err(DriverError::Status(resp.status))
            }
        })
        .map_err(ProvisionError::Request)?;

    let response: ZtpResponse = serde_json::from_slice(&resp.body)?;
    let identity = ProvisioningIdentity::from_response(response, root_ca);
    if !identity.is_complete() {
        return Err(ProvisionError::Incomplete);
    }
    info!(
        client_id = %identity.client_id,
        broker = %identity.broker_host,
        lband = identity.supports_lband,
        "device provisioned"
    );
    Ok(identity)
}
