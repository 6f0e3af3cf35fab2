use serde::{Deserialize, Serialize};

use crate::error::RenewError;

/// Issuance variant requested from the licensing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyType {
    /// Occupies a slot of the license; the only variant renewals request.
    Main,
    /// Additional key for an existing main key.
    Secondary,
    /// Key outside the slot count, unlimited licenses only.
    Unlimited,
}

/// The remote licensing service.
///
/// A call yields either the raw key block or a human-readable error; the
/// caller does not distinguish error causes.
pub trait LicenseService {
    /// Request one key for an encrypted payload.
    fn request_key(
        &mut self,
        payload: &str,
        version: Option<u32>,
        key_type: KeyType,
    ) -> Result<String, RenewError>;
}

impl<S: LicenseService + ?Sized> LicenseService for Box<S> {
    fn request_key(&mut self, payload: &str, version: Option<u32>, key_type: KeyType) -> Result<String, RenewError> {
        (**self).request_key(payload, version, key_type)
    }
}

/// Body posted to the service.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest<'a> {
    /// Base64 encrypted `serial|domain|user`.
    pub data: &'a str,
    /// Requested version; omitted to match the serial's own.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
    /// Issuance variant.
    pub key_type: KeyType,
}

/// Service reply: exactly one of the two fields is set.
#[derive(Debug, Default, Deserialize)]
pub struct KeyReply {
    /// Raw key block.
    #[serde(default)]
    pub key: Option<String>,
    /// Error message.
    #[serde(default)]
    pub error: Option<String>,
}

impl KeyReply {
    /// Collapse the reply into the success/error outcome.
    pub fn into_result(self) -> Result<String, RenewError> {
        match (self.key, self.error) {
            (_, Some(err)) if !err.is_empty() => Err(RenewError::RemoteService(err)),
            (Some(key), _) if !key.is_empty() => Ok(key),
            _ => Err(RenewError::RemoteService("empty reply from licensing service".into())),
        }
    }
}

#[cfg(feature = "http")]
pub use http::HttpLicenseService;

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use reqwest::blocking::Client;
    use tracing::debug;

    use super::{KeyReply, KeyRequest, KeyType, LicenseService};
    use crate::error::RenewError;

    /// Blocking JSON-over-HTTP licensing client.
    pub struct HttpLicenseService {
        client: Client,
        url: String,
    }

    impl HttpLicenseService {
        /// Client posting to `url`, giving up on a single call after `timeout`.
        pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, RenewError> {
            let client = Client::builder()
                .timeout(timeout)
                .build()
                .map_err(|e| RenewError::Config(format!("http client: {e}")))?;
            Ok(Self { client, url: url.into() })
        }
    }

    impl LicenseService for HttpLicenseService {
        fn request_key(&mut self, payload: &str, version: Option<u32>, key_type: KeyType) -> Result<String, RenewError> {
            let body = KeyRequest { data: payload, version, key_type };
            debug!(url = %self.url, ?version, ?key_type, "requesting license key");
            let resp = self
                .client
                .post(&self.url)
                .json(&body)
                .send()
                .map_err(|e| RenewError::RemoteService(format!("licensing service unreachable: {e}")))?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().unwrap_or_default();
                return Err(RenewError::RemoteService(format!("licensing service returned {status}: {}", text.trim())));
            }
            let reply: KeyReply = resp
                .json()
                .map_err(|e| RenewError::RemoteService(format!("unreadable reply: {e}")))?;
            reply.into_result()
        }
    }
}
