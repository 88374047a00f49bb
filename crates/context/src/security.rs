use http::HeaderMap;
use serde::Serialize;

use crate::AuthenticatedUser;

/// End-user context forwarded to the provider so threat protection can attribute alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSecurityContext {
    pub application_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_user_tenant_id: Option<String>,
    pub source_ip: String,
}

impl UserSecurityContext {
    pub fn new(user: &AuthenticatedUser, headers: &HeaderMap, application_name: &str) -> Self {
        Self {
            application_name: application_name.to_string(),
            end_user_id: user.user_principal_id.clone(),
            end_user_tenant_id: user.tenant_id.clone(),
            source_ip: source_ip(headers),
        }
    }
}

/// First hop of `X-Forwarded-For`, falling back to `Remote-Addr`, without the port.
fn source_ip(headers: &HeaderMap) -> String {
    let raw = headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("remote-addr"))
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();

    let first = raw.split(',').next().unwrap_or_default().trim();

    strip_port(first).to_string()
}

fn strip_port(address: &str) -> &str {
    // [::1]:443
    if let Some(rest) = address.strip_prefix('[') {
        return rest.split(']').next().unwrap_or(rest);
    }

    // A bare IPv6 address has more than one colon and no port.
    match address.matches(':').count() {
        1 => address.split(':').next().unwrap_or(address),
        _ => address,
    }
}
