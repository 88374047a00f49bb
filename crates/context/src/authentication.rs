use base64::{Engine, engine::general_purpose::STANDARD};
use http::HeaderMap;
use serde::Deserialize;

const PRINCIPAL_HEADER: &str = "x-ms-client-principal";
const PRINCIPAL_ID_HEADER: &str = "x-ms-client-principal-id";
const PRINCIPAL_NAME_HEADER: &str = "x-ms-client-principal-name";
const PRINCIPAL_IDP_HEADER: &str = "x-ms-client-principal-idp";
const ID_TOKEN_HEADER: &str = "x-ms-token-aad-id-token";

/// The caller as described by the App Service authentication headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_principal_id: Option<String>,
    pub user_name: Option<String>,
    pub auth_provider: Option<String>,
    pub auth_token: Option<String>,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub roles: Vec<String>,
    pub oid: Option<String>,
    pub tenant_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ClientPrincipal {
    user_id: Option<String>,
    user_details: Option<String>,
    identity_provider: Option<String>,
    user_roles: Option<Vec<String>>,
    #[serde(rename = "role_typ")]
    role_type: Option<String>,
    #[serde(rename = "name_typ")]
    name_type: Option<String>,
    #[serde(default)]
    claims: Vec<Claim>,
}

#[derive(Debug, Deserialize)]
struct Claim {
    #[serde(default)]
    typ: String,
    #[serde(default)]
    val: String,
}

impl ClientPrincipal {
    fn claim(&self, predicate: impl Fn(&str) -> bool) -> Option<String> {
        self.claims.iter().find(|c| predicate(&c.typ)).map(|c| c.val.clone())
    }
}

impl AuthenticatedUser {
    /// Reads the caller from the request headers.
    ///
    /// The plain `X-MS-CLIENT-PRINCIPAL-*` headers are used first; when the encoded
    /// principal is present and decodes, its fields and claims take precedence.
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut user = AuthenticatedUser {
            user_principal_id: header(headers, PRINCIPAL_ID_HEADER),
            user_name: header(headers, PRINCIPAL_NAME_HEADER),
            auth_provider: header(headers, PRINCIPAL_IDP_HEADER),
            auth_token: header(headers, ID_TOKEN_HEADER),
            ..Default::default()
        };

        let Some(encoded) = header(headers, PRINCIPAL_HEADER) else {
            return user;
        };

        let principal = match decode_principal(&encoded) {
            Ok(principal) => principal,
            Err(reason) => {
                log::warn!("Could not decode the client principal header: {reason}");
                return user;
            }
        };

        if let Some(id) = principal.user_id.clone() {
            user.user_principal_id = Some(id);
        }

        if let Some(name) = principal.user_details.clone() {
            user.user_name = Some(name);
        }

        if let Some(provider) = principal.identity_provider.clone() {
            user.auth_provider = Some(provider);
        }

        user.roles = match (&principal.user_roles, &principal.role_type) {
            (Some(roles), _) => roles.clone(),
            (None, Some(role_type)) => principal
                .claims
                .iter()
                .filter(|c| &c.typ == role_type)
                .map(|c| c.val.clone())
                .collect(),
            (None, None) => Vec::new(),
        };

        if let Some(ref name_type) = principal.name_type {
            user.display_name = principal.claim(|typ| typ == name_type.as_str());
        }

        user.email = principal.claim(|typ| typ == "preferred_username" || typ.ends_with("emailaddress"));
        user.oid = principal.claim(|typ| typ == "oid" || typ.ends_with("objectidentifier"));
        user.tenant_id = principal.claim(|typ| typ == "tid" || typ.ends_with("tenantid"));

        user
    }
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

fn decode_principal(encoded: &str) -> Result<ClientPrincipal, String> {
    let bytes = STANDARD.decode(encoded.trim()).map_err(|e| e.to_string())?;
    serde_json::from_slice(&bytes).map_err(|e| e.to_string())
}
