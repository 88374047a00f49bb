//! Remote functions the model may call.

mod executor;
mod registry;

pub use executor::{FunctionExecutor, RemoteFunctionExecutor};
pub use registry::{FunctionDescriptor, FunctionRegistry, ToolDescriptor};

use secrecy::{ExposeSecret, SecretString};
use url::Url;

/// Appends the function host access code to an endpoint.
fn with_access_code(base: &Url, key: Option<&SecretString>) -> Url {
    let mut url = base.clone();

    if let Some(key) = key {
        url.query_pairs_mut().append_pair("code", key.expose_secret());
    }

    url
}
