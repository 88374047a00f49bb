use serde::Deserialize;
use serde_json::{Map, Value};

/// A retrieval source the provider queries on its own before answering.
///
/// The parameters are passed through to the provider verbatim, so any shape the
/// provider understands can be configured here.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataSourceConfig {
    /// Provider data source type, e.g. `azure_search`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Provider-specific parameters, including credentials.
    #[serde(default)]
    pub parameters: Map<String, Value>,
}
