use std::{fmt::Write, path::Path, sync::OnceLock};

use anyhow::bail;
use indoc::indoc;
use regex::Regex;
use serde::Deserialize;
use toml::Value;

use crate::{Config, MINIMUM_SUPPORTED_API_VERSION};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref().to_path_buf();
    let content = std::fs::read_to_string(&path)?;

    parse(&content)
}

pub(crate) fn parse(content: &str) -> anyhow::Result<Config> {
    let mut raw_config: Value = toml::from_str(content)?;

    expand_dynamic_strings(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;

    validate_provider(&config)?;
    validate_functions(&config)?;
    validate_promptflow(&config)?;

    for warning in collect_warnings(&config) {
        log::warn!("{warning}");
    }

    Ok(config)
}

pub(crate) fn validate_provider(config: &Config) -> anyhow::Result<()> {
    if config.openai.endpoint().is_none() {
        bail!(indoc! {r#"
            No completion endpoint configured. Set either the full endpoint or the resource name:

              [openai]
              endpoint = "https://my-resource.openai.azure.com/"

            or

              [openai]
              resource = "my-resource"
        "#});
    }

    if config.openai.model.trim().is_empty() {
        bail!("The model deployment name is required in [openai] model");
    }

    // Preview versions are date-stamped, so lexical order is chronological order.
    if config.openai.preview_api_version.as_str() < MINIMUM_SUPPORTED_API_VERSION {
        bail!(
            "The minimum supported API version is '{MINIMUM_SUPPORTED_API_VERSION}', got '{}'",
            config.openai.preview_api_version
        );
    }

    if let Some(ref datasource) = config.datasource
        && datasource.kind.trim().is_empty()
    {
        bail!("The data source type in [datasource] type cannot be empty");
    }

    Ok(())
}

pub(crate) fn validate_functions(config: &Config) -> anyhow::Result<()> {
    let functions = &config.functions;

    if !functions.enabled {
        return Ok(());
    }

    if functions.tools_base_url.is_none() || functions.tool_base_url.is_none() {
        bail!(indoc! {r#"
            Function calling is enabled but the function host is not configured. Both endpoints are required:

              [functions]
              enabled = true
              tools_base_url = "https://my-functions.azurewebsites.net/api/tools"
              tool_base_url = "https://my-functions.azurewebsites.net/api/tool"
        "#});
    }

    Ok(())
}

pub(crate) fn validate_promptflow(config: &Config) -> anyhow::Result<()> {
    let Some(ref promptflow) = config.promptflow else {
        return Ok(());
    };

    if !promptflow.response_timeout.is_finite() || promptflow.response_timeout <= 0.0 {
        bail!(
            "The promptflow response timeout must be a positive number of seconds, got {}",
            promptflow.response_timeout
        );
    }

    if promptflow.request_field_name.trim().is_empty() || promptflow.response_field_name.trim().is_empty() {
        bail!("The promptflow request and response field names cannot be empty");
    }

    Ok(())
}

fn collect_warnings(config: &Config) -> Vec<String> {
    let mut warnings = Vec::new();

    if config.openai.key.is_none() {
        warnings.push("No API key configured in [openai] key, provider requests will be sent unauthenticated".to_string());
    }

    if config.promptflow.is_some() && config.openai.stream {
        warnings.push("Answers are not streamed while [promptflow] is configured".to_string());
    }

    if config.functions.enabled && config.functions.tool_key.is_none() {
        warnings.push("Function calling is enabled without [functions] tool_key".to_string());
    }

    warnings
}

fn env_placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();

    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").expect("placeholder pattern must compile")
    })
}

/// Replaces every `{{ env.NAME }}` placeholder with the value of the environment variable.
fn expand(input: &str) -> Result<String, String> {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;

    for captures in env_placeholder().captures_iter(input) {
        let (Some(placeholder), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };

        let value = std::env::var(name.as_str())
            .map_err(|_| format!("environment variable '{}' is not set", name.as_str()))?;

        output.push_str(&input[last..placeholder.start()]);
        output.push_str(&value);
        last = placeholder.end();
    }

    output.push_str(&input[last..]);

    Ok(output)
}

fn expand_dynamic_strings<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match expand(s) {
            Ok(out) => *s = out,
            Err(err) => {
                let mut p = String::new();

                for segment in path {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]")?,
                    }
                }

                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Failed to expand dynamic string at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}
