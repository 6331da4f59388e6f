use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Connection used when a request does not name one.
pub const DEFAULT_CONNECTION: &str = "default";

/// Wire format of a query result.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub enum OutputFormat {
    /// `{"data":[{...},{...}]}`
    #[default]
    #[serde(rename = "json")]
    Json,
    /// `{"data":{"fields":[...],"rows":[[...]]}}`
    #[serde(rename = "jsonDataArray")]
    JsonDataArray,
    #[serde(rename = "csv")]
    Csv,
    /// Arrow IPC stream
    #[serde(rename = "arrow")]
    Arrow,
    #[serde(rename = "parquet")]
    Parquet,
}

pub const SUPPORTED_FORMATS: &str = "'json', 'jsonDataArray', 'csv', 'arrow', 'parquet'";

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::JsonDataArray => "jsonDataArray",
            OutputFormat::Csv => "csv",
            OutputFormat::Arrow => "arrow",
            OutputFormat::Parquet => "parquet",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Json | OutputFormat::JsonDataArray => "application/json",
            OutputFormat::Csv => "text/csv",
            OutputFormat::Arrow => "application/vnd.apache.arrow.stream",
            OutputFormat::Parquet => "application/octet-stream",
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            // "default" and "dataArray" are the names used by older clients
            "json" | "default" => Ok(OutputFormat::Json),
            "jsonDataArray" | "dataArray" => Ok(OutputFormat::JsonDataArray),
            "csv" => Ok(OutputFormat::Csv),
            "arrow" => Ok(OutputFormat::Arrow),
            "parquet" => Ok(OutputFormat::Parquet),
            other => Err(format!(
                "invalid format type '{}', supported formats: {}",
                other, SUPPORTED_FORMATS
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of a query request.
#[derive(Debug, Clone, Deserialize)]
pub struct QueryRequest {
    #[serde(default = "default_connection", deserialize_with = "deserialize_connection")]
    pub connection: String,
    pub query: String,
    #[serde(default, deserialize_with = "deserialize_format")]
    pub format: OutputFormat,
}

impl QueryRequest {
    /// The connection to query: a path parameter takes precedence over the body.
    pub fn connection_name<'a>(&'a self, path_connection: Option<&'a str>) -> &'a str {
        match path_connection {
            Some(name) if !name.is_empty() => name,
            _ => &self.connection,
        }
    }
}

/// Peek at the `connection` field of a raw body without validating the rest.
pub fn connection_from_body(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ConnectionOnly {
        #[serde(default)]
        connection: Option<String>,
    }

    serde_json::from_slice::<ConnectionOnly>(body)
        .ok()
        .and_then(|b| b.connection)
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| DEFAULT_CONNECTION.to_string())
}

fn default_connection() -> String {
    DEFAULT_CONNECTION.to_string()
}

fn deserialize_connection<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value
        .filter(|c| !c.is_empty())
        .unwrap_or_else(default_connection))
}

fn deserialize_format<'de, D>(deserializer: D) -> Result<OutputFormat, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(OutputFormat::default()),
        Some(s) if s.is_empty() => Ok(OutputFormat::default()),
        Some(s) => s.parse().map_err(serde::de::Error::custom),
    }
}
