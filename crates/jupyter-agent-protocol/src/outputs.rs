//! Output records collected from an execution.
//!
//! The serialized form matches the notebook v4 output schema, so a record can
//! be stored in a code cell's `outputs` list unchanged.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Mime-type-keyed payload (`text/plain`, `image/png`, ...).
pub type MimeBundle = Map<String, Value>;

/// One output produced by an execution, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "output_type", rename_all = "snake_case")]
pub enum OutputRecord {
    /// Text written to a named stream, verbatim.
    Stream {
        name: String,
        #[serde(deserialize_with = "multiline")]
        text: String,
    },
    DisplayData {
        #[serde(default)]
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
    ExecuteResult {
        #[serde(default)]
        data: MimeBundle,
        #[serde(default)]
        metadata: Map<String, Value>,
        /// Sequence number declared by the kernel.
        #[serde(default)]
        execution_count: Option<i64>,
    },
    /// Raw traceback lines are kept unstripped.
    Error {
        ename: String,
        evalue: String,
        #[serde(default)]
        traceback: Vec<String>,
    },
}

impl OutputRecord {
    /// The `output_type` tag of this record.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Stream { .. } => "stream",
            Self::DisplayData { .. } => "display_data",
            Self::ExecuteResult { .. } => "execute_result",
            Self::Error { .. } => "error",
        }
    }

    /// Mime bundle of display/result records.
    pub fn data(&self) -> Option<&MimeBundle> {
        match self {
            Self::DisplayData { data, .. } | Self::ExecuteResult { data, .. } => Some(data),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

/// Text stored under `mime` in a bundle. Notebook files may split text into
/// a list of lines; those are joined.
pub fn bundle_text(bundle: &MimeBundle, mime: &str) -> Option<String> {
    match bundle.get(mime)? {
        Value::String(text) => Some(text.clone()),
        Value::Array(lines) => Some(
            lines
                .iter()
                .filter_map(Value::as_str)
                .collect::<Vec<_>>()
                .concat(),
        ),
        _ => None,
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum MultilineText {
    One(String),
    Many(Vec<String>),
}

fn multiline<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match MultilineText::deserialize(deserializer)? {
        MultilineText::One(text) => text,
        MultilineText::Many(lines) => lines.concat(),
    })
}
