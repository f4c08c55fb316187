use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::ConfigError;

/// Static per-repository fields merged into every change.
pub type Metadata = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ChangeKind {
    Release,
    Commit,
    Other(String),
}

impl ChangeKind {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeKind::Release => "release",
            ChangeKind::Commit => "commit",
            ChangeKind::Other(tag) => tag,
        }
    }
}

impl From<&str> for ChangeKind {
    fn from(tag: &str) -> Self {
        match tag {
            "release" => ChangeKind::Release,
            "commit" => ChangeKind::Commit,
            other => ChangeKind::Other(other.to_string()),
        }
    }
}

impl From<String> for ChangeKind {
    fn from(tag: String) -> Self {
        ChangeKind::from(tag.as_str())
    }
}

impl From<ChangeKind> for String {
    fn from(kind: ChangeKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalized change event: a release or a commit of one repository.
///
/// `(kind, id, repository)` identifies a change; the store never updates a
/// change in place, so merging metadata produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub date: DateTime<Utc>,
    pub author: String,
    pub message: String,
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub url: String,
    pub repository: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: Metadata,
}

impl Change {
    pub fn new(
        kind: ChangeKind,
        id: impl Into<String>,
        repository: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            date,
            author: String::new(),
            message: String::new(),
            id: id.into(),
            kind,
            url: String::new(),
            repository: repository.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    pub fn dedup_key(&self) -> (&str, &str, &str) {
        (self.kind.as_str(), &self.id, &self.repository)
    }

    pub fn display_date(&self) -> String {
        self.date.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// The line printed for every newly stored change.
    pub fn summary_line(&self) -> String {
        format!("{} - {} [{}]", self.display_date(), self.message, self.author)
    }

    /// Merge the static repository metadata over this change.
    ///
    /// Keys naming a core field (`date`, `author`, `message`, `id`, `type`,
    /// `url`) replace that field; any other key is kept in `metadata`.
    /// Metadata always wins on collision.
    // TODO: last-write-wins is provisional; revisit once repositories can
    // declare which side owns a colliding field.
    pub fn merge_metadata(self, metadata: &Metadata) -> Result<Change, ConfigError> {
        let mut merged = self;
        for (key, value) in metadata {
            match key.as_str() {
                "date" => merged.date = parse_date_field(value)?,
                "author" => merged.author = field_text(key, value)?,
                "message" => merged.message = field_text(key, value)?,
                "id" => merged.id = field_text(key, value)?,
                "type" => merged.kind = ChangeKind::from(field_text(key, value)?),
                "url" => merged.url = field_text(key, value)?,
                _ => {
                    merged.metadata.insert(key.clone(), value.clone());
                }
            }
        }
        Ok(merged)
    }

    /// Check that metadata can be merged into any change.
    pub fn validate_metadata(metadata: &Metadata) -> Result<(), ConfigError> {
        for (key, value) in metadata {
            match key.as_str() {
                "date" => {
                    parse_date_field(value)?;
                }
                "author" | "message" | "id" | "type" | "url" => {
                    field_text(key, value)?;
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// First line of a (possibly multi-line) commit message.
pub fn first_line(message: &str) -> &str {
    message.split('\n').next().unwrap_or_default()
}

/// Text for a core field. Numbers and booleans are written out; `null` is
/// rejected rather than stored as the word "null".
fn field_text(key: &str, value: &Value) -> Result<String, ConfigError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Null => Err(ConfigError::InvalidMetadata {
            key: key.to_string(),
            reason: "null cannot replace a change field".to_string(),
        }),
        other => Ok(other.to_string()),
    }
}

fn parse_date_field(value: &Value) -> Result<DateTime<Utc>, ConfigError> {
    let text = value.as_str().ok_or_else(|| ConfigError::InvalidMetadata {
        key: "date".to_string(),
        reason: "expected an RFC 3339 string".to_string(),
    })?;
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ConfigError::InvalidMetadata {
            key: "date".to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn commit() -> Change {
        Change::new(
            ChangeKind::Commit,
            "abc123",
            "rust-lang/rust",
            Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        )
        .with_author("Jane")
        .with_message("Fix bug")
        .with_url("https://github.com/rust-lang/rust/commit/abc123")
    }

    #[test]
    fn first_line_drops_the_body() {
        assert_eq!(first_line("Fix bug\n\nDetails here"), "Fix bug");
        assert_eq!(first_line("Windows line\r\nmore"), "Windows line\r");
        assert_eq!(first_line(""), "");
    }

    #[test]
    fn summary_line_format() {
        assert_eq!(commit().summary_line(), "2024-03-01T12:00:00Z - Fix bug [Jane]");
    }

    #[test]
    fn metadata_type_overrides_adapter_type() {
        let metadata: Metadata = [("type".to_string(), json!("custom"))].into_iter().collect();
        let merged = commit().merge_metadata(&metadata).unwrap();
        assert_eq!(merged.kind, ChangeKind::Other("custom".into()));
        assert!(merged.metadata.is_empty());
    }

    #[test]
    fn extra_metadata_is_kept_verbatim() {
        let metadata: Metadata = [
            ("name".to_string(), json!("Rust")),
            ("tier".to_string(), json!(1)),
        ]
        .into_iter()
        .collect();
        let merged = commit().merge_metadata(&metadata).unwrap();
        assert_eq!(merged.metadata.get("name"), Some(&json!("Rust")));
        assert_eq!(merged.metadata.get("tier"), Some(&json!(1)));
        assert_eq!(merged.message, "Fix bug");
    }

    #[test]
    fn bad_date_metadata_is_rejected() {
        let metadata: Metadata = [("date".to_string(), json!("soon"))].into_iter().collect();
        assert!(Change::validate_metadata(&metadata).is_err());
        assert!(commit().merge_metadata(&metadata).is_err());
    }

    #[test]
    fn null_core_field_is_rejected() {
        let metadata: Metadata = [("author".to_string(), json!(null))].into_iter().collect();
        assert!(matches!(
            Change::validate_metadata(&metadata),
            Err(ConfigError::InvalidMetadata { ref key, .. }) if key == "author"
        ));
        assert!(commit().merge_metadata(&metadata).is_err());

        let extra: Metadata = [("note".to_string(), json!(null))].into_iter().collect();
        assert!(Change::validate_metadata(&extra).is_ok());
        assert_eq!(commit().merge_metadata(&extra).unwrap().metadata.get("note"), Some(&json!(null)));
    }

    #[test]
    fn kind_serializes_as_type_tag() {
        let value = serde_json::to_value(commit()).unwrap();
        assert_eq!(value["type"], json!("commit"));
        let back: Change = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind, ChangeKind::Commit);
    }
}
