//! Read-only rendering of the configured mounts.

use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Cell, ContentArrangement, Table};
use filecache_config::MountConfig;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

const REDACTED: &str = "***REDACTED***";
const SENSITIVE_KEYS: &[&str] = &["password", "secret", "token", "key_secret"];
/// Longest value shown in a table cell unless `--full` is given.
const MAX_VALUE_CHARS: usize = 40;
const ELLIPSIS: &str = "...";

fn is_sensitive(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|sensitive| key.contains(sensitive))
}

/// One mount as shown to the operator, secrets already redacted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MountRow {
    pub id: String,
    pub mount_point: String,
    pub backend: &'static str,
    pub auth: String,
    pub configuration: BTreeMap<String, Value>,
    pub options: BTreeMap<String, Value>,
    pub applicable_users: Vec<String>,
    pub applicable_groups: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MountListPresenter {
    pub show_secrets: bool,
    /// Don't truncate long table values.
    pub full: bool,
}

impl MountListPresenter {
    pub fn rows(&self, mounts: &BTreeMap<String, MountConfig>) -> Vec<MountRow> {
        mounts
            .iter()
            .map(|(id, mount)| MountRow {
                id: id.clone(),
                mount_point: mount.mount_point.clone(),
                backend: mount.backend.kind(),
                auth: mount.auth.clone(),
                configuration: self.redact(mount.backend_options()),
                options: self.redact(mount.mount_options.clone()),
                applicable_users: mount.applicable_users.clone(),
                applicable_groups: mount.applicable_groups.clone(),
            })
            .collect()
    }

    fn redact(&self, options: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
        if self.show_secrets {
            return options;
        }
        options
            .into_iter()
            .map(|(key, value)| {
                if is_sensitive(&key) { (key, Value::String(REDACTED.to_string())) } else { (key, value) }
            })
            .collect()
    }

    pub fn json(&self, mounts: &BTreeMap<String, MountConfig>) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.rows(mounts))
    }

    pub fn table(&self, mounts: &BTreeMap<String, MountConfig>) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL_CONDENSED)
            .set_content_arrangement(ContentArrangement::Dynamic)
            .set_header(vec![
                "Mount ID",
                "Mount Point",
                "Storage",
                "Authentication",
                "Configuration",
                "Options",
                "Applicable Users",
                "Applicable Groups",
            ]);
        for row in self.rows(mounts) {
            table.add_row(vec![
                Cell::new(&row.id),
                Cell::new(&row.mount_point),
                Cell::new(row.backend),
                Cell::new(&row.auth),
                Cell::new(self.pairs(&row.configuration)),
                Cell::new(self.pairs(&row.options)),
                Cell::new(applicable(&row.applicable_users)),
                Cell::new(applicable(&row.applicable_groups)),
            ]);
        }
        table
    }

    fn pairs(&self, options: &BTreeMap<String, Value>) -> String {
        options
            .iter()
            .map(|(key, value)| format!("{key}: {}", self.value(value)))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn value(&self, value: &Value) -> String {
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        if self.full { text } else { truncate(&text) }
    }
}

fn applicable(names: &[String]) -> String {
    if names.is_empty() { "All".to_string() } else { names.join(", ") }
}

fn truncate(text: &str) -> String {
    if text.chars().count() <= MAX_VALUE_CHARS {
        return text.to_string();
    }
    let kept: String = text.chars().take(MAX_VALUE_CHARS - ELLIPSIS.len()).collect();
    format!("{kept}{ELLIPSIS}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use filecache_config::BackendConfig;
    use rstest::rstest;
    use serde_json::json;

    fn mounts() -> BTreeMap<String, MountConfig> {
        let mut photos = MountConfig {
            mount_point: "/photos".to_string(),
            backend: BackendConfig::S3 {
                bucket: "photos".to_string(),
                prefix: None,
                region: "us-west-004".to_string(),
                endpoint: Some("https://s3.us-west-004.backblazeb2.com/a/very/long/path".to_string()),
                key_id: "AKIA".to_string(),
                key_secret: "hunter2".to_string(),
            },
            auth: "password::global".to_string(),
            options: BTreeMap::new(),
            mount_options: BTreeMap::new(),
            applicable_users: vec!["alice".to_string()],
            applicable_groups: Vec::new(),
        };
        photos.options.insert("Password".to_string(), json!("swordfish"));
        photos.options.insert("api_token".to_string(), json!("abc"));
        photos.mount_options.insert("previews".to_string(), json!(true));
        BTreeMap::from([("photos".to_string(), photos)])
    }

    #[rstest]
    #[case("password", true)]
    #[case("Password", true)]
    #[case("client_secret", true)]
    #[case("access_token", true)]
    #[case("key_secret", true)]
    #[case("key_id", false)]
    #[case("bucket", false)]
    fn test_sensitive_keys(#[case] key: &str, #[case] expected: bool) {
        assert_eq!(is_sensitive(key), expected);
    }

    #[test]
    fn test_secrets_redacted_by_default() {
        let rows = MountListPresenter::default().rows(&mounts());
        let configuration = &rows[0].configuration;
        assert_eq!(configuration["key_secret"], json!(REDACTED));
        assert_eq!(configuration["Password"], json!(REDACTED));
        assert_eq!(configuration["api_token"], json!(REDACTED));
        assert_eq!(configuration["key_id"], json!("AKIA"));
        assert_eq!(rows[0].options["previews"], json!(true));
    }

    #[test]
    fn test_show_secrets() {
        let presenter = MountListPresenter { show_secrets: true, ..Default::default() };
        let rows = presenter.rows(&mounts());
        assert_eq!(rows[0].configuration["key_secret"], json!("hunter2"));
    }

    #[test]
    fn test_json_never_truncates() {
        let output = MountListPresenter::default().json(&mounts()).unwrap();
        let parsed: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(parsed[0]["id"], json!("photos"));
        assert_eq!(parsed[0]["backend"], json!("s3"));
        assert_eq!(parsed[0]["configuration"]["endpoint"], json!("https://s3.us-west-004.backblazeb2.com/a/very/long/path"));
        assert!(!output.contains("hunter2"));
    }

    #[rstest]
    #[case("short", "short")]
    #[case(&"x".repeat(40), &"x".repeat(40))]
    #[case(&"x".repeat(41), &format!("{}...", "x".repeat(37)))]
    fn test_truncate(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(truncate(input), expected);
    }

    #[test]
    fn test_table_truncates_unless_full() {
        let short = MountListPresenter::default().table(&mounts()).to_string();
        assert!(!short.contains("a/very/long/path"));
        assert!(!short.contains("hunter2"));
        let full = MountListPresenter { full: true, show_secrets: true }.table(&mounts()).to_string();
        assert!(full.contains("hunter2"));
    }

    #[test]
    fn test_applicable() {
        assert_eq!(applicable(&[]), "All");
        assert_eq!(applicable(&["alice".to_string(), "bob".to_string()]), "alice, bob");
    }
}
