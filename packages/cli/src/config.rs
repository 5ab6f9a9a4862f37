use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use vellum_document::{Document, PositionKey, RichText, ShapeData, ShapeKind, ROOT_ID};
use vellum_editor::RepoConfig;

pub const DEFAULT_CONFIG_NAME: &str = "vellum.config.json";

/// Vellum configuration file format
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Engine tuning shared by every replica
    #[serde(default)]
    pub repo: RepoConfig,

    /// JSON file holding the seed page (a shape subtree); a built-in sample
    /// page is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<String>,
}

impl Config {
    /// Load config from a directory
    pub fn load(cwd: &str) -> anyhow::Result<Self> {
        let config_path = PathBuf::from(cwd).join(DEFAULT_CONFIG_NAME);

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = serde_json::from_str(&content)
                .with_context(|| format!("Invalid config {}", config_path.display()))?;
            Ok(config)
        } else {
            // Return default config if none exists
            Ok(Config::default())
        }
    }

    /// Build the document every replica starts from.
    pub fn seed_document(&self, cwd: &str) -> anyhow::Result<Document> {
        let page = match &self.document {
            Some(path) => {
                let path = PathBuf::from(cwd).join(path);
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Cannot read seed document {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("Invalid seed document {}", path.display()))?
            }
            None => sample_page(),
        };

        let mut document = Document::new();
        document.attach(&page, ROOT_ID, PositionKey::first())?;
        Ok(document)
    }
}

/// A page with two frames, a rect and a text box.
pub fn sample_page() -> ShapeData {
    ShapeData::new("page-1", ShapeKind::Page)
        .with_name("Page 1")
        .with_child(
            PositionKey::from_digits(vec![10]),
            ShapeData::new("frame-1", ShapeKind::Frame).with_name("Header"),
        )
        .with_child(
            PositionKey::from_digits(vec![20]),
            ShapeData::new("frame-2", ShapeKind::Frame).with_name("Body"),
        )
        .with_child(
            PositionKey::from_digits(vec![30]),
            ShapeData::new("rect-1", ShapeKind::Rect)
                .with_name("Card")
                .with_prop("x", serde_json::json!(0))
                .with_prop("y", serde_json::json!(0)),
        )
        .with_child(
            PositionKey::from_digits(vec![40]),
            ShapeData::new("text-1", ShapeKind::Text)
                .with_name("Title")
                .with_text(RichText::from_plain("Untitled\n")),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let json = r#"{
            "repo": { "submitTimeoutMs": 250, "maxResendAttempts": 3 },
            "document": "seed.json"
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.repo.submit_timeout_ms, 250);
        assert_eq!(config.repo.max_resend_attempts, Some(3));
        assert_eq!(config.repo.merge_window_ms, 800);
        assert_eq!(config.document.as_deref(), Some("seed.json"));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.repo, RepoConfig::default());
        assert!(config.document.is_none());

        let document = config.seed_document(".").unwrap();
        assert_eq!(document.children("page-1").len(), 4);
        assert_eq!(document.text("text-1").unwrap().to_plain(), "Untitled\n");
    }
}
