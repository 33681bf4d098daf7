//! Message templates — the pool each send picks its text from.

use std::path::Path;

use rand::Rng;
use rand::seq::SliceRandom;
use serde::Deserialize;
use tracing::info;

use crate::error::TemplateError;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TemplateFile {
    List(Vec<serde_json::Value>),
    Object {
        #[serde(alias = "mensajes")]
        messages: Vec<serde_json::Value>,
    },
}

/// Non-empty, ordered pool of message bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Templates {
    messages: Vec<String>,
}

impl Templates {
    pub fn new(messages: Vec<String>) -> Option<Self> {
        if messages.is_empty() {
            None
        } else {
            Some(Self { messages })
        }
    }

    /// Load from a JSON file holding either an array or `{"messages": [...]}`.
    pub async fn load(path: &Path) -> Result<Self, TemplateError> {
        let raw = tokio::fs::read_to_string(path).await?;
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        let file: TemplateFile =
            serde_json::from_value(value).map_err(|_| TemplateError::InvalidShape)?;

        let values = match file {
            TemplateFile::List(v) => v,
            TemplateFile::Object { messages } => messages,
        };
        let messages: Vec<String> = values
            .into_iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            })
            .collect();

        let templates = Self::new(messages).ok_or_else(|| TemplateError::Empty(path.to_path_buf()))?;
        info!(path = %path.display(), count = templates.len(), "Loaded message templates");
        Ok(templates)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn as_slice(&self) -> &[String] {
        &self.messages
    }

    /// Uniformly random template.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> &str {
        // Non-empty by construction.
        self.messages
            .choose(rng)
            .map(String::as_str)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    async fn load_str(json: &str) -> Result<Templates, TemplateError> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("templates.json");
        std::fs::write(&path, json).unwrap();
        Templates::load(&path).await
    }

    #[tokio::test]
    async fn loads_plain_array() {
        let t = load_str(r#"["Hola {name}", "Buenas"]"#).await.unwrap();
        assert_eq!(t.as_slice(), ["Hola {name}", "Buenas"]);
    }

    #[tokio::test]
    async fn loads_object_forms() {
        let t = load_str(r#"{"messages": ["a", 2]}"#).await.unwrap();
        assert_eq!(t.as_slice(), ["a", "2"]);
        let t = load_str(r#"{"mensajes": ["b"]}"#).await.unwrap();
        assert_eq!(t.as_slice(), ["b"]);
    }

    #[tokio::test]
    async fn empty_pool_is_an_error() {
        assert!(matches!(load_str("[]").await, Err(TemplateError::Empty(_))));
        assert!(matches!(load_str(r#"{"messages": []}"#).await, Err(TemplateError::Empty(_))));
    }

    #[tokio::test]
    async fn wrong_shape_and_bad_json_are_errors() {
        assert!(matches!(load_str(r#"{"other": 1}"#).await, Err(TemplateError::InvalidShape)));
        assert!(matches!(load_str("not json").await, Err(TemplateError::Json(_))));
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = Templates::load(Path::new("/nonexistent/templates.json")).await.unwrap_err();
        assert!(matches!(err, TemplateError::Io(_)));
    }

    #[test]
    fn pick_covers_every_template() {
        let t = Templates::new(vec!["a".into(), "b".into(), "c".into()]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..200 {
            seen.insert(t.pick(&mut rng).to_string());
        }
        assert_eq!(seen.len(), 3);
    }
}
