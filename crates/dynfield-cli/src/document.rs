//! Document files
//!
//! A [`StoreDocument`] on disk, as YAML for `.yaml`/`.yml` paths and
//! pretty JSON otherwise. A missing file reads as an empty document.

use anyhow::Context;
use dynfield_store::StoreDocument;
use std::path::Path;

fn is_yaml(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
}

/// Read a document
///
/// # Errors
/// When the file exists but cannot be read or parsed
pub fn load(path: &Path) -> anyhow::Result<StoreDocument> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "document missing, starting empty");
        return Ok(StoreDocument::default());
    }
    let content =
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    if is_yaml(path) {
        serde_yaml::from_str(&content).with_context(|| format!("invalid YAML document {}", path.display()))
    } else {
        serde_json::from_str(&content).with_context(|| format!("invalid JSON document {}", path.display()))
    }
}

/// Write a document
///
/// # Errors
/// When the document cannot be encoded or written
pub fn save(path: &Path, document: &StoreDocument) -> anyhow::Result<()> {
    let content = if is_yaml(path) {
        serde_yaml::to_string(document)?
    } else {
        serde_json::to_string_pretty(document)? + "\n"
    };
    std::fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use dynfield_store::Entity;
    use dynfield_value::{TypedValue, ValueType};
    use pretty_assertions::assert_eq;

    fn sample() -> StoreDocument {
        let mut doc = StoreDocument::default();
        doc.config.insert(
            "retries".into(),
            Entity::new(TypedValue::from_literal(ValueType::Integer, "3").unwrap()),
        );
        doc.variables.insert(
            "sum".into(),
            Entity::new(TypedValue::new_dynamic(ValueType::Integer, "(+ 1 2)").unwrap()),
        );
        doc
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load(&dir.path().join("none.json")).unwrap(), StoreDocument::default());
    }

    #[test]
    fn json_and_yaml_files() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["fields.json", "fields.yaml"] {
            let path = dir.path().join(name);
            save(&path, &sample()).unwrap();
            assert_eq!(load(&path).unwrap(), sample());
        }
    }

    #[test]
    fn hand_written_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fields.yml");
        std::fs::write(
            &path,
            "variables:\n  sum:\n    value:\n      type: integer\n      value: null\n      is_dynamic: true\n      original: (+ 1 2)\n",
        )
        .unwrap();

        let doc = load(&path).unwrap();
        let sum = &doc.variables["sum"].value;
        assert!(sum.is_dynamic());
        assert_eq!(sum.original(), Some("(+ 1 2)"));
    }
}
