//! Structured file formats (JSON, YAML, TOML) parsed into JSON values

use std::path::Path;
use tracing::debug;

use crate::{Error, Result};

/// Extensions recognised as structured data, in lookup preference order
pub const STRUCTURED_EXTENSIONS: &[&str] = &["json", "yaml", "yml", "toml"];

/// Whether the path has a structured-data extension
pub fn is_structured_file(path: &Path) -> bool {
    path.extension()
        .and_then(|s| s.to_str())
        .is_some_and(|ext| STRUCTURED_EXTENSIONS.contains(&ext))
}

/// Parse file contents according to the path's extension
pub fn parse_structured(path: &Path, contents: &str) -> Result<serde_json::Value> {
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
    let value = match ext {
        "json" => serde_json::from_str(contents).map_err(|e| {
            Error::Config(format!("Invalid JSON in {}: {}", path.display(), e))
        })?,
        "toml" => {
            let toml_value: toml::Value = toml::from_str(contents).map_err(|e| {
                Error::Config(format!("Invalid TOML in {}: {}", path.display(), e))
            })?;
            serde_json::to_value(toml_value).map_err(|e| {
                Error::Config(format!("TOML conversion error in {}: {}", path.display(), e))
            })?
        }
        "yaml" | "yml" => serde_yaml::from_str(contents).map_err(|e| {
            Error::Config(format!("Invalid YAML in {}: {}", path.display(), e))
        })?,
        other => {
            return Err(Error::Config(format!(
                "Unsupported file format '{}' for {}",
                other,
                path.display()
            )));
        }
    };

    debug!(path = %path.display(), "Parsed structured file");
    Ok(value)
}

/// Read and parse a structured file
pub async fn read_structured(path: &Path) -> Result<serde_json::Value> {
    let contents = tokio::fs::read_to_string(path).await?;
    parse_structured(path, &contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_each_format() {
        let json = parse_structured(Path::new("a.json"), r#"{"x": 1}"#).unwrap();
        let yaml = parse_structured(Path::new("a.yaml"), "x: 1\n").unwrap();
        let toml = parse_structured(Path::new("a.toml"), "x = 1\n").unwrap();

        assert_eq!(json["x"], 1);
        assert_eq!(yaml["x"], 1);
        assert_eq!(toml["x"], 1);
    }

    #[test]
    fn test_unsupported_extension() {
        assert!(parse_structured(Path::new("a.txt"), "x").is_err());
    }

    #[test]
    fn test_is_structured_file() {
        assert!(is_structured_file(Path::new("dir/schema.yml")));
        assert!(!is_structured_file(Path::new("dir/README.md")));
        assert!(!is_structured_file(Path::new("dir/noext")));
    }
}
