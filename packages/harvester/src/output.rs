//! Serialization of parsed fragments for the CLI.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::types::TextFragment;

/// Output format for fragment files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Yaml,
}

impl OutputFormat {
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

/// Render fragments as a JSON array or YAML sequence.
///
/// Every fragment carries the full field set, absent values as `null`.
pub fn render_fragments(fragments: &[TextFragment], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Json => {
            let mut content = serde_json::to_string_pretty(fragments)?;
            content.push('\n');
            Ok(content)
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml_ng::to_string(fragments)?;
            let lines: Vec<&str> = yaml.lines().map(str::trim_end).collect();
            Ok(format!("---\n{}\n", lines.join("\n")))
        }
    }
}

/// File name for a document's fragments (`32019R0947.json`).
///
/// Characters that are not safe in file names are replaced by `_`.
#[must_use]
pub fn output_file_name(document_id: &str, format: OutputFormat) -> String {
    let stem: String = document_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '(' | ')') { c } else { '_' })
        .collect();
    format!("{stem}.{}", format.extension())
}

/// Save fragments under `output_dir`, returning the written path.
///
/// Writes to a temp file, syncs, then renames so a crash never leaves a
/// partial file behind.
pub fn save_fragments(
    fragments: &[TextFragment],
    document_id: &str,
    output_dir: &Path,
    format: OutputFormat,
) -> Result<PathBuf> {
    fs::create_dir_all(output_dir)?;

    let file_name = output_file_name(document_id, format);
    let output_file = output_dir.join(&file_name);
    let temp_file = output_dir.join(format!(".{file_name}.tmp"));

    let content = render_fragments(fragments, format)?;
    {
        let mut file = File::create(&temp_file)?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }

    #[cfg(target_os = "windows")]
    if output_file.exists() {
        fs::remove_file(&output_file)?;
    }

    fs::rename(&temp_file, &output_file)?;
    tracing::debug!(path = %output_file.display(), fragments = fragments.len(), "Saved fragments");

    Ok(output_file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FRAGMENT_COLUMNS;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn fragments() -> Vec<TextFragment> {
        vec![TextFragment::untyped("Body".to_string(), Some("32019R0947"))]
    }

    #[test]
    fn test_render_json_has_all_columns() {
        let json = render_fragments(&fragments(), OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let object = value[0].as_object().unwrap();
        for column in FRAGMENT_COLUMNS {
            assert!(object.contains_key(column), "missing {column}");
        }
    }

    #[test]
    fn test_render_yaml_document_marker() {
        let yaml = render_fragments(&fragments(), OutputFormat::Yaml).unwrap();
        assert!(yaml.starts_with("---\n"));
        assert!(yaml.contains("text: Body"));
        assert!(yaml.contains("article: null"));
    }

    #[test]
    fn test_render_empty() {
        assert_eq!(render_fragments(&[], OutputFormat::Json).unwrap(), "[]\n");
    }

    #[test]
    fn test_output_file_name() {
        assert_eq!(output_file_name("32016R0679R(02)", OutputFormat::Json), "32016R0679R(02).json");
        assert_eq!(output_file_name("C/2026/00064", OutputFormat::Yaml), "C_2026_00064.yaml");
    }

    #[test]
    fn test_save_fragments() {
        let temp_dir = TempDir::new().unwrap();
        let path = save_fragments(&fragments(), "32019R0947", temp_dir.path(), OutputFormat::Yaml)
            .unwrap();

        assert_eq!(path, temp_dir.path().join("32019R0947.yaml"));
        let content = fs::read_to_string(&path).unwrap();
        assert!(content.contains("document_id: 32019R0947"));
        assert!(!temp_dir.path().join(".32019R0947.yaml.tmp").exists());
    }
}
