//! Output formatting for CLI commands.

use anyhow::Result;
use colored::Colorize;
use serde::Serialize;

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// YAML documents separated by `---`.
    #[default]
    Yaml,
    /// A JSON list.
    Json,
}

/// Render objects as one YAML stream or one JSON list.
pub fn format_documents<T: Serialize>(docs: &[T], format: OutputFormat) -> Result<String> {
    match format {
        OutputFormat::Yaml => {
            let mut out = String::new();
            for doc in docs {
                out.push_str("---\n");
                out.push_str(&serde_yaml::to_string(doc)?);
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string_pretty(docs)? + "\n"),
    }
}

/// Print objects in the specified format.
pub fn print_documents<T: Serialize>(docs: &[T], format: OutputFormat) -> Result<()> {
    print!("{}", format_documents(docs, format)?);
    Ok(())
}

/// Print an info message on stderr, keeping stdout machine-readable.
pub fn print_info(message: &str) {
    eprintln!("{} {}", "Info:".blue().bold(), message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_yaml_stream() {
        let out = format_documents(&[json!({"a": 1}), json!({"b": 2})], OutputFormat::Yaml).unwrap();
        assert_eq!(out, "---\na: 1\n---\nb: 2\n");
    }

    #[test]
    fn test_json_list() {
        let out = format_documents(&[json!({"a": 1})], OutputFormat::Json).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(parsed, json!([{"a": 1}]));
    }
}
