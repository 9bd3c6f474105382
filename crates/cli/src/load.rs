//! Program and config files
//!
//! Programs are produced by an external compiler in the graph's serde form,
//! either JSON (`.json`) or TOML (`.toml`). Configs are always TOML.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use weft_core::{Program, ProgramError};
use weft_runtime::EngineConfig;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid JSON in {}: {source}", path.display())]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid TOML in {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("{}: {source}", path.display())]
    Invalid {
        path: PathBuf,
        source: ProgramError,
    },

    #[error("don't know how to load {} (expected .json or .toml)", .0.display())]
    Extension(PathBuf),
}

fn read(path: &Path) -> Result<String, LoadError> {
    fs::read_to_string(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Read and validate a program graph
pub fn load_program(path: &Path) -> Result<Program, LoadError> {
    let text = read(path)?;
    let program: Program = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&text).map_err(|source| LoadError::Json {
            path: path.to_path_buf(),
            source,
        })?,
        Some("toml") => toml::from_str(&text).map_err(|source| LoadError::Toml {
            path: path.to_path_buf(),
            source,
        })?,
        _ => return Err(LoadError::Extension(path.to_path_buf())),
    };
    program.validate().map_err(|source| LoadError::Invalid {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(program)
}

/// Engine config from an optional TOML file, then the environment
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, LoadError> {
    let config = match path {
        Some(path) => {
            let text = read(path)?;
            EngineConfig::from_toml(&text).map_err(|source| LoadError::Toml {
                path: path.to_path_buf(),
                source,
            })?
        }
        None => EngineConfig::default(),
    };
    Ok(config.with_env())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_temp(suffix: &str, content: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_json_program() {
        let file = write_temp(
            ".json",
            r#"{
                "root": 0,
                "nodes": [
                    { "op": "let", "arg": { "lit": { "int": 1 } }, "next": 1 },
                    { "op": "publish" }
                ]
            }"#,
        );
        let program = load_program(file.path()).unwrap();
        assert_eq!(program.nodes.len(), 2);
    }

    #[test]
    fn test_load_rejects_dangling_node() {
        let file = write_temp(
            ".json",
            r#"{ "root": 0, "nodes": [ { "op": "fork", "left": 1, "right": 7 } ] }"#,
        );
        let err = load_program(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::Invalid { .. }));
    }

    #[test]
    fn test_load_rejects_unknown_extension() {
        let file = write_temp(".orc", "");
        let err = load_program(file.path()).unwrap_err();
        assert!(matches!(err, LoadError::Extension(_)));
        assert!(err.to_string().contains("expected .json or .toml"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_program(Path::new("/nonexistent/prog.json")).unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_load_bundled_demos() {
        let demos = Path::new(env!("CARGO_MANIFEST_DIR")).join("demos");
        for name in ["parallel.toml", "prune.toml", "countdown.json"] {
            let path = demos.join(name);
            if let Err(e) = load_program(&path) {
                panic!("{}: {}", name, e);
            }
        }
    }
}
