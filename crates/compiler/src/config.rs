//! Compiler configuration
//!
//! Everything the driver threads through the pipeline: the compilation
//! target, verbosity and dump switches, the filenames derived from the
//! input path, and the optional TOML build configuration naming the
//! external toolchain and extra link libraries.

use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Canonical source file extension.
pub const FILE_EXTENSION: &str = "sn";

/// How far compilation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Target {
    /// Assemble and link to an executable.
    #[default]
    Binary,
    /// Stop after assembling (`-c`), emit the object file.
    Object,
    /// Stop after code generation (`-S`), emit assembly only.
    Assembly,
}

#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    pub verbose: bool,
    pub dump_tokens: bool,
    pub dump_ast: bool,
    pub dump_symboltable: bool,
    pub asmdoc: bool,
    pub target: Target,
}

/// Output paths derived from the input filename: `foo.sn` produces
/// `foo.s`, `foo.o` and the executable `foo`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filenames {
    pub raw: PathBuf,
    pub stripped: PathBuf,
    pub asm: PathBuf,
    pub obj: PathBuf,
}

impl Filenames {
    pub fn derive(raw: &Path) -> Result<Self, String> {
        let name = raw
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| format!("Invalid filename `{}`", raw.display()))?;

        if !name.contains('.') {
            return Err("File extension missing".to_string());
        }

        let stem = raw.file_stem().and_then(|s| s.to_str()).unwrap_or("");
        if raw.extension().and_then(|e| e.to_str()) != Some(FILE_EXTENSION) || stem.is_empty() {
            return Err(format!("File extension must be `.{}`", FILE_EXTENSION));
        }

        let stripped = raw.with_extension("");
        Ok(Filenames {
            raw: raw.to_path_buf(),
            asm: stripped.with_extension("s"),
            obj: stripped.with_extension("o"),
            stripped,
        })
    }
}

/// Build configuration, optionally loaded from a TOML file (`--config`).
///
/// ```toml
/// assembler = "nasm"
/// linker = "cc"
/// libraries = ["c", "raylib"]
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Assembler executable, invoked as `<assembler> <file>.s -felf64 -o <file>.o`.
    pub assembler: String,
    /// Linker driver executable, invoked as `<linker> -no-pie ...`.
    pub linker: String,
    /// Libraries passed to the linker as `-l<name>`.
    pub libraries: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            assembler: "nasm".to_string(),
            linker: "cc".to_string(),
            libraries: vec!["c".to_string()],
        }
    }
}

impl BuildConfig {
    pub fn from_toml(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| format!("Failed to parse build config: {}", e))
    }

    pub fn load(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read build config `{}`: {}", path.display(), e))?;
        Self::from_toml(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filenames_derive() {
        let names = Filenames::derive(Path::new("demos/rule110.sn")).unwrap();
        assert_eq!(names.stripped, PathBuf::from("demos/rule110"));
        assert_eq!(names.asm, PathBuf::from("demos/rule110.s"));
        assert_eq!(names.obj, PathBuf::from("demos/rule110.o"));
    }

    #[test]
    fn test_missing_extension_rejected() {
        let err = Filenames::derive(Path::new("program")).unwrap_err();
        assert!(err.contains("File extension missing"));
    }

    #[test]
    fn test_wrong_extension_rejected() {
        let err = Filenames::derive(Path::new("program.c")).unwrap_err();
        assert!(err.contains("must be `.sn`"));
    }

    #[test]
    fn test_bare_dot_extension_rejected() {
        let err = Filenames::derive(Path::new(".sn")).unwrap_err();
        assert!(err.contains("must be `.sn`"));
    }

    #[test]
    fn test_build_config_defaults() {
        let config = BuildConfig::default();
        assert_eq!(config.assembler, "nasm");
        assert_eq!(config.linker, "cc");
        assert_eq!(config.libraries, vec!["c".to_string()]);
    }

    #[test]
    fn test_build_config_from_toml() {
        let config = BuildConfig::from_toml(
            "assembler = \"yasm\"\nlibraries = [\"c\", \"raylib\"]\n",
        )
        .unwrap();
        assert_eq!(config.assembler, "yasm");
        assert_eq!(config.linker, "cc");
        assert_eq!(config.libraries, vec!["c".to_string(), "raylib".to_string()]);
    }

    #[test]
    fn test_build_config_rejects_unknown_keys() {
        let err = BuildConfig::from_toml("asembler = \"nasm\"\n").unwrap_err();
        assert!(err.contains("Failed to parse build config"));
    }
}
