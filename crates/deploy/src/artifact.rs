//! Compiled contract artifacts.

use std::path::{Path, PathBuf};

use alloy_core::primitives::Bytes;
use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;

/// A compiled contract: name, init code and ABI.
///
/// Owned by whoever loaded it and shared by reference (`Arc`) with the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractArtifact {
    pub name: String,
    pub init_code: Bytes,
    pub abi: Value,
}

impl ContractArtifact {
    pub fn new(name: impl Into<String>, init_code: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            init_code: init_code.into(),
            abi: Value::Array(Vec::new()),
        }
    }
}

/// Loads artifacts produced by the contract toolchain.
pub trait ArtifactLoader {
    fn load(&self, contract_name: &str) -> Result<ContractArtifact>;
}

/// On-disk artifact JSON as written by hardhat/buidler style toolchains.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArtifactFile {
    contract_name: Option<String>,
    #[serde(default)]
    abi: Value,
    bytecode: BytecodeField,
}

/// Bytecode is either a bare hex string or a `{ "object": "..." }` wrapper.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BytecodeField {
    Hex(String),
    Object { object: String },
}

impl BytecodeField {
    fn decode(&self) -> Result<Bytes> {
        let hex_str = match self {
            BytecodeField::Hex(s) => s,
            BytecodeField::Object { object } => object,
        };
        let raw = hex::decode(hex_str.trim().trim_start_matches("0x"))
            .context("Artifact bytecode is not valid hex (unlinked libraries are not supported)")?;
        Ok(Bytes::from(raw))
    }
}

/// Reads artifacts from a directory.
///
/// Looks for `{dir}/{Name}.json`, then the hardhat layout
/// `{dir}/{Name}.sol/{Name}.json`.
#[derive(Debug, Clone)]
pub struct DirArtifactLoader {
    dir: PathBuf,
}

impl DirArtifactLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn candidates(&self, contract_name: &str) -> [PathBuf; 2] {
        [
            self.dir.join(format!("{contract_name}.json")),
            self.dir
                .join(format!("{contract_name}.sol"))
                .join(format!("{contract_name}.json")),
        ]
    }

    fn load_file(path: &Path, contract_name: &str) -> Result<ContractArtifact> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read artifact {}", path.display()))?;
        let file: ArtifactFile = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse artifact {}", path.display()))?;

        if let Some(name) = file.contract_name.as_deref().filter(|n| *n != contract_name) {
            anyhow::bail!(
                "Artifact {} declares contract {}, expected {}",
                path.display(),
                name,
                contract_name
            );
        }

        Ok(ContractArtifact {
            name: contract_name.to_string(),
            init_code: file.bytecode.decode()?,
            abi: file.abi,
        })
    }
}

impl ArtifactLoader for DirArtifactLoader {
    fn load(&self, contract_name: &str) -> Result<ContractArtifact> {
        let path = self
            .candidates(contract_name)
            .into_iter()
            .find(|p| p.is_file())
            .with_context(|| {
                format!(
                    "No artifact found for {} in {}",
                    contract_name,
                    self.dir.display()
                )
            })?;

        let artifact = Self::load_file(&path, contract_name)?;
        tracing::debug!(
            contract = %contract_name,
            path = %path.display(),
            init_code_len = artifact.init_code.len(),
            "Artifact loaded"
        );
        Ok(artifact)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_load_flat_artifact() {
        let temp_dir = TempDir::new("saltbox-test").expect("Failed to create temp dir");
        std::fs::write(
            temp_dir.path().join("Blog.json"),
            r#"{"contractName":"Blog","abi":[{"type":"constructor"}],"bytecode":"0xaabb"}"#,
        )
        .unwrap();

        let artifact = DirArtifactLoader::new(temp_dir.path()).load("Blog").unwrap();
        assert_eq!(artifact.name, "Blog");
        assert_eq!(artifact.init_code, Bytes::from(vec![0xaa, 0xbb]));
        assert!(artifact.abi.is_array());
    }

    #[test]
    fn test_load_hardhat_layout_with_object_bytecode() {
        let temp_dir = TempDir::new("saltbox-test").expect("Failed to create temp dir");
        let nested = temp_dir.path().join("Blog.sol");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("Blog.json"), r#"{"bytecode":{"object":"6080"}}"#).unwrap();

        let artifact = DirArtifactLoader::new(temp_dir.path()).load("Blog").unwrap();
        assert_eq!(artifact.init_code, Bytes::from(vec![0x60, 0x80]));
    }

    #[test]
    fn test_missing_artifact() {
        let temp_dir = TempDir::new("saltbox-test").expect("Failed to create temp dir");
        assert!(DirArtifactLoader::new(temp_dir.path()).load("Blog").is_err());
    }

    #[test]
    fn test_name_mismatch_and_unlinked_bytecode() {
        let temp_dir = TempDir::new("saltbox-test").expect("Failed to create temp dir");
        std::fs::write(
            temp_dir.path().join("Blog.json"),
            r#"{"contractName":"Token","bytecode":"0xaabb"}"#,
        )
        .unwrap();
        std::fs::write(
            temp_dir.path().join("Lib.json"),
            r#"{"bytecode":"0x73__$abc$__"}"#,
        )
        .unwrap();

        let loader = DirArtifactLoader::new(temp_dir.path());
        assert!(loader.load("Blog").is_err());
        assert!(loader.load("Lib").is_err());
    }
}
