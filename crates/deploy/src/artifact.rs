//! Compiled contract artifacts and the set they are resolved from.
//!
//! Artifacts are produced by an external build step. Two JSON layouts are
//! understood:
//! - Truffle, where library placeholders sit inline in the bytecode as
//!   `__LibraryName______...` markers of 40 hex characters.
//! - Hardhat and Foundry, which additionally list `linkReferences` with byte
//!   offsets. Offsets are authoritative there, so hashed placeholders such as
//!   `__$0123...$__` need no interpretation.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use alloy_core::{
    json_abi::{Function, JsonAbi},
    primitives::Bytes,
};
use serde::Deserialize;

use crate::error::{DeployError, Result};

/// Length of a library address in bytes.
pub const ADDRESS_LEN: usize = 20;

/// Length of a library placeholder in hex characters.
const PLACEHOLDER_HEX_LEN: usize = ADDRESS_LEN * 2;

/// Places inside an artifact's bytecode that must receive a library address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkReference {
    /// Name of the library as it appears in the artifact.
    pub library: String,
    /// Byte offsets of each 20-byte placeholder.
    pub offsets: Vec<usize>,
}

/// A compiled contract: bytecode, interface and unresolved library slots.
///
/// Placeholder regions of `bytecode` are zeroed; [`LinkReference`]s say where
/// they are.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub bytecode: Bytes,
    pub abi: JsonAbi,
    pub link_references: Vec<LinkReference>,
}

impl Artifact {
    /// Parse an artifact from the JSON emitted by a contract build.
    ///
    /// `fallback_name` is used when the JSON carries no `contractName`.
    pub fn from_json(json: &str, fallback_name: &str) -> Result<Self> {
        Self::from_raw(serde_json::from_str(json)?, fallback_name)
    }

    fn from_raw(raw: RawArtifact, fallback_name: &str) -> Result<Self> {
        let name = raw
            .contract_name
            .clone()
            .unwrap_or_else(|| fallback_name.to_string());

        let (hex_code, nested_refs) = match raw.bytecode {
            RawBytecode::Hex(code) => (code, BTreeMap::new()),
            RawBytecode::Object {
                object,
                link_references,
            } => (object, link_references),
        };

        let declared = if raw.link_references.is_empty() {
            nested_refs
        } else {
            raw.link_references
        };

        let (bytecode, inline_refs) = decode_bytecode(&name, &hex_code)?;

        let link_references = if declared.is_empty() {
            inline_refs
        } else {
            collect_declared_references(&name, &declared, bytecode.len())?
        };

        Ok(Self {
            name,
            bytecode,
            abi: raw.abi,
            link_references,
        })
    }

    /// Names of every library this artifact needs before it can be deployed.
    pub fn required_libraries(&self) -> impl Iterator<Item = &str> {
        self.link_references.iter().map(|r| r.library.as_str())
    }

    /// Whether the bytecode is ready to deploy as is.
    pub fn is_linked(&self) -> bool {
        self.link_references.is_empty()
    }

    /// Every overload of the function `name`, in ABI order.
    pub fn functions(&self, name: &str) -> impl Iterator<Item = &Function> {
        self.abi.function(name).into_iter().flatten()
    }
}

/// Decode hex bytecode, zeroing and recording any inline placeholders.
fn decode_bytecode(artifact: &str, code: &str) -> Result<(Bytes, Vec<LinkReference>)> {
    let code = code.strip_prefix("0x").unwrap_or(code);
    let mut cleaned = String::with_capacity(code.len());
    let mut refs: BTreeMap<String, Vec<usize>> = BTreeMap::new();

    let mut rest = code;
    while let Some(pos) = rest.find("__") {
        cleaned.push_str(&rest[..pos]);
        let start = cleaned.len();
        let marker = rest
            .get(pos..pos + PLACEHOLDER_HEX_LEN)
            .ok_or_else(|| invalid(artifact, "truncated library placeholder"))?;

        if start % 2 != 0 {
            return Err(invalid(artifact, "library placeholder is not byte aligned"));
        }

        let library = marker.trim_matches('_').to_string();
        if library.is_empty() {
            return Err(invalid(artifact, "library placeholder has no name"));
        }

        refs.entry(library).or_default().push(start / 2);
        cleaned.push_str(&"0".repeat(PLACEHOLDER_HEX_LEN));
        rest = &rest[pos + PLACEHOLDER_HEX_LEN..];
    }
    cleaned.push_str(rest);

    let bytes = hex::decode(&cleaned).map_err(|e| invalid(artifact, &format!("bad hex: {e}")))?;

    let refs = refs
        .into_iter()
        .map(|(library, offsets)| LinkReference { library, offsets })
        .collect();

    Ok((Bytes::from(bytes), refs))
}

fn collect_declared_references(
    artifact: &str,
    declared: &RawLinkReferences,
    code_len: usize,
) -> Result<Vec<LinkReference>> {
    let mut refs: BTreeMap<String, Vec<usize>> = BTreeMap::new();

    for libraries in declared.values() {
        for (library, slots) in libraries {
            for slot in slots {
                if slot.length != ADDRESS_LEN {
                    return Err(invalid(
                        artifact,
                        &format!("link reference for `{library}` has length {}", slot.length),
                    ));
                }
                if slot.start + ADDRESS_LEN > code_len {
                    return Err(invalid(
                        artifact,
                        &format!("link reference for `{library}` overruns the bytecode"),
                    ));
                }
                refs.entry(library.clone()).or_default().push(slot.start);
            }
        }
    }

    Ok(refs
        .into_iter()
        .map(|(library, mut offsets)| {
            offsets.sort_unstable();
            offsets.dedup();
            LinkReference { library, offsets }
        })
        .collect())
}

/// Gather every `*.json` file below `dir`.
fn collect_json_files(dir: &Path, paths: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_json_files(&path, paths)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            paths.push(path);
        }
    }
    Ok(())
}

fn invalid(artifact: &str, reason: &str) -> DeployError {
    DeployError::InvalidArtifact {
        artifact: artifact.to_string(),
        reason: reason.to_string(),
    }
}

type RawLinkReferences = BTreeMap<String, BTreeMap<String, Vec<RawOffset>>>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: Option<String>,
    abi: JsonAbi,
    bytecode: RawBytecode,
    #[serde(default)]
    link_references: RawLinkReferences,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawBytecode {
    Hex(String),
    Object {
        object: String,
        #[serde(default, rename = "linkReferences")]
        link_references: RawLinkReferences,
    },
}

#[derive(Debug, Deserialize)]
struct RawOffset {
    start: usize,
    length: usize,
}

/// The artifacts available to one deployment run, keyed by contract name.
#[derive(Debug, Clone, Default)]
pub struct ArtifactSet {
    artifacts: BTreeMap<String, Artifact>,
}

impl ArtifactSet {
    /// Build a set from artifacts already in memory.
    pub fn from_artifacts(artifacts: impl IntoIterator<Item = Artifact>) -> Self {
        Self {
            artifacts: artifacts.into_iter().map(|a| (a.name.clone(), a)).collect(),
        }
    }

    /// Load every artifact under `dir`, subdirectories included.
    ///
    /// Hardhat (`contracts/X.sol/X.json`) and Foundry (`out/X.sol/X.json`)
    /// trees load as they are. JSON files without both `abi` and `bytecode`,
    /// such as `*.dbg.json` sidecars and build info, are skipped. Two files
    /// declaring the same contract name are rejected.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        collect_json_files(dir, &mut paths)?;
        paths.sort();

        let mut artifacts = BTreeMap::new();
        let mut sources: BTreeMap<String, PathBuf> = BTreeMap::new();
        for path in paths {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_default();
            let content = std::fs::read_to_string(&path)?;

            let value: serde_json::Value =
                serde_json::from_str(&content).map_err(|e| invalid(&stem, &e.to_string()))?;
            if value.get("abi").is_none() || value.get("bytecode").is_none() {
                tracing::debug!(path = %path.display(), "Skipping non-artifact JSON");
                continue;
            }

            let raw: RawArtifact =
                serde_json::from_value(value).map_err(|e| invalid(&stem, &e.to_string()))?;
            let artifact = Artifact::from_raw(raw, &stem)?;

            if let Some(previous) = sources.insert(artifact.name.clone(), path.clone()) {
                return Err(invalid(
                    &artifact.name,
                    &format!(
                        "declared by both {} and {}",
                        previous.display(),
                        path.display()
                    ),
                ));
            }

            tracing::debug!(
                name = %artifact.name,
                path = %path.display(),
                libraries = artifact.link_references.len(),
                "Loaded artifact"
            );
            artifacts.insert(artifact.name.clone(), artifact);
        }

        tracing::info!(dir = %dir.display(), count = artifacts.len(), "Artifacts loaded");
        Ok(Self { artifacts })
    }

    /// Find the artifact called `name`.
    pub fn resolve(&self, name: &str) -> Result<&Artifact> {
        self.artifacts
            .get(name)
            .ok_or_else(|| DeployError::ArtifactNotFound(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{auction_bytecode_hex, auction_json, order_set_json};
    use tempdir::TempDir;

    #[test]
    fn test_truffle_placeholders_are_zeroed_and_recorded() {
        let artifact = Artifact::from_json(&auction_json(), "ignored").unwrap();

        assert_eq!(artifact.name, "NFTAuction");
        assert_eq!(
            artifact.link_references,
            vec![LinkReference {
                library: "IterableOrderedOrderSet".to_string(),
                offsets: vec![2],
            }]
        );
        assert_eq!(&artifact.bytecode[2..22], &[0u8; 20]);
        assert_eq!(artifact.bytecode[0], 0x60);
        assert!(!artifact.is_linked());
    }

    #[test]
    fn test_library_without_references_is_linked() {
        let artifact = Artifact::from_json(&order_set_json(), "ignored").unwrap();

        assert_eq!(artifact.name, "IterableOrderedOrderSet");
        assert!(artifact.is_linked());
        assert_eq!(artifact.required_libraries().count(), 0);
    }

    #[test]
    fn test_declared_link_references_win() {
        let json = serde_json::json!({
            "contractName": "Auction",
            "abi": [],
            "bytecode": {
                "object": format!("0x6001{}6002", "__$f0e1d2c3b4a5968778695a4b3c2d1e0f0a$__"),
                "linkReferences": {
                    "src/OrderSet.sol": {
                        "OrderSet": [{ "start": 2, "length": 20 }]
                    }
                }
            }
        })
        .to_string();

        let artifact = Artifact::from_json(&json, "Auction").unwrap();
        assert_eq!(artifact.link_references.len(), 1);
        assert_eq!(artifact.link_references[0].library, "OrderSet");
        assert_eq!(artifact.link_references[0].offsets, vec![2]);
        assert_eq!(artifact.bytecode.len(), 24);
    }

    #[test]
    fn test_declared_reference_out_of_bounds() {
        let json = serde_json::json!({
            "contractName": "Broken",
            "abi": [],
            "bytecode": "0x6001",
            "linkReferences": {
                "src/Lib.sol": { "Lib": [{ "start": 1, "length": 20 }] }
            }
        })
        .to_string();

        let err = Artifact::from_json(&json, "Broken").unwrap_err();
        assert!(matches!(err, DeployError::InvalidArtifact { .. }));
    }

    #[test]
    fn test_truncated_placeholder_is_rejected() {
        let json = serde_json::json!({
            "contractName": "Broken",
            "abi": [],
            "bytecode": "0x6001__Lib___"
        })
        .to_string();

        let err = Artifact::from_json(&json, "Broken").unwrap_err();
        assert!(matches!(err, DeployError::InvalidArtifact { .. }));
    }

    #[test]
    fn test_missing_contract_name_uses_fallback() {
        let json = serde_json::json!({ "abi": [], "bytecode": "0x00" }).to_string();
        let artifact = Artifact::from_json(&json, "FromFileStem").unwrap();
        assert_eq!(artifact.name, "FromFileStem");
    }

    #[test]
    fn test_resolve_missing_artifact() {
        let set = ArtifactSet::default();
        let err = set.resolve("NFTAuction").unwrap_err();
        assert!(matches!(err, DeployError::ArtifactNotFound(name) if name == "NFTAuction"));
    }

    #[test]
    fn test_load_dir() {
        let temp_dir = TempDir::new("stagehand-artifacts").expect("Failed to create temp dir");
        std::fs::write(temp_dir.path().join("NFTAuction.json"), auction_json()).unwrap();
        std::fs::write(
            temp_dir.path().join("IterableOrderedOrderSet.json"),
            order_set_json(),
        )
        .unwrap();
        std::fs::write(temp_dir.path().join("README.md"), "not an artifact").unwrap();

        let set = ArtifactSet::load_dir(temp_dir.path()).unwrap();

        assert_eq!(set.len(), 2);
        assert_eq!(
            set.names().collect::<Vec<_>>(),
            vec!["IterableOrderedOrderSet", "NFTAuction"]
        );
        assert!(set.resolve("NFTAuction").is_ok());
        assert!(auction_bytecode_hex().starts_with("0x60"));
    }

    #[test]
    fn test_load_dir_walks_hardhat_tree() {
        let temp_dir = TempDir::new("stagehand-artifacts").expect("Failed to create temp dir");
        let root = temp_dir.path();

        let auction_dir = root.join("contracts").join("NFTAuction.sol");
        let library_dir = root.join("contracts").join("libraries").join("IterableOrderedOrderSet.sol");
        let build_info = root.join("build-info");
        for dir in [&auction_dir, &library_dir, &build_info] {
            std::fs::create_dir_all(dir).unwrap();
        }

        std::fs::write(auction_dir.join("NFTAuction.json"), auction_json()).unwrap();
        std::fs::write(
            auction_dir.join("NFTAuction.dbg.json"),
            r#"{"_format":"hh-sol-dbg-1","buildInfo":"../../build-info/5f3c.json"}"#,
        )
        .unwrap();
        std::fs::write(library_dir.join("IterableOrderedOrderSet.json"), order_set_json()).unwrap();
        std::fs::write(
            build_info.join("5f3c.json"),
            r#"{"id":"5f3c","solcVersion":"0.8.24","input":{},"output":{}}"#,
        )
        .unwrap();

        let set = ArtifactSet::load_dir(root).unwrap();

        assert_eq!(
            set.names().collect::<Vec<_>>(),
            vec!["IterableOrderedOrderSet", "NFTAuction"]
        );
        assert!(!set.resolve("NFTAuction").unwrap().is_linked());
    }

    #[test]
    fn test_load_dir_rejects_duplicate_contract_names() {
        let temp_dir = TempDir::new("stagehand-artifacts").expect("Failed to create temp dir");
        for source in ["Auction.sol", "AuctionV2.sol"] {
            let dir = temp_dir.path().join(source);
            std::fs::create_dir_all(&dir).unwrap();
            std::fs::write(dir.join("NFTAuction.json"), auction_json()).unwrap();
        }

        let err = ArtifactSet::load_dir(temp_dir.path()).unwrap_err();
        assert!(matches!(err, DeployError::InvalidArtifact { artifact, .. } if artifact == "NFTAuction"));
    }

    #[test]
    fn test_load_dir_with_corrupted_file() {
        let temp_dir = TempDir::new("stagehand-artifacts").expect("Failed to create temp dir");
        std::fs::write(temp_dir.path().join("Broken.json"), "{ invalid json }").unwrap();

        let err = ArtifactSet::load_dir(temp_dir.path()).unwrap_err();
        assert!(matches!(err, DeployError::InvalidArtifact { artifact, .. } if artifact == "Broken"));
    }
}
