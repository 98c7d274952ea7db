//! Library linking.

use std::collections::BTreeMap;

use alloy_core::primitives::{Address, Bytes};

use crate::{
    artifact::{ADDRESS_LEN, Artifact},
    error::{DeployError, Result},
};

/// Library name to deployed address.
pub type LibraryAddresses = BTreeMap<String, Address>;

/// Substitute every library placeholder of `artifact` with its address.
///
/// Fails with [`DeployError::UnresolvedLibraryReference`] on the first library
/// missing from `libraries`. Entries for libraries the artifact does not use
/// are ignored.
pub fn link(artifact: &Artifact, libraries: &LibraryAddresses) -> Result<Bytes> {
    let mut code = artifact.bytecode.to_vec();

    for reference in &artifact.link_references {
        let address = libraries.get(&reference.library).ok_or_else(|| {
            DeployError::UnresolvedLibraryReference {
                artifact: artifact.name.clone(),
                library: reference.library.clone(),
            }
        })?;

        for &offset in &reference.offsets {
            let slot = code.get_mut(offset..offset + ADDRESS_LEN).ok_or_else(|| {
                DeployError::InvalidArtifact {
                    artifact: artifact.name.clone(),
                    reason: format!(
                        "placeholder for `{}` at offset {offset} overruns the bytecode",
                        reference.library
                    ),
                }
            })?;
            slot.copy_from_slice(address.as_slice());
        }

        tracing::debug!(
            artifact = %artifact.name,
            library = %reference.library,
            address = %address,
            slots = reference.offsets.len(),
            "Linked library"
        );
    }

    Ok(Bytes::from(code))
}
