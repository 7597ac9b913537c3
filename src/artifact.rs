//! The build artifact handed to downstream transformers.

use crate::{
    discovery::{CacheStats, DiscoverySnapshot},
    error::{BuildError, Result},
    evaluator::{ElementKind, Prebuild},
    identity::CanonicalId,
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::PathBuf,
    sync::Arc,
};

/// One definition paired with its evaluated element.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderArtifactElement {
    pub id: CanonicalId,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub prebuild: Prebuild,
}

/// Per-build metadata attached to the artifact.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub duration_ms: u64,
    /// Warning-severity analyzer diagnostics, formatted for display.
    pub warnings: Vec<String>,
    pub cache: CacheStats,
}

/// Consolidated output of one successful build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderArtifact {
    pub elements: BTreeMap<CanonicalId, BuilderArtifactElement>,
    pub report: BuildReport,
}

impl BuilderArtifact {
    pub fn element(&self, id: &CanonicalId) -> Option<&BuilderArtifactElement> {
        self.elements.get(id)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Pairs every declared definition with its evaluated element.
///
/// The artifact's element set is exactly the definitions of the current
/// snapshots: a definition with no evaluated element and a duplicate
/// canonical id are both fatal.
pub(crate) fn aggregate(
    snapshots: &BTreeMap<PathBuf, Arc<DiscoverySnapshot>>,
    prebuilds: &BTreeMap<CanonicalId, Prebuild>,
    report: BuildReport,
) -> Result<BuilderArtifact> {
    let mut elements = BTreeMap::new();
    for snapshot in snapshots.values() {
        for definition in &snapshot.analysis.definitions {
            let id = definition.canonical_id.clone();
            let prebuild = prebuilds
                .get(&id)
                .cloned()
                .ok_or_else(|| BuildError::MissingRuntimeElement { id: id.clone() })?;
            let element =
                BuilderArtifactElement { id: id.clone(), kind: prebuild.kind(), prebuild };
            if elements.insert(id.clone(), element).is_some() {
                return Err(BuildError::AlreadyRegistered { id });
            }
        }
    }
    Ok(BuilderArtifact { elements, report })
}

/// Formats the warning-severity diagnostics of all snapshots for the report.
pub(crate) fn collect_warnings(
    snapshots: &BTreeMap<PathBuf, Arc<DiscoverySnapshot>>,
) -> Vec<String> {
    use crate::analyzer::Severity;

    let mut warnings = Vec::new();
    for (path, snapshot) in snapshots {
        for diagnostic in &snapshot.analysis.diagnostics {
            if diagnostic.severity() == Severity::Warning {
                warnings.push(format!(
                    "{}:{}:{}: {}",
                    path.display(),
                    diagnostic.location.line,
                    diagnostic.location.column,
                    diagnostic.message
                ));
            }
        }
    }
    warnings
}
