//! Maps a commit's changed paths onto the units that have to be redeployed.

use crate::error::Result;
use crate::registry::Registry;
use serde::{Deserialize, Serialize};

/// The source paths touched by one commit or pull request. Derived once
/// from the version-control diff and never mutated afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeSet {
    pub touched_paths: Vec<String>,
}

impl ChangeSet {
    pub fn new(paths: impl IntoIterator<Item = impl Into<String>>) -> Self {
        ChangeSet {
            touched_paths: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.touched_paths.is_empty()
    }
}

/// Manual override for a run: forces units into the result regardless of
/// what the diff says.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DeployOverride {
    #[default]
    None,
    All,
    Units(Vec<String>),
}

/// Affected unit names in registration order, duplicates collapsed.
///
/// An empty change set with no override yields an empty vec; callers are
/// expected to short-circuit the whole pipeline on that result instead of
/// planning a no-op run.
pub fn detect(
    changes: &ChangeSet,
    registry: &Registry,
    overrides: &DeployOverride,
) -> Result<Vec<String>> {
    match overrides {
        DeployOverride::All => {
            return Ok(registry.units().iter().map(|u| u.name.clone()).collect());
        }
        DeployOverride::Units(names) => {
            // Validate every requested name before returning any of them.
            for name in names {
                registry.get(name)?;
            }
            let mut out = Vec::new();
            for unit in registry.units() {
                if names.contains(&unit.name) && !out.contains(&unit.name) {
                    out.push(unit.name.clone());
                }
            }
            return Ok(out);
        }
        DeployOverride::None => {}
    }

    let mut out = Vec::new();
    for unit in registry.units() {
        if changes.touched_paths.iter().any(|p| unit.matches_path(p)) {
            out.push(unit.name.clone());
        }
    }
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StagehandError;

    #[test]
    fn empty_changes_no_override_is_noop() {
        let reg = Registry::builtin();
        let affected = detect(&ChangeSet::default(), &reg, &DeployOverride::None).unwrap();
        assert!(affected.is_empty());
    }

    #[test]
    fn platform_frontend_path_maps_to_coach_frontend_only() {
        let reg = Registry::builtin();
        let changes = ChangeSet::new(["tsa-platform-frontend/src/x.tsx"]);
        let affected = detect(&changes, &reg, &DeployOverride::None).unwrap();
        assert_eq!(affected, vec!["coach-frontend".to_string()]);
    }

    #[test]
    fn multiple_prefixes_collapse_to_registration_order() {
        let reg = Registry::builtin();
        let changes = ChangeSet::new([
            "tsa-admin-backend/handlers/invites.py",
            "tsa-infrastructure/app.py",
            "tsa-admin-backend/handlers/users.py",
        ]);
        let affected = detect(&changes, &reg, &DeployOverride::None).unwrap();
        assert_eq!(affected, vec!["infrastructure", "admin-backend"]);
    }

    #[test]
    fn unrelated_paths_match_nothing() {
        let reg = Registry::builtin();
        let changes = ChangeSet::new(["docs/README.md", ".github/workflows/deploy.yml"]);
        let affected = detect(&changes, &reg, &DeployOverride::None).unwrap();
        assert!(affected.is_empty());
    }

    #[test]
    fn override_all_beats_empty_changes() {
        let reg = Registry::builtin();
        let affected = detect(&ChangeSet::default(), &reg, &DeployOverride::All).unwrap();
        assert_eq!(affected.len(), reg.units().len());
        assert_eq!(affected[0], "infrastructure");
    }

    #[test]
    fn override_units_takes_precedence_over_paths() {
        let reg = Registry::builtin();
        let changes = ChangeSet::new(["tsa-platform-frontend/src/x.tsx"]);
        let overrides = DeployOverride::Units(vec!["parent-frontend".into()]);
        let affected = detect(&changes, &reg, &overrides).unwrap();
        assert_eq!(affected, vec!["parent-frontend"]);
    }

    #[test]
    fn override_unknown_unit_fails() {
        let reg = Registry::builtin();
        let overrides = DeployOverride::Units(vec!["billing-backend".into()]);
        let err = detect(&ChangeSet::default(), &reg, &overrides).unwrap_err();
        assert!(matches!(err, StagehandError::UnitNotFound(_)));
    }
}
