use depot_core::PackageName;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("unrecognized upgrade strategy '{token}' (choose from: eager, only-if-needed)")]
    InvalidStrategy { token: String },

    #[error("conflicting requirements for '{name}': no version satisfies {constraints}")]
    VersionConflict {
        name: PackageName,
        constraints: String,
    },

    #[error("package '{name}' was not found in any configured source")]
    NotFound { name: PackageName },

    #[error("dependency cycle detected involving: {}", names.join(", "))]
    Cycle { names: Vec<String> },

    #[error("cannot uninstall '{name}': still required by {}", dependents.join(", "))]
    BlockedByDependents {
        name: PackageName,
        dependents: Vec<String>,
    },

    #[error(transparent)]
    Candidates(#[from] anyhow::Error),
}
