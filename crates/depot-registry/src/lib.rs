mod backend;
mod checksum;
mod error;
mod fetch;
mod index;
mod probe;
mod vcs;

pub use backend::MetadataBackend;
pub use checksum::{sha256_hex_file, verify_sha256_file};
pub use error::RegistryError;
pub use fetch::{fetch_url_tree, ArtifactFetcher, FetchOutcome};
pub use index::RegistryIndex;
pub use probe::read_tree_manifest;
pub use vcs::checkout_vcs_source;

#[cfg(test)]
mod tests;
