//! Persistent per-branch stack metadata.
//!
//! Each tracked branch owns one record, serialized as a JSON blob in the
//! repository's object database and addressed by branch name through a ref
//! under `refs/strata/metadata/`. Records travel with clones that fetch the
//! namespace explicitly and are otherwise invisible to normal git usage.

use crate::{
    constants::METADATA_REF_NAMESPACE,
    errors::StrataResult,
};
use git2::Repository;
use serde::{Deserialize, Serialize};

/// The out-of-band record for a single non-trunk branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StackMetadata {
    /// The logical parent in the stack. Independent of git's own ancestry.
    pub parent_branch_name: String,
    /// The parent's revision as of the last successful sync. Used both to
    /// detect divergence and as the rebase anchor for this branch.
    pub parent_branch_revision: String,
    /// This branch's own tip just before its last rebase, recorded so that
    /// descendants can find their original base after the branch moves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_revision: Option<String>,
}

impl StackMetadata {
    /// Creates a fresh record for a branch stacked on `parent` at `revision`.
    pub fn new(parent_branch_name: String, parent_branch_revision: String) -> Self {
        Self {
            parent_branch_name,
            parent_branch_revision,
            prev_revision: None,
        }
    }
}

/// Store of [StackMetadata] records, backed by the repository's own object
/// database.
pub struct BranchMetadataStore<'a> {
    repository: &'a Repository,
}

impl<'a> BranchMetadataStore<'a> {
    /// Creates a store view over the given repository.
    pub fn new(repository: &'a Repository) -> Self {
        Self { repository }
    }

    /// Reads the record for `branch_name`.
    ///
    /// Returns [None] for branches without metadata, including branches that
    /// were deleted externally. Never errors on absence.
    pub fn read(&self, branch_name: &str) -> StrataResult<Option<StackMetadata>> {
        let reference = match self.repository.find_reference(&ref_name(branch_name)) {
            Ok(reference) => reference,
            Err(err) if err.code() == git2::ErrorCode::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let blob = reference.peel_to_blob()?;
        Ok(Some(serde_json::from_slice(blob.content())?))
    }

    /// Writes (creates or replaces) the record for `branch_name`.
    pub fn write(&self, branch_name: &str, metadata: &StackMetadata) -> StrataResult<()> {
        let blob = self.repository.blob(&serde_json::to_vec(metadata)?)?;
        self.repository.reference(
            &ref_name(branch_name),
            blob,
            true,
            &format!("strata: update metadata for {branch_name}"),
        )?;
        Ok(())
    }

    /// Deletes the record for `branch_name`, if present.
    pub fn delete(&self, branch_name: &str) -> StrataResult<()> {
        match self.repository.find_reference(&ref_name(branch_name)) {
            Ok(mut reference) => {
                reference.delete()?;
                Ok(())
            }
            Err(err) if err.code() == git2::ErrorCode::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Lists the names of all branches that have a metadata record.
    pub fn list(&self) -> StrataResult<Vec<String>> {
        let prefix = format!("{METADATA_REF_NAMESPACE}/");
        let mut names = Vec::new();
        for reference in self
            .repository
            .references_glob(&format!("{METADATA_REF_NAMESPACE}/*"))?
        {
            let reference = reference?;
            if let Some(name) = reference.name().and_then(|name| name.strip_prefix(&prefix)) {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Updates the recorded parent of `branch_name`. Creates the record if it
    /// does not exist yet.
    pub fn set_parent(
        &self,
        branch_name: &str,
        parent_branch_name: &str,
        parent_branch_revision: &str,
    ) -> StrataResult<()> {
        let mut metadata = self.read(branch_name)?.unwrap_or_else(|| {
            StackMetadata::new(
                parent_branch_name.to_string(),
                parent_branch_revision.to_string(),
            )
        });
        metadata.parent_branch_name = parent_branch_name.to_string();
        metadata.parent_branch_revision = parent_branch_revision.to_string();
        self.write(branch_name, &metadata)
    }

    /// Records the branch's pre-rebase tip so descendants can locate their
    /// original base.
    pub fn set_prev_revision(&self, branch_name: &str, revision: &str) -> StrataResult<()> {
        if let Some(mut metadata) = self.read(branch_name)? {
            metadata.prev_revision = Some(revision.to_string());
            self.write(branch_name, &metadata)?;
        }
        Ok(())
    }
}

/// The ref that addresses the metadata record for `branch_name`.
fn ref_name(branch_name: &str) -> String {
    format!("{METADATA_REF_NAMESPACE}/{branch_name}")
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn scratch_repo() -> (tempfile::TempDir, Repository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = Repository::init(dir.path()).unwrap();
        (dir, repo)
    }

    #[test]
    fn read_of_absent_branch_is_none() {
        let (_dir, repo) = scratch_repo();
        let store = BranchMetadataStore::new(&repo);
        assert!(store.read("missing").unwrap().is_none());
        // Deleting an absent record is also not an error.
        store.delete("missing").unwrap();
    }

    #[test]
    fn writes_are_readable_and_listable() {
        let (_dir, repo) = scratch_repo();
        let store = BranchMetadataStore::new(&repo);

        let meta_a = StackMetadata::new("main".to_string(), "abc123".to_string());
        let meta_b = StackMetadata::new("feat/a".to_string(), "def456".to_string());
        store.write("feat/a", &meta_a).unwrap();
        store.write("feat/b", &meta_b).unwrap();

        assert_eq!(store.read("feat/a").unwrap().unwrap(), meta_a);
        assert_eq!(store.read("feat/b").unwrap().unwrap(), meta_b);
        assert_eq!(
            store.list().unwrap(),
            vec!["feat/a".to_string(), "feat/b".to_string()]
        );

        store.delete("feat/a").unwrap();
        assert!(store.read("feat/a").unwrap().is_none());
        assert_eq!(store.list().unwrap(), vec!["feat/b".to_string()]);
    }

    #[test]
    fn set_parent_and_prev_revision_update_in_place() {
        let (_dir, repo) = scratch_repo();
        let store = BranchMetadataStore::new(&repo);

        store
            .write(
                "feature",
                &StackMetadata::new("main".to_string(), "old".to_string()),
            )
            .unwrap();
        store.set_prev_revision("feature", "tip-before-rebase").unwrap();
        store.set_parent("feature", "develop", "new").unwrap();

        let metadata = store.read("feature").unwrap().unwrap();
        assert_eq!(metadata.parent_branch_name, "develop");
        assert_eq!(metadata.parent_branch_revision, "new");
        assert_eq!(metadata.prev_revision.as_deref(), Some("tip-before-rebase"));
    }
}
