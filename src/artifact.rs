//! Finished video artifacts and their ephemeral references.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;

use crate::foundation::error::{ReelError, ReelResult};

const REF_SCHEME: &str = "signreel:artifact/";

/// Temporary handle to an in-memory artifact. Invalid after release.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EphemeralRef(String);

impl EphemeralRef {
    fn fresh() -> Self {
        Self(format!("{REF_SCHEME}{}", uuid::Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EphemeralRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable encoded video.
#[derive(Debug, PartialEq, Eq)]
pub struct Artifact {
    bytes: Vec<u8>,
    mime_type: String,
    size_bytes: u64,
    ephemeral_ref: EphemeralRef,
    finalized: bool,
}

impl Artifact {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    /// Size in MiB, as shown next to the player.
    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }

    pub fn ephemeral_ref(&self) -> &EphemeralRef {
        &self.ephemeral_ref
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }
}

/// Owns artifact creation, the set of live references, and export.
#[derive(Debug, Default)]
pub struct ArtifactManager {
    live: HashMap<EphemeralRef, Arc<Artifact>>,
}

impl ArtifactManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Concatenate `chunks` into one finalized artifact and issue a fresh reference for it.
    pub fn create(&mut self, chunks: Vec<Vec<u8>>, mime_type: impl Into<String>) -> Arc<Artifact> {
        let size_bytes: usize = chunks.iter().map(Vec::len).sum();
        let bytes = chunks.concat();
        debug_assert_eq!(bytes.len(), size_bytes);

        let mut ephemeral_ref = EphemeralRef::fresh();
        while self.live.contains_key(&ephemeral_ref) {
            ephemeral_ref = EphemeralRef::fresh();
        }

        let artifact = Arc::new(Artifact {
            bytes,
            mime_type: mime_type.into(),
            size_bytes: size_bytes as u64,
            ephemeral_ref: ephemeral_ref.clone(),
            finalized: true,
        });
        self.live.insert(ephemeral_ref, Arc::clone(&artifact));
        tracing::debug!(
            reference = %artifact.ephemeral_ref,
            size_bytes = artifact.size_bytes,
            mime = %artifact.mime_type,
            "created artifact"
        );
        artifact
    }

    /// Look up a live reference.
    pub fn resolve(&self, r: &EphemeralRef) -> Option<Arc<Artifact>> {
        self.live.get(r).cloned()
    }

    pub fn is_live(&self, r: &EphemeralRef) -> bool {
        self.live.contains_key(r)
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Invalidate the artifact's reference. Returns `false` if it was already released.
    pub fn release(&mut self, artifact: &Artifact) -> bool {
        let released = self.live.remove(&artifact.ephemeral_ref).is_some();
        if released {
            tracing::debug!(reference = %artifact.ephemeral_ref, "released artifact");
        }
        released
    }

    /// Write the artifact's bytes to `path`. The artifact itself is left untouched.
    pub fn export(&self, artifact: &Artifact, path: &Path) -> ReelResult<PathBuf> {
        if !self.is_live(&artifact.ephemeral_ref) {
            return Err(ReelError::validation(format!(
                "artifact '{}' has been released",
                artifact.ephemeral_ref
            )));
        }
        ensure_parent_dir(path)?;
        std::fs::write(path, &artifact.bytes)
            .with_context(|| format!("write artifact '{}'", path.display()))?;
        tracing::info!(
            path = %path.display(),
            size_bytes = artifact.size_bytes,
            "exported artifact"
        );
        Ok(path.to_path_buf())
    }
}

/// One logical place an artifact is shown in, e.g. the result panel.
///
/// Filling the slot releases whatever it held before, so its old reference never leaks.
#[derive(Debug, Default)]
pub struct ArtifactSlot {
    current: Option<Arc<Artifact>>,
}

impl ArtifactSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&Arc<Artifact>> {
        self.current.as_ref()
    }

    pub fn fill(&mut self, manager: &mut ArtifactManager, artifact: Arc<Artifact>) {
        self.clear(manager);
        self.current = Some(artifact);
    }

    pub fn clear(&mut self, manager: &mut ArtifactManager) {
        if let Some(old) = self.current.take() {
            manager.release(&old);
        }
    }
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> ReelResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_sums_chunk_lengths() {
        let mut mgr = ArtifactManager::new();
        let a = mgr.create(vec![vec![1, 2], vec![], vec![3, 4, 5]], "video/webm");
        assert_eq!(a.size_bytes(), 5);
        assert_eq!(a.bytes(), &[1, 2, 3, 4, 5]);
        assert_eq!(a.mime_type(), "video/webm");
        assert!(a.is_finalized());
        assert!(a.ephemeral_ref().as_str().starts_with(REF_SCHEME));
        assert_eq!(mgr.resolve(a.ephemeral_ref()).as_deref(), Some(&*a));
    }

    #[test]
    fn released_reference_is_never_reissued() {
        let mut mgr = ArtifactManager::new();
        let first = mgr.create(vec![vec![1]], "video/webm");
        let old = first.ephemeral_ref().clone();
        assert!(mgr.release(&first));
        assert!(!mgr.release(&first));
        assert!(mgr.resolve(&old).is_none());

        for _ in 0..64 {
            let next = mgr.create(vec![vec![2]], "video/webm");
            assert_ne!(next.ephemeral_ref(), &old);
            assert!(mgr.is_live(next.ephemeral_ref()));
        }
    }

    #[test]
    fn slot_releases_previous_artifact() {
        let mut mgr = ArtifactManager::new();
        let mut slot = ArtifactSlot::new();

        let a = mgr.create(vec![vec![1]], "video/webm");
        slot.fill(&mut mgr, Arc::clone(&a));
        let b = mgr.create(vec![vec![2]], "video/webm");
        slot.fill(&mut mgr, Arc::clone(&b));

        assert!(!mgr.is_live(a.ephemeral_ref()));
        assert!(mgr.is_live(b.ephemeral_ref()));
        assert_eq!(mgr.live_count(), 1);

        slot.clear(&mut mgr);
        assert_eq!(mgr.live_count(), 0);
        assert!(slot.current().is_none());
    }

    #[test]
    fn export_writes_bytes_and_keeps_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut mgr = ArtifactManager::new();
        let a = mgr.create(vec![b"abc".to_vec(), b"def".to_vec()], "video/webm");

        let path = dir.path().join("nested").join("sign_language.webm");
        mgr.export(&a, &path).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"abcdef");
        assert_eq!(a.size_bytes(), 6);
        assert!(mgr.is_live(a.ephemeral_ref()));

        mgr.release(&a);
        assert!(mgr.export(&a, &path).is_err());
    }

    #[test]
    fn size_mb_uses_mebibytes() {
        let mut mgr = ArtifactManager::new();
        let a = mgr.create(vec![vec![0u8; 1024 * 1024 + 512 * 1024]], "video/webm");
        assert!((a.size_mb() - 1.5).abs() < 1e-9);
    }
}
