//! Scoped per-job temporary directory: `input/` and `output/` under a fresh
//! owner-only tree, staged input download, and an output-upload seam that is
//! left as a no-op per spec.md §9's open question. Grounded on the teacher's
//! atomic-file helpers generalized from config persistence to a whole
//! directory tree with RAII cleanup via `tempfile::TempDir`.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::warn;

const OWNER_ONLY: u32 = 0o700;

/// The temporary workdir for one job's run. Removed on drop.
pub struct JobWorkdir {
    _root: tempfile::TempDir,
    input: PathBuf,
    output: PathBuf,
}

impl JobWorkdir {
    /// Create a fresh `gp4u-job-XXXXXX/{input,output}` tree under the
    /// system temp directory, all owner-only (mode 0700).
    pub fn new() -> std::io::Result<Self> {
        Self::new_in(std::env::temp_dir().as_path())
    }

    /// Same as [`JobWorkdir::new`] but rooted under a caller-chosen parent
    /// directory; used by tests to avoid touching the real system temp dir.
    pub fn new_in(parent: &Path) -> std::io::Result<Self> {
        let root = tempfile::Builder::new().prefix("gp4u-job-").tempdir_in(parent)?;
        set_owner_only(root.path())?;

        let input = root.path().join("input");
        let output = root.path().join("output");
        std::fs::create_dir(&input)?;
        std::fs::create_dir(&output)?;
        set_owner_only(&input)?;
        set_owner_only(&output)?;

        Ok(Self {
            _root: root,
            input,
            output,
        })
    }

    pub fn input_dir(&self) -> &Path {
        &self.input
    }

    pub fn output_dir(&self) -> &Path {
        &self.output
    }
}

fn set_owner_only(path: &Path) -> std::io::Result<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(OWNER_ONLY);
    std::fs::set_permissions(path, perms)
}

/// Download `input_data_url` to `input/input.tar.gz`, extract it in place,
/// then delete the archive. Failure at any step is non-fatal: the caller
/// logs and proceeds with an empty `input/` (spec.md §4.3, phase 3).
pub async fn stage_input(url: &str, workdir: &JobWorkdir) {
    if let Err(err) = try_stage_input(url, workdir).await {
        warn!(target: "agent::runner", %err, "input staging failed, continuing with empty input");
    }
}

async fn try_stage_input(url: &str, workdir: &JobWorkdir) -> anyhow::Result<()> {
    let archive_path = workdir.input_dir().join("input.tar.gz");
    let bytes = reqwest::get(url).await?.bytes().await?;
    tokio::fs::write(&archive_path, &bytes).await?;

    let input_dir = workdir.input_dir().to_path_buf();
    let archive_for_extract = archive_path.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let file = std::fs::File::open(&archive_for_extract)?;
        let decoder = flate2::read::GzDecoder::new(file);
        let mut archive = tar::Archive::new(decoder);
        archive.unpack(&input_dir)?;
        Ok(())
    })
    .await??;

    tokio::fs::remove_file(&archive_path).await.ok();
    Ok(())
}

/// Upload `output/` to `output_bucket`. A no-op seam: the source this spec
/// was distilled from leaves upload unimplemented too (spec.md §9, "Output
/// upload is a no-op in source"). Failure, were this ever wired up, would
/// be non-fatal per spec.md §4.3 phase 8.
pub async fn upload_output(_output_bucket: &str, _workdir: &JobWorkdir) {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt as _;

    #[test]
    fn workdir_tree_is_owner_only() {
        let parent = tempfile::tempdir().unwrap();
        let workdir = JobWorkdir::new_in(parent.path()).unwrap();

        let input_mode = std::fs::metadata(workdir.input_dir()).unwrap().permissions().mode() & 0o777;
        let output_mode = std::fs::metadata(workdir.output_dir()).unwrap().permissions().mode() & 0o777;
        assert_eq!(input_mode, OWNER_ONLY);
        assert_eq!(output_mode, OWNER_ONLY);
    }

    #[test]
    fn workdir_is_removed_on_drop() {
        let parent = tempfile::tempdir().unwrap();
        let input_dir_path;
        {
            let workdir = JobWorkdir::new_in(parent.path()).unwrap();
            input_dir_path = workdir.input_dir().to_path_buf();
            assert!(input_dir_path.exists());
        }
        assert!(!input_dir_path.exists());
    }
}
