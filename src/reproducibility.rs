// Records which source revision produced a dataset.

use std::path::Path;
use std::process::Command;

use crate::error::{Error, Result};

/// `HEAD` of the repository containing `dir`, prefixed with `dirty-` when the
/// working tree has unstaged changes.
pub fn git_revision(dir: impl AsRef<Path>) -> Result<String> {
    let dir = dir.as_ref();
    let output = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(dir)
        .output()
        .map_err(|e| Error::Git(format!("failed to run git: {e}")))?;
    if !output.status.success() {
        return Err(Error::Git(format!(
            "{} is not inside a git repository: {}",
            dir.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let revision = String::from_utf8_lossy(&output.stdout).trim().to_string();

    let status = Command::new("git")
        .args(["diff", "--quiet"])
        .current_dir(dir)
        .status()
        .map_err(|e| Error::Git(format!("failed to run git: {e}")))?;

    tag_revision(revision, status.code())
}

/// `git diff --quiet` exits 0 when clean and 1 when there are changes; anything
/// else is a git failure.
fn tag_revision(revision: String, diff_code: Option<i32>) -> Result<String> {
    match diff_code {
        Some(0) => Ok(revision),
        Some(1) => Ok(format!("dirty-{revision}")),
        Some(code) => Err(Error::Git(format!("git diff exited with status {code}"))),
        None => Err(Error::Git("git diff was terminated by a signal".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_directory_has_no_revision() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(git_revision(dir.path()), Err(Error::Git(_))));
    }

    #[test]
    fn only_exit_code_one_marks_a_dirty_tree() {
        assert_eq!(tag_revision("abc".into(), Some(0)).unwrap(), "abc");
        assert_eq!(tag_revision("abc".into(), Some(1)).unwrap(), "dirty-abc");
        assert!(matches!(tag_revision("abc".into(), Some(128)), Err(Error::Git(_))));
        assert!(matches!(tag_revision("abc".into(), None), Err(Error::Git(_))));
    }
}
