//! git-crypt detection
//!
//! Asks git which tracked files carry the `filter=git-crypt` attribute.

use crate::error::{Error, Result};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

/// Value of the `filter` attribute marking encrypted files
const CRYPT_FILTER: &str = "git-crypt";

/// Paths (relative to `dir`) of tracked files encrypted with git-crypt
///
/// Returns `Error::Io` with `NotFound` when git is not installed; callers
/// treat that as "skip this exclusion". A directory outside any git work
/// tree has no encrypted files.
pub fn git_crypt_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let toplevel = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args(["rev-parse", "--show-toplevel"])
        .stderr(Stdio::null())
        .output()?;

    if !toplevel.status.success() {
        debug!("{:?} is not inside a git work tree", dir);
        return Ok(Vec::new());
    }

    let git_root = PathBuf::from(String::from_utf8_lossy(&toplevel.stdout).trim());

    let ls_files = Command::new("git")
        .arg("-C")
        .arg(&git_root)
        .args(["ls-files", "-z"])
        .stderr(Stdio::null())
        .output()?;
    if !ls_files.status.success() {
        return Ok(Vec::new());
    }
    if ls_files.stdout.is_empty() {
        return Ok(Vec::new());
    }

    let mut check_attr = Command::new("git")
        .arg("-C")
        .arg(&git_root)
        .args(["check-attr", "filter", "--stdin", "-z"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    // Feed stdin from a thread so a large listing cannot deadlock on a full pipe.
    let mut stdin = check_attr
        .stdin
        .take()
        .ok_or_else(|| Error::Other("git check-attr stdin unavailable".to_string()))?;
    let listing = ls_files.stdout;
    let writer = std::thread::spawn(move || stdin.write_all(&listing));

    let output = check_attr.wait_with_output()?;
    writer
        .join()
        .map_err(|_| Error::Other("git check-attr writer panicked".to_string()))??;

    if !output.status.success() {
        return Ok(Vec::new());
    }

    let canonical_dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    let canonical_root = git_root.canonicalize().unwrap_or(git_root);

    let files = parse_check_attr(&output.stdout)
        .into_iter()
        .filter_map(|rel| {
            canonical_root
                .join(rel)
                .strip_prefix(&canonical_dir)
                .ok()
                .map(Path::to_path_buf)
        })
        .collect::<Vec<_>>();

    if !files.is_empty() {
        debug!("Excluding git-crypt encrypted files: {:?}", files);
    }
    Ok(files)
}

/// Parse `git check-attr -z` output (`path\0attr\0value\0` triples),
/// keeping the paths whose filter is git-crypt
fn parse_check_attr(output: &[u8]) -> Vec<String> {
    let text = String::from_utf8_lossy(output);
    let fields: Vec<&str> = text.split('\0').collect();

    fields
        .chunks(3)
        .filter(|triple| triple.len() == 3 && triple[2] == CRYPT_FILTER)
        .map(|triple| triple[0].to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn git_available() -> bool {
        Command::new("git").arg("--version").output().is_ok()
    }

    fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .arg("-C")
            .arg(dir)
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    #[test]
    fn test_parse_check_attr() {
        let output = b"a.txt\0filter\0unspecified\0secret/key.pem\0filter\0git-crypt\0b.rs\0filter\0lfs\0";
        assert_eq!(parse_check_attr(output), vec!["secret/key.pem".to_string()]);
        assert!(parse_check_attr(b"").is_empty());
    }

    #[test]
    fn test_outside_git_tree_is_empty() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        assert!(git_crypt_files(tmp.path()).unwrap().is_empty());
    }

    #[test]
    fn test_detects_tagged_files_under_dir() {
        if !git_available() {
            return;
        }
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        git(root, &["init", "-q"]);
        std::fs::write(root.join(".gitattributes"), "*.secret filter=git-crypt\n").unwrap();
        std::fs::create_dir_all(root.join("sub")).unwrap();
        std::fs::write(root.join("sub/keys.secret"), "x").unwrap();
        std::fs::write(root.join("top.secret"), "x").unwrap();
        std::fs::write(root.join("sub/plain.txt"), "x").unwrap();
        git(root, &["add", "."]);

        let mut all = git_crypt_files(root).unwrap();
        all.sort();
        assert_eq!(
            all,
            vec![PathBuf::from("sub/keys.secret"), PathBuf::from("top.secret")]
        );

        let sub = git_crypt_files(&root.join("sub")).unwrap();
        assert_eq!(sub, vec![PathBuf::from("keys.secret")]);
    }
}
