use std::fs::{self, OpenOptions};
use std::io::Write;

use camino::Utf8Path;
use tempfile::Builder;

use crate::error::HarvestError;

pub const TEMP_PREFIX: &str = ".occ-harvest-";

pub fn ensure_dir(path: &Utf8Path) -> Result<(), HarvestError> {
    fs::create_dir_all(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("create {path}: {err}")))
}

/// Replaces `path` with `content` via a synced temp file in the same
/// directory, so readers see either the old or the new bytes.
pub fn write_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), HarvestError> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    ensure_dir(parent)?;
    let mut temp = Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("temp file in {parent}: {err}")))?;
    temp.write_all(content)
        .map_err(|err| HarvestError::Filesystem(format!("write {path}: {err}")))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| HarvestError::Filesystem(format!("sync {path}: {err}")))?;
    temp.persist(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("replace {path}: {}", err.error)))?;
    Ok(())
}

pub fn append_lines<I, S>(path: &Utf8Path, lines: I) -> Result<(), HarvestError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    if let Some(parent) = path.parent().filter(|parent| !parent.as_str().is_empty()) {
        ensure_dir(parent)?;
    }
    let mut buffer = String::new();
    for line in lines {
        buffer.push_str(line.as_ref());
        buffer.push('\n');
    }
    if buffer.is_empty() {
        return Ok(());
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_std_path())
        .map_err(|err| HarvestError::Filesystem(format!("open {path}: {err}")))?;
    file.write_all(buffer.as_bytes())
        .map_err(|err| HarvestError::Filesystem(format!("append {path}: {err}")))?;
    file.sync_data()
        .map_err(|err| HarvestError::Filesystem(format!("sync {path}: {err}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use camino::Utf8PathBuf;

    use super::*;

    #[test]
    fn atomic_write_replaces_content() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("nested/file.json")).unwrap();
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read_to_string(path.as_std_path()).unwrap(), "two");

        let leftovers = fs::read_dir(temp.path().join("nested"))
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn append_lines_accumulates() {
        let temp = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(temp.path().join("log.txt")).unwrap();
        append_lines(&path, ["a", "b"]).unwrap();
        append_lines(&path, Vec::<String>::new()).unwrap();
        append_lines(&path, ["c"]).unwrap();
        assert_eq!(fs::read_to_string(path.as_std_path()).unwrap(), "a\nb\nc\n");
    }
}
