//! 输出文件落盘工具：先写 `.part`，成功后再改名。

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

/// `foo.cbz` -> `foo.cbzpart`
pub(crate) fn part_path(path: &Path) -> PathBuf {
    path.with_extension(format!(
        "{}part",
        path.extension().and_then(|s| s.to_str()).unwrap_or("")
    ))
}

/// 未 `commit` 就被丢弃时删除临时文件，失败的任务不会留下半个归档。
pub(crate) struct PartFile {
    target: PathBuf,
    tmp: PathBuf,
    committed: bool,
}

impl PartFile {
    pub(crate) fn create(target: &Path) -> io::Result<(Self, File)> {
        if let Some(parent) = target.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let tmp = part_path(target);
        let file = File::create(&tmp)?;
        Ok((
            Self {
                target: target.to_path_buf(),
                tmp,
                committed: false,
            },
            file,
        ))
    }

    pub(crate) fn commit(mut self) -> io::Result<PathBuf> {
        // best-effort replace
        let _ = fs::remove_file(&self.target);
        fs::rename(&self.tmp, &self.target)?;
        self.committed = true;
        Ok(self.target.clone())
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn part_path_appends_suffix_to_extension() {
        assert_eq!(part_path(Path::new("out/a.cbz")), PathBuf::from("out/a.cbzpart"));
        assert_eq!(part_path(Path::new("noext")), PathBuf::from("noext.part"));
    }

    #[test]
    fn commit_renames_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("book.epub");
        let (part, mut file) = PartFile::create(&target).unwrap();
        file.write_all(b"data").unwrap();
        drop(file);

        let done = part.commit().unwrap();
        assert_eq!(done, target);
        assert_eq!(fs::read(&target).unwrap(), b"data");
        assert!(!part_path(&target).exists());
    }

    #[test]
    fn dropped_part_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("book.cbz");
        {
            let (_part, mut file) = PartFile::create(&target).unwrap();
            file.write_all(b"half").unwrap();
        }
        assert!(!target.exists());
        assert!(!part_path(&target).exists());
    }
}
