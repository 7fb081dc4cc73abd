//! CBZ 写入：每页一个 `{序号}.jpg` 条目，序号从 0 开始。

use std::io::{Seek, Write};

use tracing::debug;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::write::FileOptions;

use super::archive::{ArchiveError, ArchiveWriter};

enum State<W: Write + Seek> {
    Open(ZipWriter<W>),
    Finished(W),
    /// 仅在 finalize 出错后出现
    Broken,
}

pub struct CbzWriter<W: Write + Seek> {
    state: State<W>,
    next_seq: usize,
}

impl<W: Write + Seek> CbzWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            state: State::Open(ZipWriter::new(inner)),
            next_seq: 0,
        }
    }

    /// 取回底层输出；只有 finalize 成功后才有值。
    pub fn into_inner(self) -> Option<W> {
        match self.state {
            State::Finished(w) => Some(w),
            _ => None,
        }
    }
}

impl<W: Write + Seek> ArchiveWriter for CbzWriter<W> {
    fn append_page(&mut self, data: Vec<u8>) -> Result<(), ArchiveError> {
        let State::Open(zip) = &mut self.state else {
            return Err(ArchiveError::Finalized);
        };
        let name = format!("{}.jpg", self.next_seq);
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file(name.as_str(), options)?;
        zip.write_all(&data)?;
        debug!(target: "archive", entry = %name, bytes = data.len(), "写入 CBZ 页面");
        self.next_seq += 1;
        Ok(())
    }

    fn finalize(&mut self) -> Result<(), ArchiveError> {
        match std::mem::replace(&mut self.state, State::Broken) {
            State::Open(mut zip) => {
                let inner = zip.finish()?;
                self.state = State::Finished(inner);
                Ok(())
            }
            other => {
                self.state = other;
                Err(ArchiveError::Finalized)
            }
        }
    }

    fn pages_written(&self) -> usize {
        self.next_seq
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use zip::ZipArchive;

    use super::*;

    #[test]
    fn entries_are_sequential_jpgs() {
        let mut w = CbzWriter::new(Cursor::new(Vec::new()));
        for page in [b"P0", b"P1", b"P2"] {
            w.append_page(page.to_vec()).unwrap();
        }
        w.finalize().unwrap();
        assert_eq!(w.pages_written(), 3);

        let bytes = w.into_inner().unwrap().into_inner();
        let mut zip = ZipArchive::new(Cursor::new(bytes)).unwrap();
        assert_eq!(zip.len(), 3);
        for i in 0..3 {
            let mut entry = zip.by_index(i).unwrap();
            assert_eq!(entry.name(), format!("{i}.jpg"));
            let mut body = Vec::new();
            entry.read_to_end(&mut body).unwrap();
            assert_eq!(body, format!("P{i}").into_bytes());
        }
    }

    #[test]
    fn empty_archive_is_still_valid() {
        let mut w = CbzWriter::new(Cursor::new(Vec::new()));
        w.finalize().unwrap();
        let bytes = w.into_inner().unwrap().into_inner();
        assert_eq!(ZipArchive::new(Cursor::new(bytes)).unwrap().len(), 0);
    }

    #[test]
    fn writes_after_finalize_are_rejected() {
        let mut w = CbzWriter::new(Cursor::new(Vec::new()));
        w.finalize().unwrap();
        assert!(matches!(w.append_page(b"x".to_vec()), Err(ArchiveError::Finalized)));
        assert!(matches!(w.finalize(), Err(ArchiveError::Finalized)));
        assert!(w.into_inner().is_some());
    }
}
