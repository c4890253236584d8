//! Side cache of resampled video frames.
//!
//! Frames are written as NumPy `.npy` (format 1.0, `|u1`, shape
//! `(frames, height, width, 3)`) under a tree that mirrors the media root:
//! `<cache_dir>/<path relative to root>.npy`.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::PipelineError;

use super::video::FrameStream;

const MAGIC: &[u8] = b"\x93NUMPY";
const HEADER_ALIGN: usize = 64;

/// Maps media paths to cache files and reads/writes frame tensors.
#[derive(Debug, Clone)]
pub struct FrameCache {
    root_dir: PathBuf,
    cache_dir: PathBuf,
}

impl FrameCache {
    pub fn new(root_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            cache_dir: cache_dir.into(),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Cache file for a media path. Paths outside the root are mirrored by
    /// their full (rootless) path.
    pub fn path_for(&self, source: &Path) -> PathBuf {
        let relative: PathBuf = match source.strip_prefix(&self.root_dir) {
            Ok(rel) => rel.to_path_buf(),
            Err(_) => source
                .components()
                .filter(|c| matches!(c, Component::Normal(_)))
                .collect(),
        };
        let mut name = self.cache_dir.join(relative).into_os_string();
        name.push(".npy");
        PathBuf::from(name)
    }

    /// Write the frames of `source` to its cache file.
    pub fn store(&self, source: &Path, frames: &FrameStream) -> Result<PathBuf, PipelineError> {
        let target = self.path_for(source);
        let cache_err = |e: std::io::Error| PipelineError::FrameCache {
            path: target.clone(),
            message: e.to_string(),
        };
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(cache_err)?;
        }
        let mut bytes = npy_header(frames.frame_count(), frames.height, frames.width);
        bytes.extend_from_slice(&frames.data[..frames.frame_count() * frame_len(frames)]);
        std::fs::write(&target, bytes).map_err(cache_err)?;
        tracing::debug!("Cached {} frames for {:?}", frames.frame_count(), source);
        Ok(target)
    }

    /// Read the cached frames of `source`.
    pub fn load(&self, source: &Path) -> Result<FrameStream, PipelineError> {
        let target = self.path_for(source);
        let bytes = std::fs::read(&target).map_err(|e| PipelineError::FrameCache {
            path: target.clone(),
            message: e.to_string(),
        })?;
        parse_npy(&bytes).map_err(|message| PipelineError::FrameCache {
            path: target,
            message,
        })
    }

    /// Delete the cache file of `source`. A missing file is not an error.
    pub fn remove(&self, source: &Path) -> std::io::Result<bool> {
        match std::fs::remove_file(self.path_for(source)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete the whole cache tree and recreate it empty.
    pub fn clear(&self) -> std::io::Result<()> {
        match std::fs::remove_dir_all(&self.cache_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        std::fs::create_dir_all(&self.cache_dir)
    }
}

fn frame_len(frames: &FrameStream) -> usize {
    frames.width as usize * frames.height as usize * 3
}

fn npy_header(count: usize, height: u32, width: u32) -> Vec<u8> {
    let mut dict = format!(
        "{{'descr': '|u1', 'fortran_order': False, 'shape': ({count}, {height}, {width}, 3), }}"
    );
    // magic + version + u16 length, then the dict padded so data is aligned
    let prefix = MAGIC.len() + 2 + 2;
    let total = (prefix + dict.len() + 1).div_ceil(HEADER_ALIGN) * HEADER_ALIGN;
    while prefix + dict.len() + 1 < total {
        dict.push(' ');
    }
    dict.push('\n');

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&[1, 0]);
    out.extend_from_slice(&(dict.len() as u16).to_le_bytes());
    out.extend_from_slice(dict.as_bytes());
    out
}

fn parse_npy(bytes: &[u8]) -> Result<FrameStream, String> {
    if bytes.len() < 10 || &bytes[..6] != MAGIC {
        return Err("not an .npy file".into());
    }
    if bytes[6] != 1 {
        return Err(format!("unsupported .npy version {}.{}", bytes[6], bytes[7]));
    }
    let header_len = u16::from_le_bytes([bytes[8], bytes[9]]) as usize;
    let data_start = 10 + header_len;
    let header = bytes
        .get(10..data_start)
        .and_then(|h| std::str::from_utf8(h).ok())
        .ok_or("truncated .npy header")?;
    if !header.contains("'descr': '|u1'") {
        return Err("expected an unsigned byte array".into());
    }

    let shape_start = header.find("'shape': (").ok_or("missing shape")? + "'shape': (".len();
    let shape_end = header[shape_start..].find(')').ok_or("malformed shape")? + shape_start;
    let dims = header[shape_start..shape_end]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().map_err(|e| format!("bad shape entry {s:?}: {e}")))
        .collect::<Result<Vec<_>, _>>()?;
    let [count, height, width, 3] = dims[..] else {
        return Err(format!("expected shape (frames, height, width, 3), got {dims:?}"));
    };

    let (Ok(frame_height), Ok(frame_width)) = (u32::try_from(height), u32::try_from(width)) else {
        return Err(format!("frame size out of range in shape {dims:?}"));
    };
    let expected = count
        .checked_mul(height)
        .and_then(|n| n.checked_mul(width))
        .and_then(|n| n.checked_mul(3))
        .ok_or_else(|| format!("shape {dims:?} overflows"))?;

    let data = &bytes[data_start..];
    if data.len() != expected {
        return Err(format!(
            "data length {} does not match shape {dims:?}",
            data.len()
        ));
    }
    Ok(FrameStream {
        width: frame_width,
        height: frame_height,
        data: data.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn frames() -> FrameStream {
        FrameStream {
            width: 3,
            height: 2,
            data: (0..36u8).collect(),
        }
    }

    #[test]
    fn test_path_mirrors_root() {
        let cache = FrameCache::new("/media", "/cache");
        assert_eq!(
            cache.path_for(Path::new("/media/trip/clip.mp4")),
            PathBuf::from("/cache/trip/clip.mp4.npy")
        );
        assert_eq!(
            cache.path_for(Path::new("/elsewhere/clip.mp4")),
            PathBuf::from("/cache/elsewhere/clip.mp4.npy")
        );
    }

    #[test]
    fn test_header_is_aligned() {
        let header = npy_header(10, 27, 48);
        assert_eq!(header.len() % HEADER_ALIGN, 0);
        assert_eq!(*header.last().unwrap(), b'\n');
        assert!(std::str::from_utf8(&header[10..])
            .unwrap()
            .contains("'shape': (10, 27, 48, 3)"));
    }

    #[test]
    fn test_store_and_load() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("media");
        let cache = FrameCache::new(&root, dir.path().join("cache"));
        let source = root.join("a/b.mp4");

        let written = cache.store(&source, &frames()).unwrap();
        assert!(written.ends_with("a/b.mp4.npy"));
        assert_eq!(cache.load(&source).unwrap(), frames());
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let cache = FrameCache::new(dir.path(), dir.path().join("cache"));
        let source = dir.path().join("v.mp4");
        cache.store(&source, &frames()).unwrap();
        assert!(cache.remove(&source).unwrap());
        assert!(!cache.remove(&source).unwrap());
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        let cache = FrameCache::new(dir.path(), dir.path().join("cache"));
        let source = dir.path().join("v.mp4");
        let target = cache.path_for(&source);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"not numpy at all").unwrap();
        assert!(matches!(
            cache.load(&source),
            Err(PipelineError::FrameCache { .. })
        ));
    }

    #[test]
    fn test_load_rejects_oversized_shape() {
        let dir = TempDir::new().unwrap();
        let cache = FrameCache::new(dir.path(), dir.path().join("cache"));
        let source = dir.path().join("huge.mp4");
        let target = cache.path_for(&source);
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();

        let mut bytes = npy_header(usize::MAX / 2, 65536, 65536);
        bytes.extend_from_slice(&[0; 12]);
        std::fs::write(&target, &bytes).unwrap();
        match cache.load(&source) {
            Err(PipelineError::FrameCache { message, .. }) => {
                assert!(message.contains("overflows"), "{message}")
            }
            other => panic!("expected a frame cache error, got {other:?}"),
        }

        let mut bytes = npy_header(1, u32::MAX, 2);
        bytes.extend_from_slice(&[0; 6]);
        std::fs::write(&target, &bytes).unwrap();
        assert!(matches!(
            cache.load(&source),
            Err(PipelineError::FrameCache { .. })
        ));
    }
}
