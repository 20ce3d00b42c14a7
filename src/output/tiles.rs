//! Tile image files on disk

use crate::error::PersistError;
use crate::fetch::Persister;
use crate::grid::{GridSpace, TileCoord};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Response;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tokio::io::AsyncWriteExt;

/// Streams tile bodies to `<root>/<x>/<y>.png`.
///
/// Bodies land in a `.part` file first and are renamed into place, so a
/// killed worker never leaves a truncated image under the final name.
#[derive(Debug)]
pub struct TileFileWriter {
    root: PathBuf,
    ready_dirs: Mutex<HashSet<u32>>,
}

impl TileFileWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ready_dirs: Mutex::new(HashSet::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, coord: &TileCoord) -> PathBuf {
        self.root
            .join(coord.x.to_string())
            .join(format!("{}.png", coord.y))
    }

    /// Create the column directory of every `x` in `space` up front
    pub async fn prepare(&self, space: GridSpace) -> Result<(), PersistError> {
        if space.is_empty() {
            return Ok(());
        }
        for x in space.min_row..=space.max_row {
            self.ensure_dir(x).await?;
        }
        Ok(())
    }

    async fn ensure_dir(&self, x: u32) -> Result<(), PersistError> {
        if self.is_ready(x) {
            return Ok(());
        }

        let dir = self.root.join(x.to_string());
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PersistError::io(&dir, e))?;

        if let Ok(mut ready) = self.ready_dirs.lock() {
            ready.insert(x);
        }
        Ok(())
    }

    fn is_ready(&self, x: u32) -> bool {
        self.ready_dirs
            .lock()
            .map(|ready| ready.contains(&x))
            .unwrap_or(false)
    }
}

#[async_trait]
impl Persister<TileCoord, Response> for TileFileWriter {
    async fn persist(&self, coord: &TileCoord, response: Response) -> Result<(), PersistError> {
        self.ensure_dir(coord.x).await?;
        write_stream(&self.path_for(coord), response.bytes_stream()).await
    }
}

/// Write a chunk stream to `path` through a sibling `.part` file
pub async fn write_stream<S, B, E>(path: &Path, chunks: S) -> Result<(), PersistError>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    PersistError: From<E>,
{
    let partial = path.with_extension("png.part");
    let mut chunks = std::pin::pin!(chunks);

    let result = async {
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| PersistError::io(&partial, e))?;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            file.write_all(chunk.as_ref())
                .await
                .map_err(|e| PersistError::io(&partial, e))?;
        }
        file.flush().await.map_err(|e| PersistError::io(&partial, e))?;
        drop(file);

        tokio::fs::rename(&partial, path)
            .await
            .map_err(|e| PersistError::io(path, e))
    }
    .await;

    if result.is_err() {
        tokio::fs::remove_file(&partial).await.ok();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_layout() {
        let writer = TileFileWriter::new("/srv/wplace/tiles");
        assert_eq!(
            writer.path_for(&TileCoord::new(12, 345)),
            PathBuf::from("/srv/wplace/tiles/12/345.png")
        );
    }

    #[tokio::test]
    async fn test_prepare_creates_column_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let writer = TileFileWriter::new(dir.path());
        writer.prepare(GridSpace::new(3, 5, 0, 9)).await.unwrap();
        for x in 3..=5 {
            assert!(dir.path().join(x.to_string()).is_dir());
        }
        assert!(!dir.path().join("6").exists());
    }

    #[tokio::test]
    async fn test_write_stream_joins_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("7.png");
        let chunks = futures::stream::iter(vec![
            Ok::<_, reqwest::Error>(b"\x89PNG".to_vec()),
            Ok(b"rest".to_vec()),
        ]);

        write_stream(&path, chunks).await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"\x89PNGrest");
        assert!(!dir.path().join("7.png.part").exists());
    }

    #[tokio::test]
    async fn test_write_stream_missing_dir_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent").join("1.png");
        let chunks = futures::stream::iter(vec![Ok::<_, reqwest::Error>(b"x".to_vec())]);

        let result = write_stream(&path, chunks).await;
        assert!(matches!(result, Err(PersistError::Io { .. })));
        assert!(!path.exists());
    }
}
