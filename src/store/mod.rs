//! On-disk chunk store.
//!
//! Turns the encoder's atom stream into three files in the output directory:
//!
//! - `init.m4s`: `ftyp` + `moov`, written once per run
//! - `media.mp4`: every `moof` + `mdat` pair, appended in arrival order
//! - `meta.txt`: JSON map of the frames fed since the previous fragment
//!
//! `init.m4s` and `meta.txt` are replaced by rename, so readers see either
//! the old or the new file. `media.mp4` only grows; each fragment pair goes
//! in with a single write.

pub mod metadata;

pub use metadata::{ledger, FrameDrain, FrameRecorder, MetadataRecord};

use loopcast_media::{Atom, BoxGrammar, Fragment, GrammarEvent, GrammarState, InitSegment};
use std::path::{Path, PathBuf};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;

pub const INIT_FILE: &str = "init.m4s";
pub const MEDIA_FILE: &str = "media.mp4";
pub const META_FILE: &str = "meta.txt";

/// Errors raised by the chunk store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The atom sequence broke the box grammar.
    #[error(transparent)]
    Framing(#[from] loopcast_media::Error),

    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize frame metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

impl StoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// File names inside an output directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    dir: PathBuf,
}

impl OutputLayout {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn init_path(&self) -> PathBuf {
        self.dir.join(INIT_FILE)
    }

    pub fn media_path(&self) -> PathBuf {
        self.dir.join(MEDIA_FILE)
    }

    pub fn meta_path(&self) -> PathBuf {
        self.dir.join(META_FILE)
    }

    /// Whether a run has written its init segment.
    pub async fn is_primed(&self) -> bool {
        fs::try_exists(self.init_path()).await.unwrap_or(false)
    }

    /// Current size of `media.mp4`, zero when missing.
    pub async fn media_len(&self) -> u64 {
        fs::metadata(self.media_path())
            .await
            .map(|m| m.len())
            .unwrap_or(0)
    }
}

/// Writes the atom stream of one encoding run to disk.
pub struct ChunkStore {
    layout: OutputLayout,
    grammar: BoxGrammar,
    media: File,
    drain: FrameDrain,
    fragments_written: u64,
    media_bytes: u64,
}

impl ChunkStore {
    /// Prepare the output directory for a new run.
    ///
    /// Files from a previous run are removed, so clients are refused until
    /// the new init segment exists, and `media.mp4` starts empty.
    pub async fn create(layout: OutputLayout, drain: FrameDrain) -> Result<Self> {
        fs::create_dir_all(layout.dir())
            .await
            .map_err(|e| StoreError::io(layout.dir(), e))?;

        for path in [layout.init_path(), layout.meta_path()] {
            match fs::remove_file(&path).await {
                Ok(()) => tracing::debug!("Removed stale {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StoreError::io(&path, e)),
            }
        }

        let media_path = layout.media_path();
        let media = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&media_path)
            .await
            .map_err(|e| StoreError::io(&media_path, e))?;

        tracing::info!("Writing chunks to {:?}", layout.dir());

        Ok(Self {
            layout,
            grammar: BoxGrammar::new(),
            media,
            drain,
            fragments_written: 0,
            media_bytes: 0,
        })
    }

    pub fn layout(&self) -> &OutputLayout {
        &self.layout
    }

    pub fn state(&self) -> GrammarState {
        self.grammar.state()
    }

    pub fn fragments_written(&self) -> u64 {
        self.fragments_written
    }

    /// Bytes appended to `media.mp4` by this run.
    pub fn media_bytes(&self) -> u64 {
        self.media_bytes
    }

    /// Feed the next atom from the encoder.
    ///
    /// # Errors
    ///
    /// A grammar violation or a failed write ends the run.
    pub async fn push(&mut self, atom: Atom) -> Result<()> {
        match self.grammar.push(atom)? {
            GrammarEvent::Pending => Ok(()),
            GrammarEvent::InitReady(init) => self.write_init(&init).await,
            GrammarEvent::FragmentReady(fragment) => self.append_fragment(&fragment).await,
        }
    }

    async fn write_init(&mut self, init: &InitSegment) -> Result<()> {
        write_atomic(&self.layout.init_path(), &init.to_bytes()).await?;
        tracing::info!(bytes = init.len(), "Init segment written");
        Ok(())
    }

    async fn append_fragment(&mut self, fragment: &Fragment) -> Result<()> {
        let media_path = self.layout.media_path();
        self.media
            .write_all(&fragment.to_bytes())
            .await
            .map_err(|e| StoreError::io(&media_path, e))?;
        self.media
            .sync_data()
            .await
            .map_err(|e| StoreError::io(&media_path, e))?;

        self.fragments_written += 1;
        self.media_bytes += fragment.len() as u64;

        let record = self.drain.drain();
        let frames = record.len();
        let json = record.to_json()?;
        write_atomic(&self.layout.meta_path(), &json).await?;

        tracing::debug!(
            fragment = fragment.sequence,
            bytes = fragment.len(),
            frames,
            "Fragment appended"
        );
        Ok(())
    }
}

/// Replace `path` with `data` via a temporary file in the same directory.
async fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.tmp", file_name));

    let mut file = File::create(&tmp)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    file.write_all(data)
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    file.sync_data()
        .await
        .map_err(|e| StoreError::io(&tmp, e))?;
    drop(file);

    fs::rename(&tmp, path)
        .await
        .map_err(|e| StoreError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use loopcast_media::AtomType;
    use std::time::Duration;
    use tempfile::TempDir;

    fn atom(t: AtomType, len: usize) -> Atom {
        Atom::from_payload(t, &vec![0x5A; len])
    }

    async fn store(dir: &TempDir) -> (ChunkStore, FrameRecorder) {
        let (recorder, drain) = ledger();
        let store = ChunkStore::create(OutputLayout::new(dir.path()), drain)
            .await
            .unwrap();
        (store, recorder)
    }

    #[tokio::test]
    async fn test_init_written_on_moov() {
        let dir = TempDir::new().unwrap();
        let (mut store, _recorder) = store(&dir).await;
        let layout = store.layout().clone();

        store.push(atom(AtomType::FTYP, 16)).await.unwrap();
        assert!(!layout.is_primed().await);

        store.push(atom(AtomType::MOOV, 100)).await.unwrap();
        assert!(layout.is_primed().await);

        let init = std::fs::read(layout.init_path()).unwrap();
        assert_eq!(init.len(), 24 + 108);
        assert_eq!(&init[4..8], b"ftyp");
        assert_eq!(&init[28..32], b"moov");
        assert_eq!(std::fs::metadata(layout.media_path()).unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_fragments_appended_with_metadata() {
        let dir = TempDir::new().unwrap();
        let (mut store, recorder) = store(&dir).await;
        let layout = store.layout().clone();

        store.push(atom(AtomType::FTYP, 16)).await.unwrap();
        store.push(atom(AtomType::MOOV, 100)).await.unwrap();

        let mut expected = 0u64;
        for n in 0..4u64 {
            recorder.record(Duration::from_millis(n * 100), "a.png");
            recorder.record(Duration::from_millis(n * 100 + 50), "b.png");

            let moof = atom(AtomType::MOOF, 40 + n as usize);
            let mdat = atom(AtomType::MDAT, 1000 * (n as usize + 1));
            expected += (moof.size() + mdat.size()) as u64;

            store.push(moof).await.unwrap();
            // moof alone is never visible on disk
            assert_eq!(layout.media_len().await, store.media_bytes());
            store.push(mdat).await.unwrap();

            assert_eq!(store.media_bytes(), expected);
            assert_eq!(layout.media_len().await, expected);

            let meta: serde_json::Value =
                serde_json::from_slice(&std::fs::read(layout.meta_path()).unwrap()).unwrap();
            assert_eq!(meta.as_object().unwrap().len(), 2);
        }

        assert_eq!(store.fragments_written(), 4);
    }

    #[tokio::test]
    async fn test_moof_before_init_rejected() {
        let dir = TempDir::new().unwrap();
        let (mut store, _recorder) = store(&dir).await;

        let err = store.push(atom(AtomType::MOOF, 8)).await.unwrap_err();
        assert_matches!(
            err,
            StoreError::Framing(loopcast_media::Error::UnexpectedAtom { found, .. })
                if found == AtomType::MOOF
        );
        assert!(!store.layout().is_primed().await);
    }

    #[tokio::test]
    async fn test_create_clears_previous_run() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(INIT_FILE), b"old init").unwrap();
        std::fs::write(dir.path().join(MEDIA_FILE), b"old media").unwrap();
        std::fs::write(dir.path().join(META_FILE), b"{}").unwrap();

        let (store, _recorder) = store(&dir).await;
        let layout = store.layout();

        assert!(!layout.is_primed().await);
        assert!(!layout.meta_path().exists());
        assert_eq!(layout.media_len().await, 0);
    }

    #[tokio::test]
    async fn test_create_makes_missing_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("out").join("chunks");
        let (_recorder, drain) = ledger();

        ChunkStore::create(OutputLayout::new(&nested), drain)
            .await
            .unwrap();
        assert!(nested.join(MEDIA_FILE).exists());
    }

    #[tokio::test]
    async fn test_no_temp_files_left() {
        let dir = TempDir::new().unwrap();
        let (mut store, _recorder) = store(&dir).await;
        store.push(atom(AtomType::FTYP, 16)).await.unwrap();
        store.push(atom(AtomType::MOOV, 16)).await.unwrap();
        store.push(atom(AtomType::MOOF, 16)).await.unwrap();
        store.push(atom(AtomType::MDAT, 16)).await.unwrap();

        let mut names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(names, vec![INIT_FILE, MEDIA_FILE, META_FILE]);
    }
}
