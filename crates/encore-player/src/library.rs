//! Local WAV library
//!
//! Scans one folder (not recursive) for `.wav` files and reads their headers
//! for duration. The file stem becomes the track id, so ids stay stable
//! across restarts and the persisted queue can be resolved again.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use encore_core::catalog::MemoryCatalog;
use encore_core::{Album, ProviderId, TrackInfo, TrackRef};

/// Provider id of the built-in local file provider
pub const LOCAL_PROVIDER: &str = "local";

/// One playable file
#[derive(Debug, Clone)]
pub struct LibraryTrack {
    pub track: TrackRef,
    pub path: PathBuf,
    pub duration_ms: u64,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Tracks found in the library folder, ordered by id
#[derive(Debug, Default)]
pub struct LocalLibrary {
    tracks: BTreeMap<String, LibraryTrack>,
}

impl LocalLibrary {
    /// Scan `dir` for WAV files
    ///
    /// Files whose header cannot be read are logged and left out.
    pub fn scan(dir: &Path) -> Result<Self> {
        let mut tracks = BTreeMap::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read library folder: {:?}", dir))?;

        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    log::warn!("Skipping unreadable library entry: {}", e);
                    continue;
                }
            };
            let is_wav = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"));
            if !is_wav {
                continue;
            }

            match read_header(&path) {
                Ok(track) => {
                    tracks.insert(track.track.track_id.clone(), track);
                }
                Err(e) => log::warn!("Skipping {:?}: {:#}", path, e),
            }
        }

        log::info!("Library: {} tracks in {:?}", tracks.len(), dir);
        Ok(Self { tracks })
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn tracks(&self) -> impl Iterator<Item = &LibraryTrack> {
        self.tracks.values()
    }

    pub fn get(&self, track_id: &str) -> Option<&LibraryTrack> {
        self.tracks.get(track_id)
    }

    /// Publish every track to the catalog the engine reads from
    pub fn populate(&self, catalog: &MemoryCatalog) {
        for track in self.tracks.values() {
            catalog.insert(track.track.clone(), TrackInfo::available(track.duration_ms));
        }
    }

    /// The whole library as one album, in id order
    pub fn as_album(&self) -> Album {
        Album {
            id: "library".to_string(),
            provider: ProviderId::new(LOCAL_PROVIDER),
            track_ids: self.tracks.keys().cloned().collect(),
        }
    }
}

fn read_header(path: &Path) -> Result<LibraryTrack> {
    let reader = hound::WavReader::open(path).context("Invalid WAV header")?;
    let spec = reader.spec();
    if spec.sample_rate == 0 || spec.channels == 0 {
        anyhow::bail!("WAV declares an empty format");
    }

    let track_id = path
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .context("File has no name")?;
    let duration_ms = reader.duration() as u64 * 1000 / spec.sample_rate as u64;

    Ok(LibraryTrack {
        track: TrackRef::new(track_id, LOCAL_PROVIDER),
        path: path.to_path_buf(),
        duration_ms,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use encore_core::catalog::TrackCatalog;
    use tempfile::TempDir;

    /// Write a stereo 16-bit sine of `frames` frames
    pub(crate) fn write_wav(dir: &Path, name: &str, sample_rate: u32, frames: u32) -> PathBuf {
        let path = dir.join(name);
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let sample = ((t * 440.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
            writer.write_sample(sample).unwrap();
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();
        path
    }

    #[test]
    fn test_scan_reads_durations() {
        let dir = TempDir::new().unwrap();
        write_wav(dir.path(), "b.wav", 8000, 16_000);
        write_wav(dir.path(), "a.WAV", 8000, 4000);
        std::fs::write(dir.path().join("notes.txt"), "not audio").unwrap();
        std::fs::write(dir.path().join("broken.wav"), "not a wav either").unwrap();

        let library = LocalLibrary::scan(dir.path()).unwrap();
        assert_eq!(library.len(), 2);
        assert_eq!(library.get("a").unwrap().duration_ms, 500);
        assert_eq!(library.get("b").unwrap().duration_ms, 2000);
        assert_eq!(library.as_album().track_ids, vec!["a", "b"]);
    }

    #[test]
    fn test_populate_catalog() {
        let dir = TempDir::new().unwrap();
        write_wav(dir.path(), "song.wav", 8000, 8000);
        let library = LocalLibrary::scan(dir.path()).unwrap();

        let catalog = MemoryCatalog::new();
        library.populate(&catalog);
        let track = catalog
            .resolve("song", &ProviderId::new(LOCAL_PROVIDER))
            .unwrap();
        assert_eq!(catalog.track_info(&track).unwrap().duration_ms, 1000);
    }

    #[test]
    fn test_missing_folder_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(LocalLibrary::scan(&dir.path().join("nope")).is_err());
    }
}
