//! Scripted decoder and polling helpers shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use flume::{Receiver, Sender};
use image::Rgba;
use parking_lot::{Condvar, Mutex};

use crate::error::DecodeError;
use crate::models::MediaItem;
use crate::thumbnails::decoder::ThumbnailDecoder;
use crate::tiles::raster::RasterTile;

pub const DECODED: Rgba<u8> = Rgba([0, 200, 0, 255]);

#[derive(Default)]
struct Gates {
    hold_all: bool,
    held: HashSet<PathBuf>,
}

/// Decoder whose timing and results are driven by the test.
///
/// Produces solid rasters (green unless recoloured), records every call and
/// can block chosen items until released.
pub struct ScriptedDecoder {
    size: (u32, u32),
    calls: Mutex<Vec<PathBuf>>,
    gates: Mutex<Gates>,
    gate_cv: Condvar,
    failing: Mutex<HashSet<PathBuf>>,
    colors: Mutex<HashMap<PathBuf, Rgba<u8>>>,
    started_tx: Sender<PathBuf>,
    started_rx: Receiver<PathBuf>,
}

impl ScriptedDecoder {
    pub fn new() -> Arc<Self> {
        Self::with_size(8, 8)
    }

    pub fn with_size(width: u32, height: u32) -> Arc<Self> {
        let (started_tx, started_rx) = flume::unbounded();
        Arc::new(Self {
            size: (width, height),
            calls: Mutex::new(Vec::new()),
            gates: Mutex::new(Gates::default()),
            gate_cv: Condvar::new(),
            failing: Mutex::new(HashSet::new()),
            colors: Mutex::new(HashMap::new()),
            started_tx,
            started_rx,
        })
    }

    /// Block every decode until `release_all`.
    pub fn hold_all(&self) {
        self.gates.lock().hold_all = true;
    }

    /// Block decodes of one item until `release`.
    pub fn hold(&self, path: &Path) {
        self.gates.lock().held.insert(path.to_path_buf());
    }

    pub fn release(&self, path: &Path) {
        self.gates.lock().held.remove(path);
        self.gate_cv.notify_all();
    }

    pub fn release_all(&self) {
        let mut gates = self.gates.lock();
        gates.hold_all = false;
        gates.held.clear();
        self.gate_cv.notify_all();
    }

    pub fn fail(&self, path: &Path) {
        self.failing.lock().insert(path.to_path_buf());
    }

    pub fn set_color(&self, path: &Path, color: Rgba<u8>) {
        self.colors.lock().insert(path.to_path_buf(), color);
    }

    pub fn calls(&self) -> Vec<PathBuf> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self, path: &Path) -> usize {
        self.calls.lock().iter().filter(|p| p.as_path() == path).count()
    }

    /// Wait for the next decode to begin and return its path.
    pub fn wait_started(&self, timeout: Duration) -> Option<PathBuf> {
        self.started_rx.recv_timeout(timeout).ok()
    }
}

impl ThumbnailDecoder for ScriptedDecoder {
    fn decode(&self, item: &MediaItem) -> Result<RasterTile, DecodeError> {
        self.calls.lock().push(item.path.clone());
        let _ = self.started_tx.send(item.path.clone());

        {
            let mut gates = self.gates.lock();
            while gates.hold_all || gates.held.contains(&item.path) {
                self.gate_cv.wait(&mut gates);
            }
        }

        if self.failing.lock().contains(&item.path) {
            return Err(DecodeError::Other(format!("scripted failure: {:?}", item.path)));
        }

        let color = self
            .colors
            .lock()
            .get(&item.path)
            .copied()
            .unwrap_or(DECODED);
        Ok(RasterTile::filled(self.size.0, self.size.1, color))
    }
}

/// Poll `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(2));
    }
}
