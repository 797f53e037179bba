use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use image::RgbaImage;
use tracing::{info, warn};

use thumbgrid::tiles::{RepaintRegion, ScrollSink, TileState};
use thumbgrid::{
    DecodeQueue, GridLayout, ImageThumbnailDecoder, InlineExecutor, ItemSource, ScanConfig,
    TileCache, TileCacheConfig, VecItemSource,
};

const CELL_SIZE: u32 = 128;
const SPACING: u32 = 6;
const SETTLE_TIMEOUT: Duration = Duration::from_secs(30);

struct Args {
    dir: PathBuf,
    threads: usize,
    columns: u32,
    out: Option<PathBuf>,
}

fn parse_args() -> Result<Args> {
    let mut args = std::env::args().skip(1);
    let mut dir = None;
    let mut threads = 2;
    let mut columns = 6;
    let mut out = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--threads" => {
                let value = args.next().context("--threads needs a value")?;
                threads = value
                    .parse()
                    .with_context(|| format!("invalid thread count: {}", value))?;
            }
            "--columns" => {
                let value = args.next().context("--columns needs a value")?;
                columns = value
                    .parse()
                    .with_context(|| format!("invalid column count: {}", value))?;
            }
            "--out" => {
                out = Some(PathBuf::from(args.next().context("--out needs a path")?));
            }
            other if other.starts_with("--") => bail!("unknown option: {}", other),
            other => dir = Some(PathBuf::from(other)),
        }
    }

    let Some(dir) = dir else {
        bail!("usage: thumbgrid <dir> [--threads N] [--columns N] [--out frame.png]");
    };
    Ok(Args {
        dir,
        threads,
        columns,
        out,
    })
}

/// Logs the first visible item as the simulated viewport moves.
struct LogScroll;

impl ScrollSink for LogScroll {
    fn on_visible_index_changed(&self, index: usize) {
        info!(index, "First visible item changed");
    }
}

/// Wait until every tile in the window holding real items is decoded.
fn wait_settled(cache: &TileCache, block_count: usize) -> bool {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    loop {
        let settled = cache
            .tile_snapshots()
            .iter()
            .filter(|t| t.block_number >= 0 && (t.block_number as usize) < block_count)
            .all(|t| t.state == TileState::Complete);
        if settled && !cache.is_decoding() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("thumbgrid=info".parse()?),
        )
        .init();

    let args = parse_args()?;
    if !args.dir.is_dir() {
        bail!("not a directory: {}", args.dir.display());
    }

    let source = Arc::new(VecItemSource::scan_dir(&args.dir, &ScanConfig::default()));
    let count = source.count();
    info!(dir = %args.dir.display(), count, "Scanned directory");

    let layout = GridLayout::new(args.columns, CELL_SIZE, CELL_SIZE, SPACING);
    let config = TileCacheConfig::default().with_decode_threads(args.threads);
    let viewport_height = config.rows_per_page as u32 * layout.block_height();

    let decoder = Arc::new(ImageThumbnailDecoder::new(CELL_SIZE, CELL_SIZE));
    let queue = DecodeQueue::new(decoder, Arc::new(InlineExecutor));

    let repaints = Arc::new(AtomicUsize::new(0));
    let repaint_counter = Arc::clone(&repaints);
    let cache = TileCache::new(
        config,
        layout,
        source,
        queue,
        Arc::new(move |_: RepaintRegion| {
            repaint_counter.fetch_add(1, Ordering::Relaxed);
        }),
        Arc::new(LogScroll),
    )
    .context("failed to start tile cache")?;

    let block_count = layout.block_count(count);
    let max_scroll = layout.max_scroll(count, viewport_height);
    let started = Instant::now();
    let mut scroll_y = 0i64;

    loop {
        cache.on_window_changed(scroll_y, viewport_height, false)?;
        if !wait_settled(&cache, block_count) {
            warn!(scroll_y, "Timed out waiting for tiles to decode");
        }
        match cache.get_visible_range() {
            Some((first, last)) => info!(scroll_y, first, last, "Page decoded"),
            None => info!(scroll_y, "Nothing visible"),
        }

        if scroll_y >= max_scroll {
            break;
        }
        scroll_y = (scroll_y + viewport_height as i64).min(max_scroll);
    }

    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        repaints = repaints.load(Ordering::Relaxed),
        "Scrolled through grid"
    );

    if let Some(out) = &args.out {
        let mut frame = RgbaImage::new(layout.width, viewport_height);
        let drawn = cache.compose(&mut frame, scroll_y);
        frame
            .save(out)
            .with_context(|| format!("failed to write {}", out.display()))?;
        info!(path = %out.display(), tiles = drawn, "Saved last frame");
    }

    cache.shutdown();
    Ok(())
}
