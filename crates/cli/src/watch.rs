use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use chek_ocr::{save_lines, OcrBackend, ReceiptPipeline, SUPPORTED_EXTENSIONS};
use tokio::sync::mpsc;

use crate::run_blocking;

/// How long a file's size and mtime must hold still before it is read.
const SETTLE_INTERVAL: Duration = Duration::from_millis(250);

/// Size and modification time; a change means the file was written again.
type Signature = (u64, SystemTime);

/// Spawn a notify watcher on `watch_dir` that sends created or written files
/// to `tx`. The watcher must be kept alive for watching to continue.
pub fn spawn_intake_watcher(
    watch_dir: &Path,
    tx: mpsc::Sender<PathBuf>,
) -> notify::Result<impl notify::Watcher> {
    use notify::event::{AccessKind, AccessMode};
    use notify::{EventKind, RecursiveMode, Watcher};

    let mut watcher = notify::recommended_watcher(move |event: notify::Result<notify::Event>| {
        let Ok(ev) = event else { return };
        let relevant = matches!(
            ev.kind,
            EventKind::Create(_)
                | EventKind::Modify(_)
                | EventKind::Access(AccessKind::Close(AccessMode::Write))
        );
        if relevant {
            for path in ev.paths {
                // Runs on the watcher's own thread, so blocking applies backpressure
                // instead of dropping events. An error means the receiver is gone.
                if tx.blocking_send(path).is_err() {
                    return;
                }
            }
        }
    })?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Transcribe each supported image written to `dir` into `<out_dir>/<stem>.txt`
/// until the process is interrupted.
///
/// A file is read only once it has stopped changing. A failed transcription
/// is retried the next time the file is written; an unchanged file is never
/// transcribed twice.
pub async fn run<R: OcrBackend + 'static>(
    pipeline: Arc<ReceiptPipeline<R>>,
    dir: &Path,
    out_dir: &Path,
    timeout: Duration,
) -> Result<()> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    // The channel bridges the notify watcher thread and the async processor.
    let (tx, mut rx) = mpsc::channel::<PathBuf>(64);
    let _watcher = spawn_intake_watcher(dir, tx)
        .with_context(|| format!("Failed to watch {}", dir.display()))?;
    tracing::info!("Watching intake folder: {}", dir.display());

    let mut transcribed: HashMap<PathBuf, Signature> = HashMap::new();
    while let Some(path) = rx.recv().await {
        if !is_supported_image(&path) {
            continue;
        }
        let Some(settled) = wait_until_settled(&path).await else {
            continue;
        };
        if transcribed.get(&path) == Some(&settled) {
            continue;
        }

        tracing::info!("Processing receipt: {}", path.display());
        match transcribe(&pipeline, &path, out_dir, timeout).await {
            Ok(dest) => {
                tracing::info!("Transcription saved: {}", dest.display());
                transcribed.insert(path, settled);
            }
            Err(e) => tracing::warn!("Receipt pipeline error for {}: {e:#}", path.display()),
        }
    }
    Ok(())
}

/// Run the pipeline on one image and save its non-empty lines.
pub async fn transcribe<R: OcrBackend + 'static>(
    pipeline: &Arc<ReceiptPipeline<R>>,
    image: &Path,
    out_dir: &Path,
    timeout: Duration,
) -> Result<PathBuf> {
    let owned = image.to_path_buf();
    let lines = run_blocking(pipeline, timeout, move |p| p.parse_lines(&owned, false)).await?;
    let dest = transcript_path(out_dir, image);
    Ok(save_lines(&lines, Some(&dest))?)
}

fn signature(path: &Path) -> Option<Signature> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.len(), meta.modified().ok()?))
}

/// Poll until two consecutive looks agree. `None` if the file disappears.
async fn wait_until_settled(path: &Path) -> Option<Signature> {
    let mut last = signature(path)?;
    loop {
        tokio::time::sleep(SETTLE_INTERVAL).await;
        let current = signature(path)?;
        if current == last {
            return Some(current);
        }
        last = current;
    }
}

fn is_supported_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn transcript_path(out_dir: &Path, image: &Path) -> PathBuf {
    let stem = image.file_stem().map_or_else(|| "receipt".into(), |s| s.to_string_lossy());
    out_dir.join(format!("{stem}.txt"))
}
