//! Shutter demo: synthetic camera -> frame processor -> preview consumer

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use color_eyre::Result;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shutter::effects::Whiten;
use shutter::{AsyncFrameProcessor, BufferPool, Config, ImageFrame, Recycle, SyntheticCamera};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shutter=debug")),
        )
        .with_timer(tracing_subscriber::fmt::time::uptime())
        .init();

    info!("Shutter launching...");

    // Load configuration
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = Config::load(config_path.as_deref())?;
    shutter::CONFIG.store(Arc::new(config.clone()));

    // Buffers cycle camera -> ring -> worker/preview -> pool -> camera
    let pool = Arc::new(BufferPool::new(config.pipeline.ring_buffer_size + 4));
    let processor = Arc::new(AsyncFrameProcessor::<ImageFrame>::with_recycler(
        config.pipeline.clone(),
        pool.clone(),
    )?);

    let (preview_tx, preview_rx) = flume::bounded::<ImageFrame>(2);
    processor.start(
        Whiten::new(config.effects.whiten_level).into_transform(),
        preview_tx,
    )?;

    // Spawn camera task
    let mut camera = SyntheticCamera::new(config.capture.clone()).with_pool(pool.clone());
    let camera_handle = {
        let processor = processor.clone();
        tokio::spawn(async move {
            let mut ticker = interval(camera.frame_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                processor.submit_frame(camera.capture_frame());
            }
        })
    };

    let mut stats_ticker = interval(Duration::from_millis(config.demo.stats_interval_ms.max(1)));
    let deadline = sleep(Duration::from_secs(config.demo.run_seconds));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(deadline, ctrl_c);

    let mut previewed = 0u64;
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                if let Err(e) = res {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                }
                info!("Ctrl-C received");
                break;
            }
            _ = &mut deadline => {
                info!("Run time elapsed");
                break;
            }
            _ = stats_ticker.tick() => {
                let stats = processor.statistics();
                info!(
                    written = stats.buffer.total_written,
                    dropped = stats.buffer.total_dropped,
                    drop_rate_pct = stats.buffer.drop_rate_percent,
                    processed = stats.frames_processed,
                    skipped = stats.frames_skipped,
                    published = stats.frames_published,
                    avg_transform_us = stats.avg_transform_latency_us,
                    previewed,
                    "pipeline stats"
                );
            }
            frame = preview_rx.recv_async() => match frame {
                Ok(frame) => {
                    // A real UI would render here
                    previewed += 1;
                    pool.recycle(frame);
                }
                Err(_) => {
                    warn!("Preview channel closed");
                    break;
                }
            }
        }
    }

    camera_handle.abort();
    let stopping = processor.clone();
    tokio::task::spawn_blocking(move || stopping.stop()).await?;

    let stats = processor.statistics();
    let (reused, allocated) = pool.stats();
    info!(
        "Shutter shutting down: {} frames written, {} dropped, {} processed, {} previewed, {} buffers reused / {} allocated",
        stats.buffer.total_written,
        stats.buffer.total_dropped,
        stats.frames_processed,
        previewed,
        reused,
        allocated
    );
    Ok(())
}
