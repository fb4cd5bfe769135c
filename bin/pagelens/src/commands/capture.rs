use anyhow::Context;
use pagelens_core::{Bounds, Viewport};
use pagelens_validator::{Capturer, SessionManager};
use std::sync::Arc;

/// Capture a screenshot, optionally clipped, and write it as PNG.
pub async fn run(
    url: &str,
    width: u32,
    height: u32,
    clip: Option<String>,
    port: u16,
    output: &str,
) -> anyhow::Result<i32> {
    let viewport = Viewport::new(width, height)?;
    let capturer = Capturer::new(Arc::new(SessionManager::new()));

    let raster = match clip {
        Some(spec) => {
            let clip = parse_clip(&spec)?;
            capturer.capture_region(url, clip, viewport, port).await?
        }
        None => capturer.capture(url, viewport, port).await?,
    };

    std::fs::write(output, raster.to_png_bytes()?)
        .with_context(|| format!("writing {}", output))?;
    eprintln!(
        "captured {}x{} screenshot to {}",
        raster.width(),
        raster.height(),
        output
    );
    Ok(0)
}

fn parse_clip(spec: &str) -> anyhow::Result<Bounds> {
    let parts: Vec<f64> = spec
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .with_context(|| format!("invalid clip '{}', expected x,y,width,height", spec))?;
    if parts.len() != 4 {
        anyhow::bail!("invalid clip '{}', expected 4 comma-separated numbers", spec);
    }
    Ok(Bounds {
        x: parts[0],
        y: parts[1],
        width: parts[2],
        height: parts[3],
    })
}
