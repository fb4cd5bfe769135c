use anyhow::Context;
use pagelens_core::{Config, DesignNode, Status, Viewport};
use pagelens_validator::tiling::{BufferReferenceSource, ReferenceSource, UrlReferenceSource};
use pagelens_validator::{Raster, ValidationMode, Validator};

/// Run a full validation and print the report as JSON. Exit code encodes the
/// verdict: 0 PASS, 1 FAIL/PARTIAL, 2 ERROR.
pub async fn run(
    url: &str,
    reference: &str,
    target_path: &str,
    mode: &str,
    viewport: Option<String>,
    config_path: Option<String>,
    port: Option<u16>,
    output: Option<String>,
) -> anyhow::Result<i32> {
    let mode: ValidationMode = mode.parse().map_err(anyhow::Error::msg)?;
    let viewport = viewport.as_deref().map(parse_viewport).transpose()?;

    let target_json = std::fs::read_to_string(target_path)
        .with_context(|| format!("reading target {}", target_path))?;
    let target: DesignNode =
        serde_json::from_str(&target_json).with_context(|| format!("parsing {}", target_path))?;

    let mut config = match config_path {
        Some(path) => {
            let raw =
                std::fs::read_to_string(&path).with_context(|| format!("reading config {}", path))?;
            serde_json::from_str::<Config>(&raw).with_context(|| format!("parsing {}", path))?
        }
        None => Config::default(),
    };
    if let Some(port) = port {
        config.debug_port = port;
    }

    let reference_source: Box<dyn ReferenceSource> = if reference.starts_with("http://")
        || reference.starts_with("https://")
    {
        Box::new(UrlReferenceSource::new(reference))
    } else {
        let bytes = std::fs::read(reference)
            .with_context(|| format!("reading reference image {}", reference))?;
        Box::new(BufferReferenceSource(Raster::from_bytes(&bytes)?))
    };

    let validator = Validator::new(config);
    let report = validator
        .validate(mode, &target, url, viewport, reference_source.as_ref())
        .await;

    let rendered = serde_json::to_string_pretty(&report)?;
    match output {
        Some(path) => {
            std::fs::write(&path, rendered).with_context(|| format!("writing {}", path))?;
            eprintln!("report written to {}", path);
        }
        None => println!("{}", rendered),
    }

    Ok(match report.status {
        Status::Pass => 0,
        Status::Fail | Status::Partial => 1,
        Status::Error => 2,
    })
}

fn parse_viewport(spec: &str) -> anyhow::Result<Viewport> {
    let (w, h) = spec
        .split_once(['x', 'X'])
        .with_context(|| format!("invalid viewport '{}', expected WIDTHxHEIGHT", spec))?;
    let width: u32 = w.trim().parse().with_context(|| format!("invalid width '{}'", w))?;
    let height: u32 = h.trim().parse().with_context(|| format!("invalid height '{}'", h))?;
    Ok(Viewport::new(width, height)?)
}
