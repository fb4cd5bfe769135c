use anyhow::Context;
use base64::Engine;
use pagelens_core::config::DEFAULT_PASS_THRESHOLD;
use pagelens_validator::{compare, CompareOptions, Raster};

/// Compare two image files and print the result as JSON. Exit code 0 when
/// the match score clears the pass threshold, 1 otherwise.
pub async fn run(
    expected: &str,
    actual: &str,
    threshold: f64,
    include_aa: bool,
    diff: Option<String>,
) -> anyhow::Result<i32> {
    let expected_raster = load(expected)?;
    let actual_raster = load(actual)?;

    let options = CompareOptions {
        threshold,
        include_aa,
        include_diff_image: diff.is_some(),
        ..CompareOptions::default()
    };
    let mut comparison = compare(&expected_raster, &actual_raster, &options)?;

    if let (Some(path), Some(encoded)) = (diff, comparison.diff_image.take()) {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&encoded)
            .context("decoding diff image")?;
        std::fs::write(&path, bytes).with_context(|| format!("writing {}", path))?;
        eprintln!("diff image written to {}", path);
    }

    println!("{}", serde_json::to_string_pretty(&comparison)?);
    Ok(if comparison.match_score >= DEFAULT_PASS_THRESHOLD {
        0
    } else {
        1
    })
}

fn load(path: &str) -> anyhow::Result<Raster> {
    let bytes = std::fs::read(path).with_context(|| format!("reading image {}", path))?;
    Ok(Raster::from_bytes(&bytes)?)
}
