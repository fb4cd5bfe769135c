use anyhow::Context;
use pagelens_core::DesignNode;
use pagelens_validator::sections;

/// Print the section plan for a design target's children as JSON.
pub fn run(target_path: &str) -> anyhow::Result<i32> {
    let raw = std::fs::read_to_string(target_path)
        .with_context(|| format!("reading target {}", target_path))?;
    let target: DesignNode =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", target_path))?;

    if target.children.is_empty() {
        eprintln!("target '{}' has no children; nothing to plan", target.name);
        return Ok(1);
    }

    let plan = sections::plan(&target.children);
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(0)
}
