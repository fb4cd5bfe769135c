use pagelens_validator::browser::session::find_browser_binary;
use serde_json::Value;
use std::time::Duration;

/// Run environment diagnostics: browser binary, debugging port, network.
pub async fn run(port: u16) -> anyhow::Result<i32> {
    println!();
    println!("🩺 pagelens doctor — Environment Diagnostics");
    println!("================================");
    println!();

    let mut ok_count = 0u32;
    let mut warn_count = 0u32;
    let mut err_count = 0u32;

    // --- 1. Browser binary ---
    println!("🌐 Browser");
    match find_browser_binary() {
        Some(binary) => {
            print_ok("Browser binary found", &binary);
            ok_count += 1;
        }
        None => {
            print_err(
                "No Chrome/Chromium/Edge binary found",
                "Install Google Chrome or Chromium",
            );
            err_count += 1;
        }
    }
    println!();

    // --- 2. Debugging endpoint ---
    println!("🔌 Debugging endpoint");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(3))
        .build()?;
    let url = format!("http://127.0.0.1:{}/json/version", port);
    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let version = resp
                .json::<Value>()
                .await
                .ok()
                .and_then(|v| v.get("Browser").and_then(|b| b.as_str()).map(String::from))
                .unwrap_or_else(|| "unknown version".to_string());
            print_ok(
                &format!("Browser listening on port {}", port),
                &version,
            );
            ok_count += 1;

            match client
                .get(format!("http://127.0.0.1:{}/json/list", port))
                .send()
                .await
            {
                Ok(resp) => {
                    let pages = resp
                        .json::<Vec<Value>>()
                        .await
                        .map(|targets| {
                            targets
                                .iter()
                                .filter(|t| t.get("type").and_then(|v| v.as_str()) == Some("page"))
                                .count()
                        })
                        .unwrap_or(0);
                    if pages > 0 {
                        print_ok("Page target available", &format!("{} open page(s)", pages));
                        ok_count += 1;
                    } else {
                        print_warn(
                            "No page target open",
                            "A blank page will be opened on first capture",
                        );
                        warn_count += 1;
                    }
                }
                Err(e) => {
                    print_err("Target list unreachable", &e.to_string());
                    err_count += 1;
                }
            }
        }
        _ => {
            print_warn(
                &format!("No browser on port {}", port),
                "One will be launched on first capture",
            );
            warn_count += 1;
        }
    }
    println!();

    // --- Summary ---
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!(
        "  ✅ {} passed  ⚠️  {} warnings  ❌ {} errors",
        ok_count, warn_count, err_count
    );
    println!();
    if err_count > 0 {
        println!("  {} error(s) must be fixed before validating.", err_count);
    } else if warn_count > 0 {
        println!("  Ready. A browser launch will happen on first use.");
    } else {
        println!("  🎉 All good!");
    }
    println!();

    Ok(if err_count > 0 { 1 } else { 0 })
}

fn print_ok(label: &str, detail: &str) {
    if detail.is_empty() {
        println!("  ✅ {}", label);
    } else {
        println!("  ✅ {} — {}", label, detail);
    }
}

fn print_warn(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ⚠️  {}", label);
    } else {
        println!("  ⚠️  {} — {}", label, hint);
    }
}

fn print_err(label: &str, hint: &str) {
    if hint.is_empty() {
        println!("  ❌ {}", label);
    } else {
        println!("  ❌ {} — {}", label, hint);
    }
}
