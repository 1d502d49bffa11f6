use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use huntflow::display::render_text;
use huntflow::federation::BundleConnector;
use huntflow::{HuntConfig, Session};

/// `name=path[,name=path…]` pairs from HUNTFLOW_BUNDLES.
fn bundle_specs(raw: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let Some((name, path)) = part.split_once('=') else {
            bail!("HUNTFLOW_BUNDLES entry '{}' is not name=path", part);
        };
        out.push((name.trim().to_string(), path.trim().to_string()));
    }
    Ok(out)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Init logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let Some(script_path) = std::env::args().nth(1) else {
        bail!("usage: huntflow <script.hf>");
    };
    let script = std::fs::read_to_string(&script_path).with_context(|| format!("reading '{}'", script_path))?;

    let config = HuntConfig::from_env();
    let show_summary = config.show_execution_summary;
    info!(
        target: "huntflow",
        "huntflow starting: RUST_LOG='{}', store_root='{}', script='{}'",
        std::env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string()),
        config.store_root.display(),
        script_path
    );
    let mut session = Session::new(config)?;
    if let Ok(raw) = std::env::var("HUNTFLOW_BUNDLES") {
        for (name, path) in bundle_specs(&raw)? {
            let bundle = BundleConnector::open(std::path::Path::new(&path))
                .with_context(|| format!("opening bundle '{}'", path))?
                .with_time_attributes(session.config().time_attributes.clone());
            session.register_connector(&name, bundle.capabilities(), Arc::new(bundle));
        }
    }

    let mut failures = 0usize;
    for result in session.execute(&script).await {
        match result {
            Ok(outcome) => {
                for w in &outcome.warnings {
                    warn!(target: "huntflow", "line {}: {}", outcome.line, w);
                }
                if let Some(d) = &outcome.display {
                    print!("{}", render_text(d));
                }
                if show_summary {
                    for line in &outcome.summary {
                        println!("-- {}", line);
                    }
                }
            }
            Err(f) => {
                failures += 1;
                eprintln!("{}", f);
            }
        }
    }
    let report = session.close()?;
    info!(target: "huntflow", "session closed: {} variables released, {} statements failed", report.variables_released, failures);
    if failures > 0 {
        std::process::exit(1);
    }
    Ok(())
}
