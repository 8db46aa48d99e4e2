use std::path::Path;
use std::time::Duration;

use strata_core::config::AppConfig;
use strata_docs::DocIndex;
use strata_sql::SqliteExecutor;

struct CheckResult {
    label: String,
    ok: bool,
    detail: String,
}

pub async fn run_doctor(config: &AppConfig, base_dir: &Path) {
    let mut checks = Vec::new();

    // 1. Model settings
    checks.push(check_model(config));

    // 2. Database opens and exposes a schema
    checks.push(check_database(config, base_dir));

    // 3. Docs directory yields chunks
    checks.push(check_docs(config, base_dir));

    // 4. Model endpoint answers
    checks.push(check_endpoint(config).await);

    // 5. Graph limits
    checks.push(check_graph(config));

    // Print results
    let mut ok_count = 0;
    let mut fail_count = 0;

    for check in &checks {
        let icon = if check.ok { "[OK]" } else { "[!!]" };
        println!("  {} {}: {}", icon, check.label, check.detail);
        if check.ok {
            ok_count += 1;
        } else {
            fail_count += 1;
        }
    }

    println!();
    println!("  {} passed, {} issues found", ok_count, fail_count);
}

fn check_model(config: &AppConfig) -> CheckResult {
    let model = &config.model;
    let unresolved_key = model
        .api_key
        .as_deref()
        .map_or(false, |k| k.starts_with("${"));

    if model.model_id.trim().is_empty() {
        CheckResult {
            label: "Model".into(),
            ok: false,
            detail: "model_id is empty".into(),
        }
    } else if unresolved_key {
        CheckResult {
            label: "Model".into(),
            ok: false,
            detail: format!(
                "{} ({}): api_key references an unset environment variable",
                model.model_id, model.provider
            ),
        }
    } else {
        CheckResult {
            label: "Model".into(),
            ok: true,
            detail: format!("{} ({})", model.model_id, model.provider),
        }
    }
}

fn check_database(config: &AppConfig, base_dir: &Path) -> CheckResult {
    let path = config.resolve_path(base_dir, &config.database.path);
    let schema = SqliteExecutor::open(&path, config.database.compat_views)
        .and_then(|executor| executor.schema());

    match schema {
        Ok(schema) => {
            let tables = schema
                .lines()
                .filter(|l| l.trim_start().to_uppercase().starts_with("CREATE TABLE"))
                .count();
            let views = schema.lines().filter(|l| l.starts_with("-- view")).count();
            if tables == 0 {
                CheckResult {
                    label: "Database".into(),
                    ok: false,
                    detail: format!("{} (no tables)", path.display()),
                }
            } else {
                CheckResult {
                    label: "Database".into(),
                    ok: true,
                    detail: format!(
                        "{} ({} tables, {} compatibility views)",
                        path.display(),
                        tables,
                        views
                    ),
                }
            }
        }
        Err(e) => CheckResult {
            label: "Database".into(),
            ok: false,
            detail: format!("{}: {}", path.display(), e),
        },
    }
}

fn check_docs(config: &AppConfig, base_dir: &Path) -> CheckResult {
    let dir = config.resolve_path(base_dir, &config.retrieval.docs_dir);
    match DocIndex::load_dir(&dir, config.retrieval.top_k) {
        Ok(index) if index.is_empty() => CheckResult {
            label: "Documents".into(),
            ok: false,
            detail: format!("{} (no markdown chunks)", dir.display()),
        },
        Ok(index) => CheckResult {
            label: "Documents".into(),
            ok: true,
            detail: format!("{} ({} chunks)", dir.display(), index.len()),
        },
        Err(e) => CheckResult {
            label: "Documents".into(),
            ok: false,
            detail: format!("{}: {}", dir.display(), e),
        },
    }
}

async fn check_endpoint(config: &AppConfig) -> CheckResult {
    let endpoint = config
        .model
        .base_url
        .clone()
        .unwrap_or_else(|| strata_llm::openai::default_endpoint(&config.model.provider).to_string());

    let client = match reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            return CheckResult {
                label: "Endpoint".into(),
                ok: false,
                detail: format!("cannot build HTTP client: {}", e),
            }
        }
    };

    // Any HTTP response means the server is up; chat endpoints reject GET.
    match client.get(&endpoint).send().await {
        Ok(resp) => CheckResult {
            label: "Endpoint".into(),
            ok: true,
            detail: format!("{} (HTTP {})", endpoint, resp.status().as_u16()),
        },
        Err(e) => CheckResult {
            label: "Endpoint".into(),
            ok: false,
            detail: format!("{} unreachable: {}", endpoint, e),
        },
    }
}

fn check_graph(config: &AppConfig) -> CheckResult {
    let graph = &config.graph;
    CheckResult {
        label: "Graph".into(),
        ok: true,
        detail: format!(
            "repair budget {}, run timeout {}s, concurrency {}",
            graph.max_repair_attempts, graph.run_timeout_secs, graph.concurrency
        ),
    }
}
