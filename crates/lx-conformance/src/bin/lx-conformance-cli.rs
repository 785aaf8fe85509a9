#![forbid(unsafe_code)]

use lx_conformance::{HarnessConfig, run_suite, run_suite_by_id};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut suite_filter: Option<String> = None;
    let mut fixture_root: Option<String> = None;
    let mut require_green = false;
    let mut json = false;

    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--suite-id" => {
                let value = args
                    .next()
                    .ok_or("--suite-id requires a value (e.g. LX-EVAL-001)")?;
                suite_filter = Some(value);
            }
            "--fixture-root" => {
                let value = args.next().ok_or("--fixture-root requires a directory")?;
                fixture_root = Some(value);
            }
            "--require-green" => {
                require_green = true;
            }
            "--json" => {
                json = true;
            }
            "--help" | "-h" => {
                print_help();
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}").into());
            }
        }
    }

    let mut config = HarnessConfig::default_paths();
    if let Some(root) = fixture_root {
        config = config.with_fixture_root(root);
    }

    let report = match suite_filter.as_deref() {
        Some(suite_id) => run_suite_by_id(&config, suite_id)?,
        None => run_suite(&config)?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "suite={} fixtures={} passed={} failed={} green={}",
            report.suite,
            report.fixture_count,
            report.passed,
            report.failed,
            report.is_green()
        );
        for failure in report.failures() {
            println!(
                "FAIL suite_id={} case={} mode={:?}: {}",
                failure.suite_id,
                failure.case_id,
                failure.mode,
                failure.mismatch.as_deref().unwrap_or("<no detail>")
            );
        }
    }

    if require_green && !report.is_green() {
        return Err(format!(
            "conformance suite is not green: {} of {} cases failed",
            report.failed, report.fixture_count
        )
        .into());
    }

    Ok(())
}

fn print_help() {
    println!(
        "lx-conformance-cli\n\
         Usage:\n\
         \tlx-conformance-cli [--suite-id LX-EVAL-001] [--fixture-root DIR] [--json] [--require-green]\n\
         Options:\n\
         \t--suite-id <id>      Run only the cases of one suite\n\
         \t--fixture-root <dir> Read cases from <dir>/cases instead of the bundled fixtures\n\
         \t--json               Print the full report as JSON\n\
         \t--require-green      Fail with non-zero exit when any case fails\n\
         \t-h, --help           Show this help"
    );
}
