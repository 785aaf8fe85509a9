#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(body) = std::str::from_utf8(data) else {
        return;
    };
    // Parsed fixtures are also evaluated; evaluation must report, not panic.
    if let Ok(fixture) = lx_conformance::parse_fixture(body) {
        let _ = lx_conformance::run_fixture(&fixture);
    }
});
