//! Fuzz target for record transformation.
//!
//! Source documents are untrusted: any JSON object must either transform
//! into a row or fail with a row-level error, never panic.

#![no_main]

use libfuzzer_sys::fuzz_target;
use serde_json::Value;
use supportdesk_migrate::{helpdesk, TransformRegistry};

fuzz_target!(|data: &[u8]| {
    let Ok(Value::Object(record)) = serde_json::from_slice::<Value>(data) else {
        return;
    };

    let specs = helpdesk();
    let registry = TransformRegistry::new(&specs);
    for spec in &specs {
        if let Err(e) = registry.transform(&spec.name, &record) {
            assert!(e.is_row_level(), "unexpected fatal error: {e}");
        }
    }
});
