pub mod call;
pub mod keygen;
pub mod publish;
pub mod register;
pub mod subscribe;

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;
use wick_core::session::Options;
use wick_core::value;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a `KEY=VALUE` pair. Only the first `=` splits.
pub fn parse_kv(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, _)) if k.trim().is_empty() => Err(format!("key cannot be empty in: {s}")),
        Some((k, v)) => Ok((k.trim().to_string(), v.to_string())),
        None => Err(format!("expected KEY=VALUE, got: {s}")),
    }
}

/// Coerce repeated `KEY=VALUE` flags into a mapping. Later keys win.
pub fn to_mapping(pairs: &[(String, String)]) -> Options {
    let raw: BTreeMap<&String, &String> = pairs.iter().map(|(k, v)| (k, v)).collect();
    value::dict_from_strings(raw)
}

/// A token cancelled on the first Ctrl-C. Must be called inside a runtime.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("interrupt received");
            trigger.cancel();
        }
    });
    token
}
