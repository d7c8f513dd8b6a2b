//! Shared, version-pinned identifiers.
//!
//! These constants are the single source of truth for schema/version strings and
//! for the textual conventions (annotation prefix, marker sentinel) that show up
//! in rewritten scripts and in machine-readable reports.

pub const EXSYNC_UPDATE_REPORT_SCHEMA_VERSION: &str = "exsync.update.report@0.1.0";
pub const EXSYNC_SEGMENTS_SCHEMA_VERSION: &str = "exsync.segments@0.1.0";
pub const EXSYNC_CONFIG_SCHEMA_VERSION: &str = "exsync.config@0.1.0";

pub const DEFAULT_ANNOTATION_PREFIX: &str = "#|";

pub const SENTINEL_OPEN: &str = "<<exsync:";
pub const SENTINEL_CLOSE: &str = ">>";
pub const SENTINEL_NONCE_HEX_LEN: usize = 12;

pub const SKIP_DIRECTIVE: &str = "# exsync: skip";

pub const CONFIG_FILE_NAME: &str = "exsync.json";
pub const DEFAULT_ISSUES_LOG: &str = "exsync-issues.log";
pub const SCRATCH_DIR_PREFIX: &str = ".exsync-";

pub const ENV_PYTHON: &str = "EXSYNC_PYTHON";
pub const ENV_LOG: &str = "EXSYNC_LOG";

/// Sentinel text for marker `id` under `nonce`, e.g. `<<exsync:0a1b2c3d4e5f:000003>>`.
pub fn sentinel(nonce: &str, id: u32) -> String {
    format!("{SENTINEL_OPEN}{nonce}:{id:06}{SENTINEL_CLOSE}")
}

/// Lower-case hex encoding, as used for digests and sentinel nonces.
pub fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(nybble_to_hex((b >> 4) & 0x0f));
        out.push(nybble_to_hex(b & 0x0f));
    }
    out
}

fn nybble_to_hex(n: u8) -> char {
    match n {
        0..=9 => (b'0' + n) as char,
        10..=15 => (b'a' + (n - 10)) as char,
        _ => '0',
    }
}
