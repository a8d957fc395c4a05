use chrono::Utc;
use sha1::{Digest, Sha1};

/// Compute the SHA-1 digest of `data` and return it as lowercase hex, the
/// same representation B2 reports in `X-Bz-Content-Sha1`.
pub fn sha1_hex(data: &[u8]) -> String {
    format!("{:x}", Sha1::digest(data))
}

/// The current UTC time in the RFC-1123 style used for console banners and
/// request timestamps, e.g. `Tue, 04 Aug 2026 17:03:22 GMT`.
pub fn http_date_now() -> String {
    Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
