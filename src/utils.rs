use std::fmt::Write;

/// Renders a byte slice for diagnostics, keeping printable ASCII as-is and
/// hex-escaping everything else as `\0xNN`.
pub(crate) fn escape_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());

    for &byte in bytes {
        if (32..=126).contains(&byte) {
            out.push(byte as char);
        } else {
            // Writing to a String cannot fail.
            let _ = write!(out, "\\0x{:02x}", byte);
        }
    }

    out
}

pub(crate) fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}
