use crate::error::Rejection;

/// key: content-check -> well-formedness gate before submission
///
/// Conversion internals live outside this crate; the engine only refuses
/// content it can tell is unprintable: unknown formats, PDF files without an
/// end-of-file marker, and encrypted PDF files.
pub fn inspect_bytes(data: &[u8]) -> Result<(), Rejection> {
    if data.is_empty() {
        return Err(Rejection::InvalidDocument("empty content".to_string()));
    }

    if data.starts_with(b"%PDF-") {
        return inspect_pdf(data);
    }
    if data.starts_with(b"%!PS") {
        return Ok(());
    }

    let prefix: String = data
        .iter()
        .take(8)
        .map(|byte| {
            if byte.is_ascii_graphic() {
                *byte as char
            } else {
                '.'
            }
        })
        .collect();
    Err(Rejection::UnsupportedType(prefix))
}

fn inspect_pdf(data: &[u8]) -> Result<(), Rejection> {
    if contains(data, b"/Encrypt") {
        return Err(Rejection::EncryptedDocument);
    }
    // The EOF marker sits in the last kilobyte of a well-formed file.
    let tail_start = data.len().saturating_sub(1024);
    if !contains(&data[tail_start..], b"%%EOF") {
        return Err(Rejection::InvalidDocument(
            "missing end-of-file marker".to_string(),
        ));
    }
    Ok(())
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}
