/// key: job-name-codec -> correlation key inside the metering log
///
/// `<truncated-title>.<connection>.<external-id>`, folded to 7-bit ASCII and
/// bounded to the metering system's document-name field width. Only the last
/// two segments must survive, so the title absorbs all truncation.
pub fn encode_job_name(
    title: &str,
    connection_id: &str,
    external_id: &str,
    width: usize,
) -> String {
    let suffix = format!(".{}.{}", segment(connection_id), segment(external_id));
    let budget = width.saturating_sub(suffix.len());
    let mut head: String = fold_ascii(title).chars().take(budget).collect();
    head.retain(|ch| ch != '.');
    format!("{head}{suffix}")
}

/// Recovers `(connection_id, external_id)` from an encoded name. Works for
/// arbitrarily truncated titles because the split runs from the right.
pub fn decode_job_name(name: &str) -> Option<(String, String)> {
    let mut segments = name.rsplitn(3, '.');
    let external_id = segments.next()?;
    let connection_id = segments.next()?;
    segments.next()?;
    if connection_id.is_empty() || external_id.is_empty() {
        return None;
    }
    Some((connection_id.to_string(), external_id.to_string()))
}

fn segment(id: &str) -> String {
    let mut folded = fold_ascii(id);
    folded.retain(|ch| ch != '.');
    folded
}

/// Strips diacritics onto their base letter; any remaining non-ASCII byte
/// becomes `?`.
pub fn fold_ascii(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        if ch.is_ascii() {
            out.push(ch);
            continue;
        }
        match base_letter(ch) {
            Some(folded) => out.push_str(folded),
            None => out.push('?'),
        }
    }
    out
}

fn base_letter(ch: char) -> Option<&'static str> {
    let folded = match ch {
        'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'Ā' | 'Ă' | 'Ą' => "A",
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'Ç' | 'Ć' | 'Č' => "C",
        'ç' | 'ć' | 'č' => "c",
        'Ď' => "D",
        'ď' | 'đ' => "d",
        'È' | 'É' | 'Ê' | 'Ë' | 'Ē' | 'Ė' | 'Ę' | 'Ě' => "E",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ė' | 'ę' | 'ě' => "e",
        'Ì' | 'Í' | 'Î' | 'Ï' | 'Ī' | 'Į' => "I",
        'ì' | 'í' | 'î' | 'ï' | 'ī' | 'į' => "i",
        'Ł' => "L",
        'ł' => "l",
        'Ñ' | 'Ń' | 'Ň' => "N",
        'ñ' | 'ń' | 'ň' => "n",
        'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'Ő' | 'Ø' => "O",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ő' | 'ø' => "o",
        'Ŕ' | 'Ř' => "R",
        'ŕ' | 'ř' => "r",
        'Ś' | 'Š' => "S",
        'ś' | 'š' => "s",
        'Ť' => "T",
        'ť' => "t",
        'Ù' | 'Ú' | 'Û' | 'Ü' | 'Ū' | 'Ů' | 'Ű' => "U",
        'ù' | 'ú' | 'û' | 'ü' | 'ū' | 'ů' | 'ű' => "u",
        'Ý' => "Y",
        'ý' | 'ÿ' => "y",
        'Ź' | 'Ż' | 'Ž' => "Z",
        'ź' | 'ż' | 'ž' => "z",
        'ß' => "ss",
        _ => return None,
    };
    Some(folded)
}

/// key: ledger-comment -> structured comment for downstream tooling
///
/// Pipe-delimited, field order fixed:
/// `user | copies | pages | paperSize | S/D | G/C | externalId | title | logComment`.
#[allow(clippy::too_many_arguments)]
pub fn ledger_comment(
    user: &str,
    copies: i64,
    pages: u32,
    paper_size: &str,
    duplex: bool,
    color: bool,
    external_id: &str,
    title: &str,
    log_comment: &str,
) -> String {
    let duplex_flag = if duplex { "D" } else { "S" };
    let color_flag = if color { "C" } else { "G" };
    format!(
        "{user} | {copies} | {pages} | {paper_size} | {duplex_flag} | {color_flag} | {external_id} | {title} | {log_comment}"
    )
}

/// Class-level variant: the user field carries `user@class` tokens for every
/// member that printed into the class account.
pub fn class_member_tokens(members: &[(String, String)]) -> String {
    members
        .iter()
        .map(|(user, class)| format!("{user}@{class}"))
        .collect::<Vec<_>>()
        .join(",")
}
