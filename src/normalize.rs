// Quote/entity normalization for expression regions
// Word processor output substitutes typographic quotes and entity-encodes
// ampersands inside expressions; both are invalid in the expression grammar

/// Rewrite typographic artifacts in one expression's text: curly double and
/// single quotes become their ASCII equivalents, and the literal sequence
/// `&amp;` collapses to `&`. Everything else passes through unchanged.
pub fn normalize_expression(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();
    let mut output = String::with_capacity(text.len());
    let mut i = 0;
    while i < n {
        match chars[i] {
            '\u{201c}' | '\u{201d}' => output.push('"'),
            '\u{2018}' | '\u{2019}' => output.push('\''),
            '&' if i + 4 < n && chars[i..i + 5] == ['&', 'a', 'm', 'p', ';'] => {
                output.push('&');
                i += 4;
            }
            ch => output.push(ch),
        }
        i += 1;
    }
    output
}

/// Normalize a whole document, touching only text that lies between
/// expression delimiters. A region opens with `{{` or `{%` and closes at the
/// nearest `}}` or `%}`; either closer matches either opener. Prose outside
/// regions is copied through verbatim, as is an unterminated trailing region.
pub fn normalize_source(source: &str) -> String {
    let mut output = String::with_capacity(source.len());
    let mut pos = 0;
    while let Some((open, close)) = next_region(source, pos) {
        output.push_str(&source[pos..open + 2]);
        output.push_str(&normalize_expression(&source[open + 2..close]));
        output.push_str(&source[close..close + 2]);
        pos = close + 2;
    }
    output.push_str(&source[pos..]);
    output
}

/// The inner text of every expression region in the document, in order.
/// Shared by the validator's post-run filter scan.
pub(crate) fn expression_regions(source: &str) -> Vec<&str> {
    let mut regions = Vec::new();
    let mut pos = 0;
    while let Some((open, close)) = next_region(source, pos) {
        regions.push(&source[open + 2..close]);
        pos = close + 2;
    }
    regions
}

/// Byte offsets of the next region's opener and closer at or after `pos`,
/// or None when no complete region remains.
fn next_region(source: &str, pos: usize) -> Option<(usize, usize)> {
    let rest = &source[pos..];
    let open = match (rest.find("{{"), rest.find("{%")) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    let after = &rest[open + 2..];
    let close = match (after.find("}}"), after.find("%}")) {
        (Some(a), Some(b)) => a.min(b),
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => return None,
    };
    Some((pos + open, pos + open + 2 + close))
}
