/// Text normalisation and n-gram extraction.
///
/// Search terms and indexed text pass through the same pipeline so that a
/// query gram always has a chance to hit the posting map: lowercase, collapse
/// whitespace runs, trim, then slide a fixed-width window over each
/// whitespace-free token. CJK runs get their own window width because single
/// ideographs carry far more information than single latin letters.

const DEFAULT_NGRAM_SIZE: usize = 2;

/// Lowercases and collapses whitespace runs to single spaces, trimming edges.
pub fn normalize(text: &str) -> String {
    let mut normalized = String::with_capacity(text.len());
    let mut prev_was_space = false;
    for c in text.chars() {
        if c.is_whitespace() {
            if !prev_was_space && !normalized.is_empty() {
                normalized.push(' ');
                prev_was_space = true;
            }
        } else {
            for lower in c.to_lowercase() {
                normalized.push(lower);
            }
            prev_was_space = false;
        }
    }
    if normalized.ends_with(' ') {
        normalized.pop();
    }
    normalized
}

/// CJK unified ideographs plus the kana ranges.
pub fn is_cjk(c: char) -> bool {
    matches!(c,
        '\u{3040}'..='\u{309f}'   // hiragana
        | '\u{30a0}'..='\u{30ff}' // katakana
        | '\u{3400}'..='\u{4dbf}' // CJK extension A
        | '\u{4e00}'..='\u{9fff}' // CJK unified
        | '\u{f900}'..='\u{faff}' // CJK compatibility
    )
}

/// Fixed-width n-grams over one run of characters. Runs shorter than the
/// window emit the whole run as a single gram.
fn window(run: &[char], n: usize, out: &mut Vec<String>) {
    if run.is_empty() {
        return;
    }
    if run.len() < n {
        out.push(run.iter().collect());
        return;
    }
    for start in 0..=(run.len() - n) {
        out.push(run[start..start + n].iter().collect());
    }
}

/// N-grams with a single width for every script.
pub fn ngrams(normalized: &str, n: usize) -> Vec<String> {
    let n = if n == 0 { DEFAULT_NGRAM_SIZE } else { n };
    let mut out = Vec::new();
    for token in normalized.split(' ') {
        let chars: Vec<char> = token.chars().collect();
        window(&chars, n, &mut out);
    }
    out.sort();
    out.dedup();
    out
}

/// N-grams with separate widths for CJK and non-CJK runs. A script change
/// inside a token ends the current run.
pub fn hybrid_ngrams(normalized: &str, latin_n: usize, kanji_n: usize) -> Vec<String> {
    let latin_n = if latin_n == 0 { DEFAULT_NGRAM_SIZE } else { latin_n };
    let kanji_n = if kanji_n == 0 { latin_n } else { kanji_n };

    let mut out = Vec::new();
    for token in normalized.split(' ') {
        let chars: Vec<char> = token.chars().collect();
        let mut run_start = 0;
        while run_start < chars.len() {
            let cjk = is_cjk(chars[run_start]);
            let mut run_end = run_start + 1;
            while run_end < chars.len() && is_cjk(chars[run_end]) == cjk {
                run_end += 1;
            }
            let n = if cjk { kanji_n } else { latin_n };
            window(&chars[run_start..run_end], n, &mut out);
            run_start = run_end;
        }
    }
    out.sort();
    out.dedup();
    out
}

/// Grams for a table configured with `ngram_size` / `kanji_ngram_size`.
pub fn grams_for(text: &str, ngram_size: usize, kanji_ngram_size: usize) -> Vec<String> {
    let normalized = normalize(text);
    if kanji_ngram_size > 0 {
        hybrid_ngrams(&normalized, ngram_size, kanji_ngram_size)
    } else {
        ngrams(&normalized, ngram_size)
    }
}
