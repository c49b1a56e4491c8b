use std::collections::HashMap;

/// Shannon entropy in bits per character: `-Σ p(c)·log2 p(c)` over the
/// observed character frequencies. Empty input has entropy 0.
pub fn shannon_entropy(input: &str) -> f64 {
    let mut counts: HashMap<char, usize> = HashMap::new();
    let mut total = 0usize;
    for c in input.chars() {
        *counts.entry(c).or_insert(0) += 1;
        total += 1;
    }
    if total == 0 {
        return 0.0;
    }
    let total = total as f64;
    counts
        .values()
        .map(|&n| {
            let p = n as f64 / total;
            -p * p.log2()
        })
        .sum()
}

/// Share of characters that are neither alphanumeric nor whitespace.
pub fn special_char_ratio(input: &str) -> f64 {
    let mut total = 0usize;
    let mut special = 0usize;
    for c in input.chars() {
        total += 1;
        if !c.is_alphanumeric() && !c.is_whitespace() {
            special += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        special as f64 / total as f64
    }
}

/// Control characters other than tab, CR and LF.
pub fn has_binary_control(input: &str) -> bool {
    input
        .chars()
        .any(|c| c.is_control() && !matches!(c, '\t' | '\r' | '\n'))
}

/// Longest prefix of at most `max_bytes` that ends on a char boundary.
pub fn truncate_to_boundary(input: &str, max_bytes: usize) -> &str {
    if input.len() <= max_bytes {
        return input;
    }
    let mut end = max_bytes;
    while !input.is_char_boundary(end) {
        end -= 1;
    }
    &input[..end]
}
