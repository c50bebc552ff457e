use strsim::normalized_levenshtein;

/// Case-insensitive edit-distance similarity in `0.0..=1.0`.
pub fn similarity(a: &str, b: &str) -> f64 {
    normalized_levenshtein(&a.to_lowercase(), &b.to_lowercase())
}

/// Exact (case-insensitive) match scores 1.0, prefix or suffix 0.5, anything else `None`.
pub fn affix_score(requested: &str, name: &str) -> Option<f64> {
    let requested = requested.to_lowercase();
    let name = name.to_lowercase();
    if name == requested {
        Some(1.0)
    } else if name.starts_with(&requested) || name.ends_with(&requested) {
        Some(0.5)
    } else {
        None
    }
}
