use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Substitutions for characters that have no canonical Unicode decomposition
/// and would otherwise be dropped entirely by the ASCII filter. NFD handles
/// the accented forms (é, ü, ñ, …); these are the stragglers.
const NO_DECOMPOSITION: &[(char, &str)] = &[
    ('ø', "o"),
    ('Ø', "o"),
    ('æ', "ae"),
    ('Æ', "ae"),
    ('œ', "oe"),
    ('Œ', "oe"),
    ('ß', "ss"),
    ('ł', "l"),
    ('Ł', "l"),
    ('đ', "d"),
    ('Đ', "d"),
    ('ð', "d"),
    ('Ð', "d"),
    ('þ', "th"),
    ('Þ', "th"),
];

/// Fold a raw player name into the canonical comparison form used for exact
/// identity matching.
///
/// Normalization steps:
/// - lowercase
/// - substitute characters lacking a canonical decomposition (ø→o, ß→ss, …)
/// - NFD-decompose and strip combining diacritical marks
/// - keep only `[a-z0-9 ]` (hyphens and apostrophes are removed outright, so
///   "O'Brien" and "Smith-Jones" collapse — accepted MVP limitation)
/// - collapse whitespace runs and trim
///
/// Idempotent: normalizing an already-normalized name is a no-op.
pub fn normalize_name(raw: &str) -> String {
    let lowered = raw.to_lowercase();

    let mut substituted = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        match NO_DECOMPOSITION.iter().find(|(from, _)| *from == ch) {
            Some((_, to)) => substituted.push_str(to),
            None => substituted.push(ch),
        }
    }

    let stripped: String = substituted
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c.is_whitespace())
        .collect();

    let mut out = String::with_capacity(stripped.len());
    let mut prev_space = true;
    for ch in stripped.chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_case_whitespace_and_accents_to_one_form() {
        assert_eq!(normalize_name("José García"), "jose garcia");
        assert_eq!(normalize_name("JOSÉ   GARCÍA"), "jose garcia");
        assert_eq!(normalize_name("  jose garcia "), "jose garcia");
    }

    #[test]
    fn idempotent() {
        for raw in ["José García", "Bjørn Sørensen", "O'Brien", "Müller"] {
            let once = normalize_name(raw);
            assert_eq!(normalize_name(&once), once);
        }
    }

    #[test]
    fn substitutes_non_decomposable_characters() {
        assert_eq!(normalize_name("Bjørn Sørensen"), "bjorn sorensen");
        assert_eq!(normalize_name("Åsa Æbelø"), "asa aebelo");
        assert_eq!(normalize_name("Weiß"), "weiss");
        assert_eq!(normalize_name("Łukasz Wódka"), "lukasz wodka");
        assert_eq!(normalize_name("Þórður Guðjohnsen"), "thordur gudjohnsen");
    }

    #[test]
    fn drops_hyphens_and_apostrophes_without_substitution() {
        assert_eq!(normalize_name("O'Brien"), "obrien");
        assert_eq!(normalize_name("Smith-Jones"), "smithjones");
        assert_eq!(normalize_name("D'Angelo Smith-Jones"), "dangelo smithjones");
    }

    #[test]
    fn keeps_digits() {
        assert_eq!(normalize_name("John Doe III"), "john doe iii");
        assert_eq!(normalize_name("Player 99"), "player 99");
    }
}
