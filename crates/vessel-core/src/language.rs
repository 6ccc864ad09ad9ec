//! Language tag normalisation.
//!
//! DASH and HLS both want RFC 5646 tags in their shortest form, while track
//! metadata wants ISO-639-2.  The table below covers the common two-letter
//! codes; three-letter codes pass through as-is.  Anything else maps to
//! `"und"`, which callers treat as an error.

/// ISO-639-1 → ISO-639-2/T pairs for the languages the engine ships with.
const ISO_639: &[(&str, &str)] = &[
    ("ar", "ara"),
    ("bg", "bul"),
    ("bn", "ben"),
    ("ca", "cat"),
    ("cs", "ces"),
    ("da", "dan"),
    ("de", "deu"),
    ("el", "ell"),
    ("en", "eng"),
    ("es", "spa"),
    ("eu", "eus"),
    ("fa", "fas"),
    ("fi", "fin"),
    ("fr", "fra"),
    ("gl", "glg"),
    ("he", "heb"),
    ("hi", "hin"),
    ("hr", "hrv"),
    ("hu", "hun"),
    ("id", "ind"),
    ("it", "ita"),
    ("ja", "jpn"),
    ("ko", "kor"),
    ("nl", "nld"),
    ("no", "nor"),
    ("pl", "pol"),
    ("pt", "por"),
    ("ro", "ron"),
    ("ru", "rus"),
    ("sk", "slk"),
    ("sl", "slv"),
    ("sr", "srp"),
    ("sv", "swe"),
    ("ta", "tam"),
    ("te", "tel"),
    ("th", "tha"),
    ("tr", "tur"),
    ("uk", "ukr"),
    ("ur", "urd"),
    ("vi", "vie"),
    ("zh", "zho"),
];

/// Strip region/script subtags: `"en-US"` → `"en"`.
fn primary_subtag(tag: &str) -> &str {
    tag.split(['-', '_']).next().unwrap_or(tag)
}

/// Normalise a BCP-47-ish tag to an ISO-639-2 code.  Returns `"und"` when the
/// tag cannot be resolved.
pub fn to_iso_639_2(tag: &str) -> String {
    let primary = primary_subtag(tag).to_ascii_lowercase();
    if primary.len() == 3 && primary.chars().all(|c| c.is_ascii_alphabetic()) {
        return primary;
    }
    for (two, three) in ISO_639 {
        if *two == primary {
            return (*three).to_string();
        }
    }
    "und".to_string()
}

/// Map a tag to its shortest RFC 5646 form (two-letter where one exists).
/// Unknown tags pass through unchanged.
pub fn shortest_form(tag: &str) -> String {
    if tag.is_empty() {
        return String::new();
    }
    let primary = primary_subtag(tag).to_ascii_lowercase();
    for (two, three) in ISO_639 {
        if *three == primary || *two == primary {
            return (*two).to_string();
        }
    }
    primary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_letter_codes_map_to_three() {
        assert_eq!(to_iso_639_2("en"), "eng");
        assert_eq!(to_iso_639_2("zh"), "zho");
    }

    #[test]
    fn region_subtags_are_stripped() {
        assert_eq!(to_iso_639_2("en-US"), "eng");
        assert_eq!(to_iso_639_2("pt_BR"), "por");
    }

    #[test]
    fn three_letter_codes_pass_through() {
        assert_eq!(to_iso_639_2("fil"), "fil");
        assert_eq!(to_iso_639_2("eng"), "eng");
    }

    #[test]
    fn unknown_tags_are_undetermined() {
        assert_eq!(to_iso_639_2("q!"), "und");
        assert_eq!(to_iso_639_2("x"), "und");
    }

    #[test]
    fn shortest_form_prefers_two_letter_codes() {
        assert_eq!(shortest_form("eng"), "en");
        assert_eq!(shortest_form("en-GB"), "en");
        assert_eq!(shortest_form("fil"), "fil");
        assert_eq!(shortest_form(""), "");
    }
}
