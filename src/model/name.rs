//! Title normalization shared by both ingestion paths.
//!
//! Canonical catalog names and provider file names must normalize to the
//! same key for name-based matching to work, so the rules live here and
//! nowhere else: case-fold, strip a known file extension, strip bracketed
//! region/language/revision tags, collapse punctuation and whitespace.
//! Normalization is deterministic and idempotent.

use std::sync::LazyLock;

use regex::Regex;

use super::Region;

/// File extensions stripped before normalization.
///
/// Kept to a known list so titles ending in something dot-like
/// ("Episode 1.5") are never mangled.
const KNOWN_EXTENSIONS: &[&str] = &[
    "zip", "7z", "rar", "bin", "rom", "z64", "n64", "v64", "nes", "sfc", "smc", "gb", "gbc",
    "gba", "md", "gen", "sms", "gg", "iso", "chd", "gdi", "cue",
];

/// Matches one bracketed tag group: `(USA)`, `[!]`, `(Rev 1)`, ...
#[allow(clippy::unwrap_used)] // pattern is a compile-time constant
static TAG_GROUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\([^)]*\)|\[[^\]]*\]").unwrap());

/// Matches runs of characters that separate words after tag stripping.
#[allow(clippy::unwrap_used)] // pattern is a compile-time constant
static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

/// Normalizes a raw title or file name into a comparable key.
///
/// Normalizing an already-normalized string returns it unchanged.
#[must_use]
pub fn normalize(raw: &str) -> String {
    let stem = strip_extension(raw);
    let untagged = TAG_GROUP.replace_all(stem, " ");
    let lowered = untagged.to_lowercase();
    let collapsed = SEPARATORS.replace_all(&lowered, " ");
    collapsed.trim().to_string()
}

/// Normalizes a raw title and extracts the release region from its tags.
///
/// The first bracketed token that maps to a known region wins; multi-region
/// tags like `(USA, Europe)` yield their first recognized region. Titles
/// without a region tag yield [`Region::Unknown`].
#[must_use]
pub fn parse_title(raw: &str) -> (String, Region) {
    let stem = strip_extension(raw);

    let mut region = Region::Unknown;
    for group in TAG_GROUP.find_iter(stem) {
        let inner = group
            .as_str()
            .trim_matches(|c| c == '(' || c == ')' || c == '[' || c == ']');
        for token in inner.split([',', '+', '/']) {
            if let Some(found) = Region::from_tag(token) {
                region = found;
                break;
            }
        }
        if region != Region::Unknown {
            break;
        }
    }

    (normalize(stem), region)
}

/// Strips a trailing known file extension, case-insensitively.
fn strip_extension(raw: &str) -> &str {
    if let Some((stem, ext)) = raw.rsplit_once('.') {
        if KNOWN_EXTENSIONS.iter().any(|k| ext.eq_ignore_ascii_case(k)) {
            return stem;
        }
    }
    raw
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== normalize Tests ====================

    #[test]
    fn test_normalize_case_folds_and_collapses() {
        assert_eq!(normalize("Super  Mario   64"), "super mario 64");
        assert_eq!(normalize("SONIC-The_Hedgehog"), "sonic the hedgehog");
    }

    #[test]
    fn test_normalize_strips_bracketed_tags() {
        assert_eq!(normalize("Super Mario 64 (USA)"), "super mario 64");
        assert_eq!(normalize("Super Mario 64 (USA) [!]"), "super mario 64");
        assert_eq!(normalize("Zelda (Europe) (Rev 1)"), "zelda");
    }

    #[test]
    fn test_normalize_strips_known_extension_only() {
        assert_eq!(normalize("Super Mario 64 (USA).z64"), "super mario 64");
        assert_eq!(normalize("Game.zip"), "game");
        // "1.5" is not a known extension and must survive
        assert_eq!(normalize("Episode 1.5"), "episode 1 5");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let inputs = [
            "Super Mario 64 (USA).z64",
            "  MIXED case -- Title [b] (Japan)  ",
            "already normalized title",
        ];
        for raw in inputs {
            let once = normalize(raw);
            let twice = normalize(&once);
            assert_eq!(once, twice, "normalize must be idempotent for {raw:?}");
        }
    }

    #[test]
    fn test_normalize_empty_and_tag_only() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("(USA) [!]"), "");
    }

    // ==================== parse_title Tests ====================

    #[test]
    fn test_parse_title_extracts_region() {
        let (name, region) = parse_title("Super Mario 64 (USA).z64");
        assert_eq!(name, "super mario 64");
        assert_eq!(region, Region::Usa);
    }

    #[test]
    fn test_parse_title_first_region_wins_in_multi_tag() {
        let (name, region) = parse_title("Tetris (USA, Europe).gb");
        assert_eq!(name, "tetris");
        assert_eq!(region, Region::Usa);
    }

    #[test]
    fn test_parse_title_skips_non_region_tags() {
        let (name, region) = parse_title("Metroid [!] (Rev 2) (Japan)");
        assert_eq!(name, "metroid");
        assert_eq!(region, Region::Japan);
    }

    #[test]
    fn test_parse_title_no_tags_yields_unknown() {
        let (name, region) = parse_title("Pilotwings 64");
        assert_eq!(name, "pilotwings 64");
        assert_eq!(region, Region::Unknown);
    }

    #[test]
    fn test_parse_title_single_letter_region_codes() {
        assert_eq!(parse_title("Game (U)").1, Region::Usa);
        assert_eq!(parse_title("Game (E)").1, Region::Europe);
        assert_eq!(parse_title("Game (J)").1, Region::Japan);
        assert_eq!(parse_title("Game (W)").1, Region::World);
    }
}
