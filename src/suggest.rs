//! "Did you mean" suggestions for unresolved names

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;

/// Closest candidate to `name` by fuzzy score, matching in either direction so
/// both abbreviations (`itm` → `item`) and overlong names (`items` → `item`) hit.
pub fn did_you_mean<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let matcher = SkimMatcherV2::default().ignore_case();
    let mut best: Option<(i64, &str)> = None;

    for candidate in candidates {
        if candidate == name {
            continue;
        }
        let score = matcher
            .fuzzy_match(candidate, name)
            .into_iter()
            .chain(matcher.fuzzy_match(name, candidate))
            .max();
        if let Some(score) = score {
            if best.map_or(true, |(b, _)| score > b) {
                best = Some((score, candidate));
            }
        }
    }

    best.map(|(_, candidate)| candidate.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_suggests_closest_name() {
        let names = ["Item", "Skill", "Monster"];
        assert_eq!(did_you_mean("itm", names), Some("Item".to_string()));
        assert_eq!(did_you_mean("Items", names), Some("Item".to_string()));
        assert_eq!(did_you_mean("zzz", names), None);
    }
}
