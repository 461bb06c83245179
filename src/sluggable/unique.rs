use crate::error::BehaviorError;

/// Outcome of one uniqueness round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UniqueStep {
    /// The slug is free.
    Found(String),
    /// The suffixed slug exceeds the length limit; search again from a
    /// shortened base.
    Retry { base: String, exponent: u32 },
}

/// `candidate` equals `preferred` or is `preferred`, the separator and digits.
fn is_sibling(candidate: &str, preferred: &str, separator: &str) -> bool {
    let Some(head) = candidate.get(..preferred.len()) else {
        return false;
    };
    if !head.eq_ignore_ascii_case(preferred) {
        return false;
    }
    let tail = &candidate[preferred.len()..];
    if tail.is_empty() {
        return true;
    }
    match tail.strip_prefix(separator) {
        Some(digits) => !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()),
        None => false,
    }
}

/// One round of the suffix search.
///
/// `similar` holds every taken slug starting with `preferred`. Outside a
/// retry the set is narrowed to `preferred` itself and its numbered variants;
/// if `preferred` is not among them it is returned as is. Otherwise
/// `preferred`, the separator and the first free counter from
/// `10^exponent` upward are joined.
pub fn next_unique(
    preferred: &str,
    similar: &[String],
    separator: &str,
    recursing: bool,
    exponent: u32,
    max_length: Option<usize>,
) -> Result<UniqueStep, BehaviorError> {
    let taken: Vec<&str> = similar
        .iter()
        .map(String::as_str)
        .filter(|slug| recursing || is_sibling(slug, preferred, separator))
        .collect();
    if taken.is_empty() {
        return Ok(UniqueStep::Found(preferred.to_string()));
    }
    let is_taken = |slug: &str| taken.iter().any(|other| other.eq_ignore_ascii_case(slug));
    if !recursing && !is_taken(preferred) {
        return Ok(UniqueStep::Found(preferred.to_string()));
    }

    let mut counter = 10u64.saturating_pow(exponent);
    let generated = loop {
        let candidate = format!("{preferred}{separator}{counter}");
        if !is_taken(&candidate) {
            break candidate;
        }
        counter += 1;
    };

    match max_length {
        Some(max) if generated.chars().count() > max => {
            let digits = counter.to_string().len();
            let room = max
                .checked_sub(digits + separator.chars().count())
                .filter(|room| *room > 0)
                .ok_or_else(|| {
                    BehaviorError::invalid_argument(format!(
                        "slug length limit {max} leaves no room for a unique suffix"
                    ))
                })?;
            let mut base: String = preferred.chars().take(room).collect();
            while !separator.is_empty() && base.ends_with(separator) {
                base.truncate(base.len() - separator.len());
            }
            if base.is_empty() {
                return Err(BehaviorError::invalid_argument(format!(
                    "slug `{preferred}` cannot be shortened to a unique value"
                )));
            }
            Ok(UniqueStep::Retry {
                base,
                exponent: (digits - 1) as u32,
            })
        }
        _ => Ok(UniqueStep::Found(generated)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn taken(slugs: &[&str]) -> Vec<String> {
        slugs.iter().map(|slug| slug.to_string()).collect()
    }

    #[test]
    fn free_slug_is_kept() {
        let step = next_unique("the-title", &taken(&["the-title-extended"]), "-", false, 0, None).unwrap();
        assert_eq!(step, UniqueStep::Found("the-title".into()));
    }

    #[test]
    fn stale_suffix_does_not_block_the_plain_slug() {
        let step = next_unique("the-title", &taken(&["the-title-1"]), "-", false, 0, None).unwrap();
        assert_eq!(step, UniqueStep::Found("the-title".into()));
    }

    #[test]
    fn first_free_counter_is_used() {
        let similar = taken(&["the-title", "the-title-1", "the-title-2"]);
        let step = next_unique("the-title", &similar, "-", false, 0, None).unwrap();
        assert_eq!(step, UniqueStep::Found("the-title-3".into()));
    }

    #[test]
    fn comparison_ignores_case() {
        let step = next_unique("the-title", &taken(&["The-Title"]), "-", false, 0, None).unwrap();
        assert_eq!(step, UniqueStep::Found("the-title-1".into()));
    }

    #[test]
    fn overlong_candidate_asks_for_a_shorter_base() {
        let step = next_unique("abcdefgh", &taken(&["abcdefgh"]), "-", false, 0, Some(8)).unwrap();
        assert_eq!(
            step,
            UniqueStep::Retry {
                base: "abcdef".into(),
                exponent: 0
            }
        );

        let step = next_unique("abcdef", &taken(&["abcdefgh"]), "-", true, 0, Some(8)).unwrap();
        assert_eq!(step, UniqueStep::Found("abcdef-1".into()));
    }

    #[test]
    fn trailing_separator_is_stripped_from_the_base() {
        let step = next_unique("abc-defg", &taken(&["abc-defg"]), "-", false, 0, Some(6)).unwrap();
        assert_eq!(
            step,
            UniqueStep::Retry {
                base: "abc".into(),
                exponent: 0
            }
        );
    }

    #[test]
    fn no_room_is_an_error() {
        let result = next_unique("ab", &taken(&["ab"]), "-", false, 0, Some(2));
        assert!(matches!(result, Err(BehaviorError::InvalidArgument(_))));
    }
}
