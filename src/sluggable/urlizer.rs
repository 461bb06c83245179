use crate::config::SlugStyle;

/// ASCII spelling of common accented Latin letters (lowercase input).
fn fold(ch: char) -> Option<&'static str> {
    let folded = match ch {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'ā' | 'ă' | 'ą' => "a",
        'æ' => "ae",
        'ç' | 'ć' | 'ĉ' | 'ċ' | 'č' => "c",
        'ď' | 'đ' | 'ð' => "d",
        'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ĕ' | 'ė' | 'ę' | 'ě' => "e",
        'ĝ' | 'ğ' | 'ġ' | 'ģ' => "g",
        'ĥ' | 'ħ' => "h",
        'ì' | 'í' | 'î' | 'ï' | 'ĩ' | 'ī' | 'ĭ' | 'į' | 'ı' => "i",
        'ĳ' => "ij",
        'ĵ' => "j",
        'ķ' => "k",
        'ĺ' | 'ļ' | 'ľ' | 'ŀ' | 'ł' => "l",
        'ñ' | 'ń' | 'ņ' | 'ň' => "n",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'ø' | 'ō' | 'ŏ' | 'ő' => "o",
        'œ' => "oe",
        'ŕ' | 'ŗ' | 'ř' => "r",
        'ś' | 'ŝ' | 'ş' | 'š' | 'ș' => "s",
        'ß' => "ss",
        'ţ' | 'ť' | 'ŧ' | 'ț' => "t",
        'þ' => "th",
        'ù' | 'ú' | 'û' | 'ü' | 'ũ' | 'ū' | 'ŭ' | 'ů' | 'ű' | 'ų' => "u",
        'ŵ' => "w",
        'ý' | 'ÿ' | 'ŷ' => "y",
        'ź' | 'ż' | 'ž' => "z",
        _ => return None,
    };
    Some(folded)
}

/// Lowercase ASCII slug: accents folded, every run of other characters
/// collapsed into one `separator`, no leading or trailing separator.
pub fn urlize(text: &str, separator: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut boundary = false;
    for ch in text.chars().flat_map(char::to_lowercase) {
        let mut buf = [0u8; 4];
        let piece: &str = if ch.is_ascii_alphanumeric() {
            ch.encode_utf8(&mut buf)
        } else if let Some(folded) = fold(ch) {
            folded
        } else {
            boundary = !slug.is_empty();
            continue;
        };
        if boundary {
            slug.push_str(separator);
            boundary = false;
        }
        slug.push_str(piece);
    }
    slug
}

pub fn stylize(slug: &str, style: SlugStyle, separator: &str) -> String {
    match style {
        SlugStyle::Default => slug.to_string(),
        SlugStyle::Lower => slug.to_lowercase(),
        SlugStyle::Upper => slug.to_uppercase(),
        SlugStyle::Camel => {
            let mut styled = String::with_capacity(slug.len());
            for (index, word) in slug.split(separator).enumerate() {
                if index > 0 {
                    styled.push_str(separator);
                }
                let mut chars = word.chars();
                if let Some(first) = chars.next() {
                    styled.extend(first.to_uppercase());
                    styled.push_str(chars.as_str());
                }
            }
            styled
        }
    }
}

/// Cut to at most `max` characters.
pub fn truncate(slug: &str, max: usize) -> String {
    slug.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlize_folds_accents_and_collapses_runs() {
        assert_eq!(urlize("  Crème Brûlée -- à la Carte! ", "-"), "creme-brulee-a-la-carte");
        assert_eq!(urlize("Straße №5", "_"), "strasse_5");
        assert_eq!(urlize("!!!", "-"), "");
    }

    #[test]
    fn camel_style_capitalizes_words() {
        assert_eq!(stylize("the-title-2", SlugStyle::Camel, "-"), "The-Title-2");
        assert_eq!(stylize("the-title", SlugStyle::Upper, "-"), "THE-TITLE");
    }

    #[test]
    fn truncate_counts_characters() {
        assert_eq!(truncate("abcdef", 4), "abcd");
        assert_eq!(truncate("ab", 4), "ab");
    }
}
