use crate::font::GlyphMap;

/// Replaces obfuscated codepoints with their real characters, then cleans the
/// result. Characters without an entry pass through untouched, so a partially
/// resolved map still yields partially readable text.
pub fn decode(text: &str, glyphs: &GlyphMap) -> String {
    if glyphs.is_empty() {
        return clean(text);
    }

    let substituted: String = text
        .chars()
        .map(|c| glyphs.get(c as u32).unwrap_or(c))
        .collect();
    clean(&substituted)
}

/// Drops control characters below U+0020 other than tab, newline and carriage
/// return, then trims surrounding whitespace.
pub fn clean(text: &str) -> String {
    let stripped: String = text.chars().filter(|c| !is_stray_control(*c)).collect();
    stripped.trim().to_string()
}

fn is_stray_control(c: char) -> bool {
    (c as u32) < 0x20 && !matches!(c, '\t' | '\n' | '\r')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_map() -> GlyphMap {
        let mut map = GlyphMap::default();
        map.insert(0xE001, '1');
        map.insert(0xE002, '5');
        map.insert(0xE0A0, '天');
        map
    }

    #[test]
    fn test_decode_substitutes_mapped_codepoints() {
        let text = "\u{E002}0-\u{E001}00/\u{E0A0}";
        assert_eq!(decode(text, &sample_map()), "50-100/天");
    }

    #[test]
    fn test_decode_keeps_unmapped_characters() {
        // U+E003 has no entry and stays as is
        let text = "Java \u{E001}\u{E003}";
        assert_eq!(decode(text, &sample_map()), "Java 1\u{E003}");
    }

    #[test]
    fn test_decode_with_empty_map_is_clean() {
        let inputs = ["  软件工程师\u{0}  ", "\u{7}\tRust\n", "", "\u{E001}x", " a\u{1b}b "];
        for input in inputs {
            assert_eq!(decode(input, &GlyphMap::default()), clean(input));
        }
    }

    #[test]
    fn test_decode_is_idempotent_without_mapped_codepoints() {
        let map = sample_map();
        let inputs = ["  前端开发 \u{0b}", "\u{1}\u{2}Backend\r\n", "plain"];
        for input in inputs {
            let once = decode(input, &map);
            assert_eq!(decode(&once, &map), once);
        }
    }

    #[test]
    fn test_clean_strips_control_characters() {
        assert_eq!(clean("\u{0}\u{8}abc\u{0c}\u{1f}"), "abc");
        assert_eq!(clean(" a\tb\nc "), "a\tb\nc");
        // leading control char followed by spaces still trims fully
        assert_eq!(clean("\u{1}  title  "), "title");
    }
}
