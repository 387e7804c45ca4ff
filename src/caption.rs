use std::fs;
use std::io;
use std::path::Path;

// Rough advance width of a glyph relative to the font size.
const GLYPH_WIDTH_RATIO: f64 = 0.55;

/// Caption body: the wrapped quote, a blank line, then the author.
pub fn caption_text(quote: &str, author: &str, frame_width: u32, font_size: u32) -> String {
    let width = line_width(frame_width, font_size);
    let mut lines = wrap_text(quote, width);
    lines.push(String::new());
    lines.extend(wrap_text(author, width));
    lines.join("\n")
}

pub fn write_caption(path: &Path, text: &str) -> io::Result<()> {
    fs::write(path, text)
}

/// Characters per line that fit in `frame_width`, keeping a margin on both sides.
pub fn line_width(frame_width: u32, font_size: u32) -> usize {
    let usable = frame_width as f64 * 0.9;
    ((usable / (font_size as f64 * GLYPH_WIDTH_RATIO)).floor() as usize).max(8)
}

pub fn wrap_text(s: &str, width: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;
    for word in s.split_whitespace() {
        let word_len = word.chars().count();
        if current_len + word_len + 1 > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        } else {
            if !current.is_empty() {
                current.push(' ');
                current_len += 1;
            }
            current.push_str(word);
            current_len += word_len;
        }
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_on_word_boundaries() {
        let lines = wrap_text("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        // each Arabic letter is two bytes in UTF-8
        let lines = wrap_text("كلمة كلمة كلمة", 10);
        assert_eq!(lines, vec!["كلمة كلمة", "كلمة"]);
    }

    #[test]
    fn long_word_gets_its_own_line() {
        let lines = wrap_text("a supercalifragilistic b", 5);
        assert_eq!(lines, vec!["a", "supercalifragilistic", "b"]);
    }

    #[test]
    fn caption_separates_author_with_blank_line() {
        let text = caption_text("العلم نور", "مجهول", 1280, 40);
        assert_eq!(text, "العلم نور\n\nمجهول");
    }

    #[test]
    fn narrower_frames_hold_fewer_characters() {
        assert!(line_width(720, 30) < line_width(1280, 30));
        assert_eq!(line_width(10, 40), 8);
    }
}
