/// Single-line input used by the search and filter prompts.
///
/// `cursor` is a byte offset that always sits on a char boundary.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct PromptLine {
    text: String,
    cursor: usize,
}

impl PromptLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: &str) -> Self {
        let text = flatten_whitespace(text);
        let cursor = text.len();
        Self { text, cursor }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Cursor position counted in chars, for rendering.
    pub fn cursor_chars(&self) -> usize {
        self.text[..self.cursor].chars().count()
    }

    pub fn insert(&mut self, ch: char) {
        let ch = if ch.is_whitespace() { ' ' } else { ch };
        if ch.is_control() {
            return;
        }
        self.text.insert(self.cursor, ch);
        self.cursor += ch.len_utf8();
    }

    pub fn backspace(&mut self) {
        let Some(prev) = self.prev_boundary() else {
            return;
        };
        self.text.replace_range(prev..self.cursor, "");
        self.cursor = prev;
    }

    pub fn delete(&mut self) {
        let Some(next) = self.next_boundary() else {
            return;
        };
        self.text.replace_range(self.cursor..next, "");
    }

    pub fn left(&mut self) {
        if let Some(prev) = self.prev_boundary() {
            self.cursor = prev;
        }
    }

    pub fn right(&mut self) {
        if let Some(next) = self.next_boundary() {
            self.cursor = next;
        }
    }

    pub fn home(&mut self) {
        self.cursor = 0;
    }

    pub fn end(&mut self) {
        self.cursor = self.text.len();
    }

    fn prev_boundary(&self) -> Option<usize> {
        self.text[..self.cursor]
            .char_indices()
            .next_back()
            .map(|(index, _)| index)
    }

    fn next_boundary(&self) -> Option<usize> {
        self.text[self.cursor..]
            .chars()
            .next()
            .map(|ch| self.cursor + ch.len_utf8())
    }
}

fn flatten_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edits_respect_multibyte_chars() {
        let mut line = PromptLine::new();
        for ch in "añb".chars() {
            line.insert(ch);
        }
        line.left();
        line.backspace();
        assert_eq!(line.text(), "ab");
        assert_eq!(line.cursor_chars(), 1);
        line.home();
        line.delete();
        assert_eq!(line.text(), "b");
        line.end();
        line.insert('λ');
        assert_eq!(line.text(), "bλ");
        assert_eq!(line.cursor_chars(), 2);
    }

    #[test]
    fn whitespace_is_flattened() {
        let mut line = PromptLine::with_text("a\n  b");
        assert_eq!(line.text(), "a b");
        line.insert('\t');
        assert_eq!(line.text(), "a b ");
    }
}
