/// Cursor over a message body, tracking a byte position so slicing never lands inside a
/// multi-byte character
pub struct Lexer<'a> {
    pub input: &'a str,
    pub byte_pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            byte_pos: 0,
        }
    }

    /// Checks current value of the input stream under the cursor without advancing its position
    pub fn peek_char(&self) -> Option<char> {
        self.input[self.byte_pos..].chars().next()
    }

    /// Advances the cursor one character, returning the character that was under it
    pub fn next(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.byte_pos += ch.len_utf8();

        Some(ch)
    }

    /// Consumes characters for as long as `pred` holds, returning how many were consumed
    pub fn skip_while<F>(&mut self, pred: F) -> usize
    where
        F: Fn(char) -> bool,
    {
        let mut skipped = 0;
        while let Some(ch) = self.peek_char() {
            if !pred(ch) {
                break;
            }

            self.next();
            skipped += 1;
        }

        skipped
    }

    /// Consumes all consecutive whitespace characters
    pub fn skip_whitespace(&mut self) {
        self.skip_while(char::is_whitespace);
    }

    /// Consumes characters for as long as `pred` holds and returns them as a slice, or `None` if
    /// the character under the cursor already fails `pred`
    pub fn next_while<F>(&mut self, pred: F) -> Option<&'a str>
    where
        F: Fn(char) -> bool,
    {
        let start = self.byte_pos;
        self.skip_while(pred);

        if start == self.byte_pos {
            None
        } else {
            Some(&self.input[start..self.byte_pos])
        }
    }

    /// Consumes all consecutive non-whitespace characters
    pub fn next_word(&mut self) -> Option<&'a str> {
        self.next_while(|ch| !ch.is_whitespace())
    }

    /// Consumes `prefix` if the remaining input starts with it (ASCII case-insensitive)
    pub fn eat_ignore_case(&mut self, prefix: &str) -> bool {
        let rest = self.remaining();
        match rest.get(..prefix.len()) {
            Some(head) if head.eq_ignore_ascii_case(prefix) => {
                self.byte_pos += prefix.len();
                true
            }
            _ => false,
        }
    }

    /// Remaining input without advancing the cursor
    pub fn remaining(&self) -> &'a str {
        &self.input[self.byte_pos..]
    }

    /// Determine if the cursor's position is the end of the input stream
    pub fn is_eof(&self) -> bool {
        self.byte_pos >= self.input.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_at_boundary() {
        let mut lexer = Lexer::new("abc🪱def");

        assert_eq!(lexer.next(), Some('a'));
        assert_eq!(lexer.next(), Some('b'));
        assert_eq!(lexer.next(), Some('c'));

        assert_eq!(lexer.remaining(), "🪱def");
        assert_eq!(lexer.next(), Some('🪱'));
        assert_eq!(lexer.next_word(), Some("def"));
        assert!(lexer.is_eof());
        assert_eq!(lexer.next(), None);
    }

    #[test]
    fn test_next_while_stops_on_predicate() {
        let mut lexer = Lexer::new("**waves** hi");

        assert_eq!(lexer.skip_while(|ch| ch == '*'), 2);
        assert_eq!(lexer.next_while(char::is_alphanumeric), Some("waves"));
        assert_eq!(lexer.next_while(char::is_alphanumeric), None);
        assert_eq!(lexer.remaining(), "** hi");
    }

    #[test]
    fn test_eat_ignore_case() {
        let mut lexer = Lexer::new("```CSS\nName");

        assert!(lexer.eat_ignore_case("```"));
        assert!(!lexer.eat_ignore_case("yaml"));
        assert!(lexer.eat_ignore_case("css"));
        lexer.skip_whitespace();
        assert_eq!(lexer.next_word(), Some("Name"));
    }

    #[test]
    fn test_eat_ignore_case_multibyte_input() {
        // prefix length falls inside the emoji; must not panic
        let mut lexer = Lexer::new("`🪱");
        assert!(!lexer.eat_ignore_case("```"));
        assert_eq!(lexer.byte_pos, 0);
    }
}
