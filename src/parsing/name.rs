//! Character attribution for roleplay posts.
//!
//! Posts in the community are written with the speaking character's name up front, usually
//! inside a tagged code fence so it renders highlighted:
//!
//! ````text
//! ```css
//! Jean Claude
//! ```
//! He closes the door behind him.
//! ````
//!
//! Anything that does not look like that (quotes, emotes, bare chatter) is treated as out of
//! character and ignored.

use core::fmt;

use crate::constants::{
    CONTROL_TOKENS, CORRESPONDENCE_CATEGORY, CORRESPONDENCE_LABEL, EMPHASIS_MARKERS,
    FENCE_LANGUAGES, MAX_NAME_WORDS, UNKNOWN_LABEL,
};
use crate::parsing::lexer::Lexer;

/// Outcome of running a message through [`extract_name`]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Attribution {
    /// Posted in a correspondence category; the whole category counts as one character
    Correspondence,
    /// Out of character or free-form prose; not counted anywhere
    NoAttribution,
    /// In character, but no name could be found in the text
    Unknown,
    Character(String),
}

impl Attribution {
    /// The label this attribution is counted under, or `None` if the message is dropped
    pub fn label(&self) -> Option<&str> {
        match self {
            Attribution::Correspondence => Some(CORRESPONDENCE_LABEL),
            Attribution::NoAttribution => None,
            Attribution::Unknown => Some(UNKNOWN_LABEL),
            Attribution::Character(name) => Some(name.as_str()),
        }
    }
}

impl fmt::Display for Attribution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => write!(f, "{label}"),
            None => write!(f, "<none>"),
        }
    }
}

/// Attribute a message body to a character.
///
/// Total over its input: every string maps to exactly one [`Attribution`].
pub fn extract_name(content: &str, category: Option<&str>) -> Attribution {
    if category.is_some_and(|name| name.to_lowercase().contains(CORRESPONDENCE_CATEGORY)) {
        return Attribution::Correspondence;
    }

    let message = content.trim();
    if message.is_empty()
        || message.starts_with('"')
        || CONTROL_TOKENS.contains(&message)
        || is_out_of_character(message)
    {
        return Attribution::NoAttribution;
    }

    // only reached with a capital first letter, see `is_out_of_character`
    let bare = message.starts_with(is_word_char);
    let message = strip_fences(message).trim();

    let mut lexer = Lexer::new(message);
    lexer.skip_while(|ch| !is_name_char(ch));
    let Some(run) = lexer.next_while(is_name_char) else {
        return Attribution::Unknown;
    };

    let run = run.trim();
    let name = if bare {
        capitalised_prefix(run, 2)
    } else {
        name_from_run(run)
    };

    match name {
        Some(name) => Attribution::Character(name.to_string()),
        None => Attribution::NoAttribution,
    }
}

/// Emotes (`*waves*`) and bare lowercase chatter (`brb`, `lol same`) are out of character.
///
/// A capitalised leading word is let through since that is how an unfenced post opens with the
/// character's name; [`extract_name`] then wants at least two capitalised words before it
/// believes it.
fn is_out_of_character(message: &str) -> bool {
    let mut lexer = Lexer::new(message);
    let markers = lexer.skip_while(|ch| EMPHASIS_MARKERS.contains(&ch));

    match lexer.peek_char() {
        Some(ch) if is_word_char(ch) => markers > 0 || !ch.is_uppercase(),
        _ => false,
    }
}

/// Drops leading code fences tagged with a formatting-only language
fn strip_fences(message: &str) -> &str {
    let mut lexer = Lexer::new(message);

    loop {
        lexer.skip_whitespace();
        let fence_start = lexer.byte_pos;
        if !lexer.eat_ignore_case("```") {
            break;
        }

        if !FENCE_LANGUAGES.iter().any(|lang| lexer.eat_ignore_case(lang)) {
            lexer.byte_pos = fence_start;
            break;
        }
    }

    lexer.remaining()
}

/// A run of up to four words is a name. Longer runs are prose, unless they open with
/// capitalised words, in which case those words are the name.
fn name_from_run(run: &str) -> Option<&str> {
    let words = run.split_whitespace().count();
    if words == 0 {
        return None;
    }

    if words <= MAX_NAME_WORDS {
        return Some(run);
    }

    capitalised_prefix(run, 1)
}

/// The leading capitalised words of `run` ("Jean Claude enters the room" gives "Jean Claude"),
/// if there are between `min_words` and four of them
fn capitalised_prefix(run: &str, min_words: usize) -> Option<&str> {
    let words: Vec<&str> = run
        .split_whitespace()
        .take_while(|word| word.starts_with(|ch: char| ch.is_ascii_uppercase()))
        .collect();

    if words.len() < min_words.max(1) || words.len() > MAX_NAME_WORDS {
        return None;
    }

    // the run is ascii letters and spaces, so the end of the last capitalised word is a valid
    // char boundary
    let last = words[words.len() - 1];
    let end = last.as_ptr() as usize - run.as_ptr() as usize + last.len();
    Some(&run[..end])
}

#[inline]
fn is_name_char(ch: char) -> bool {
    ch.is_ascii_alphabetic() || ch == ' '
}

#[inline]
fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}
