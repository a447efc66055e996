//! Keyword scanning of statement text.
//!
//! Looks at bare words only: string literals, quoted identifiers, numbers and
//! comments are skipped. This is enough to classify statements, not to parse
//! them.

use std::iter::Peekable;
use std::str::Chars;

/// Uppercased keywords of every statement in `sql`, in order.
///
/// Statements are split on `;`, except inside the `BEGIN ... END` body of a
/// `CREATE TRIGGER`, whose own statements end in `;`.
pub(crate) fn statements(sql: &str) -> Vec<Vec<String>> {
    let mut statements = Vec::new();
    let mut current: Vec<String> = Vec::new();
    let mut case_depth = 0usize;
    let mut trigger_body = false;
    let mut chars = sql.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => skip_quoted(&mut chars, c),
            '[' => skip_quoted(&mut chars, ']'),
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut star = false;
                for next in chars.by_ref() {
                    if star && next == '/' {
                        break;
                    }
                    star = next == '*';
                }
            }
            ';' if trigger_body => {}
            ';' => {
                if !current.is_empty() {
                    statements.push(std::mem::take(&mut current));
                }
                case_depth = 0;
            }
            c if c.is_ascii_digit() => {
                while chars
                    .peek()
                    .is_some_and(|next| next.is_ascii_alphanumeric() || *next == '.')
                {
                    chars.next();
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::from(c.to_ascii_uppercase());
                while let Some(&next) = chars.peek() {
                    if !(next.is_ascii_alphanumeric() || next == '_' || next == '$') {
                        break;
                    }
                    word.push(next.to_ascii_uppercase());
                    chars.next();
                }

                match word.as_str() {
                    "CASE" => case_depth += 1,
                    "END" if case_depth > 0 => case_depth -= 1,
                    "END" if trigger_body => trigger_body = false,
                    "BEGIN" if is_trigger(&current) => trigger_body = true,
                    _ => {}
                }
                current.push(word);
            }
            _ => {}
        }
    }

    if !current.is_empty() {
        statements.push(current);
    }
    statements
}

/// `CREATE [TEMP|TEMPORARY] TRIGGER ...`
fn is_trigger(words: &[String]) -> bool {
    words.first().is_some_and(|w| w == "CREATE") && words.iter().take(3).any(|w| w == "TRIGGER")
}

/// Skip to the closing quote. A doubled quote is an escaped quote.
fn skip_quoted(chars: &mut Peekable<Chars<'_>>, close: char) {
    while let Some(c) = chars.next() {
        if c == close {
            if close != ']' && chars.peek() == Some(&close) {
                chars.next();
                continue;
            }
            return;
        }
    }
}
