//! Call-escape translation
//!
//! Applications issue stored procedure calls in several surface syntaxes:
//! the escape forms `{call proc(?, ?)}` and `{? = call proc(?)}`, or native
//! `EXECUTE PROCEDURE proc ...` text. This module lexes those forms into a
//! [`ParsedCall`] holding the procedure name, the ordered argument slots and
//! the optional return slot, and renders the native statement text for
//! either execution style.
//!
//! The lexer only has to be right about boundaries: a `?` inside a quoted
//! literal or a comment is never a placeholder, and argument commas inside
//! nested parentheses do not split slots.

use crate::error::{Error, Result};

/// Declared direction of a call argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotDirection {
    /// Bound by the caller before execution
    In,
    /// Produced by the procedure
    Out,
    /// Bound by the caller and produced by the procedure
    InOut,
}

/// One argument position in a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallArg {
    /// A `?` placeholder bound at execution time
    Placeholder,
    /// Literal argument text passed through verbatim
    Literal(String),
}

/// An argument slot with its direction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSlot {
    /// Placeholder or literal text
    pub arg: CallArg,
    /// Declared direction; `In` unless registered otherwise
    pub direction: SlotDirection,
}

impl CallSlot {
    fn placeholder() -> Self {
        Self {
            arg: CallArg::Placeholder,
            direction: SlotDirection::In,
        }
    }

    fn literal(text: String) -> Self {
        Self {
            arg: CallArg::Literal(text),
            direction: SlotDirection::In,
        }
    }
}

/// Whether a procedure returns rows when selected from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Selectable {
    /// Declared selectable; executed via `SELECT * FROM`
    Yes,
    /// Executable only; executed via `EXECUTE PROCEDURE`
    No,
    /// Not yet resolved from catalog metadata
    #[default]
    Unknown,
}

/// A call statement normalized out of any of its surface syntaxes.
///
/// Immutable once parsed. Two equivalent surface forms parse to equal
/// values, so `{ call p ( ? , ? ) }` and `{call p(?,?)}` are the same call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCall {
    procedure_name: String,
    slots: Vec<CallSlot>,
    return_slot: Option<usize>,
    selectable: Selectable,
}

impl ParsedCall {
    /// Procedure name exactly as written, quoting preserved
    pub fn procedure_name(&self) -> &str {
        &self.procedure_name
    }

    /// Name to use for catalog lookups: quoted identifiers are unwrapped,
    /// bare identifiers fold to upper case per SQL rules
    pub fn lookup_name(&self) -> String {
        match self.procedure_name.strip_prefix('"') {
            Some(quoted) => quoted
                .strip_suffix('"')
                .unwrap_or(quoted)
                .replace("\"\"", "\""),
            None => self.procedure_name.to_ascii_uppercase(),
        }
    }

    /// All argument slots in declaration order, return slot included
    pub fn slots(&self) -> &[CallSlot] {
        &self.slots
    }

    /// Index of the `? =` return slot, when present
    pub fn return_slot(&self) -> Option<usize> {
        self.return_slot
    }

    /// Check if the call declared a `? =` return slot
    pub fn has_return(&self) -> bool {
        self.return_slot.is_some()
    }

    /// Selectability as known at parse time
    pub fn selectable(&self) -> Selectable {
        self.selectable
    }

    /// Number of bindable placeholders, excluding the return slot.
    ///
    /// This is the parameter count the rendered statement presents to the
    /// server; literal slots never bind.
    pub fn placeholder_count(&self) -> usize {
        self.slots
            .iter()
            .enumerate()
            .filter(|(i, slot)| {
                Some(*i) != self.return_slot && slot.arg == CallArg::Placeholder
            })
            .count()
    }

    /// Render as native `EXECUTE PROCEDURE` text
    pub fn render_executable(&self) -> String {
        match self.render_args() {
            Some(args) => format!("EXECUTE PROCEDURE {}({})", self.procedure_name, args),
            None => format!("EXECUTE PROCEDURE {}", self.procedure_name),
        }
    }

    /// Render as a selectable invocation
    pub fn render_selectable(&self) -> String {
        match self.render_args() {
            Some(args) => format!("SELECT * FROM {}({})", self.procedure_name, args),
            None => format!("SELECT * FROM {}", self.procedure_name),
        }
    }

    // Argument list without the return slot; None when no arguments remain
    fn render_args(&self) -> Option<String> {
        let rendered: Vec<String> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != self.return_slot)
            .map(|(_, slot)| match &slot.arg {
                CallArg::Placeholder => "?".to_string(),
                CallArg::Literal(text) => text.clone(),
            })
            .collect();
        if rendered.is_empty() {
            None
        } else {
            Some(rendered.join(", "))
        }
    }
}

/// Lexer for call-style statement text.
pub struct CallParser;

impl CallParser {
    /// Heuristic check for text that needs call translation.
    ///
    /// Matches the `{call ...}` and `{? = call ...}` escapes and native
    /// `EXECUTE PROCEDURE` text. Other brace escapes are left alone.
    pub fn is_call_syntax(text: &str) -> bool {
        let t = text.trim_start();
        if let Some(inner) = t.strip_prefix('{') {
            let inner = inner.trim_start();
            return inner.starts_with('?') || eat_keyword(inner, "call").is_some();
        }
        match eat_keyword(t, "execute") {
            Some(rest) => eat_keyword(rest.trim_start(), "procedure").is_some(),
            None => false,
        }
    }

    /// Parse call text into its normalized form.
    pub fn parse(text: &str) -> Result<ParsedCall> {
        let trimmed = text.trim();
        let inner = match trimmed.strip_prefix('{') {
            Some(stripped) => match stripped.strip_suffix('}') {
                Some(body) => body.trim(),
                None => {
                    return Err(Error::syntax(frag(trimmed), "unbalanced call escape braces"))
                }
            },
            None => trimmed,
        };

        // optional `? =` return slot ahead of the keyword
        let mut rest = inner;
        let mut has_return = false;
        if let Some(after_q) = rest.strip_prefix('?') {
            match after_q.trim_start().strip_prefix('=') {
                Some(after_eq) => {
                    has_return = true;
                    rest = after_eq.trim_start();
                }
                None => {
                    return Err(Error::syntax(
                        frag(inner),
                        "expected '=' after return placeholder",
                    ))
                }
            }
        }

        let rest = if let Some(after) = eat_keyword(rest, "call") {
            after.trim_start()
        } else if let Some(after) = eat_keyword(rest, "execute") {
            match eat_keyword(after.trim_start(), "procedure") {
                Some(after2) => after2.trim_start(),
                None => {
                    return Err(Error::syntax(
                        frag(rest),
                        "expected 'procedure' after 'execute'",
                    ))
                }
            }
        } else {
            return Err(Error::syntax(
                frag(rest),
                "expected 'call' or 'execute procedure'",
            ));
        };

        let (procedure_name, after_name) = read_procedure_name(rest)?;
        let after_name = after_name.trim_start();

        // three argument spellings: nothing, a parenthesized list, or the
        // bare remainder (EXECUTE PROCEDURE p 1, ?)
        let arg_text = if after_name.is_empty() {
            ""
        } else if let Some(after_paren) = after_name.strip_prefix('(') {
            let (list, tail) = split_balanced(after_paren)?;
            if !tail.trim().is_empty() {
                return Err(Error::syntax(
                    frag(tail),
                    "unexpected text after argument list",
                ));
            }
            list
        } else {
            after_name
        };

        let mut slots = split_args(arg_text)?;
        let mut return_slot = None;
        if has_return {
            slots.insert(
                0,
                CallSlot {
                    arg: CallArg::Placeholder,
                    direction: SlotDirection::Out,
                },
            );
            return_slot = Some(0);
        }

        Ok(ParsedCall {
            procedure_name,
            slots,
            return_slot,
            selectable: Selectable::Unknown,
        })
    }
}

/// Consume a case-insensitive keyword with a word boundary after it.
fn eat_keyword<'a>(text: &'a str, keyword: &str) -> Option<&'a str> {
    if text.len() < keyword.len() || !text.is_char_boundary(keyword.len()) {
        return None;
    }
    let (head, tail) = text.split_at(keyword.len());
    if !head.eq_ignore_ascii_case(keyword) {
        return None;
    }
    match tail.chars().next() {
        Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '$' => None,
        _ => Some(tail),
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.'
}

/// Read a procedure name, either a double-quoted identifier (doubled quotes
/// escape) or a bare identifier, possibly package-qualified.
fn read_procedure_name(text: &str) -> Result<(String, &str)> {
    if let Some(after_quote) = text.strip_prefix('"') {
        let mut end = None;
        let mut chars = after_quote.char_indices().peekable();
        while let Some((i, c)) = chars.next() {
            if c == '"' {
                if matches!(chars.peek(), Some((_, '"'))) {
                    chars.next();
                } else {
                    end = Some(i);
                    break;
                }
            }
        }
        let end = end
            .ok_or_else(|| Error::syntax(frag(text), "unterminated quoted procedure name"))?;
        let name = &text[..end + 2];
        return Ok((name.to_string(), &text[end + 2..]));
    }

    let end = text
        .char_indices()
        .find(|(_, c)| !is_ident_char(*c))
        .map(|(i, _)| i)
        .unwrap_or(text.len());
    if end == 0 {
        return Err(Error::syntax(frag(text), "missing procedure name"));
    }
    Ok((text[..end].to_string(), &text[end..]))
}

/// Characters of `text` visible at the top lexical level, with the paren
/// depth at each. Skips quoted literals and comments; a close paren at depth
/// zero is reported with depth zero and does not go negative.
fn top_level_chars(text: &str) -> Result<Vec<(usize, char, usize)>> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut chars = text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        match c {
            '\'' => loop {
                match chars.next() {
                    Some((_, '\'')) => {
                        if matches!(chars.peek(), Some((_, '\''))) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => {
                        return Err(Error::syntax(frag(text), "unterminated string literal"))
                    }
                }
            },
            '"' => loop {
                match chars.next() {
                    Some((_, '"')) => {
                        if matches!(chars.peek(), Some((_, '"'))) {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                    Some(_) => {}
                    None => {
                        return Err(Error::syntax(
                            frag(text),
                            "unterminated quoted identifier",
                        ))
                    }
                }
            },
            '-' if matches!(chars.peek(), Some((_, '-'))) => {
                for (_, c2) in chars.by_ref() {
                    if c2 == '\n' {
                        break;
                    }
                }
            }
            '/' if matches!(chars.peek(), Some((_, '*'))) => {
                chars.next();
                let mut closed = false;
                while let Some((_, c2)) = chars.next() {
                    if c2 == '*' && matches!(chars.peek(), Some((_, '/'))) {
                        chars.next();
                        closed = true;
                        break;
                    }
                }
                if !closed {
                    return Err(Error::syntax(frag(text), "unterminated comment"));
                }
            }
            '(' => {
                out.push((i, c, depth));
                depth += 1;
            }
            ')' => {
                out.push((i, c, depth));
                depth = depth.saturating_sub(1);
            }
            _ => out.push((i, c, depth)),
        }
    }
    Ok(out)
}

/// Split text just past an opening paren into the argument list and the
/// tail after the matching close paren.
fn split_balanced(text: &str) -> Result<(&str, &str)> {
    for (i, c, depth) in top_level_chars(text)? {
        if c == ')' && depth == 0 {
            return Ok((&text[..i], &text[i + 1..]));
        }
    }
    Err(Error::syntax(frag(text), "unbalanced parentheses"))
}

/// Split an argument list on top-level commas and classify each piece.
fn split_args(text: &str) -> Result<Vec<CallSlot>> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let scanned = top_level_chars(text)?;
    let mut cuts = Vec::new();
    for (i, c, depth) in &scanned {
        if *depth == 0 {
            match c {
                ',' => cuts.push(*i),
                ')' => {
                    return Err(Error::syntax(
                        frag(text),
                        "unbalanced parentheses in argument list",
                    ))
                }
                _ => {}
            }
        }
    }

    let mut slots = Vec::new();
    let mut start = 0;
    for cut in cuts.into_iter().chain(std::iter::once(text.len())) {
        let piece = &text[start..cut];
        start = cut + 1;
        slots.push(classify_arg(piece)?);
    }
    Ok(slots)
}

fn classify_arg(piece: &str) -> Result<CallSlot> {
    let trimmed = piece.trim();
    if trimmed.is_empty() {
        return Err(Error::syntax(frag(piece), "empty call argument"));
    }
    if trimmed == "?" {
        return Ok(CallSlot::placeholder());
    }
    // a ? buried in an expression cannot be addressed as a bind slot
    let has_loose_placeholder = top_level_chars(trimmed)?
        .iter()
        .any(|(_, c, _)| *c == '?');
    if has_loose_placeholder {
        return Err(Error::syntax(
            frag(trimmed),
            "parameter placeholder must stand alone as an argument",
        ));
    }
    Ok(CallSlot::literal(trimmed.to_string()))
}

/// Clip a fragment of the offending text for error messages.
fn frag(text: &str) -> String {
    const MAX_CHARS: usize = 40;
    let trimmed = text.trim();
    if trimmed.chars().count() <= MAX_CHARS {
        trimmed.to_string()
    } else {
        let clipped: String = trimmed.chars().take(MAX_CHARS).collect();
        format!("{clipped}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod detection_tests {
        use super::*;

        #[test]
        fn test_detects_call_escape() {
            assert!(CallParser::is_call_syntax("{call p(?)}"));
            assert!(CallParser::is_call_syntax("  { CALL p }"));
            assert!(CallParser::is_call_syntax("{? = call p(?)}"));
            assert!(CallParser::is_call_syntax("{?=call p}"));
        }

        #[test]
        fn test_detects_native_execute_procedure() {
            assert!(CallParser::is_call_syntax("EXECUTE PROCEDURE p"));
            assert!(CallParser::is_call_syntax("execute procedure p(?, ?)"));
        }

        #[test]
        fn test_ignores_plain_statements() {
            assert!(!CallParser::is_call_syntax("SELECT * FROM t"));
            assert!(!CallParser::is_call_syntax("EXECUTE BLOCK AS BEGIN END"));
            assert!(!CallParser::is_call_syntax("EXECUTED PROCEDURE"));
            // other brace escapes are not calls
            assert!(!CallParser::is_call_syntax("{d '2024-01-01'}"));
        }
    }

    mod parse_tests {
        use super::*;

        #[test]
        fn test_canonical_call() {
            let call = CallParser::parse("{call get_rows(?, ?)}").unwrap();
            assert_eq!(call.procedure_name(), "get_rows");
            assert_eq!(call.slots().len(), 2);
            assert_eq!(call.placeholder_count(), 2);
            assert!(!call.has_return());
            assert_eq!(call.selectable(), Selectable::Unknown);
        }

        #[test]
        fn test_whitespace_variants_are_equivalent() {
            let canonical = CallParser::parse("{call p(?,?)}").unwrap();
            for variant in [
                "{ call p ( ? , ? ) }",
                "{call p(? ,?)}",
                "{CALL p( ?, ? )}",
                "\n{ call\tp (?, ?) }\n",
            ] {
                assert_eq!(CallParser::parse(variant).unwrap(), canonical, "{variant:?}");
            }
        }

        #[test]
        fn test_zero_parameter_forms() {
            for text in ["{call p}", "{call p()}", "{call p ( )}", "EXECUTE PROCEDURE p"] {
                let call = CallParser::parse(text).unwrap();
                assert_eq!(call.slots().len(), 0, "{text:?}");
                assert_eq!(call.placeholder_count(), 0);
            }
        }

        #[test]
        fn test_return_slot() {
            let call = CallParser::parse("{? = call p(?, ?)}").unwrap();
            assert!(call.has_return());
            assert_eq!(call.return_slot(), Some(0));
            assert_eq!(call.slots().len(), 3);
            assert_eq!(call.slots()[0].direction, SlotDirection::Out);
            // return slot excluded from the bindable count
            assert_eq!(call.placeholder_count(), 2);
        }

        #[test]
        fn test_placeholder_inside_literal_not_counted() {
            let call = CallParser::parse("EXECUTE PROCEDURE p 'test?'").unwrap();
            assert_eq!(call.placeholder_count(), 0);
            assert_eq!(
                call.slots(),
                &[CallSlot {
                    arg: CallArg::Literal("'test?'".to_string()),
                    direction: SlotDirection::In,
                }]
            );
        }

        #[test]
        fn test_mixed_literal_and_placeholder_args() {
            let call = CallParser::parse("{call p(?, 'a,b', (1 + 2), ?)}").unwrap();
            assert_eq!(call.slots().len(), 4);
            assert_eq!(call.placeholder_count(), 2);
            assert_eq!(
                call.slots()[1].arg,
                CallArg::Literal("'a,b'".to_string())
            );
            assert_eq!(
                call.slots()[2].arg,
                CallArg::Literal("(1 + 2)".to_string())
            );
        }

        #[test]
        fn test_quoted_procedure_name() {
            let call = CallParser::parse("{call \"My Proc\"(?)}").unwrap();
            assert_eq!(call.procedure_name(), "\"My Proc\"");
            assert_eq!(call.lookup_name(), "My Proc");
        }

        #[test]
        fn test_bare_name_folds_upper_for_lookup() {
            let call = CallParser::parse("{call get_rows}").unwrap();
            assert_eq!(call.lookup_name(), "GET_ROWS");
        }

        #[test]
        fn test_package_qualified_name() {
            let call = CallParser::parse("{call pkg.proc(?)}").unwrap();
            assert_eq!(call.procedure_name(), "pkg.proc");
        }

        #[test]
        fn test_parenless_argument_list() {
            let call = CallParser::parse("EXECUTE PROCEDURE p 1, ?, 'x'").unwrap();
            assert_eq!(call.slots().len(), 3);
            assert_eq!(call.placeholder_count(), 1);
        }

        #[test]
        fn test_comment_inside_arguments() {
            let call = CallParser::parse("{call p(? /* second? */, ?)}").unwrap();
            assert_eq!(call.placeholder_count(), 2);
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn test_unbalanced_braces() {
            let err = CallParser::parse("{call p(?)").unwrap_err();
            assert!(err.is_syntax(), "{err}");
        }

        #[test]
        fn test_unbalanced_parens() {
            let err = CallParser::parse("{call p(?, (1}").unwrap_err();
            assert!(err.is_syntax());
        }

        #[test]
        fn test_return_without_equals() {
            let err = CallParser::parse("{? call p}").unwrap_err();
            assert!(err.is_syntax());
        }

        #[test]
        fn test_missing_keyword() {
            let err = CallParser::parse("{perform p(?)}").unwrap_err();
            assert!(err.is_syntax());
        }

        #[test]
        fn test_empty_argument() {
            let err = CallParser::parse("{call p(?, , ?)}").unwrap_err();
            assert!(err.is_syntax());
        }

        #[test]
        fn test_embedded_placeholder_rejected() {
            let err = CallParser::parse("{call p(? + 1)}").unwrap_err();
            assert!(err.is_syntax());
        }

        #[test]
        fn test_unterminated_literal() {
            let err = CallParser::parse("{call p('abc)}").unwrap_err();
            assert!(err.is_syntax());
        }
    }

    mod render_tests {
        use super::*;

        #[test]
        fn test_render_executable() {
            let call = CallParser::parse("{call p(?, 'x', ?)}").unwrap();
            assert_eq!(call.render_executable(), "EXECUTE PROCEDURE p(?, 'x', ?)");
        }

        #[test]
        fn test_render_selectable() {
            let call = CallParser::parse("{call p(?)}").unwrap();
            assert_eq!(call.render_selectable(), "SELECT * FROM p(?)");
        }

        #[test]
        fn test_render_bare_name_without_args() {
            let call = CallParser::parse("{call p}").unwrap();
            assert_eq!(call.render_executable(), "EXECUTE PROCEDURE p");
            assert_eq!(call.render_selectable(), "SELECT * FROM p");
        }

        #[test]
        fn test_render_drops_return_slot() {
            let call = CallParser::parse("{? = call p(?, ?)}").unwrap();
            assert_eq!(call.render_executable(), "EXECUTE PROCEDURE p(?, ?)");
        }
    }
}
