use crate::ast::Command;
use crate::token::{LexItem, Lexer, Token};
use thiserror::Error;

/// Parsing error for a single input line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Input the lexer could not tokenise.
    #[error("unrecognised input at byte {0}")]
    Lexical(usize),
    /// Token stream does not match any command shape.
    #[error("malformed command: {0}")]
    Malformed(String),
    /// Numeric field does not fit its type.
    #[error("number out of range: {0}")]
    NumberRange(String),
}

/// Parse one input line into a [`Command`].
///
/// Blank lines and comment-only lines parse to [`Command::Noop`]; a
/// trailing comment after a command is tolerated.
pub fn parse_line(line: &str) -> Result<Command, ParseError> {
    let mut items: Vec<LexItem> = Vec::new();
    for lexed in Lexer::new(line) {
        match lexed {
            Ok(item) if item.kind == Token::Comment => {}
            Ok(item) => items.push(item),
            Err(span) => return Err(ParseError::Lexical(span.start)),
        }
    }

    let text = |item: &LexItem| &line[item.span.start..item.span.end];
    let malformed = || ParseError::Malformed(line.trim().to_string());
    let number = |item: &LexItem| -> Result<i64, ParseError> {
        text(item)
            .parse()
            .map_err(|_| ParseError::NumberRange(text(item).to_string()))
    };

    let kinds: Vec<Token> = items.iter().map(|i| i.kind).collect();
    use Token::*;
    match kinds.as_slice() {
        [] => Ok(Command::Noop),

        // begin(T1) / end(T1)
        [Ident, LParen, Ident, RParen] => {
            let keyword = text(&items[0]);
            let txn = text(&items[2]).to_string();
            if keyword.eq_ignore_ascii_case("begin") {
                Ok(Command::Begin { txn })
            } else if keyword.eq_ignore_ascii_case("end") {
                Ok(Command::End { txn })
            } else {
                Err(malformed())
            }
        }

        // fail(3) / recover(3)
        [Ident, LParen, Number, RParen] => {
            let keyword = text(&items[0]);
            let site = number(&items[2])?;
            let site = u32::try_from(site).map_err(|_| ParseError::NumberRange(site.to_string()))?;
            if keyword.eq_ignore_ascii_case("fail") {
                Ok(Command::Fail { site })
            } else if keyword.eq_ignore_ascii_case("recover") {
                Ok(Command::Recover { site })
            } else {
                Err(malformed())
            }
        }

        // dump() / querystate()
        [Ident, LParen, RParen] => {
            let keyword = text(&items[0]);
            if keyword.eq_ignore_ascii_case("dump") {
                Ok(Command::Dump)
            } else if keyword.eq_ignore_ascii_case("querystate") {
                Ok(Command::QueryState)
            } else {
                Err(malformed())
            }
        }

        // R(T1, x2)
        [Ident, LParen, Ident, Comma, Ident, RParen]
            if text(&items[0]).eq_ignore_ascii_case("r") =>
        {
            Ok(Command::Read {
                txn: text(&items[2]).to_string(),
                var: text(&items[4]).to_string(),
            })
        }

        // W(T1, x2, 99)
        [Ident, LParen, Ident, Comma, Ident, Comma, Number, RParen]
            if text(&items[0]).eq_ignore_ascii_case("w") =>
        {
            Ok(Command::Write {
                txn: text(&items[2]).to_string(),
                var: text(&items[4]).to_string(),
                value: number(&items[6])?,
            })
        }

        _ => Err(malformed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_command_shape() {
        assert_eq!(
            parse_line("begin(T1)").unwrap(),
            Command::Begin { txn: "T1".into() }
        );
        assert_eq!(
            parse_line("R(T1, x2)").unwrap(),
            Command::Read {
                txn: "T1".into(),
                var: "x2".into()
            }
        );
        assert_eq!(
            parse_line("W(T1, x2, 99)").unwrap(),
            Command::Write {
                txn: "T1".into(),
                var: "x2".into(),
                value: 99
            }
        );
        assert_eq!(parse_line("end(T1)").unwrap(), Command::End { txn: "T1".into() });
        assert_eq!(parse_line("fail(3)").unwrap(), Command::Fail { site: 3 });
        assert_eq!(parse_line("recover(3)").unwrap(), Command::Recover { site: 3 });
        assert_eq!(parse_line("dump()").unwrap(), Command::Dump);
        assert_eq!(parse_line("querystate()").unwrap(), Command::QueryState);
    }

    #[test]
    fn keywords_are_case_insensitive() {
        assert_eq!(parse_line("BEGIN(T1)").unwrap(), Command::Begin { txn: "T1".into() });
        assert_eq!(
            parse_line("r(T1,x2)").unwrap(),
            Command::Read {
                txn: "T1".into(),
                var: "x2".into()
            }
        );
    }

    #[test]
    fn whitespace_is_forgiving() {
        assert_eq!(
            parse_line("  W( T1 , x4 , 40 )  ").unwrap(),
            Command::Write {
                txn: "T1".into(),
                var: "x4".into(),
                value: 40
            }
        );
    }

    #[test]
    fn comments_and_blanks_are_noops() {
        assert_eq!(parse_line("").unwrap(), Command::Noop);
        assert_eq!(parse_line("   ").unwrap(), Command::Noop);
        assert_eq!(parse_line("// a comment").unwrap(), Command::Noop);
        assert_eq!(parse_line("=== TEST 1 ===").unwrap(), Command::Noop);
        assert_eq!(
            parse_line("fail(2) // site 2 goes down").unwrap(),
            Command::Fail { site: 2 }
        );
    }

    #[test]
    fn malformed_lines_are_errors() {
        assert!(matches!(
            parse_line("begin T1"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            parse_line("frob(T1)"),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(parse_line("W(T1, x2)"), Err(ParseError::Malformed(_))));
        assert!(matches!(parse_line("@!?"), Err(ParseError::Lexical(_))));
    }
}
