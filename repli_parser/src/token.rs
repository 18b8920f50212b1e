use logos::Logos;

/// Position range of a token (byte offsets within the line).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Span {
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
}

/// Token kinds of the workload command language.
#[derive(Logos, Debug, PartialEq, Eq, Clone, Copy)]
#[logos(skip r"[ \t\r\n]+")]
pub enum Token {
    /// Left parenthesis `(`.
    #[token("(")]
    LParen,
    /// Right parenthesis `)`.
    #[token(")")]
    RParen,
    /// Comma `,`.
    #[token(",")]
    Comma,
    /// Line comment, `// …` or `=== …`; runs to end of line.
    #[regex(r"//[^\n]*")]
    #[regex(r"===[^\n]*")]
    Comment,
    /// Unsigned integer literal.
    #[regex(r"[0-9]+")]
    Number,
    /// Bare word: keyword, transaction id or variable name.
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Ident,
}

/// Output of the lexer containing token and span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LexItem {
    /// Token kind.
    pub kind: Token,
    /// Text span.
    pub span: Span,
}

/// Lexer iterator over `LexItem`s. Unrecognised input surfaces as an
/// `Err` carrying its span.
pub struct Lexer<'input> {
    inner: logos::Lexer<'input, Token>,
}

impl<'input> Lexer<'input> {
    /// Create a new lexer over one input line.
    pub fn new(source: &'input str) -> Self {
        Self {
            inner: Token::lexer(source),
        }
    }
}

impl<'input> Iterator for Lexer<'input> {
    type Item = Result<LexItem, Span>;

    fn next(&mut self) -> Option<Self::Item> {
        let kind = self.inner.next()?;
        let span = Span {
            start: self.inner.span().start,
            end: self.inner.span().end,
        };
        Some(match kind {
            Ok(kind) => Ok(LexItem { kind, span }),
            Err(()) => Err(span),
        })
    }
}
