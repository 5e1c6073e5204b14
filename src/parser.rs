// Template lexer and parser
// The lexer alternates between prose and expression modes; a token-stream
// transform between lexer and parser injects the default filter into bare
// output blocks before the parser sees them

use std::collections::VecDeque;

use thiserror::Error;

use crate::ast::{BinaryOp, Expr, IfArm, Node, UnaryOp};
use crate::filters::DEFAULT_FILTER;

/// Parser errors
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Unexpected token: {0}")]
    UnexpectedToken(String),

    #[error("Unexpected end of template")]
    UnexpectedEnd,

    #[error("Invalid number: {0}")]
    InvalidNumber(String),

    #[error("Unclosed string literal")]
    UnclosedString,

    #[error("Unclosed comment")]
    UnclosedComment,

    #[error("Missing end of raw directive")]
    UnclosedRaw,

    #[error("Encountered unknown tag '{0}'")]
    UnknownTag(String),

    #[error("Expression nested too deeply")]
    NestedTooDeeply,

    #[error("Encountered tag '{found}', expected {expected}")]
    UnexpectedTag { found: String, expected: String },

    #[error("Expected {expected}, found {found}")]
    Expected { expected: String, found: String },
}

/// Token types for the template lexer
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Document structure
    Text(String),
    VariableBegin,
    VariableEnd,
    BlockBegin,
    BlockEnd,

    // Literals
    String(String),
    Number(f64),
    True,
    False,
    None,

    // Names
    Name(String),

    // Operators
    Pipe,
    Dot,
    Comma,
    Colon,
    Assign,
    Plus,
    Minus,
    Star,
    DoubleStar,
    Slash,
    DoubleSlash,
    Percent,
    Tilde,
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,

    // Keywords
    And,
    Or,
    Not,
    In,
    Is,
    If,
    Else,
    For,

    // Delimiters
    LeftParen,
    RightParen,
    LeftBracket,
    RightBracket,
    LeftBrace,
    RightBrace,

    // Special
    Eof,
}

/// Lexer mode: prose between delimiters, or expression text inside them
#[derive(Debug, Clone, Copy, PartialEq)]
enum Mode {
    Text,
    Variable,
    Block,
}

/// Lexer for template documents
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    mode: Mode,
    brace_depth: usize,
}

impl Lexer {
    pub fn new(input: String) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
            mode: Mode::Text,
            brace_depth: 0,
        }
    }

    fn current(&self) -> Option<char> {
        if self.position < self.input.len() {
            Some(self.input[self.position])
        } else {
            None
        }
    }

    fn peek(&self, offset: usize) -> Option<char> {
        let pos = self.position + offset;
        if pos < self.input.len() {
            Some(self.input[pos])
        } else {
            None
        }
    }

    fn advance(&mut self) {
        if self.position < self.input.len() {
            self.position += 1;
        }
    }

    fn starts_with(&self, pattern: &str) -> bool {
        let mut pos = self.position;
        for ch in pattern.chars() {
            if pos >= self.input.len() || self.input[pos] != ch {
                return false;
            }
            pos += 1;
        }
        true
    }

    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        match self.mode {
            Mode::Text => self.lex_text(),
            Mode::Variable | Mode::Block => self.lex_expression(),
        }
    }

    /// Lex prose until the next delimiter. Comments are dropped and raw
    /// blocks are folded into the surrounding text here, so the parser
    /// never sees either.
    fn lex_text(&mut self) -> Result<Token, ParseError> {
        let mut text = String::new();

        loop {
            match self.current() {
                Option::None => {
                    return if text.is_empty() {
                        Ok(Token::Eof)
                    } else {
                        Ok(Token::Text(text))
                    };
                }
                Some('{') if self.peek(1) == Some('#') => {
                    self.skip_comment()?;
                }
                Some('{') if self.peek(1) == Some('{') || self.peek(1) == Some('%') => {
                    if self.peek(1) == Some('%') {
                        if let Some(raw) = self.try_lex_raw_block()? {
                            text.push_str(&raw);
                            continue;
                        }
                    }
                    if !text.is_empty() {
                        // Delimiter stays put; the next call consumes it
                        return Ok(Token::Text(text));
                    }
                    return self.lex_open_delimiter();
                }
                Some(ch) => {
                    text.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn skip_comment(&mut self) -> Result<(), ParseError> {
        self.advance(); // '{'
        self.advance(); // '#'
        loop {
            match self.current() {
                Option::None => return Err(ParseError::UnclosedComment),
                Some('#') if self.peek(1) == Some('}') => {
                    self.advance();
                    self.advance();
                    return Ok(());
                }
                Some(_) => self.advance(),
            }
        }
    }

    /// If the block at the current position is `{% raw %}`, consume it
    /// together with its matching endraw tag and return the verbatim text
    /// between them.
    fn try_lex_raw_block(&mut self) -> Result<Option<String>, ParseError> {
        let content_start = match match_block_tag(&self.input, self.position + 2, "raw") {
            Some(pos) => pos,
            Option::None => return Ok(Option::None),
        };

        // Collect verbatim content up to the endraw tag
        let mut content = String::new();
        let mut pos = content_start;
        loop {
            if pos >= self.input.len() {
                return Err(ParseError::UnclosedRaw);
            }
            if self.input[pos] == '{' && self.input.get(pos + 1) == Some(&'%') {
                if let Some(end) = match_block_tag(&self.input, pos + 2, "endraw") {
                    self.position = end;
                    return Ok(Some(content));
                }
            }
            content.push(self.input[pos]);
            pos += 1;
        }
    }

    /// Consume `{{` or `{%`, any whitespace-control modifier, and any
    /// render-location prefix (`{{r `, `{%p `, `{%tr `, `{%tc `) left in
    /// text extracted straight from the document container.
    fn lex_open_delimiter(&mut self) -> Result<Token, ParseError> {
        self.advance(); // '{'
        let variable = self.current() == Some('{');
        self.advance(); // '{' or '%'

        if variable {
            if self.current() == Some('r')
                && self.peek(1).map_or(false, |c| c.is_whitespace())
            {
                self.advance();
            }
            if matches!(self.current(), Some('-') | Some('+')) {
                self.advance();
            }
            self.mode = Mode::Variable;
            self.brace_depth = 0;
            Ok(Token::VariableBegin)
        } else {
            if self.starts_with("tr") || self.starts_with("tc") {
                if self.peek(2).map_or(false, |c| c.is_whitespace()) {
                    self.advance();
                    self.advance();
                }
            } else if self.current() == Some('p')
                && self.peek(1).map_or(false, |c| c.is_whitespace())
            {
                self.advance();
            }
            if matches!(self.current(), Some('-') | Some('+')) {
                self.advance();
            }
            self.mode = Mode::Block;
            self.brace_depth = 0;
            Ok(Token::BlockBegin)
        }
    }

    fn lex_expression(&mut self) -> Result<Token, ParseError> {
        loop {
            match self.current() {
                Some(ch) if ch.is_whitespace() => self.advance(),
                _ => break,
            }
        }

        // Closing delimiters, with optional whitespace-control modifier
        if self.mode == Mode::Variable && self.brace_depth == 0 {
            if self.starts_with("}}") {
                self.advance();
                self.advance();
                self.mode = Mode::Text;
                return Ok(Token::VariableEnd);
            }
            if (self.current() == Some('-') || self.current() == Some('+'))
                && self.peek(1) == Some('}')
                && self.peek(2) == Some('}')
            {
                self.position += 3;
                self.mode = Mode::Text;
                return Ok(Token::VariableEnd);
            }
        }
        if self.mode == Mode::Block {
            if self.starts_with("%}") {
                self.advance();
                self.advance();
                self.mode = Mode::Text;
                return Ok(Token::BlockEnd);
            }
            if (self.current() == Some('-') || self.current() == Some('+'))
                && self.peek(1) == Some('%')
                && self.peek(2) == Some('}')
            {
                self.position += 3;
                self.mode = Mode::Text;
                return Ok(Token::BlockEnd);
            }
        }

        match self.current() {
            Option::None => Err(ParseError::UnexpectedEnd),

            // String literals
            Some('"') => Ok(Token::String(self.read_string('"')?)),
            Some('\'') => Ok(Token::String(self.read_string('\'')?)),

            // Numbers
            Some(ch) if ch.is_ascii_digit() => Ok(Token::Number(self.read_number()?)),

            // Two-character operators
            Some('=') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Ok(Token::Equal)
            }
            Some('!') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Ok(Token::NotEqual)
            }
            Some('<') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Ok(Token::LessThanOrEqual)
            }
            Some('>') if self.peek(1) == Some('=') => {
                self.advance();
                self.advance();
                Ok(Token::GreaterThanOrEqual)
            }
            Some('*') if self.peek(1) == Some('*') => {
                self.advance();
                self.advance();
                Ok(Token::DoubleStar)
            }
            Some('/') if self.peek(1) == Some('/') => {
                self.advance();
                self.advance();
                Ok(Token::DoubleSlash)
            }

            // Single-character operators and delimiters
            Some('=') => {
                self.advance();
                Ok(Token::Assign)
            }
            Some('<') => {
                self.advance();
                Ok(Token::LessThan)
            }
            Some('>') => {
                self.advance();
                Ok(Token::GreaterThan)
            }
            Some('|') => {
                self.advance();
                Ok(Token::Pipe)
            }
            Some('.') => {
                self.advance();
                Ok(Token::Dot)
            }
            Some(',') => {
                self.advance();
                Ok(Token::Comma)
            }
            Some(':') => {
                self.advance();
                Ok(Token::Colon)
            }
            Some('+') => {
                self.advance();
                Ok(Token::Plus)
            }
            Some('-') => {
                self.advance();
                Ok(Token::Minus)
            }
            Some('*') => {
                self.advance();
                Ok(Token::Star)
            }
            Some('/') => {
                self.advance();
                Ok(Token::Slash)
            }
            Some('%') => {
                self.advance();
                Ok(Token::Percent)
            }
            Some('~') => {
                self.advance();
                Ok(Token::Tilde)
            }
            Some('(') => {
                self.advance();
                Ok(Token::LeftParen)
            }
            Some(')') => {
                self.advance();
                Ok(Token::RightParen)
            }
            Some('[') => {
                self.advance();
                Ok(Token::LeftBracket)
            }
            Some(']') => {
                self.advance();
                Ok(Token::RightBracket)
            }
            Some('{') => {
                self.advance();
                self.brace_depth += 1;
                Ok(Token::LeftBrace)
            }
            Some('}') => {
                self.advance();
                self.brace_depth = self.brace_depth.saturating_sub(1);
                Ok(Token::RightBrace)
            }

            // Names and keywords
            Some(ch) if ch.is_alphabetic() || ch == '_' => {
                let ident = self.read_identifier();
                Ok(match ident.as_str() {
                    "true" | "True" => Token::True,
                    "false" | "False" => Token::False,
                    "none" | "None" => Token::None,
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    "is" => Token::Is,
                    "if" => Token::If,
                    "else" => Token::Else,
                    "for" => Token::For,
                    _ => Token::Name(ident),
                })
            }

            Some(ch) => Err(ParseError::UnexpectedToken(ch.to_string())),
        }
    }

    fn read_string(&mut self, quote_char: char) -> Result<String, ParseError> {
        let mut result = String::new();
        self.advance(); // opening quote

        loop {
            match self.current() {
                Option::None => return Err(ParseError::UnclosedString),
                Some(ch) if ch == quote_char => {
                    self.advance();
                    return Ok(result);
                }
                Some('\\') => {
                    self.advance();
                    match self.current() {
                        Option::None => return Err(ParseError::UnclosedString),
                        Some('n') => result.push('\n'),
                        Some('r') => result.push('\r'),
                        Some('t') => result.push('\t'),
                        Some('\\') => result.push('\\'),
                        Some('\'') => result.push('\''),
                        Some('"') => result.push('"'),
                        // Unknown escapes pass through literally
                        Some(ch) => {
                            result.push('\\');
                            result.push(ch);
                        }
                    }
                    self.advance();
                }
                Some(ch) => {
                    result.push(ch);
                    self.advance();
                }
            }
        }
    }

    fn read_number(&mut self) -> Result<f64, ParseError> {
        let start = self.position;

        while self.current().map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
        }

        // Fractional part; `1.x` attribute access must not consume the dot
        if self.current() == Some('.') && self.peek(1).map_or(false, |c| c.is_ascii_digit()) {
            self.advance();
            while self.current().map_or(false, |c| c.is_ascii_digit()) {
                self.advance();
            }
        }

        // Exponent part
        if matches!(self.current(), Some('e') | Some('E')) {
            let mark = self.position;
            self.advance();
            if matches!(self.current(), Some('+') | Some('-')) {
                self.advance();
            }
            if self.current().map_or(false, |c| c.is_ascii_digit()) {
                while self.current().map_or(false, |c| c.is_ascii_digit()) {
                    self.advance();
                }
            } else {
                self.position = mark;
            }
        }

        let num_str: String = self.input[start..self.position].iter().collect();
        num_str
            .parse()
            .map_err(|_| ParseError::InvalidNumber(num_str))
    }

    fn read_identifier(&mut self) -> String {
        let start = self.position;

        while let Some(ch) = self.current() {
            if ch.is_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        self.input[start..self.position].iter().collect()
    }
}

/// Match a bare statement tag `[-+]? ws* <name> ws* [-+]? %}` starting just
/// past its `{%`, returning the position past the closing delimiter. Shared
/// with the validator's lexical sweep, which must recognize raw blocks
/// without running the full lexer.
pub(crate) fn match_block_tag(input: &[char], mut pos: usize, name: &str) -> Option<usize> {
    if matches!(input.get(pos), Some('-') | Some('+')) {
        pos += 1;
    }
    while matches!(input.get(pos), Some(ch) if ch.is_whitespace()) {
        pos += 1;
    }
    for ch in name.chars() {
        if input.get(pos) != Some(&ch) {
            return None;
        }
        pos += 1;
    }
    if matches!(input.get(pos), Some(ch) if ch.is_alphanumeric() || *ch == '_') {
        return None;
    }
    while matches!(input.get(pos), Some(ch) if ch.is_whitespace()) {
        pos += 1;
    }
    if matches!(input.get(pos), Some('-') | Some('+')) {
        pos += 1;
    }
    if input.get(pos) == Some(&'%') && input.get(pos + 1) == Some(&'}') {
        Some(pos + 2)
    } else {
        None
    }
}

/// Token stream between lexer and parser. Tracks whether the current output
/// block has seen a pipe; a block that ends without one gets a synthetic
/// pipe and the default filter name injected before its end token, so bare
/// expressions validate under the same filter pipeline the renderer applies.
pub struct TokenStream {
    lexer: Lexer,
    injected: VecDeque<Token>,
    in_variable: bool,
    met_pipe: bool,
}

impl TokenStream {
    pub fn new(lexer: Lexer) -> Self {
        TokenStream {
            lexer,
            injected: VecDeque::new(),
            in_variable: false,
            met_pipe: false,
        }
    }

    pub fn next_token(&mut self) -> Result<Token, ParseError> {
        if let Some(token) = self.injected.pop_front() {
            return Ok(token);
        }

        let token = self.lexer.next_token()?;
        match &token {
            Token::VariableBegin => {
                self.in_variable = true;
                self.met_pipe = false;
            }
            Token::Pipe if self.in_variable => {
                self.met_pipe = true;
            }
            Token::VariableEnd => {
                self.in_variable = false;
                if !self.met_pipe {
                    self.injected.push_back(Token::Name(DEFAULT_FILTER.to_string()));
                    self.injected.push_back(Token::VariableEnd);
                    return Ok(Token::Pipe);
                }
            }
            _ => {}
        }
        Ok(token)
    }
}

/// Statement tags the parser recognizes; anything else inside `{% %}` is an
/// unknown tag.
const KNOWN_TAGS: &[&str] = &[
    "if", "elif", "else", "endif", "for", "endfor", "set", "endset", "filter",
    "endfilter", "raw", "endraw",
];

/// Cap on combined statement/expression nesting, so pathological input
/// fails with a parse error instead of exhausting the stack.
const MAX_NESTING_DEPTH: usize = 300;

/// Parser for template documents using Pratt parsing for expressions
pub struct Parser {
    stream: TokenStream,
    current_token: Token,
    depth: usize,
}

impl Parser {
    pub fn new(input: String) -> Result<Self, ParseError> {
        let mut stream = TokenStream::new(Lexer::new(input));
        let current_token = stream.next_token()?;
        Ok(Parser {
            stream,
            current_token,
            depth: 0,
        })
    }

    fn enter(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(ParseError::NestedTooDeeply);
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current_token = self.stream.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        if std::mem::discriminant(&self.current_token) == std::mem::discriminant(&expected) {
            self.advance()?;
            Ok(())
        } else {
            Err(ParseError::Expected {
                expected: format!("{:?}", expected),
                found: format!("{:?}", self.current_token),
            })
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match &self.current_token {
            Token::Name(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(name)
            }
            other => Err(ParseError::Expected {
                expected: "name".to_string(),
                found: format!("{:?}", other),
            }),
        }
    }

    /// Parse nodes until end of input or until a block opens with one of
    /// the terminator tags. The terminator's tag token is consumed; its
    /// `%}` (and any tag arguments) are left for the caller.
    fn parse_nodes(
        &mut self,
        terminators: &[&str],
    ) -> Result<(Vec<Node>, Option<String>), ParseError> {
        self.enter()?;
        let result = self.parse_nodes_inner(terminators);
        self.leave();
        result
    }

    fn parse_nodes_inner(
        &mut self,
        terminators: &[&str],
    ) -> Result<(Vec<Node>, Option<String>), ParseError> {
        let mut nodes = Vec::new();

        loop {
            match &self.current_token {
                Token::Eof => return Ok((nodes, Option::None)),
                Token::Text(text) => {
                    let text = text.clone();
                    self.advance()?;
                    nodes.push(Node::Text(text));
                }
                Token::VariableBegin => {
                    self.advance()?;
                    let expr = self.parse_expression(0)?;
                    self.expect(Token::VariableEnd)?;
                    nodes.push(Node::Output(expr));
                }
                Token::BlockBegin => {
                    self.advance()?;
                    let tag = self.tag_name()?;
                    if terminators.contains(&tag.as_str()) {
                        self.advance()?;
                        return Ok((nodes, Some(tag)));
                    }
                    nodes.push(self.parse_statement(&tag, terminators)?);
                }
                other => {
                    return Err(ParseError::UnexpectedToken(format!("{:?}", other)));
                }
            }
        }
    }

    /// The tag name opening the current statement block, without consuming
    /// its token.
    fn tag_name(&self) -> Result<String, ParseError> {
        match &self.current_token {
            Token::If => Ok("if".to_string()),
            Token::Else => Ok("else".to_string()),
            Token::For => Ok("for".to_string()),
            Token::Name(name) => Ok(name.clone()),
            other => Err(ParseError::UnexpectedToken(format!("{:?}", other))),
        }
    }

    fn parse_statement(
        &mut self,
        tag: &str,
        terminators: &[&str],
    ) -> Result<Node, ParseError> {
        match tag {
            "if" => {
                self.advance()?;
                self.parse_if()
            }
            "for" => {
                self.advance()?;
                self.parse_for()
            }
            "set" => {
                self.advance()?;
                self.parse_set()
            }
            "filter" => {
                self.advance()?;
                self.parse_filter_block()
            }
            other if KNOWN_TAGS.contains(&other) => Err(ParseError::UnexpectedTag {
                found: other.to_string(),
                expected: if terminators.is_empty() {
                    "end of template".to_string()
                } else {
                    terminators.join(" or ")
                },
            }),
            other => Err(ParseError::UnknownTag(other.to_string())),
        }
    }

    /// `{% if cond %}` with any number of `{% elif %}` arms and an
    /// optional `{% else %}`, closed by `{% endif %}`.
    fn parse_if(&mut self) -> Result<Node, ParseError> {
        let mut arms = Vec::new();
        let mut else_body = Vec::new();

        loop {
            let condition = self.parse_expression(0)?;
            self.expect(Token::BlockEnd)?;
            let (body, terminator) = self.parse_nodes(&["elif", "else", "endif"])?;
            arms.push(IfArm { condition, body });

            match terminator.as_deref() {
                Some("elif") => continue,
                Some("else") => {
                    self.expect(Token::BlockEnd)?;
                    let (body, terminator) = self.parse_nodes(&["endif"])?;
                    if terminator.is_none() {
                        return Err(ParseError::UnexpectedEnd);
                    }
                    self.expect(Token::BlockEnd)?;
                    else_body = body;
                    break;
                }
                Some(_) => {
                    self.expect(Token::BlockEnd)?;
                    break;
                }
                Option::None => return Err(ParseError::UnexpectedEnd),
            }
        }

        Ok(Node::If { arms, else_body })
    }

    /// `{% for targets in iterable %}` with an optional `{% else %}`,
    /// closed by `{% endfor %}`.
    fn parse_for(&mut self) -> Result<Node, ParseError> {
        let mut targets = vec![self.expect_name()?];
        while self.current_token == Token::Comma {
            self.advance()?;
            targets.push(self.expect_name()?);
        }
        self.expect(Token::In)?;
        let iterable = self.parse_expression(0)?;
        self.expect(Token::BlockEnd)?;

        let (body, terminator) = self.parse_nodes(&["else", "endfor"])?;
        let mut else_body = Vec::new();
        match terminator.as_deref() {
            Some("else") => {
                self.expect(Token::BlockEnd)?;
                let (nodes, terminator) = self.parse_nodes(&["endfor"])?;
                if terminator.is_none() {
                    return Err(ParseError::UnexpectedEnd);
                }
                self.expect(Token::BlockEnd)?;
                else_body = nodes;
            }
            Some(_) => self.expect(Token::BlockEnd)?,
            Option::None => return Err(ParseError::UnexpectedEnd),
        }

        Ok(Node::For {
            targets,
            iterable,
            body,
            else_body,
        })
    }

    /// Inline `{% set name = expr %}` or block `{% set name %}...{% endset %}`.
    fn parse_set(&mut self) -> Result<Node, ParseError> {
        let name = self.expect_name()?;

        if self.current_token == Token::Assign {
            self.advance()?;
            let value = self.parse_expression(0)?;
            self.expect(Token::BlockEnd)?;
            return Ok(Node::Set { name, value });
        }

        self.expect(Token::BlockEnd)?;
        let (body, terminator) = self.parse_nodes(&["endset"])?;
        if terminator.is_none() {
            return Err(ParseError::UnexpectedEnd);
        }
        self.expect(Token::BlockEnd)?;
        Ok(Node::SetBlock { name, body })
    }

    /// `{% filter name[(args)] %}...{% endfilter %}`.
    fn parse_filter_block(&mut self) -> Result<Node, ParseError> {
        let name = self.expect_name()?;
        let (args, kwargs) = if self.current_token == Token::LeftParen {
            self.parse_call_args()?
        } else {
            (Vec::new(), Vec::new())
        };
        self.expect(Token::BlockEnd)?;

        let (body, terminator) = self.parse_nodes(&["endfilter"])?;
        if terminator.is_none() {
            return Err(ParseError::UnexpectedEnd);
        }
        self.expect(Token::BlockEnd)?;
        Ok(Node::FilterBlock {
            name,
            args,
            kwargs,
            body,
        })
    }

    /// Binding powers for infix operators. Higher binds tighter; the filter
    /// pipe binds tighter than arithmetic, postfix access tightest of all.
    fn binding_power(&self, token: &Token) -> Option<(u8, u8)> {
        match token {
            Token::If => Some((10, 11)),
            Token::Or => Some((20, 21)),
            Token::And => Some((25, 26)),
            Token::Equal
            | Token::NotEqual
            | Token::LessThan
            | Token::LessThanOrEqual
            | Token::GreaterThan
            | Token::GreaterThanOrEqual
            | Token::In
            | Token::Not
            | Token::Is => Some((40, 41)),
            Token::Tilde => Some((50, 51)),
            Token::Plus | Token::Minus => Some((55, 56)),
            Token::Star | Token::Slash | Token::DoubleSlash | Token::Percent => Some((60, 61)),
            Token::DoubleStar => Some((70, 69)), // Right associative
            Token::Pipe => Some((75, 76)),
            Token::Dot | Token::LeftBracket | Token::LeftParen => Some((85, 86)),
            _ => Option::None,
        }
    }

    /// Parse a primary expression (literals, names, containers, grouping,
    /// unary operators)
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match &self.current_token {
            Token::String(s) => {
                let value = s.clone();
                self.advance()?;
                Ok(Expr::String(value))
            }
            Token::Number(n) => {
                let value = *n;
                self.advance()?;
                Ok(Expr::Number(value))
            }
            Token::True => {
                self.advance()?;
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.advance()?;
                Ok(Expr::Bool(false))
            }
            Token::None => {
                self.advance()?;
                Ok(Expr::None)
            }
            Token::Name(name) => {
                let name = name.clone();
                self.advance()?;
                Ok(Expr::Name(name))
            }
            Token::LeftParen => {
                self.advance()?;

                if self.current_token == Token::RightParen {
                    self.advance()?;
                    return Ok(Expr::List(Vec::new()));
                }

                let first = self.parse_expression(0)?;
                if self.current_token != Token::Comma {
                    self.expect(Token::RightParen)?;
                    return Ok(first);
                }

                // Parenthesized tuple
                let mut elements = vec![first];
                while self.current_token == Token::Comma {
                    self.advance()?;
                    if self.current_token == Token::RightParen {
                        break;
                    }
                    elements.push(self.parse_expression(0)?);
                }
                self.expect(Token::RightParen)?;
                Ok(Expr::List(elements))
            }
            Token::LeftBracket => {
                self.advance()?;

                let mut elements = Vec::new();
                while self.current_token != Token::RightBracket {
                    elements.push(self.parse_expression(0)?);
                    if self.current_token != Token::Comma {
                        break;
                    }
                    self.advance()?;
                }
                self.expect(Token::RightBracket)?;
                Ok(Expr::List(elements))
            }
            Token::LeftBrace => {
                self.advance()?;

                let mut pairs = Vec::new();
                while self.current_token != Token::RightBrace {
                    let key = self.parse_expression(0)?;
                    self.expect(Token::Colon)?;
                    let value = self.parse_expression(0)?;
                    pairs.push((key, value));
                    if self.current_token != Token::Comma {
                        break;
                    }
                    self.advance()?;
                }
                self.expect(Token::RightBrace)?;
                Ok(Expr::Dict(pairs))
            }
            Token::Minus => {
                self.advance()?;
                let operand = self.parse_expression(65)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Negate,
                    operand: Box::new(operand),
                })
            }
            Token::Not => {
                self.advance()?;
                let operand = self.parse_expression(38)?;
                Ok(Expr::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                })
            }
            other => Err(ParseError::UnexpectedToken(format!("{:?}", other))),
        }
    }

    /// Parse an expression with Pratt parsing
    fn parse_expression(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        self.enter()?;
        let result = self.parse_expression_inner(min_bp);
        self.leave();
        result
    }

    fn parse_expression_inner(&mut self, min_bp: u8) -> Result<Expr, ParseError> {
        let mut lhs = self.parse_primary()?;

        loop {
            let (left_bp, right_bp) = match self.binding_power(&self.current_token) {
                Some(bp) => bp,
                Option::None => break,
            };

            if left_bp < min_bp {
                break;
            }

            match &self.current_token {
                Token::Dot => {
                    self.advance()?;
                    let attr = self.expect_name()?;
                    lhs = Expr::Attr {
                        base: Box::new(lhs),
                        attr,
                    };
                }
                Token::LeftBracket => {
                    self.advance()?;
                    let index = self.parse_expression(0)?;
                    self.expect(Token::RightBracket)?;
                    lhs = Expr::Index {
                        base: Box::new(lhs),
                        index: Box::new(index),
                    };
                }
                Token::LeftParen => {
                    let (args, kwargs) = self.parse_call_args()?;
                    lhs = Expr::Call {
                        callee: Box::new(lhs),
                        args,
                        kwargs,
                    };
                }
                Token::Pipe => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    let (args, kwargs) = if self.current_token == Token::LeftParen {
                        self.parse_call_args()?
                    } else {
                        (Vec::new(), Vec::new())
                    };
                    lhs = Expr::Filter {
                        value: Box::new(lhs),
                        name,
                        args,
                        kwargs,
                    };
                }
                Token::Is => {
                    self.advance()?;
                    let negated = if self.current_token == Token::Not {
                        self.advance()?;
                        true
                    } else {
                        false
                    };
                    let name = self.test_name()?;
                    let args = self.parse_test_args()?;
                    lhs = Expr::Test {
                        value: Box::new(lhs),
                        name,
                        negated,
                        args,
                    };
                }
                Token::Not => {
                    // Infix `not` is only valid as the start of `not in`
                    self.advance()?;
                    self.expect(Token::In)?;
                    let rhs = self.parse_expression(right_bp)?;
                    lhs = Expr::Binary {
                        op: BinaryOp::NotIn,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                }
                Token::If => {
                    self.advance()?;
                    let condition = self.parse_expression(0)?;
                    let else_branch = if self.current_token == Token::Else {
                        self.advance()?;
                        Some(Box::new(self.parse_expression(0)?))
                    } else {
                        Option::None
                    };
                    lhs = Expr::Conditional {
                        condition: Box::new(condition),
                        then_branch: Box::new(lhs),
                        else_branch,
                    };
                }
                _ => {
                    let op = match &self.current_token {
                        Token::Plus => BinaryOp::Add,
                        Token::Minus => BinaryOp::Subtract,
                        Token::Star => BinaryOp::Multiply,
                        Token::Slash => BinaryOp::Divide,
                        Token::DoubleSlash => BinaryOp::FloorDivide,
                        Token::Percent => BinaryOp::Modulo,
                        Token::DoubleStar => BinaryOp::Power,
                        Token::Equal => BinaryOp::Equal,
                        Token::NotEqual => BinaryOp::NotEqual,
                        Token::LessThan => BinaryOp::LessThan,
                        Token::LessThanOrEqual => BinaryOp::LessThanOrEqual,
                        Token::GreaterThan => BinaryOp::GreaterThan,
                        Token::GreaterThanOrEqual => BinaryOp::GreaterThanOrEqual,
                        Token::And => BinaryOp::And,
                        Token::Or => BinaryOp::Or,
                        Token::In => BinaryOp::In,
                        Token::Tilde => BinaryOp::Concat,
                        other => {
                            return Err(ParseError::UnexpectedToken(format!("{:?}", other)))
                        }
                    };

                    self.advance()?;
                    let rhs = self.parse_expression(right_bp)?;
                    lhs = Expr::Binary {
                        op,
                        lhs: Box::new(lhs),
                        rhs: Box::new(rhs),
                    };
                }
            }
        }

        Ok(lhs)
    }

    /// A test name after `is`; keywords that double as test names
    /// (`none`, `true`, `false`, `in`) are accepted here.
    fn test_name(&mut self) -> Result<String, ParseError> {
        let name = match &self.current_token {
            Token::Name(name) => name.clone(),
            Token::None => "none".to_string(),
            Token::True => "true".to_string(),
            Token::False => "false".to_string(),
            Token::In => "in".to_string(),
            other => {
                return Err(ParseError::Expected {
                    expected: "test name".to_string(),
                    found: format!("{:?}", other),
                })
            }
        };
        self.advance()?;
        Ok(name)
    }

    /// Test arguments: a parenthesized list, or a single bare literal/name
    /// (`is divisibleby 3`, `is sameas other`).
    fn parse_test_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        if self.current_token == Token::LeftParen {
            let (args, _kwargs) = self.parse_call_args()?;
            return Ok(args);
        }
        match &self.current_token {
            Token::Number(_)
            | Token::String(_)
            | Token::Name(_)
            | Token::LeftBracket
            | Token::LeftBrace => Ok(vec![self.parse_primary()?]),
            _ => Ok(Vec::new()),
        }
    }

    /// Parenthesized positional and keyword arguments. A `name=value` pair
    /// becomes a keyword argument; everything else is positional.
    #[allow(clippy::type_complexity)]
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), ParseError> {
        self.expect(Token::LeftParen)?;

        let mut args = Vec::new();
        let mut kwargs = Vec::new();

        while self.current_token != Token::RightParen {
            let expr = self.parse_expression(0)?;
            if self.current_token == Token::Assign {
                match expr {
                    Expr::Name(name) => {
                        self.advance()?;
                        let value = self.parse_expression(0)?;
                        kwargs.push((name, value));
                    }
                    other => {
                        return Err(ParseError::Expected {
                            expected: "keyword argument name".to_string(),
                            found: format!("{:?}", other),
                        })
                    }
                }
            } else {
                args.push(expr);
            }

            if self.current_token != Token::Comma {
                break;
            }
            self.advance()?;
        }

        self.expect(Token::RightParen)?;
        Ok((args, kwargs))
    }

    pub fn parse(&mut self) -> Result<Vec<Node>, ParseError> {
        let (nodes, terminator) = self.parse_nodes(&[])?;
        match terminator {
            Option::None => Ok(nodes),
            Some(tag) => Err(ParseError::UnexpectedTag {
                found: tag,
                expected: "end of template".to_string(),
            }),
        }
    }
}

/// Parse a document into template nodes.
///
/// This is the main entry point for parsing. The input is expected to be
/// normalized already; the evaluation environment handles that.
pub fn parse(source: &str) -> Result<Vec<Node>, ParseError> {
    let mut parser = Parser::new(source.to_string())?;
    parser.parse()
}
