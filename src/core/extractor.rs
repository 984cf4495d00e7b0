//! Entry point resolution for submitted solutions.
//!
//! Source text is scanned lexically (comments, string, template and regular
//! expression literals are skipped, bracket depth is tracked) and only
//! top-level declarations that name a function are considered:
//!
//! * `function name(...)`, `async function name(...)`, `function* name(...)`
//! * `const|let|var name = function ...`, `= async ...`, `= (...) =>`, `= x =>`
//!
//! Only the first declarator of a `const|let|var` statement is inspected.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum EntryPoint {
    /// First top-level `function` declaration, falling back to the first
    /// callable binding.
    #[default]
    First,
    /// Last top-level function-like declaration in source order.
    Last,
    /// A specific top-level declaration, e.g. the one a challenge signature names.
    Named(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceUnit {
    pub source: String,
    pub entry: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclarationKind {
    Function,
    Binding,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Declaration {
    pub name: String,
    pub kind: DeclarationKind,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    #[error("no identifiable entry point")]
    NoEntryPoint,
    #[error("entry point `{name}` is not declared at the top level")]
    NotFound { name: String },
    #[error("entry point `{name}` is not callable")]
    NotCallable { name: String },
}

pub fn extract(source: &str, entry: &EntryPoint) -> Result<SourceUnit, ExtractionError> {
    let declarations = scan_declarations(source);
    tracing::debug!("Top-level declarations: {:?}", declarations);

    let name = match entry {
        EntryPoint::First => preferred(&declarations)
            .map(|d| d.name.clone())
            .ok_or(ExtractionError::NoEntryPoint)?,
        EntryPoint::Last => declarations
            .last()
            .map(|d| d.name.clone())
            .ok_or(ExtractionError::NoEntryPoint)?,
        EntryPoint::Named(name) => {
            if !declarations.iter().any(|d| &d.name == name) {
                return Err(ExtractionError::NotFound { name: name.clone() });
            }
            name.clone()
        }
    };

    Ok(SourceUnit {
        source: source.to_string(),
        entry: name,
    })
}

/// Name of the declaration `EntryPoint::First` would pick in `text`, if any.
pub fn declared_name(text: &str) -> Option<String> {
    preferred(&scan_declarations(text)).map(|d| d.name.clone())
}

/// First `function` declaration, or the first callable binding when the
/// source declares no function.
fn preferred(declarations: &[Declaration]) -> Option<&Declaration> {
    declarations
        .iter()
        .find(|d| d.kind == DeclarationKind::Function)
        .or_else(|| declarations.first())
}

pub fn scan_declarations(source: &str) -> Vec<Declaration> {
    let tokens = tokenize(source);
    let mut found = Vec::new();
    let mut i = 0;

    while i < tokens.len() {
        let token = &tokens[i];
        if token.depth != 0 || token.kind != TokenKind::Ident {
            i += 1;
            continue;
        }

        match token.text {
            "function" if starts_statement(&tokens, i) => {
                let mut j = i + 1;
                if tokens.get(j).is_some_and(|t| t.is_punct("*")) {
                    j += 1;
                }
                if let Some(name) = tokens.get(j).filter(|t| t.is_name()) {
                    found.push(Declaration {
                        name: name.text.to_string(),
                        kind: DeclarationKind::Function,
                    });
                    i = j;
                }
            }
            "const" | "let" | "var" if starts_statement(&tokens, i) => {
                let name = tokens.get(i + 1).filter(|t| t.is_name());
                let assign = tokens.get(i + 2).is_some_and(|t| t.is_punct("="));
                if let Some(name) = name {
                    if assign && is_callable_initializer(&tokens, i + 3) {
                        found.push(Declaration {
                            name: name.text.to_string(),
                            kind: DeclarationKind::Binding,
                        });
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    found
}

const RESERVED: &[&str] = &[
    "async", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "export", "extends", "false", "finally", "for",
    "function", "if", "import", "in", "instanceof", "let", "new", "null", "return", "super",
    "switch", "this", "throw", "true", "try", "typeof", "var", "void", "while", "with", "yield",
];

/// Keywords after which a `/` starts a regular expression literal.
const REGEX_PREFIX_KEYWORDS: &[&str] = &[
    "return", "typeof", "instanceof", "in", "of", "new", "delete", "void", "throw", "case", "do",
    "else", "yield", "await",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TokenKind {
    Ident,
    Punct,
    Literal,
}

#[derive(Clone, Debug)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    depth: usize,
    newline_before: bool,
}

impl Token<'_> {
    fn is_punct(&self, text: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == text
    }

    fn is_ident(&self, text: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == text
    }

    fn is_name(&self) -> bool {
        self.kind == TokenKind::Ident && !RESERVED.contains(&self.text)
    }
}

fn starts_statement(tokens: &[Token<'_>], idx: usize) -> bool {
    let Some(prev) = idx.checked_sub(1).map(|p| &tokens[p]) else {
        return true;
    };
    if prev.is_ident("async") {
        return starts_statement(tokens, idx - 1);
    }
    match prev.kind {
        TokenKind::Punct => matches!(prev.text, ";" | "}") || {
            tokens[idx].newline_before && matches!(prev.text, ")" | "]")
        },
        _ => tokens[idx].newline_before,
    }
}

fn is_callable_initializer(tokens: &[Token<'_>], idx: usize) -> bool {
    let Some(first) = tokens.get(idx) else {
        return false;
    };

    if first.is_ident("function") || first.is_ident("async") {
        return true;
    }
    if first.is_name() {
        return tokens.get(idx + 1).is_some_and(|t| t.is_punct("=>"));
    }
    if first.is_punct("(") {
        let close = tokens[idx + 1..]
            .iter()
            .position(|t| t.depth == first.depth && t.is_punct(")"))
            .map(|offset| idx + 1 + offset);
        return close
            .and_then(|c| tokens.get(c + 1))
            .is_some_and(|t| t.is_punct("=>"));
    }
    false
}

fn regex_allowed(prev: Option<&Token<'_>>) -> bool {
    match prev {
        None => true,
        Some(t) => match t.kind {
            TokenKind::Punct => !matches!(t.text, ")" | "]"),
            TokenKind::Ident => REGEX_PREFIX_KEYWORDS.contains(&t.text),
            TokenKind::Literal => false,
        },
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn tokenize(source: &str) -> Vec<Token<'_>> {
    let bytes = source.as_bytes();
    let mut tokens: Vec<Token<'_>> = Vec::new();
    let mut depth = 0usize;
    let mut newline_before = false;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        let start = i;

        let kind = match b {
            b'\n' => {
                newline_before = true;
                i += 1;
                continue;
            }
            _ if b.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'/' if next == Some(b'/') => {
                i = find_byte(bytes, i, b'\n');
                continue;
            }
            b'/' if next == Some(b'*') => {
                let end = find_block_comment_end(bytes, i + 2);
                newline_before |= bytes[i..end].contains(&b'\n');
                i = end;
                continue;
            }
            b'\'' | b'"' => {
                i = skip_string(bytes, i, b);
                TokenKind::Literal
            }
            b'`' => {
                i = skip_template(bytes, i);
                TokenKind::Literal
            }
            b'/' if regex_allowed(tokens.last()) => {
                i = skip_regex(bytes, i);
                TokenKind::Literal
            }
            b'{' | b'(' | b'[' => {
                i += 1;
                tokens.push(Token {
                    kind: TokenKind::Punct,
                    text: &source[start..i],
                    depth,
                    newline_before,
                });
                depth += 1;
                newline_before = false;
                continue;
            }
            b'}' | b')' | b']' => {
                depth = depth.saturating_sub(1);
                i += 1;
                TokenKind::Punct
            }
            b'=' if next == Some(b'>') => {
                i += 2;
                TokenKind::Punct
            }
            _ if b.is_ascii_digit() => {
                while i < bytes.len() && (is_ident_byte(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
                TokenKind::Literal
            }
            _ if is_ident_byte(b) => {
                while i < bytes.len() && is_ident_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Ident
            }
            _ => {
                i += 1;
                TokenKind::Punct
            }
        };

        tokens.push(Token {
            kind,
            text: &source[start..i],
            depth,
            newline_before,
        });
        newline_before = false;
    }

    tokens
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == needle)
        .map_or(bytes.len(), |p| from + p)
}

fn find_block_comment_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .windows(2)
        .position(|w| w == b"*/")
        .map_or(bytes.len(), |p| from + p + 2)
}

fn skip_string(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            b if b == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_template(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return i + 1,
            b'$' if bytes.get(i + 1) == Some(&b'{') => i = skip_substitution(bytes, i + 2),
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_substitution(bytes: &[u8], start: usize) -> usize {
    let mut depth = 1;
    let mut i = start;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' | b'"' => i = skip_string(bytes, i, bytes[i]),
            b'`' => i = skip_template(bytes, i),
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn skip_regex(bytes: &[u8], start: usize) -> usize {
    let mut i = start + 1;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            b'[' => {
                in_class = true;
                i += 1;
            }
            b']' => {
                in_class = false;
                i += 1;
            }
            b'/' if !in_class => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                return i;
            }
            _ => i += 1,
        }
    }
    bytes.len()
}
