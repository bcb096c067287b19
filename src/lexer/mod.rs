use logos::Logos;

use crate::ast::Span;

#[derive(Logos, Debug, PartialEq, Clone)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip(r"//[^\n]*", allow_greedy = true))]
pub enum Token {
    // Keywords
    #[token("fn")]
    Function,
    #[token("let")]
    Let,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("null")]
    Null,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("return")]
    Return,

    // Operators
    #[token("=")]
    Assign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("!")]
    Bang,
    #[token("*")]
    Asterisk,
    #[token("/")]
    Slash,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("==")]
    Eq,
    #[token("!=")]
    NotEq,

    // Delimiters
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,

    // Literals
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    #[regex(r#""[^"]*""#, |lex| {
        let s = lex.slice();
        Some(s[1..s.len()-1].to_string())
    })]
    Str(String),

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),
}

impl Token {
    /// Source-like rendering used in parser messages.
    pub fn describe(&self) -> String {
        match self {
            Token::Function => "'fn'".into(),
            Token::Let => "'let'".into(),
            Token::True => "'true'".into(),
            Token::False => "'false'".into(),
            Token::Null => "'null'".into(),
            Token::If => "'if'".into(),
            Token::Else => "'else'".into(),
            Token::Return => "'return'".into(),
            Token::Assign => "'='".into(),
            Token::Plus => "'+'".into(),
            Token::Minus => "'-'".into(),
            Token::Bang => "'!'".into(),
            Token::Asterisk => "'*'".into(),
            Token::Slash => "'/'".into(),
            Token::Lt => "'<'".into(),
            Token::Gt => "'>'".into(),
            Token::Eq => "'=='".into(),
            Token::NotEq => "'!='".into(),
            Token::Comma => "','".into(),
            Token::Semicolon => "';'".into(),
            Token::Colon => "':'".into(),
            Token::LParen => "'('".into(),
            Token::RParen => "')'".into(),
            Token::LBrace => "'{'".into(),
            Token::RBrace => "'}'".into(),
            Token::LBracket => "'['".into(),
            Token::RBracket => "']'".into(),
            Token::Int(n) => format!("integer {n}"),
            Token::Str(s) => format!("string \"{s}\""),
            Token::Ident(name) => format!("identifier '{name}'"),
        }
    }
}

/// Lex source code into a stream of tokens with their byte spans.
pub fn lex(source: &str) -> Result<Vec<(Token, Span)>, LexError> {
    let mut lexer = Token::lexer(source);
    let mut tokens = Vec::new();

    while let Some(result) = lexer.next() {
        let range = lexer.span();
        match result {
            Ok(token) => tokens.push((token, Span { start: range.start, end: range.end })),
            Err(()) => {
                let snippet = source[range.clone()].to_string();
                return Err(LexError {
                    position: range.start,
                    suggestion: suggest_fix(&snippet),
                    snippet,
                });
            }
        }
    }

    Ok(tokens)
}

fn suggest_fix(bad_token: &str) -> String {
    if bad_token.starts_with('"') {
        "Close the string literal with a matching '\"'".to_string()
    } else if bad_token.chars().all(|c| c.is_ascii_digit()) {
        format!("Integer literal '{}' does not fit in 64 bits", bad_token)
    } else if bad_token == "&" || bad_token == "|" {
        "Boolean operators are not supported; use nested 'if' expressions".to_string()
    } else {
        String::new()
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Lex error at position {position}: '{snippet}'")]
pub struct LexError {
    pub position: usize,
    pub snippet: String,
    pub suggestion: String,
}
