//! Tokenizer for the textual IR.

use logos::Logos;

use crate::{Error, Result};

/// A lexical token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r";[^\n]*")]
pub enum Token {
    /// `%name` - local value, block label reference or named type.
    #[regex(r"%[-a-zA-Z$._0-9]+", |lex| lex.slice()[1..].to_string())]
    Local(String),

    /// `@name` - function or global.
    #[regex(r"@[-a-zA-Z$._0-9]+", |lex| lex.slice()[1..].to_string())]
    Global(String),

    /// `!N` - numbered metadata reference.
    #[regex(r"![0-9]+", |lex| lex.slice()[1..].parse::<u32>().ok())]
    MetaRef(u32),

    /// `!name` - metadata kind, e.g. `!llvm.loop`.
    #[regex(r"![a-zA-Z_][a-zA-Z._0-9]*", |lex| lex.slice()[1..].to_string())]
    MetaName(String),

    /// `!"text"`
    #[regex(r#"!"[^"]*""#, |lex| { let s = lex.slice(); s[2..s.len() - 1].to_string() })]
    MetaString(String),

    /// `!{` - opens a metadata node.
    #[token("!{")]
    MetaOpen,

    /// `"text"`
    #[regex(r#""[^"]*""#, |lex| { let s = lex.slice(); s[1..s.len() - 1].to_string() })]
    Str(String),

    /// `name:` - block label definition.
    #[regex(r"[-a-zA-Z$._0-9]+:", |lex| { let s = lex.slice(); s[..s.len() - 1].to_string() })]
    LabelDef(String),

    /// Keywords, type names, opcodes.
    #[regex(r"[a-zA-Z_][a-zA-Z_0-9]*", |lex| lex.slice().to_string())]
    Word(String),

    /// Integer literal.
    #[regex(r"-?[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Int(i64),

    /// `=`
    #[token("=")]
    Equals,
    /// `,`
    #[token(",")]
    Comma,
    /// `(`
    #[token("(")]
    LParen,
    /// `)`
    #[token(")")]
    RParen,
    /// `{`
    #[token("{")]
    LBrace,
    /// `}`
    #[token("}")]
    RBrace,
    /// `[`
    #[token("[")]
    LBracket,
    /// `]`
    #[token("]")]
    RBracket,
    /// `...`
    #[token("...")]
    Ellipsis,
}

impl Token {
    /// Short human-readable description used in parse errors.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Token::Local(n) => format!("'%{n}'"),
            Token::Global(n) => format!("'@{n}'"),
            Token::MetaRef(n) => format!("'!{n}'"),
            Token::MetaName(n) => format!("'!{n}'"),
            Token::MetaString(s) => format!("'!\"{s}\"'"),
            Token::MetaOpen => "'!{'".to_string(),
            Token::Str(s) => format!("'\"{s}\"'"),
            Token::LabelDef(n) => format!("label '{n}:'"),
            Token::Word(w) => format!("'{w}'"),
            Token::Int(v) => format!("'{v}'"),
            Token::Equals => "'='".to_string(),
            Token::Comma => "','".to_string(),
            Token::LParen => "'('".to_string(),
            Token::RParen => "')'".to_string(),
            Token::LBrace => "'{'".to_string(),
            Token::RBrace => "'}'".to_string(),
            Token::LBracket => "'['".to_string(),
            Token::RBracket => "']'".to_string(),
            Token::Ellipsis => "'...'".to_string(),
        }
    }
}

/// A token with its 1-based source position.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    /// The token.
    pub token: Token,
    /// Line of the first character.
    pub line: usize,
    /// Column of the first character.
    pub column: usize,
}

/// Splits `source` into tokens.
///
/// # Errors
///
/// Returns [`Error::Parse`] at the first character sequence that is not a
/// token.
pub fn tokenize(source: &str) -> Result<Vec<Spanned>> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(source);
    let mut line = 1;
    let mut line_start = 0;
    let mut scanned = 0;

    while let Some(result) = lexer.next() {
        let span = lexer.span();
        for (offset, byte) in source.as_bytes()[scanned..span.start].iter().enumerate() {
            if *byte == b'\n' {
                line += 1;
                line_start = scanned + offset + 1;
            }
        }
        scanned = span.start;
        let column = span.start - line_start + 1;
        match result {
            Ok(token) => tokens.push(Spanned {
                token,
                line,
                column,
            }),
            Err(()) => {
                return Err(Error::Parse {
                    line,
                    column,
                    message: format!("unexpected input '{}'", lexer.slice()),
                })
            }
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source)
            .map(|t| t.into_iter().map(|s| s.token).collect())
            .unwrap_or_default()
    }

    #[test]
    fn test_instruction_tokens() {
        assert_eq!(
            kinds("%sum.next = add nsw i32 %sum, -1"),
            vec![
                Token::Local("sum.next".into()),
                Token::Equals,
                Token::Word("add".into()),
                Token::Word("nsw".into()),
                Token::Word("i32".into()),
                Token::Local("sum".into()),
                Token::Comma,
                Token::Int(-1),
            ]
        );
    }

    #[test]
    fn test_labels_and_metadata() {
        assert_eq!(
            kinds("for.body: ; comment\n  br label %for.cond, !llvm.loop !7\n!7 = distinct !{!7, !\"x\"}"),
            vec![
                Token::LabelDef("for.body".into()),
                Token::Word("br".into()),
                Token::Word("label".into()),
                Token::Local("for.cond".into()),
                Token::Comma,
                Token::MetaName("llvm.loop".into()),
                Token::MetaRef(7),
                Token::MetaRef(7),
                Token::Equals,
                Token::Word("distinct".into()),
                Token::MetaOpen,
                Token::MetaRef(7),
                Token::Comma,
                Token::MetaString("x".into()),
                Token::RBrace,
            ]
        );
    }

    #[test]
    fn test_positions() -> Result<()> {
        let tokens = tokenize("define\n  void @f")?;
        assert_eq!((tokens[0].line, tokens[0].column), (1, 1));
        assert_eq!((tokens[1].line, tokens[1].column), (2, 3));
        assert_eq!((tokens[2].line, tokens[2].column), (2, 8));
        Ok(())
    }

    #[test]
    fn test_bad_input_reports_position() {
        match tokenize("ret void\n  #") {
            Err(Error::Parse { line, column, .. }) => assert_eq!((line, column), (2, 3)),
            other => panic!("unexpected {other:?}"),
        }
    }
}
