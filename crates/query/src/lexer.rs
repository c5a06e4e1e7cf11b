//! Tokenizer for the AQL subset
//!
//! Keywords are case-insensitive; identifiers keep their case.
//! Strings accept single or double quotes with `\` escapes.

use themis_core::{Error, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Keywords
    For,
    In,
    Filter,
    Let,
    Collect,
    Sort,
    Limit,
    Return,
    Asc,
    Desc,
    Outbound,
    Inbound,
    Any,
    Graph,
    With,
    Count,
    Into,
    And,
    Or,
    Not,
    True,
    False,
    Null,
    // Values
    Ident(String),
    Number(f64),
    Integer(i64),
    Str(String),
    // Punctuation
    Eq,        // ==
    Ne,        // !=
    Le,        // <=
    Ge,        // >=
    Lt,        // <
    Gt,        // >
    AndAnd,    // &&
    OrOr,      // ||
    Bang,      // !
    Assign,    // =
    Plus,
    Minus,
    Star,
    Slash,
    Dot,
    DotDot,    // ..
    Comma,
    Colon,
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Eof,
}

fn keyword(word: &str) -> Option<Token> {
    Some(match word.to_ascii_uppercase().as_str() {
        "FOR" => Token::For,
        "IN" => Token::In,
        "FILTER" => Token::Filter,
        "LET" => Token::Let,
        "COLLECT" => Token::Collect,
        "SORT" => Token::Sort,
        "LIMIT" => Token::Limit,
        "RETURN" => Token::Return,
        "ASC" => Token::Asc,
        "DESC" => Token::Desc,
        "OUTBOUND" => Token::Outbound,
        "INBOUND" => Token::Inbound,
        "ANY" => Token::Any,
        "GRAPH" => Token::Graph,
        "WITH" => Token::With,
        "COUNT" => Token::Count,
        "INTO" => Token::Into,
        "AND" => Token::And,
        "OR" => Token::Or,
        "NOT" => Token::Not,
        "TRUE" => Token::True,
        "FALSE" => Token::False,
        "NULL" => Token::Null,
        _ => return None,
    })
}

/// Tokenize a query string.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let bytes: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            c if c.is_whitespace() => {
                i += 1;
            }
            '/' if bytes.get(i + 1) == Some(&'/') => {
                // Line comment.
                while i < bytes.len() && bytes[i] != '\n' {
                    i += 1;
                }
            }
            '=' if bytes.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Eq);
                i += 2;
            }
            '=' => {
                tokens.push(Token::Assign);
                i += 1;
            }
            '!' if bytes.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ne);
                i += 2;
            }
            '!' => {
                tokens.push(Token::Bang);
                i += 1;
            }
            '<' if bytes.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Le);
                i += 2;
            }
            '<' => {
                tokens.push(Token::Lt);
                i += 1;
            }
            '>' if bytes.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Ge);
                i += 2;
            }
            '>' => {
                tokens.push(Token::Gt);
                i += 1;
            }
            '&' if bytes.get(i + 1) == Some(&'&') => {
                tokens.push(Token::AndAnd);
                i += 2;
            }
            '|' if bytes.get(i + 1) == Some(&'|') => {
                tokens.push(Token::OrOr);
                i += 2;
            }
            '.' if bytes.get(i + 1) == Some(&'.') => {
                tokens.push(Token::DotDot);
                i += 2;
            }
            '.' => {
                tokens.push(Token::Dot);
                i += 1;
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            ':' => {
                tokens.push(Token::Colon);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '[' => {
                tokens.push(Token::LBracket);
                i += 1;
            }
            ']' => {
                tokens.push(Token::RBracket);
                i += 1;
            }
            '{' => {
                tokens.push(Token::LBrace);
                i += 1;
            }
            '}' => {
                tokens.push(Token::RBrace);
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match bytes.get(i) {
                        None => {
                            return Err(Error::InvalidArgument(
                                "unterminated string literal".to_string(),
                            ))
                        }
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some('\\') => {
                            let escaped = bytes.get(i + 1).ok_or_else(|| {
                                Error::InvalidArgument("dangling escape in string".to_string())
                            })?;
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                other => *other,
                            });
                            i += 2;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() => {
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                // A single dot followed by a digit is a fraction; `..`
                // is the range operator.
                let mut is_float = false;
                if i < bytes.len()
                    && bytes[i] == '.'
                    && bytes.get(i + 1).is_some_and(|c| c.is_ascii_digit())
                {
                    is_float = true;
                    i += 1;
                    while i < bytes.len() && bytes[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let text: String = bytes[start..i].iter().collect();
                if is_float {
                    let value: f64 = text.parse().map_err(|_| {
                        Error::InvalidArgument(format!("malformed number {text:?}"))
                    })?;
                    tokens.push(Token::Number(value));
                } else {
                    let value: i64 = text.parse().map_err(|_| {
                        Error::InvalidArgument(format!("malformed integer {text:?}"))
                    })?;
                    tokens.push(Token::Integer(value));
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_alphanumeric() || bytes[i] == '_') {
                    i += 1;
                }
                let word: String = bytes[start..i].iter().collect();
                tokens.push(keyword(&word).unwrap_or(Token::Ident(word)));
            }
            other => {
                return Err(Error::InvalidArgument(format!(
                    "unexpected character {other:?} in query"
                )))
            }
        }
    }
    tokens.push(Token::Eof);
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_case_insensitive() {
        let tokens = tokenize("for FOR For").unwrap();
        assert_eq!(tokens, vec![Token::For, Token::For, Token::For, Token::Eof]);
    }

    #[test]
    fn test_operators() {
        let tokens = tokenize("== != <= >= < > && || !").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Eq,
                Token::Ne,
                Token::Le,
                Token::Ge,
                Token::Lt,
                Token::Gt,
                Token::AndAnd,
                Token::OrOr,
                Token::Bang,
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_numbers_and_range() {
        let tokens = tokenize("1..3 2.5 42").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Integer(1),
                Token::DotDot,
                Token::Integer(3),
                Token::Number(2.5),
                Token::Integer(42),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_member_access_vs_range() {
        let tokens = tokenize("doc.age").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("doc".to_string()),
                Token::Dot,
                Token::Ident("age".to_string()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_strings_both_quotes() {
        let tokens = tokenize(r#""double" 'single' "esc\"aped""#).unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Str("double".to_string()),
                Token::Str("single".to_string()),
                Token::Str("esc\"aped".to_string()),
                Token::Eof
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        assert!(tokenize("\"oops").is_err());
    }

    #[test]
    fn test_line_comment_skipped() {
        let tokens = tokenize("FOR // comment\n x").unwrap();
        assert_eq!(
            tokens,
            vec![Token::For, Token::Ident("x".to_string()), Token::Eof]
        );
    }

    #[test]
    fn test_unexpected_character() {
        assert!(tokenize("FOR §").is_err());
    }
}
