//! Tokenizer for selector expressions.

use std::iter::Peekable;
use std::str::CharIndices;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    Ident(String),
    Str(String),
    Long(i64),
    Double(f64),
    True,
    False,
    Null,
    Not,
    And,
    Or,
    Between,
    Like,
    In,
    Is,
    Escape,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
    Comma,
}

impl Token {
    pub(crate) fn describe(&self) -> String {
        match self {
            Token::Ident(name) => format!("identifier '{name}'"),
            Token::Str(s) => format!("string '{s}'"),
            Token::Long(v) => format!("number {v}"),
            Token::Double(v) => format!("number {v}"),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::True => "TRUE",
            Token::False => "FALSE",
            Token::Null => "NULL",
            Token::Not => "NOT",
            Token::And => "AND",
            Token::Or => "OR",
            Token::Between => "BETWEEN",
            Token::Like => "LIKE",
            Token::In => "IN",
            Token::Is => "IS",
            Token::Escape => "ESCAPE",
            Token::Eq => "=",
            Token::Ne => "<>",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Comma => ",",
            Token::Ident(_) | Token::Str(_) | Token::Long(_) | Token::Double(_) => "",
        }
    }
}

fn keyword(word: &str) -> Option<Token> {
    let token = match word.to_ascii_uppercase().as_str() {
        "TRUE" => Token::True,
        "FALSE" => Token::False,
        "NULL" => Token::Null,
        "NOT" => Token::Not,
        "AND" => Token::And,
        "OR" => Token::Or,
        "BETWEEN" => Token::Between,
        "LIKE" => Token::Like,
        "IN" => Token::In,
        "IS" => Token::Is,
        "ESCAPE" => Token::Escape,
        _ => return None,
    };
    Some(token)
}

struct Lexer<'a> {
    src: &'a str,
    chars: Peekable<CharIndices<'a>>,
}

pub(crate) fn tokenize(src: &str) -> Result<Vec<Token>, String> {
    let mut lexer = Lexer {
        src,
        chars: src.char_indices().peekable(),
    };
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token(tokens.last())? {
        tokens.push(token);
    }
    Ok(tokens)
}

impl Lexer<'_> {
    fn next_token(&mut self, prev: Option<&Token>) -> Result<Option<Token>, String> {
        while self.chars.next_if(|(_, c)| c.is_whitespace()).is_some() {}

        let Some(&(start, c)) = self.chars.peek() else {
            return Ok(None);
        };

        let token = match c {
            '\'' => self.string()?,
            '0'..='9' => self.number(start)?,
            '.' => self.number(start)?,
            // a leading minus belongs to the literal, so i64::MIN is representable
            '-' if expects_operand(prev) && self.digit_after(start) => self.number(start)?,
            c if c.is_alphabetic() || c == '_' || c == '$' => self.word(start),
            _ => {
                self.chars.next();
                match c {
                    '=' => Token::Eq,
                    '<' => {
                        if self.chars.next_if(|(_, c)| *c == '>').is_some() {
                            Token::Ne
                        } else if self.chars.next_if(|(_, c)| *c == '=').is_some() {
                            Token::Le
                        } else {
                            Token::Lt
                        }
                    }
                    '>' => {
                        if self.chars.next_if(|(_, c)| *c == '=').is_some() {
                            Token::Ge
                        } else {
                            Token::Gt
                        }
                    }
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    ',' => Token::Comma,
                    other => return Err(format!("unexpected character '{other}' at {start}")),
                }
            }
        };
        Ok(Some(token))
    }

    fn word(&mut self, start: usize) -> Token {
        let mut end = start;
        while let Some((i, c)) = self
            .chars
            .next_if(|(_, c)| c.is_alphanumeric() || *c == '_' || *c == '$')
        {
            end = i + c.len_utf8();
        }
        let word = &self.src[start..end];
        keyword(word).unwrap_or_else(|| Token::Ident(word.to_string()))
    }

    /// String literal; a doubled quote stands for one quote character.
    fn string(&mut self) -> Result<Token, String> {
        self.chars.next();
        let mut value = String::new();
        loop {
            match self.chars.next() {
                Some((_, '\'')) => {
                    if self.chars.next_if(|(_, c)| *c == '\'').is_some() {
                        value.push('\'');
                    } else {
                        return Ok(Token::Str(value));
                    }
                }
                Some((_, c)) => value.push(c),
                None => return Err("unterminated string literal".to_string()),
            }
        }
    }

    fn digit_after(&self, start: usize) -> bool {
        self.src[start + 1..].starts_with(|c: char| c.is_ascii_digit() || c == '.')
    }

    fn number(&mut self, start: usize) -> Result<Token, String> {
        let mut end = start;
        if let Some((i, c)) = self.chars.next_if(|(_, c)| *c == '-') {
            end = i + c.len_utf8();
        }
        while let Some((i, c)) = self
            .chars
            .next_if(|(_, c)| c.is_ascii_alphanumeric() || *c == '.')
        {
            end = i + c.len_utf8();
            // exponent sign
            if matches!(c, 'e' | 'E') && !is_hex(&self.src[start..end]) {
                if let Some((j, sign)) = self.chars.next_if(|(_, c)| *c == '+' || *c == '-') {
                    end = j + sign.len_utf8();
                }
            }
        }
        parse_number(&self.src[start..end])
    }
}

/// True when a `-` here would start an operand rather than subtract.
fn expects_operand(prev: Option<&Token>) -> bool {
    !matches!(
        prev,
        Some(
            Token::Ident(_)
                | Token::Str(_)
                | Token::Long(_)
                | Token::Double(_)
                | Token::True
                | Token::False
                | Token::Null
                | Token::RParen
        )
    )
}

fn is_hex(text: &str) -> bool {
    text.trim_start_matches('-')
        .get(..2)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("0x"))
}

fn parse_number(text: &str) -> Result<Token, String> {
    let invalid = || format!("invalid numeric literal '{text}'");
    let lower = text.to_ascii_lowercase();
    let (sign, unsigned) = match lower.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", lower.as_str()),
    };

    if let Some(hex) = unsigned.strip_prefix("0x") {
        let digits = hex.strip_suffix('l').unwrap_or(hex);
        if digits.starts_with(['+', '-']) {
            return Err(invalid());
        }
        return i64::from_str_radix(&format!("{sign}{digits}"), 16)
            .map(Token::Long)
            .map_err(|_| invalid());
    }

    let is_approximate = lower.contains('.')
        || lower.contains('e')
        || lower.ends_with('f')
        || lower.ends_with('d');
    if is_approximate {
        let digits = lower
            .strip_suffix('f')
            .or_else(|| lower.strip_suffix('d'))
            .unwrap_or(&lower);
        return digits
            .parse::<f64>()
            .map(Token::Double)
            .map_err(|_| invalid());
    }

    let digits = unsigned.strip_suffix('l').unwrap_or(unsigned);
    if digits.len() > 1 && digits.starts_with('0') {
        return i64::from_str_radix(&format!("{sign}{}", &digits[1..]), 8)
            .map(Token::Long)
            .map_err(|_| invalid());
    }
    format!("{sign}{digits}")
        .parse::<i64>()
        .map(Token::Long)
        .map_err(|_| invalid())
}
