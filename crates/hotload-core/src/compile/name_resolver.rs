//! Extracts the fully-qualified name of the type a unit declares.
//!
//! This is a lexical scan, not a parse: it has to produce a name for source
//! that does not compile yet so the toolchain can report the real problem.
//! Comments, literals, lifetimes and attributes are skipped; braces are
//! tracked so that only declarations at module level count.

use std::iter::Peekable;

use crate::error::{Error, Result};

/// Resolve the fully-qualified name (`outer::inner::Type`) of the first
/// top-level `struct`, `enum` or `union` declared in `source`.
///
/// Inline modules enclosing the declaration form the path prefix.
/// Out-of-line modules (`mod foo;`) and items nested inside functions,
/// impl blocks or macros are ignored.
pub fn resolve_name(source: &str) -> Result<String> {
    let mut tokens = Scanner::new(source).peekable();
    let mut depth = 0usize;
    // (module name, brace depth inside the module)
    let mut modules: Vec<(&str, usize)> = Vec::new();

    while let Some(token) = tokens.next() {
        match token {
            Token::Punct('#') => skip_attribute(&mut tokens),
            Token::OpenBrace => depth += 1,
            Token::CloseBrace => {
                if modules.last().is_some_and(|(_, d)| *d == depth) {
                    modules.pop();
                }
                depth = depth.saturating_sub(1);
            }
            Token::Ident("mod") if depth == modules.len() => {
                let Some(&Token::Ident(name)) = tokens.peek() else {
                    continue;
                };
                tokens.next();
                if tokens.peek() == Some(&Token::OpenBrace) {
                    tokens.next();
                    depth += 1;
                    modules.push((name, depth));
                }
            }
            Token::Ident("struct" | "enum" | "union") if depth == modules.len() => {
                if let Some(&Token::Ident(name)) = tokens.peek() {
                    let mut path: Vec<&str> = modules.iter().map(|(m, _)| *m).collect();
                    path.push(name);
                    return Ok(path.join("::"));
                }
            }
            _ => {}
        }
    }

    Err(Error::NameResolution(
        "no top-level struct, enum or union declaration found".to_string(),
    ))
}

fn skip_attribute(tokens: &mut Peekable<Scanner<'_>>) {
    if tokens.peek() == Some(&Token::Punct('!')) {
        tokens.next();
    }
    if tokens.peek() != Some(&Token::Punct('[')) {
        return;
    }

    let mut depth = 0usize;
    for token in tokens.by_ref() {
        match token {
            Token::Punct('[') => depth += 1,
            Token::Punct(']') => {
                depth -= 1;
                if depth == 0 {
                    return;
                }
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    OpenBrace,
    CloseBrace,
    Punct(char),
}

struct Scanner<'a> {
    src: &'a str,
    pos: usize,
}

fn is_ident_start(c: char) -> bool {
    c == '_' || c.is_alphabetic()
}

fn is_ident_continue(c: char) -> bool {
    c == '_' || c.is_alphanumeric()
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_nth(&self, n: usize) -> Option<char> {
        self.rest().chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek_char()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn eat_while(&mut self, pred: impl Fn(char) -> bool) -> &'a str {
        let start = self.pos;
        while self.peek_char().is_some_and(&pred) {
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn skip_block_comment(&mut self) {
        self.pos += 2;
        let mut depth = 1usize;
        while depth > 0 {
            let rest = self.rest();
            if rest.is_empty() {
                return;
            }
            if rest.starts_with("/*") {
                depth += 1;
                self.pos += 2;
            } else if rest.starts_with("*/") {
                depth -= 1;
                self.pos += 2;
            } else {
                self.bump();
            }
        }
    }

    /// Positioned at an opening `"`.
    fn skip_quoted(&mut self) {
        self.bump();
        while let Some(c) = self.bump() {
            match c {
                '\\' => {
                    self.bump();
                }
                '"' => return,
                _ => {}
            }
        }
    }

    /// Positioned after an `r`/`br`/`cr` prefix. Returns false (consuming
    /// nothing) when no raw string starts here.
    fn skip_raw_string(&mut self) -> bool {
        let rest = self.rest();
        let hashes = rest.chars().take_while(|&c| c == '#').count();
        if !rest[hashes..].starts_with('"') {
            return false;
        }
        self.pos += hashes + 1;

        let terminator = format!("\"{}", "#".repeat(hashes));
        match self.rest().find(&terminator) {
            Some(i) => self.pos += i + terminator.len(),
            None => self.pos = self.src.len(),
        }
        true
    }

    /// Positioned at a `'`: either a char literal or a lifetime/label.
    fn skip_char_or_lifetime(&mut self) {
        self.bump();
        match self.peek_char() {
            Some('\\') => {
                self.bump();
                self.bump();
                self.eat_while(|c| c != '\'' && c != '\n');
                if self.peek_char() == Some('\'') {
                    self.bump();
                }
            }
            Some(_) if self.peek_nth(1) == Some('\'') => {
                self.bump();
                self.bump();
            }
            _ => {
                self.eat_while(is_ident_continue);
            }
        }
    }
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        loop {
            self.eat_while(char::is_whitespace);
            let c = self.peek_char()?;
            let rest = self.rest();

            if rest.starts_with("//") {
                self.eat_while(|c| c != '\n');
                continue;
            }
            if rest.starts_with("/*") {
                self.skip_block_comment();
                continue;
            }

            match c {
                '"' => self.skip_quoted(),
                '\'' => self.skip_char_or_lifetime(),
                '{' => {
                    self.bump();
                    return Some(Token::OpenBrace);
                }
                '}' => {
                    self.bump();
                    return Some(Token::CloseBrace);
                }
                c if c.is_ascii_digit() => {
                    self.eat_while(is_ident_continue);
                }
                c if is_ident_start(c) => {
                    let word = self.eat_while(is_ident_continue);
                    match (word, self.peek_char()) {
                        ("b", Some('\'')) => self.skip_char_or_lifetime(),
                        ("b" | "c", Some('"')) => self.skip_quoted(),
                        ("r" | "br" | "cr", Some('"' | '#')) => {
                            if !self.skip_raw_string() && word == "r" {
                                // raw identifier: r#type
                                self.bump();
                                let ident = self.eat_while(is_ident_continue);
                                if !ident.is_empty() {
                                    return Some(Token::Ident(ident));
                                }
                            }
                        }
                        _ => return Some(Token::Ident(word)),
                    }
                }
                other => {
                    self.bump();
                    return Some(Token::Punct(other));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_root_level_type() {
        let name = resolve_name("pub struct Greeter;\nimpl Greeter {}").unwrap();
        assert_eq!(name, "Greeter");
    }

    #[test]
    fn test_inline_modules_form_the_path() {
        let source = r#"
            pub mod p {
                pub mod inner {
                    #[derive(Default)]
                    pub struct Greeter;
                }
            }
        "#;
        assert_eq!(resolve_name(source).unwrap(), "p::inner::Greeter");
    }

    #[test]
    fn test_first_declaration_wins_after_module_closes() {
        let source = r#"
            mod helpers { fn unused() {} }
            pub enum Mode { A, B }
            pub struct Later;
        "#;
        assert_eq!(resolve_name(source).unwrap(), "Mode");
    }

    #[test]
    fn test_ignores_comments_strings_and_attributes() {
        let source = r##"
            // struct Commented;
            /* struct Block; /* nested struct Deeper; */ */
            #![doc = "struct InnerDoc"]
            #[doc = r#"struct RawDoc"#]
            const S: &str = "struct InString {";
            const C: char = '{';
            const E: char = '\'';
            pub union Bits { a: u32, b: f32 }
        "##;
        assert_eq!(resolve_name(source).unwrap(), "Bits");
    }

    #[test]
    fn test_ignores_items_nested_in_bodies() {
        let source = r#"
            fn setup<'a>(x: &'a str) -> &'a str {
                struct Local;
                x
            }
            impl<'a> Trait for &'a str { }
            pub struct Outer;
        "#;
        assert_eq!(resolve_name(source).unwrap(), "Outer");
    }

    #[test]
    fn test_out_of_line_module_is_not_a_prefix() {
        let source = "mod other;\npub struct Plain;";
        assert_eq!(resolve_name(source).unwrap(), "Plain");
    }

    #[test]
    fn test_raw_identifiers() {
        let source = "pub mod r#async { pub struct r#Handler; }";
        assert_eq!(resolve_name(source).unwrap(), "async::Handler");
    }

    #[test]
    fn test_tolerates_unbalanced_braces_after_declaration() {
        let source = r#"
            pub mod p {
                #[derive(Default)]
                pub struct Greeter;
                impl Greeter {
                    pub fn greet(&self) -> String { "hello".to_string() }
            }
        "#;
        assert_eq!(resolve_name(source).unwrap(), "p::Greeter");
    }

    #[test]
    fn test_no_type_declaration() {
        for source in [
            "",
            "fn main() {}",
            "pub trait Speak { fn speak(&self); }",
            "fn f() { struct Hidden; }",
            "// pub struct Commented;",
        ] {
            let err = resolve_name(source).unwrap_err();
            assert!(matches!(err, Error::NameResolution(_)), "{source:?}");
        }
    }

    #[test]
    fn test_stable_across_calls() {
        let source = "mod a { mod b { pub struct C<T>(T); } }";
        let first = resolve_name(source).unwrap();
        for _ in 0..3 {
            assert_eq!(resolve_name(source).unwrap(), first);
        }
        assert_eq!(first, "a::b::C");
    }
}
