//! Parser for the descriptive specification text.
//!
//! Grammar:
//!
//! ```text
//!   specification → '(' (label (',' label)*)? ')' '{' match* '}' ('=>' projection)?
//!   label         → IDENT ':' IDENT
//!   match         → IDENT ':' IDENT '[' condition* ']'
//!   condition     → path | '!'? 'E' '{' match* '}'
//!   path          → IDENT role* '=' IDENT role*
//!   role          → '->' IDENT ':' IDENT
//!   projection    → '{' (IDENT '=' component)* '}' | '#' IDENT | IDENT ('.' IDENT)?
//!   component     → '{' match* '}' ('=>' projection)? | projection
//! ```

use logos::Logos;

use crate::error::SpecificationError;

use super::{
    Condition, ExistentialCondition, Label, Match, NamedProjection, PathCondition, Projection, Role,
    Specification,
};

/// Maximum nesting depth to prevent stack overflow on pathological input.
const MAX_DEPTH: usize = 64;

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+")]
enum Token {
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
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token("->")]
    Arrow,
    #[token("=>")]
    FatArrow,
    #[token("=")]
    Equals,
    #[token("!")]
    Bang,
    #[token("#")]
    Hash,
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*")]
    Identifier,
}

#[derive(Debug, Clone, Copy)]
struct Lexeme<'a> {
    token: Token,
    text: &'a str,
    offset: usize,
}

fn tokenize(input: &str) -> Result<Vec<Lexeme<'_>>, SpecificationError> {
    let mut lex = Token::lexer(input);
    let mut tokens = Vec::new();
    while let Some(result) = lex.next() {
        let offset = lex.span().start;
        match result {
            Ok(token) => tokens.push(Lexeme {
                token,
                text: lex.slice(),
                offset,
            }),
            Err(()) => {
                return Err(SpecificationError::Parse {
                    position: offset,
                    message: format!("unexpected character '{}'", lex.slice()),
                })
            }
        }
    }
    Ok(tokens)
}

/// Parse and validate a specification in descriptive text form.
pub fn parse_specification(input: &str) -> Result<Specification, SpecificationError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        end: input.len(),
        depth: 0,
    };
    let spec = parser.specification()?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(SpecificationError::Parse {
            position: extra.offset,
            message: format!("unexpected trailing input '{}'", extra.text),
        });
    }
    spec.validate()?;
    Ok(spec)
}

struct Parser<'t, 'a> {
    tokens: &'t [Lexeme<'a>],
    pos: usize,
    end: usize,
    depth: usize,
}

impl<'t, 'a> Parser<'t, 'a> {
    fn error(&self, message: impl Into<String>) -> SpecificationError {
        let position = self.tokens.get(self.pos).map_or(self.end, |l| l.offset);
        SpecificationError::Parse {
            position,
            message: message.into(),
        }
    }

    fn enter(&mut self) -> Result<(), SpecificationError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            Err(self.error("maximum nesting depth exceeded"))
        } else {
            Ok(())
        }
    }

    fn leave(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn peek(&self) -> Option<Token> {
        self.peek_at(0)
    }

    fn peek_at(&self, n: usize) -> Option<Token> {
        self.tokens.get(self.pos + n).map(|l| l.token)
    }

    fn eat(&mut self, token: Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token, what: &str) -> Result<(), SpecificationError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn identifier(&mut self, what: &str) -> Result<&'a str, SpecificationError> {
        match self.tokens.get(self.pos) {
            Some(l) if l.token == Token::Identifier => {
                self.pos += 1;
                Ok(l.text)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn specification(&mut self) -> Result<Specification, SpecificationError> {
        self.expect(Token::LParen, "'('")?;
        let mut given = Vec::new();
        if self.peek() != Some(Token::RParen) {
            loop {
                given.push(self.label()?);
                if !self.eat(Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "')'")?;
        self.expect(Token::LBrace, "'{'")?;
        let matches = self.matches()?;
        self.expect(Token::RBrace, "'}'")?;
        let projection = if self.eat(Token::FatArrow) {
            self.projection()?
        } else {
            Projection::empty()
        };
        Ok(Specification {
            given,
            matches,
            projection,
        })
    }

    fn label(&mut self) -> Result<Label, SpecificationError> {
        let name = self.identifier("label name")?;
        self.expect(Token::Colon, "':'")?;
        let fact_type = self.identifier("fact type")?;
        Ok(Label::new(name, fact_type))
    }

    fn matches(&mut self) -> Result<Vec<Match>, SpecificationError> {
        let mut matches = Vec::new();
        while self.peek() == Some(Token::Identifier) {
            matches.push(self.match_()?);
        }
        Ok(matches)
    }

    fn match_(&mut self) -> Result<Match, SpecificationError> {
        self.enter()?;
        let unknown = self.label()?;
        self.expect(Token::LBracket, "'['")?;
        let mut conditions = Vec::new();
        while self.peek() != Some(Token::RBracket) {
            if self.peek().is_none() {
                return Err(self.error("expected ']'"));
            }
            conditions.push(self.condition(&unknown.name)?);
        }
        self.pos += 1;
        self.leave();
        Ok(Match { unknown, conditions })
    }

    fn condition(&mut self, unknown: &str) -> Result<Condition, SpecificationError> {
        let is_existential = self.peek() == Some(Token::Bang)
            || (self.tokens.get(self.pos).is_some_and(|l| l.text == "E")
                && self.peek_at(1) == Some(Token::LBrace));
        if is_existential {
            let exists = !self.eat(Token::Bang);
            let marker = self.identifier("'E'")?;
            if marker != "E" {
                self.pos -= 1;
                return Err(self.error("expected 'E'"));
            }
            self.expect(Token::LBrace, "'{'")?;
            let matches = self.matches()?;
            self.expect(Token::RBrace, "'}'")?;
            return Ok(Condition::Existential(ExistentialCondition { exists, matches }));
        }

        let start = self.identifier("path condition")?;
        if start != unknown {
            self.pos -= 1;
            return Err(self.error(format!("path condition must start with '{unknown}'")));
        }
        let roles_left = self.roles()?;
        self.expect(Token::Equals, "'='")?;
        let label_right = self.identifier("label")?;
        let roles_right = self.roles()?;
        Ok(Condition::Path(PathCondition::new(roles_left, label_right, roles_right)))
    }

    fn roles(&mut self) -> Result<Vec<Role>, SpecificationError> {
        let mut roles = Vec::new();
        while self.eat(Token::Arrow) {
            let name = self.identifier("role name")?;
            self.expect(Token::Colon, "':'")?;
            let predecessor_type = self.identifier("predecessor type")?;
            roles.push(Role::new(name, predecessor_type));
        }
        Ok(roles)
    }

    fn projection(&mut self) -> Result<Projection, SpecificationError> {
        self.enter()?;
        let projection = match self.peek() {
            Some(Token::LBrace) => self.compound()?,
            Some(Token::Hash) => {
                self.pos += 1;
                Projection::hash(self.identifier("label")?)
            }
            Some(Token::Identifier) => {
                let text = self.identifier("label")?;
                match text.split_once('.') {
                    Some((label, field)) => Projection::field(label, field),
                    None => Projection::simple(text),
                }
            }
            _ => return Err(self.error("expected projection")),
        };
        self.leave();
        Ok(projection)
    }

    fn compound(&mut self) -> Result<Projection, SpecificationError> {
        self.expect(Token::LBrace, "'{'")?;
        let mut components = Vec::new();
        while self.peek() == Some(Token::Identifier) {
            let name = self.identifier("component name")?.to_string();
            self.expect(Token::Equals, "'='")?;
            let projection = self.component()?;
            components.push(NamedProjection { name, projection });
        }
        self.expect(Token::RBrace, "'}'")?;
        Ok(Projection::Compound { components })
    }

    fn component(&mut self) -> Result<Projection, SpecificationError> {
        let is_collection = self.peek() == Some(Token::LBrace)
            && self.peek_at(1) == Some(Token::Identifier)
            && self.peek_at(2) == Some(Token::Colon);
        if !is_collection {
            return self.projection();
        }
        self.enter()?;
        self.expect(Token::LBrace, "'{'")?;
        let matches = self.matches()?;
        self.expect(Token::RBrace, "'}'")?;
        let projection = if self.eat(Token::FatArrow) {
            self.projection()?
        } else {
            Projection::empty()
        };
        self.leave();
        Ok(Projection::collection(matches, projection))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_description() {
        let text = "\
(company: Company, user: User) {
    office: Office [
        office->company: Company = company
        E {
            manager: Manager [
                manager->office: Office = office
                manager->user: User = user
            ]
        }
        !E {
            closure: Office.Closure [
                closure->office: Office = office
            ]
        }
    ]
} => {
    city = office.city
    id = #office
    headcount = {
        employee: Employee [
            employee->office: Office = office
        ]
    } => employee
}
";
        let spec = parse_specification(text).unwrap();
        assert_eq!(spec.to_string(), text);
    }

    #[test]
    fn test_parse_right_roles() {
        let spec = parse_specification(
            "(office: Office) { company: Company [ company = office->company: Company ] } => company",
        )
        .unwrap();
        let path = spec.matches[0].path_conditions().next().unwrap();
        assert!(path.roles_left.is_empty());
        assert_eq!(path.roles_right, vec![Role::new("company", "Company")]);
    }

    #[test]
    fn test_parse_rejects_bad_character() {
        let err = parse_specification("(a: A) { } => a ;").unwrap_err();
        assert!(matches!(err, SpecificationError::Parse { position: 16, .. }));
    }

    #[test]
    fn test_parse_rejects_path_from_other_label() {
        let err = parse_specification(
            "(c: Company) { o: Office [ x->company: Company = c ] }",
        )
        .unwrap_err();
        assert!(matches!(err, SpecificationError::Parse { .. }));
    }

    #[test]
    fn test_parse_rejects_trailing_tokens() {
        let err = parse_specification("(c: Company) { } => c c").unwrap_err();
        assert!(matches!(err, SpecificationError::Parse { .. }));
    }

    #[test]
    fn test_parse_validates() {
        let err = parse_specification("(c: Company) { o: Office [ ] } => o").unwrap_err();
        assert!(matches!(err, SpecificationError::MatchWithoutPath { .. }));
    }
}
