//! Boolean expression parser shared by copy conditions and submit requirements.
//!
//! Grammar:
//!
//! ```text
//! or   := and ("OR" and)*
//! and  := not ("AND"? not)*
//! not  := ("NOT" | "-") not | term
//! term := "(" or ")" | atom
//! atom := operator ":" value
//! ```
//!
//! Adjacent terms conjoin. Values may be double-quoted.

use std::collections::BTreeSet;
use thiserror::Error;

/// Expression could not be parsed or contains an unsupported atom.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct QueryParseError(pub String);

impl QueryParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// An `operator:value` term before it is interpreted by a context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawAtom {
    pub operator: String,
    pub value: String,
}

/// A parsed predicate tree over atoms of type `A`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node<A> {
    /// `text` is the atom as written, used for explainability.
    Atom { atom: A, text: String },
    Not(Box<Node<A>>),
    And(Vec<Node<A>>),
    Or(Vec<Node<A>>),
}

/// Outcome of evaluating a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Evaluation {
    pub matched: bool,
    pub passing_atoms: BTreeSet<String>,
    pub failing_atoms: BTreeSet<String>,
}

impl<A> Node<A> {
    /// Convert every atom, failing on the first conversion error.
    pub fn try_map<B, E>(
        self,
        f: &mut impl FnMut(A, &str) -> Result<B, E>,
    ) -> Result<Node<B>, E> {
        Ok(match self {
            Node::Atom { atom, text } => {
                let mapped = f(atom, &text)?;
                Node::Atom { atom: mapped, text }
            }
            Node::Not(inner) => Node::Not(Box::new(inner.try_map(f)?)),
            Node::And(children) => Node::And(
                children
                    .into_iter()
                    .map(|c| c.try_map(f))
                    .collect::<Result<_, _>>()?,
            ),
            Node::Or(children) => Node::Or(
                children
                    .into_iter()
                    .map(|c| c.try_map(f))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Evaluate the tree.
    ///
    /// Every atom is evaluated, even where the boolean result is already
    /// decided, so that the passing and failing sets cover the whole expression.
    pub fn evaluate<E>(
        &self,
        eval_atom: &mut impl FnMut(&A) -> Result<bool, E>,
    ) -> Result<Evaluation, E> {
        let mut evaluation = Evaluation::default();
        let matched = self.eval_into(eval_atom, &mut evaluation)?;
        evaluation.matched = matched;
        Ok(evaluation)
    }

    fn eval_into<E>(
        &self,
        eval_atom: &mut impl FnMut(&A) -> Result<bool, E>,
        out: &mut Evaluation,
    ) -> Result<bool, E> {
        match self {
            Node::Atom { atom, text } => {
                let matched = eval_atom(atom)?;
                if matched {
                    out.passing_atoms.insert(text.clone());
                } else {
                    out.failing_atoms.insert(text.clone());
                }
                Ok(matched)
            }
            Node::Not(inner) => Ok(!inner.eval_into(eval_atom, out)?),
            Node::And(children) => {
                let mut all = true;
                for child in children {
                    all &= child.eval_into(eval_atom, out)?;
                }
                Ok(all)
            }
            Node::Or(children) => {
                let mut any = false;
                for child in children {
                    any |= child.eval_into(eval_atom, out)?;
                }
                Ok(any)
            }
        }
    }

    /// Whether any atom satisfies `pred`.
    pub fn any_atom(&self, pred: &impl Fn(&A) -> bool) -> bool {
        match self {
            Node::Atom { atom, .. } => pred(atom),
            Node::Not(inner) => inner.any_atom(pred),
            Node::And(children) | Node::Or(children) => children.iter().any(|c| c.any_atom(pred)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    Negate,
    And,
    Or,
    Not,
    Word(String),
}

fn tokenize(input: &str) -> Result<Vec<Token>, QueryParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        match c {
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            '-' => {
                chars.next();
                match chars.peek() {
                    Some(n) if !n.is_whitespace() && *n != ')' => tokens.push(Token::Negate),
                    _ => return Err(QueryParseError::new("dangling '-' in expression")),
                }
            }
            _ => {
                let mut word = String::new();
                let mut quoted = false;
                while let Some(&c) = chars.peek() {
                    if !quoted && (c.is_whitespace() || c == '(' || c == ')') {
                        break;
                    }
                    if c == '"' {
                        quoted = !quoted;
                    }
                    word.push(c);
                    chars.next();
                }
                if quoted {
                    return Err(QueryParseError::new(format!(
                        "unterminated quote in '{}'",
                        word
                    )));
                }
                tokens.push(match word.as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Word(word),
                });
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn parse_or(&mut self) -> Result<Node<RawAtom>, QueryParseError> {
        let mut children = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.advance();
            children.push(self.parse_and()?);
        }
        Ok(collapse(children, Node::Or))
    }

    fn parse_and(&mut self) -> Result<Node<RawAtom>, QueryParseError> {
        let mut children = vec![self.parse_not()?];
        loop {
            match self.peek() {
                None | Some(Token::Or) | Some(Token::RParen) => break,
                Some(Token::And) => {
                    self.advance();
                    children.push(self.parse_not()?);
                }
                Some(_) => children.push(self.parse_not()?),
            }
        }
        Ok(collapse(children, Node::And))
    }

    fn parse_not(&mut self) -> Result<Node<RawAtom>, QueryParseError> {
        match self.peek() {
            Some(Token::Not) | Some(Token::Negate) => {
                self.advance();
                Ok(Node::Not(Box::new(self.parse_not()?)))
            }
            _ => self.parse_term(),
        }
    }

    fn parse_term(&mut self) -> Result<Node<RawAtom>, QueryParseError> {
        match self.advance() {
            Some(Token::LParen) => {
                let inner = self.parse_or()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(QueryParseError::new("missing closing parenthesis")),
                }
            }
            Some(Token::Word(word)) => parse_atom(&word),
            Some(Token::RParen) => Err(QueryParseError::new("unexpected ')'")),
            Some(Token::And) | Some(Token::Or) => {
                Err(QueryParseError::new("operator without operand"))
            }
            Some(Token::Not) | Some(Token::Negate) => {
                Err(QueryParseError::new("negation without operand"))
            }
            None => Err(QueryParseError::new("unexpected end of expression")),
        }
    }
}

fn collapse(mut children: Vec<Node<RawAtom>>, wrap: fn(Vec<Node<RawAtom>>) -> Node<RawAtom>) -> Node<RawAtom> {
    if children.len() == 1 {
        children.remove(0)
    } else {
        wrap(children)
    }
}

fn parse_atom(word: &str) -> Result<Node<RawAtom>, QueryParseError> {
    let Some((operator, value)) = word.split_once(':') else {
        return Err(QueryParseError::new(format!("Unsupported query: {}", word)));
    };
    if operator.is_empty()
        || !operator
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(QueryParseError::new(format!("Unsupported query: {}", word)));
    }
    let value: String = value.chars().filter(|c| *c != '"').collect();
    if value.is_empty() {
        return Err(QueryParseError::new(format!("Missing value for '{}'", operator)));
    }
    Ok(Node::Atom {
        atom: RawAtom {
            operator: operator.to_lowercase(),
            value,
        },
        text: word.to_string(),
    })
}

/// Parse an expression into a tree of raw atoms.
pub fn parse(input: &str) -> Result<Node<RawAtom>, QueryParseError> {
    let tokens = tokenize(input)?;
    if tokens.is_empty() {
        return Err(QueryParseError::new("empty expression"));
    }
    let mut parser = Parser { tokens, pos: 0 };
    let node = parser.parse_or()?;
    if parser.pos < parser.tokens.len() {
        return Err(QueryParseError::new("unexpected ')'"));
    }
    Ok(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(node: &Node<RawAtom>) -> Vec<String> {
        let mut out = Vec::new();
        collect(node, &mut out);
        out
    }

    fn collect(node: &Node<RawAtom>, out: &mut Vec<String>) {
        match node {
            Node::Atom { text, .. } => out.push(text.clone()),
            Node::Not(inner) => collect(inner, out),
            Node::And(c) | Node::Or(c) => c.iter().for_each(|n| collect(n, out)),
        }
    }

    #[test]
    fn test_adjacent_terms_conjoin() {
        let node = parse("changekind:TRIVIAL_REBASE is:MAX").unwrap();
        assert!(matches!(node, Node::And(ref c) if c.len() == 2));
    }

    #[test]
    fn test_or_binds_looser_than_and() {
        let node = parse("is:MIN OR is:MAX changekind:NO_CHANGE").unwrap();
        match node {
            Node::Or(children) => {
                assert_eq!(children.len(), 2);
                assert!(matches!(children[1], Node::And(_)));
            }
            other => panic!("expected OR, got {:?}", other),
        }
    }

    #[test]
    fn test_negation_and_parentheses() {
        let node = parse("-label:Code-Review=MIN NOT (is:1 OR is:2)").unwrap();
        match &node {
            Node::And(children) => {
                assert!(matches!(children[0], Node::Not(_)));
                assert!(matches!(children[1], Node::Not(_)));
            }
            other => panic!("expected AND, got {:?}", other),
        }
        assert_eq!(texts(&node), vec!["label:Code-Review=MIN", "is:1", "is:2"]);
    }

    #[test]
    fn test_quoted_value_keeps_raw_text() {
        let node = parse("is:\"-1\"").unwrap();
        match node {
            Node::Atom { atom, text } => {
                assert_eq!(atom.operator, "is");
                assert_eq!(atom.value, "-1");
                assert_eq!(text, "is:\"-1\"");
            }
            other => panic!("expected atom, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("").is_err());
        assert!(parse("foo").is_err());
        assert!(parse("(is:MAX").is_err());
        assert!(parse("is:MAX)").is_err());
        assert!(parse("is:MAX OR").is_err());
        assert!(parse("is:\"MAX").is_err());
    }

    #[test]
    fn test_evaluates_every_atom() {
        let node = parse("is:a OR is:b").unwrap();
        let mut calls = 0;
        let result = node
            .evaluate::<()>(&mut |atom: &RawAtom| {
                calls += 1;
                Ok(atom.value == "a")
            })
            .unwrap();
        assert!(result.matched);
        assert_eq!(calls, 2);
        assert!(result.passing_atoms.contains("is:a"));
        assert!(result.failing_atoms.contains("is:b"));
    }
}
