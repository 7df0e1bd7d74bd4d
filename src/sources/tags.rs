//! Tag-query backend over the tagging tool's SQLite database.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;
use tracing::debug;

use super::is_supported_image;

pub const DATABASE_FILE_NAME: &str = "tagger.db";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagParseError {
    #[error("empty tag expression")]
    Empty,
    #[error("unexpected {0:?}")]
    Unexpected(String),
    #[error("unexpected end of expression")]
    UnexpectedEnd,
    #[error("unbalanced parenthesis")]
    Unbalanced,
}

/// Boolean expression over tag names.
///
/// `and`, `or` and `not` are keywords (case-insensitive) and parentheses
/// group. Tags written next to each other without an operator are joined
/// with `or`, so `jay robin` selects files carrying either tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagExpr {
    Tag(String),
    Not(Box<TagExpr>),
    And(Box<TagExpr>, Box<TagExpr>),
    Or(Box<TagExpr>, Box<TagExpr>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Open,
    Close,
    And,
    Or,
    Not,
    Word(String),
}

fn tokenize(raw: &str) -> Vec<Token> {
    let mut out = Vec::new();
    let mut word = String::new();
    let flush = |word: &mut String, out: &mut Vec<Token>| {
        if word.is_empty() {
            return;
        }
        let tok = match word.to_ascii_lowercase().as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            _ => Token::Word(word.clone()),
        };
        out.push(tok);
        word.clear();
    };
    for ch in raw.chars() {
        match ch {
            '(' | ')' => {
                flush(&mut word, &mut out);
                out.push(if ch == '(' { Token::Open } else { Token::Close });
            }
            c if c.is_whitespace() => flush(&mut word, &mut out),
            c => word.push(c),
        }
    }
    flush(&mut word, &mut out);
    out
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn or_expr(&mut self) -> Result<TagExpr, TagParseError> {
        let mut lhs = self.and_expr()?;
        loop {
            match self.peek() {
                Some(Token::Or) => {
                    self.pos += 1;
                }
                // juxtaposition
                Some(Token::Word(_) | Token::Not | Token::Open) => {}
                _ => break,
            }
            let rhs = self.and_expr()?;
            lhs = TagExpr::Or(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<TagExpr, TagParseError> {
        let mut lhs = self.unary()?;
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            let rhs = self.unary()?;
            lhs = TagExpr::And(Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<TagExpr, TagParseError> {
        match self.next() {
            Some(Token::Not) => Ok(TagExpr::Not(Box::new(self.unary()?))),
            Some(Token::Open) => {
                let inner = self.or_expr()?;
                match self.next() {
                    Some(Token::Close) => Ok(inner),
                    _ => Err(TagParseError::Unbalanced),
                }
            }
            Some(Token::Word(w)) => Ok(TagExpr::Tag(w)),
            Some(Token::Close) => Err(TagParseError::Unbalanced),
            Some(tok) => Err(TagParseError::Unexpected(format!("{tok:?}").to_lowercase())),
            None => Err(TagParseError::UnexpectedEnd),
        }
    }
}

impl TagExpr {
    pub fn parse(raw: &str) -> Result<Self, TagParseError> {
        let tokens = tokenize(raw);
        if tokens.is_empty() {
            return Err(TagParseError::Empty);
        }
        let mut parser = Parser { tokens, pos: 0 };
        let expr = parser.or_expr()?;
        match parser.peek() {
            None => Ok(expr),
            Some(Token::Close) => Err(TagParseError::Unbalanced),
            Some(tok) => Err(TagParseError::Unexpected(format!("{tok:?}").to_lowercase())),
        }
    }

    pub fn matches(&self, tags: &HashSet<String>) -> bool {
        match self {
            Self::Tag(name) => tags.contains(name),
            Self::Not(inner) => !inner.matches(tags),
            Self::And(a, b) => a.matches(tags) && b.matches(tags),
            Self::Or(a, b) => a.matches(tags) || b.matches(tags),
        }
    }
}

/// First existing of `~/.config/tagger.db` and `/etc/tagger.db`, else the
/// per-user location.
pub fn default_database_path() -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    let candidates = database_candidates(home);
    candidates
        .iter()
        .find(|p| p.is_file())
        .or_else(|| candidates.first())
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DATABASE_FILE_NAME))
}

fn database_candidates(home: Option<PathBuf>) -> Vec<PathBuf> {
    let mut out = Vec::with_capacity(2);
    if let Some(home) = home {
        out.push(home.join(".config").join(DATABASE_FILE_NAME));
    }
    out.push(Path::new("/etc").join(DATABASE_FILE_NAME));
    out
}

#[derive(Debug, Clone)]
pub struct TagQuerySource {
    expression: String,
    expr: TagExpr,
    database: PathBuf,
}

impl TagQuerySource {
    pub fn new(expression: &str, database: Option<PathBuf>) -> Result<Self> {
        let expr = TagExpr::parse(expression)
            .with_context(|| format!("invalid tag expression {expression:?}"))?;
        Ok(Self {
            expression: expression.trim().to_string(),
            expr,
            database: database.unwrap_or_else(default_database_path),
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn database(&self) -> &Path {
        &self.database
    }

    /// Paths of tagged image files matching the expression, ordered by
    /// directory then name.
    pub fn enumerate(&self) -> Result<Vec<String>> {
        let conn = Connection::open_with_flags(
            &self.database,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open tag database {}", self.database.display()))?;

        let mut stmt = conn.prepare(
            "SELECT f.file_id, f.directory, f.name, t.name
             FROM files f
               LEFT JOIN tag_files tf ON tf.file_id = f.file_id
               LEFT JOIN tags t ON t.tag_id = tf.tag_id
             ORDER BY f.directory, f.name, f.file_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut out = Vec::new();
        let mut current: Option<(i64, PathBuf, HashSet<String>)> = None;
        for row in rows {
            let (id, dir, name, tag) = row?;
            if current.as_ref().is_none_or(|(cur, _, _)| *cur != id) {
                if let Some((_, path, tags)) = current.take() {
                    self.collect(path, &tags, &mut out);
                }
                current = Some((id, Path::new(&dir).join(&name), HashSet::new()));
            }
            if let (Some(tag), Some((_, _, tags))) = (tag, current.as_mut()) {
                tags.insert(tag);
            }
        }
        if let Some((_, path, tags)) = current {
            self.collect(path, &tags, &mut out);
        }
        debug!(expression = %self.expression, matches = out.len(), "tag query evaluated");
        Ok(out)
    }

    fn collect(&self, path: PathBuf, tags: &HashSet<String>, out: &mut Vec<String>) {
        if is_supported_image(&path) && self.expr.matches(tags) {
            let path = path.to_string_lossy().into_owned();
            if !out.contains(&path) {
                out.push(path);
            }
        }
    }
}
