//! A toy script engine for [`FakeNode`](super::FakeNode).
//!
//! Understands a single `return <expr>` statement where `<expr>` is an
//! integer, a quoted string, `KEYS[n]`, `ARGV[n]`, a table `{...}`,
//! `redis.call(...)`, `redis.pcall(...)` or `redis.error_reply(...)`.
//! Anything else is reported as a compile error.

use std::collections::hash_map::DefaultHasher;
use std::fmt::Write;
use std::hash::{Hash, Hasher};

use bytes::Bytes;

use crate::proto::frame::Frame;

use super::node::{execute, NodeState};
use super::upper;

/// A stable 40 hex digit identifier for `source`.
pub(super) fn script_hash(source: &str) -> String {
    let mut hash = String::with_capacity(48);
    for seed in 0u8..3 {
        let mut hasher = DefaultHasher::new();
        seed.hash(&mut hasher);
        source.hash(&mut hasher);
        let _ = write!(hash, "{:016x}", hasher.finish());
    }
    hash.truncate(40);
    hash
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Int(i64),
    Str(String),
    Key(usize),
    Arg(usize),
    Table(Vec<Expr>),
    Call { protected: bool, args: Vec<Expr> },
    ErrorReply(Box<Expr>),
}

/// Compiles and runs `source`.
pub(super) fn eval(state: &mut NodeState, source: &str, keys: &[Bytes], argv: &[Bytes]) -> Frame {
    let expr = match Parser::new(source).program() {
        Ok(Some(expr)) => expr,
        Ok(None) => return Frame::BulkString(None),
        Err(message) => {
            return Frame::error(format!(
                "ERR Error compiling script (new function): user_script:1: {}",
                message
            ))
        }
    };
    let scope = Scope { keys, argv };
    match scope.evaluate(state, &expr) {
        Ok(frame) | Err(frame) => frame,
    }
}

struct Scope<'a> {
    keys: &'a [Bytes],
    argv: &'a [Bytes],
}

impl Scope<'_> {
    /// `Err` carries an error reply that aborts the script.
    fn evaluate(&self, state: &mut NodeState, expr: &Expr) -> Result<Frame, Frame> {
        Ok(match expr {
            Expr::Int(n) => Frame::Integer(*n),
            Expr::Str(s) => Frame::bulk(s.clone()),
            Expr::Key(i) => lookup(self.keys, *i),
            Expr::Arg(i) => lookup(self.argv, *i),
            Expr::Table(items) => Frame::Array(
                items
                    .iter()
                    .map(|item| self.evaluate(state, item))
                    .collect::<Result<_, _>>()?,
            ),
            Expr::ErrorReply(message) => {
                let text = self.evaluate(state, message)?.as_text().unwrap_or_default();
                Frame::error(text)
            }
            Expr::Call { protected, args } => {
                let mut command = Vec::with_capacity(args.len());
                for arg in args {
                    match self.evaluate(state, arg)?.as_text() {
                        Some(text) => command.push(Bytes::from(text)),
                        None => {
                            return Err(Frame::error(
                                "ERR Lua redis lib command arguments must be strings or integers",
                            ))
                        }
                    }
                }
                let reply = self.call(state, &command);
                match reply {
                    Frame::Error(message) if !protected => {
                        return Err(Frame::error(format!(
                            "{} script: user_script:1",
                            String::from_utf8_lossy(&message)
                        )))
                    }
                    reply => reply,
                }
            }
        })
    }

    fn call(&self, state: &mut NodeState, command: &[Bytes]) -> Frame {
        let Some(name) = command.first().map(|n| upper(n)) else {
            return Frame::error("ERR Please specify at least one argument for this redis lib call");
        };
        if matches!(name.as_str(), "EVAL" | "EVALSHA" | "SCRIPT" | "MULTI" | "EXEC") {
            return Frame::error("ERR This Redis command is not allowed from script");
        }
        execute(state, command)
    }
}

fn lookup(values: &[Bytes], index: usize) -> Frame {
    index
        .checked_sub(1)
        .and_then(|i| values.get(i))
        .map(|v| Frame::bulk(v.clone()))
        .unwrap_or(Frame::Null)
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn skip_ws(&mut self) {
        let trimmed = self.rest().trim_start();
        self.pos = self.src.len() - trimmed.len();
    }

    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), String> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(format!("'{}' expected near {}", token, self.near()))
        }
    }

    fn near(&self) -> String {
        match self.rest().split_whitespace().next() {
            Some(word) => format!("'{}'", word),
            None => "'<eof>'".to_string(),
        }
    }

    fn program(mut self) -> Result<Option<Expr>, String> {
        self.skip_ws();
        if self.rest().is_empty() {
            return Ok(None);
        }
        self.expect("return")?;
        let expr = self.expr()?;
        self.eat(";");
        self.skip_ws();
        if !self.rest().is_empty() {
            return Err(format!("'<eof>' expected near {}", self.near()));
        }
        Ok(Some(expr))
    }

    fn expr(&mut self) -> Result<Expr, String> {
        self.skip_ws();
        if self.eat("{") {
            return self.list("}").map(Expr::Table);
        }
        if self.eat("redis.call(") {
            return self.list(")").map(|args| Expr::Call {
                protected: false,
                args,
            });
        }
        if self.eat("redis.pcall(") {
            return self.list(")").map(|args| Expr::Call {
                protected: true,
                args,
            });
        }
        if self.eat("redis.error_reply(") {
            let message = self.expr()?;
            self.expect(")")?;
            return Ok(Expr::ErrorReply(Box::new(message)));
        }
        if self.eat("KEYS[") {
            let index = self.index()?;
            return Ok(Expr::Key(index));
        }
        if self.eat("ARGV[") {
            let index = self.index()?;
            return Ok(Expr::Arg(index));
        }
        if let Some(quote) = self.rest().chars().next().filter(|c| *c == '\'' || *c == '"') {
            return self.string(quote);
        }
        self.integer()
    }

    fn list(&mut self, close: &str) -> Result<Vec<Expr>, String> {
        let mut items = Vec::new();
        if self.eat(close) {
            return Ok(items);
        }
        loop {
            items.push(self.expr()?);
            if self.eat(",") {
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }

    fn index(&mut self) -> Result<usize, String> {
        let Expr::Int(n) = self.integer()? else {
            return Err("integer expected".to_string());
        };
        self.expect("]")?;
        usize::try_from(n).map_err(|_| format!("invalid index {}", n))
    }

    fn string(&mut self, quote: char) -> Result<Expr, String> {
        let body = &self.rest()[1..];
        match body.find(quote) {
            Some(end) => {
                let text = body[..end].to_string();
                self.pos += end + 2;
                Ok(Expr::Str(text))
            }
            None => Err(format!("unfinished string near {}", self.near())),
        }
    }

    fn integer(&mut self) -> Result<Expr, String> {
        self.skip_ws();
        let rest = self.rest();
        let len = rest
            .char_indices()
            .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
            .count();
        match rest[..len].parse() {
            Ok(n) => {
                self.pos += len;
                Ok(Expr::Int(n))
            }
            Err(_) => Err(format!("unexpected symbol near {}", self.near())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str, keys: &[&str]) -> Frame {
        let keys: Vec<Bytes> = keys.iter().map(|k| Bytes::from(k.to_string())).collect();
        eval(&mut NodeState::default(), source, &keys, &[])
    }

    #[test]
    fn test_script_hash_is_stable() {
        assert_eq!(script_hash("return 1"), script_hash("return 1"));
        assert_ne!(script_hash("return 1"), script_hash("return 2"));
        assert_eq!(script_hash("return 1").len(), 40);
    }

    #[test]
    fn test_values() {
        assert_eq!(run("return 42", &[]), Frame::Integer(42));
        assert_eq!(run("return 'hi'", &[]), Frame::bulk("hi"));
        assert_eq!(run("return KEYS[1]", &["foo"]), Frame::bulk("foo"));
        assert_eq!(
            run("return {1, 2, \"x\"}", &[]),
            Frame::Array(vec![Frame::Integer(1), Frame::Integer(2), Frame::bulk("x")])
        );
    }

    #[test]
    fn test_compile_error() {
        let reply = run("return {1,2", &[]);
        assert!(reply
            .as_text()
            .unwrap()
            .starts_with("ERR Error compiling script"));
        assert!(run("local x = ", &[]).is_error());
    }

    #[test]
    fn test_call_error_aborts_script() {
        let reply = run("return redis.call('expire','foo')", &[]);
        assert!(reply.is_error());
    }

    #[test]
    fn test_pcall_error_is_an_element() {
        let mut state = NodeState::default();
        execute(
            &mut state,
            &[Bytes::from("SET"), Bytes::from("foo"), Bytes::from("bar")],
        );
        let reply = eval(
            &mut state,
            "return {1, redis.pcall('incr', 'foo')}",
            &[],
            &[],
        );
        let Frame::Array(items) = reply else {
            panic!("expected an array");
        };
        assert_eq!(items[0], Frame::Integer(1));
        assert!(items[1].is_error());
    }

    #[test]
    fn test_error_reply() {
        assert_eq!(
            run("return redis.error_reply('My Error')", &[]),
            Frame::error("My Error")
        );
    }
}
