//! Endorsement policy expressions.
//!
//! ```text
//! policy    := OR(policy, ...) | AND(policy, ...) | OutOf(N, policy, ...) | principal
//! principal := 'MSPID.role'        role := member | admin | client | peer
//! ```
//!
//! `AND` and `OR` are sugar for `OutOf(len, ..)` and `OutOf(1, ..)`.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid endorsement policy [{expr}] at offset {offset}: {message}")]
pub struct PolicyParseError {
    pub expr: String,
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Member,
    Admin,
    Client,
    Peer,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::Member => "member",
            Role::Admin => "admin",
            Role::Client => "client",
            Role::Peer => "peer",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "member" => Ok(Role::Member),
            "admin" => Ok(Role::Admin),
            "client" => Ok(Role::Client),
            "peer" => Ok(Role::Peer),
            other => Err(format!("unknown role [{other}]")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub msp_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignaturePolicy {
    SignedBy(Principal),
    OutOf {
        n: usize,
        rules: Vec<SignaturePolicy>,
    },
}

impl SignaturePolicy {
    /// Satisfied by a signature from any member of any of `msp_ids`.
    pub fn signed_by_any_member<S: AsRef<str>>(msp_ids: &[S]) -> Self {
        SignaturePolicy::OutOf {
            n: 1,
            rules: msp_ids
                .iter()
                .map(|id| {
                    SignaturePolicy::SignedBy(Principal {
                        msp_id: id.as_ref().to_string(),
                        role: Role::Member,
                    })
                })
                .collect(),
        }
    }

    /// Whether signatures from `signers` satisfy the policy.
    pub fn is_satisfied_by(&self, signers: &[Principal]) -> bool {
        match self {
            SignaturePolicy::SignedBy(principal) => signers.iter().any(|s| {
                s.msp_id == principal.msp_id
                    && (principal.role == Role::Member || s.role == principal.role)
            }),
            SignaturePolicy::OutOf { n, rules } => {
                rules.iter().filter(|r| r.is_satisfied_by(signers)).count() >= *n
            }
        }
    }
}

impl fmt::Display for SignaturePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignaturePolicy::SignedBy(p) => write!(f, "'{}.{}'", p.msp_id, p.role.as_str()),
            SignaturePolicy::OutOf { n, rules } => {
                write!(f, "OutOf({n}")?;
                for rule in rules {
                    write!(f, ", {rule}")?;
                }
                f.write_str(")")
            }
        }
    }
}

impl FromStr for SignaturePolicy {
    type Err = PolicyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_policy(s)
    }
}

/// Parse `expr`, or fall back to "signed by any member" of `msp_ids` when the
/// expression is blank.
pub fn policy_or_default<S: AsRef<str>>(
    expr: &str,
    msp_ids: &[S],
) -> Result<SignaturePolicy, PolicyParseError> {
    if expr.trim().is_empty() {
        return Ok(SignaturePolicy::signed_by_any_member(msp_ids));
    }
    parse_policy(expr)
}

pub fn parse_policy(expr: &str) -> Result<SignaturePolicy, PolicyParseError> {
    let mut parser = Parser { expr, pos: 0 };
    let policy = parser.policy()?;
    parser.skip_ws();
    if parser.pos != expr.len() {
        return Err(parser.error("unexpected trailing input"));
    }
    Ok(policy)
}

struct Parser<'a> {
    expr: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn policy(&mut self) -> Result<SignaturePolicy, PolicyParseError> {
        self.skip_ws();
        match self.peek() {
            Some('\'') | Some('"') => self.principal(),
            Some(_) => self.gate(),
            None => Err(self.error("expected policy")),
        }
    }

    fn gate(&mut self) -> Result<SignaturePolicy, PolicyParseError> {
        let start = self.pos;
        let name = self.ident();
        self.expect('(')?;
        let n = if name.eq_ignore_ascii_case("outof") {
            let n = self.number()?;
            self.expect(',')?;
            Some(n)
        } else if name.eq_ignore_ascii_case("and") || name.eq_ignore_ascii_case("or") {
            None
        } else {
            self.pos = start;
            return Err(self.error(&format!("unknown operator [{name}]")));
        };

        let mut rules = vec![self.policy()?];
        loop {
            self.skip_ws();
            match self.bump() {
                Some(',') => rules.push(self.policy()?),
                Some(')') => break,
                _ => return Err(self.error("expected ',' or ')'")),
            }
        }

        let n = match n {
            Some(n) => n,
            None if name.eq_ignore_ascii_case("and") => rules.len(),
            None => 1,
        };
        if n == 0 || n > rules.len() {
            self.pos = start;
            return Err(self.error(&format!(
                "threshold {n} must be between 1 and {}",
                rules.len()
            )));
        }
        Ok(SignaturePolicy::OutOf { n, rules })
    }

    fn principal(&mut self) -> Result<SignaturePolicy, PolicyParseError> {
        let quote = self.bump().ok_or_else(|| self.error("expected quote"))?;
        let expr = self.expr;
        let start = self.pos;
        let end = expr[start..]
            .find(quote)
            .map(|i| start + i)
            .ok_or_else(|| self.error("unterminated principal"))?;
        let body = &expr[start..end];
        let (msp_id, role) = body
            .rsplit_once('.')
            .ok_or_else(|| self.error("principal must be 'MSPID.role'"))?;
        if msp_id.is_empty() {
            return Err(self.error("principal has empty MSP ID"));
        }
        let role = role.parse::<Role>().map_err(|msg| self.error(&msg))?;
        self.pos = end + quote.len_utf8();
        Ok(SignaturePolicy::SignedBy(Principal {
            msp_id: msp_id.to_string(),
            role,
        }))
    }

    fn ident(&mut self) -> &'a str {
        self.skip_ws();
        let expr = self.expr;
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
            self.pos += 1;
        }
        &expr[start..self.pos]
    }

    fn number(&mut self) -> Result<usize, PolicyParseError> {
        self.skip_ws();
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        self.expr[start..self.pos]
            .parse()
            .map_err(|_| self.error("expected threshold number"))
    }

    fn expect(&mut self, want: char) -> Result<(), PolicyParseError> {
        self.skip_ws();
        match self.bump() {
            Some(c) if c == want => Ok(()),
            _ => Err(self.error(&format!("expected '{want}'"))),
        }
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn peek(&self) -> Option<char> {
        self.expr[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, message: &str) -> PolicyParseError {
        PolicyParseError {
            expr: self.expr.to_string(),
            offset: self.pos,
            message: message.to_string(),
        }
    }
}
