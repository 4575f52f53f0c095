//! Predicate model: the three closed condition shapes and their evaluation

use futures::future::{self, try_join_all, BoxFuture};
use futures::FutureExt;
use readout_core::{StateMachine, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::lexer::{tokenize, CmpOp, LexError, Token};

/// Parse errors for condition strings
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ParseError {
    #[error("could not tokenize condition: {0}")]
    Lex(#[from] LexError),

    #[error("condition does not match 'NAME op LITERAL' or 'NAME@STATE [-> STATE]': '{0}'")]
    Shape(String),
}

/// Evaluation errors raised by `Predicate::check`
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CheckError {
    #[error("readout '{0}' is not registered")]
    UnknownReadout(String),

    #[error("readout '{0}' has never been updated")]
    NeverUpdated(String),

    #[error("state machine '{0}' is not registered")]
    UnknownMachine(String),

    #[error("cannot order {left} ({lkind}) against {right} ({rkind})", lkind = left.kind(), rkind = right.kind())]
    Incomparable { left: Value, right: Value },
}

/// Read-only lookup surface predicates evaluate against.
///
/// The engine implements this; keeping it a trait lets the predicate
/// model stay independent of the engine crate and lets tests evaluate
/// predicates against a stub.
pub trait CheckContext: Sync {
    /// Latest value of the named readout. Fails if the readout is
    /// unknown or has never produced a value.
    fn readout_value(&self, name: &str) -> Result<Value, CheckError>;

    /// Snapshot of the named state machine.
    fn machine_snapshot(&self, name: &str) -> Result<StateMachine, CheckError>;
}

/// A key in a predicate's relevance set.
///
/// Readout names and machine names live in distinct namespaces: a readout
/// change only reaches predicates with a matching `Readout` key, and a
/// machine transition only reaches predicates with a matching `Machine`
/// key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RelevanceKey {
    Readout(String),
    Machine(String),
}

/// A value comparison against a named readout, e.g. `cpu_temp > 80`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionPredicate {
    pub readout: String,
    pub op: CmpOp,
    pub value: Value,
}

/// A state-machine transition test, e.g. `pump@running -> stopped`.
///
/// With `to: None` the predicate is the wildcard form `pump@running`:
/// true for any transition out of `running`, regardless of destination.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionPredicate {
    pub machine: String,
    pub from: String,
    pub to: Option<String>,
}

/// A conjunction of sub-predicates; all parts must hold.
#[derive(Debug, Clone, PartialEq)]
pub struct CompoundPredicate {
    pub parts: Vec<Predicate>,
}

/// The closed set of predicate shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Expression(ExpressionPredicate),
    Transition(TransitionPredicate),
    Compound(CompoundPredicate),
}

impl Predicate {
    /// Parse a condition string into an expression or transition
    /// predicate.
    pub fn parse(text: &str) -> Result<Predicate, ParseError> {
        let tokens = tokenize(text)?;
        match tokens.as_slice() {
            [Token::Name(readout), Token::Op(op), Token::Literal(value)] => {
                Ok(Predicate::Expression(ExpressionPredicate {
                    readout: readout.clone(),
                    op: *op,
                    value: value.clone(),
                }))
            }
            [Token::Name(machine), Token::At, Token::State(from)] => {
                Ok(Predicate::Transition(TransitionPredicate {
                    machine: machine.clone(),
                    from: from.clone(),
                    to: None,
                }))
            }
            [Token::Name(machine), Token::At, Token::State(from), Token::Arrow, Token::State(to)] => {
                Ok(Predicate::Transition(TransitionPredicate {
                    machine: machine.clone(),
                    from: from.clone(),
                    to: Some(to.clone()),
                }))
            }
            _ => Err(ParseError::Shape(text.to_string())),
        }
    }

    /// Combine predicates into a conjunction.
    pub fn and(parts: Vec<Predicate>) -> Predicate {
        Predicate::Compound(CompoundPredicate { parts })
    }

    /// Canonical string identity used for deduplication.
    ///
    /// Two independently parsed conditions that denote the same logical
    /// check produce the same signature regardless of whitespace.
    pub fn signature(&self) -> String {
        match self {
            Predicate::Expression(p) => format!("{}{}{}", p.readout, p.op.as_str(), p.value),
            Predicate::Transition(p) => match &p.to {
                Some(to) => format!("{}@{}->{}", p.machine, p.from, to),
                None => format!("{}@{}", p.machine, p.from),
            },
            Predicate::Compound(p) => {
                let mut parts: Vec<String> = p.parts.iter().map(Predicate::signature).collect();
                parts.sort();
                parts.join(",")
            }
        }
    }

    /// The set of readout/machine names whose change makes this
    /// predicate worth rechecking. Compounds flatten recursively.
    pub fn relevance(&self) -> BTreeSet<RelevanceKey> {
        let mut keys = BTreeSet::new();
        self.collect_relevance(&mut keys);
        keys
    }

    fn collect_relevance(&self, keys: &mut BTreeSet<RelevanceKey>) {
        match self {
            Predicate::Expression(p) => {
                keys.insert(RelevanceKey::Readout(p.readout.clone()));
            }
            Predicate::Transition(p) => {
                keys.insert(RelevanceKey::Machine(p.machine.clone()));
            }
            Predicate::Compound(p) => {
                for part in &p.parts {
                    part.collect_relevance(keys);
                }
            }
        }
    }

    /// Evaluate the predicate against the given context.
    ///
    /// Pure with respect to engine state; safe to evaluate concurrently
    /// with other checks. Compound parts are checked concurrently and
    /// must be unanimously true.
    pub fn check<'a>(
        &'a self,
        ctx: &'a dyn CheckContext,
    ) -> BoxFuture<'a, Result<bool, CheckError>> {
        match self {
            Predicate::Expression(p) => future::ready(p.check(ctx)).boxed(),
            Predicate::Transition(p) => future::ready(p.check(ctx)).boxed(),
            Predicate::Compound(p) => async move {
                let results = try_join_all(p.parts.iter().map(|part| part.check(ctx))).await?;
                Ok(results.into_iter().all(|satisfied| satisfied))
            }
            .boxed(),
        }
    }
}

impl ExpressionPredicate {
    fn check(&self, ctx: &dyn CheckContext) -> Result<bool, CheckError> {
        let actual = ctx.readout_value(&self.readout)?;
        compare(self.op, &actual, &self.value)
    }
}

impl TransitionPredicate {
    fn check(&self, ctx: &dyn CheckContext) -> Result<bool, CheckError> {
        let machine = ctx.machine_snapshot(&self.machine)?;
        Ok(match (&machine.from_state, &self.to) {
            // No transition in flight: both forms are false.
            (None, _) => false,
            (Some(from), None) => *from == self.from,
            (Some(from), Some(to)) => *from == self.from && machine.state == *to,
        })
    }
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<bool, CheckError> {
    Ok(match op {
        CmpOp::Eq => left == right,
        CmpOp::Ne => left != right,
        CmpOp::Lt => ordering(left, right)? == Ordering::Less,
        CmpOp::Le => ordering(left, right)? != Ordering::Greater,
        CmpOp::Gt => ordering(left, right)? == Ordering::Greater,
        CmpOp::Ge => ordering(left, right)? != Ordering::Less,
    })
}

fn ordering(left: &Value, right: &Value) -> Result<Ordering, CheckError> {
    left.partial_cmp(right).ok_or_else(|| CheckError::Incomparable {
        left: left.clone(),
        right: right.clone(),
    })
}
