//! Condition language and predicate model for the readout engine
//!
//! A condition string takes one of two shapes:
//!
//! ```text
//! expr        := NAME  op  LITERAL          e.g. "cpu_temp > 80"
//! transition  := NAME "@" STATE [-> STATE]  e.g. "pump@running -> stopped"
//! ```
//!
//! [`Predicate::parse`] turns a condition string into one of the three
//! closed predicate shapes (expression, state transition, compound AND).
//! Predicates are evaluated against a [`CheckContext`], the read-only
//! lookup surface the engine implements.

mod lexer;
mod predicate;

pub use lexer::{tokenize, CmpOp, LexError, Token};
pub use predicate::{
    CheckContext, CheckError, CompoundPredicate, ExpressionPredicate, ParseError, Predicate,
    RelevanceKey, TransitionPredicate,
};
