//! Policy evaluation, used to check that a merge never takes access away

pub mod context;
pub mod evaluator;
pub mod matching;

pub use context::{Caller, RequestContext};
pub use evaluator::{statement_applies, Decision, PolicyEvaluator};
