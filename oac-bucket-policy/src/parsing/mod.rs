//! Policy text codec (lossless JSON parse/render)

pub mod codec;

pub use codec::{parse_policy, render_policy, render_policy_compact};
