//! Terminal output for the `subsys` binary
//!
//! Styled with `console` when stdout is an interactive terminal, plain
//! bracketed prefixes otherwise (CI, pipes, tests).

mod context;
mod output;

pub use context::UiContext;
pub use output::{
    intro, key_value, remark, section, step_error, step_error_detail, step_info, step_ok,
    step_ok_detail, step_warn, step_warn_hint,
};
