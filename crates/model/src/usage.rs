use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};

/// Token usage reported by the model for one response.
///
/// Every field is optional since providers report different subsets.
/// Adding two values sums each field, and a field stays `None` only if it
/// is absent on both sides.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct Usage {
    /// Tokens in the prompt.
    pub input_tokens: Option<u64>,
    /// Tokens generated by the model.
    pub output_tokens: Option<u64>,
    /// Total tokens, as reported by the provider.
    pub total_tokens: Option<u64>,
    /// Tokens spent on reasoning, if the model reports it.
    pub reasoning_tokens: Option<u64>,
    /// Prompt tokens served from a cache.
    pub cached_input_tokens: Option<u64>,
}

#[inline]
fn add_field(lhs: Option<u64>, rhs: Option<u64>) -> Option<u64> {
    match (lhs, rhs) {
        (None, None) => None,
        (lhs, rhs) => Some(lhs.unwrap_or(0) + rhs.unwrap_or(0)),
    }
}

impl Add for Usage {
    type Output = Usage;

    fn add(self, rhs: Usage) -> Usage {
        Usage {
            input_tokens: add_field(self.input_tokens, rhs.input_tokens),
            output_tokens: add_field(self.output_tokens, rhs.output_tokens),
            total_tokens: add_field(self.total_tokens, rhs.total_tokens),
            reasoning_tokens: add_field(
                self.reasoning_tokens,
                rhs.reasoning_tokens,
            ),
            cached_input_tokens: add_field(
                self.cached_input_tokens,
                rhs.cached_input_tokens,
            ),
        }
    }
}

impl AddAssign for Usage {
    #[inline]
    fn add_assign(&mut self, rhs: Usage) {
        *self = *self + rhs;
    }
}
