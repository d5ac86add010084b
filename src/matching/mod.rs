//! Alteration events and the subscription-matching pass.

mod alteration;
mod engine;
mod match_list;

pub use alteration::{Alteration, AlterationKind, AttributeAlteration};
pub use engine::match_alterations;
pub use match_list::{AlterationMatch, MatchGroup, MatchList};
