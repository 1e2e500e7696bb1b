pub mod payoff;
pub mod profit;

pub use payoff::{BinRepresentative, Moneyness, OptionKind, PayoffResult};
