pub mod loader;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod fixtures;

pub use loader::{DataLoader, LoaderError};
pub use store::QuoteStore;
pub use types::{OptionQuote, OptionType, OptionsChain, OptionsSnapshot, UnderlyingClose};
