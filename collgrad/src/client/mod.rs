mod collectives;
mod collectives_nb;
mod context;
mod options;

pub use context::{CollectiveClient, CollectiveOutput};
pub use options::ReduceOptions;
