pub mod chain;
pub mod file;
pub mod registry;

pub use chain::Blockchain;
pub use file::ChainFile;
pub use registry::Registry;
