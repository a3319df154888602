pub mod collection;
pub mod data;
pub mod distributions;
pub mod error;
pub mod expm;
pub mod general_tree;
pub mod heights;
pub mod io;
pub mod likelihood;
pub mod mcmc;
pub mod node;
pub mod operators;
pub mod parameter;
pub mod partition;
pub mod pattern;
pub mod progress;
pub mod qmatrix;
pub mod random;
pub mod schedule;
pub mod tree;
pub mod utils;

pub use collection::ComparisonPopulationTreeCollection;
pub use error::{ModelError, Result};
pub use general_tree::GeneralTree;
pub use mcmc::{Chain, McmcTarget};
pub use tree::{ComparisonPopulationTree, DataPolicy, PopulationTree};
