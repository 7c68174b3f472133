//! Hydra - multi-task fine-tuning with loss-weight search
//!
//! A shared transformer encoder feeds two classification heads: a binary
//! disaster head and a three-way sentiment head. Each training run mixes the
//! two cross-entropy losses with fixed coefficients `(lambda1, lambda2)`. A
//! black-box search picks the coefficients that maximise the disaster head's
//! weighted F1 on held-out data.
//!
//! ```rust,ignore
//! use hydra::search::{BayesianConfig, BayesianSearch, Direction, FnObjective, SearchLoop, SearchSpace};
//!
//! let search = SearchLoop::new(SearchSpace::default(), Direction::Maximize, 7)?;
//! let mut strategy = BayesianSearch::new(BayesianConfig::default())?;
//! let outcome = search.run(&mut objective, &mut strategy)?;
//! println!("{outcome}");
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod encoder;
pub mod error;
pub mod logging;
pub mod model;
pub mod search;
pub mod task;
pub mod training;

// Re-exports
pub use config::HydraConfig;
pub use error::{Error, Result};
pub use model::{HeadLogits, HydraNet, MultiTaskModel};
pub use search::{SearchLoop, SearchOutcome, TrialRecord};
pub use task::Task;
pub use training::loss::Coefficients;
