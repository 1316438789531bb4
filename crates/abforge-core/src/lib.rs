//! abforge Core - data model for contract-driven A/B experiments
//!
//! abforge Core holds everything the experiment pipeline agrees on before any
//! side effect happens:
//!
//! 1. **Contracts** (`contract`): the JSON experiment definition, its validator
//!    and the bootstrap template
//! 2. **Settings** (`settings`): credentials and endpoints read from the environment
//! 3. **Errors** (`error`): the failure taxonomy shared by every crate
//! 4. **Types** (`types`): per-file patch results and remote entity states
//!
//! # Quick Start
//!
//! ```
//! use abforge_core::contract::{create_default, validate};
//!
//! let template = create_default("checkout-cta");
//! assert_eq!(template.branch_config.branch_name, "exp/checkout-cta");
//!
//! // A template has no code changes yet, so it is not a valid contract
//! let err = validate(&template.to_value()).unwrap_err();
//! assert!(err.mentions("codeChanges"));
//! ```

pub mod contract;
pub mod error;
pub mod settings;
pub mod types;

pub use contract::{create_default, load_contract, validate, ExperimentContract, PartialContract};
pub use error::{
    AbforgeError, ContractValidationError, GitError, PatchError, Result, ResultExt,
};
pub use settings::Settings;
pub use types::{branch_for_key, CodeModificationResult, DeploymentState, ExperimentStatus};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
