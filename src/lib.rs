//! # routecheck
//!
//! Client/server API parity checking for JSON HTTP services written against
//! the jape conventions, plus a small runtime implementing those conventions.
//!
//! ## Key Features
//!
//! - **Parity**: every client call matches a server route by method, path
//!   template, path/query parameter types and request/response body types
//! - **Single response**: no handler path writes two responses
//! - **Runtime**: `"METHOD /path"` routing, JSON encode/decode helpers,
//!   Basic auth and a matching client, on axum and reqwest
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use routecheck::{check_program, CheckConfig, Program};
//! use std::path::Path;
//!
//! let config = CheckConfig::default();
//! let program = Program::load(Path::new("./api"), config.include_tests)?;
//! for diagnostic in check_program(&program, &config)?.diagnostics {
//!     println!("{}", diagnostic);
//! }
//! # Ok::<(), routecheck::CheckError>(())
//! ```

pub mod check;
pub mod cli;
pub mod config;
pub mod error;
pub mod http;
pub mod parser;

// Re-exports for convenience
pub use error::{CheckError, Result};

pub use check::{check_program, inventory, Diagnostic, Format, Report};
pub use config::CheckConfig;
pub use parser::{GoType, Position, Program};
