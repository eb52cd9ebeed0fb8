/*!
 * # transpub
 *
 * Translates harvested bibliographic documents through an external
 * translation provider and publishes each document, with all its
 * translations, as one multilingual record in a content repository.
 *
 * ## Architecture
 *
 * - `harvest`: turns source metadata records into stored documents
 * - `database`: SQLite document store, the single source of truth
 * - `pipeline`: dispatch, poll, retrieve, aggregate and publish passes
 * - `providers`: translation provider and repository API clients
 * - `extraction`: plain text of translated files for search
 * - `app_config`: configuration management
 * - `language_utils`: locale tag utilities
 * - `file_utils`: file system operations
 * - `errors`: error types
 */

// Global lints configuration
// These lints will be allowed but not auto-fixed
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::redundant_closure_for_method_calls)]

pub mod app_config;
pub mod database;
pub mod errors;
pub mod extraction;
pub mod file_utils;
pub mod harvest;
pub mod language_utils;
pub mod pipeline;
pub mod providers;

// Re-export main types for easier usage
pub use app_config::Config;
pub use database::Repository;
pub use errors::{ErrorKind, PipelineError, ProviderError};
pub use pipeline::{PassReport, PipelineRunner, RunnerSettings};
