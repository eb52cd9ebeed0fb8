/*!
 * Document store.
 *
 * SQLite persistence for harvested documents, their per-language variants,
 * the search fragments already appended to each document and the publish
 * failures kept for cleanup. The store is the single source of truth: all
 * pipeline coordination goes through its status fields.
 */

pub mod connection;
pub mod models;
pub mod repository;
pub mod schema;

pub use connection::{DatabaseConnection, DatabaseStats};
pub use repository::Repository;
