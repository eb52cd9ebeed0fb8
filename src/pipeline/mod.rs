/*!
 * Translation and publication pipeline.
 *
 * - `dispatcher`: submits documents to the translation provider and polls jobs
 * - `retriever`: downloads finished jobs into the document store
 * - `routing`: `(language, kind)` table turning artifacts into store payloads
 * - `aggregator`: merges original and translated metadata
 * - `publisher`: create, upload and release records in the target repository
 * - `scheduler`: passes over the store with a bounded worker pool
 * - `retry`: bounded backoff and the shared call budget
 */

pub mod aggregator;
pub mod dispatcher;
pub mod publisher;
pub mod retriever;
pub mod retry;
pub mod routing;
pub mod scheduler;

pub use aggregator::Aggregator;
pub use dispatcher::{Dispatcher, JobHandle, PollStatus};
pub use publisher::{PublishFile, Publisher};
pub use retriever::{RetrieveOutcome, Retriever};
pub use retry::{CallBudget, RetryPolicy};
pub use routing::RouteTable;
pub use scheduler::{PassReport, PipelineRunner, RunnerSettings, Stage, TerminalFailure};
