pub mod config;
pub mod error;
pub mod db;
pub mod relation;
pub mod store;
pub mod infer;

pub use config::Config;
pub use error::{TermGraphError, Result};
pub use relation::{NewRelation, Provenance, Relation, RelationType, Status};
pub use store::{Decision, Direction, RelationStore};
pub use infer::{infer, CandidateRelation, Rule};
