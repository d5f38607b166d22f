pub mod actions;
pub mod bus;
pub mod document;
pub mod error;
pub mod schema;
pub mod store;
pub mod substrate;
pub mod validation;
pub mod vector;

pub use bus::{ChangeAction, ChangeBus, ChangeEvent, Subscription};
pub use document::Document;
pub use error::{CorpusError, Result};
pub use schema::{RecordType, SchemaDefinition, SchemaMode};
pub use store::{Collection, Store};
pub use vector::{Embedder, SimilarityHit, VectorCollection, VectorContent, VectorRecord};
