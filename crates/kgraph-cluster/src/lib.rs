//! kgraph-cluster - Entity resolution and graph merge.
//!
//! Turns the staging backlog written by extraction into a deduplicated
//! canonical graph:
//! - [`CandidateRetriever`] queries the trigram index for lookalike entities
//! - [`SimilarityReranker`] scores them by n-gram overlap and edit distance
//! - [`EntityResolver`] merges a staged entity into its best match or promotes it
//! - [`ParentChildDeriver`] turns declared parent keys into `has_subcomponent` edges
//! - [`RelationshipNormalizer`] maps raw relationship phrases onto the catalog
//! - [`ClusteringOrchestrator`] runs all of it in batches under a coordination lock
//!
//! # Example
//!
//! ```ignore
//! use kgraph_cluster::ClusteringOrchestrator;
//!
//! let orchestrator = ClusteringOrchestrator::new(store, embedder, index, KgConfig::from_env())?;
//! let report = orchestrator.run(&ctx, &lock, &AllowedDocuments::All).await?;
//! println!("merged {} entities", report.entities_merged);
//! ```

pub mod orchestrator;
pub mod parent_child;
pub mod relationship_normalizer;
pub mod reranker;
pub mod resolver;
pub mod retriever;
pub mod similarity;

pub use orchestrator::{ClusteringOrchestrator, ClusteringReport, ClusteringStage};
pub use parent_child::{ParentChildDeriver, ParentStep};
pub use relationship_normalizer::{NormalizedRelationships, RelationshipNormalizer};
pub use reranker::{RankedMatch, SimilarityReranker};
pub use resolver::{EntityOutcome, EntityResolver};
pub use retriever::{CandidateRetriever, EntityQuery};
pub use similarity::{damerau_levenshtein, edit_similarity, ngram_score, SimilarityScorer};
