//! Relational schema inference for nested JSON documents.
//!
//! A shape tree is inferred from example documents ([`infer`]) or from an
//! OpenAPI declaration ([`openapi`]), translated into table definitions
//! ([`builder`]) and rendered as SQLite DDL ([`ddl`]).

pub mod builder;
pub mod ddl;
pub mod error;
pub mod infer;
pub mod node;
pub mod openapi;

pub use builder::{
    build_schema, build_schema_from_openapi, ColumnKind, ColumnSpec, RelationKind, RelationSpec,
    RootConfig, ScalarField, SchemaSpec, TableBuilder, TableId, TableSpec,
};
pub use error::{SchemaError, SchemaResult};
pub use infer::{infer_auto, infer_samples, infer_schema};
pub use node::{NodeArray, NodeObject, NodeScalar, StructuralPath};
pub use openapi::OpenApiDocument;
