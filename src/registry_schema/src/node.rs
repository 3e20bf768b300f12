//! Inference-time shape tree. Nodes are plain owned values; merging consumes
//! both sides and returns the combined node, so sibling samples never alias.

use std::collections::BTreeMap;

use common::ScalarType;
use tracing::trace;

/// Structural path from the document root, e.g. `["register_entries", "address"]`.
pub type StructuralPath = Vec<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeScalar {
    pub scalar_type: ScalarType,
    pub nullable: bool,
}

impl NodeScalar {
    pub fn new(scalar_type: ScalarType, nullable: bool) -> Self {
        NodeScalar {
            scalar_type,
            nullable,
        }
    }

    pub fn merge(self, other: NodeScalar) -> NodeScalar {
        NodeScalar {
            scalar_type: self.scalar_type.merge(other.scalar_type),
            nullable: self.nullable || other.nullable,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeArray {
    /// Array of scalars. `observed` is false for an empty list, which carries
    /// no evidence and yields to whatever another sample saw.
    Scalar {
        scalar_type: ScalarType,
        observed: bool,
    },
    Object(NodeObject),
}

impl NodeArray {
    pub fn empty() -> Self {
        NodeArray::Scalar {
            scalar_type: ScalarType::Text,
            observed: false,
        }
    }

    pub fn scalar(scalar_type: ScalarType) -> Self {
        NodeArray::Scalar {
            scalar_type,
            observed: true,
        }
    }

    pub fn is_object(&self) -> bool {
        matches!(self, NodeArray::Object(_))
    }

    pub fn merge(self, other: NodeArray) -> NodeArray {
        match (self, other) {
            (NodeArray::Object(a), NodeArray::Object(b)) => NodeArray::Object(a.merge(b)),
            (NodeArray::Scalar { observed: false, .. }, other) => other,
            (this, NodeArray::Scalar { observed: false, .. }) => this,
            (
                NodeArray::Scalar { scalar_type: a, .. },
                NodeArray::Scalar { scalar_type: b, .. },
            ) => NodeArray::scalar(a.merge(b)),
            (NodeArray::Object(obj), NodeArray::Scalar { .. })
            | (NodeArray::Scalar { .. }, NodeArray::Object(obj)) => {
                trace!(
                    path = ?obj.path,
                    "array holds objects and scalars across samples, degrading to text"
                );
                NodeArray::scalar(ScalarType::Text)
            }
        }
    }
}

/// Shape of one JSON object at a structural path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NodeObject {
    pub path: StructuralPath,
    pub scalars: BTreeMap<String, NodeScalar>,
    pub objects: BTreeMap<String, NodeObject>,
    pub arrays: BTreeMap<String, NodeArray>,
}

impl NodeObject {
    pub fn new(path: StructuralPath) -> Self {
        NodeObject {
            path,
            ..Default::default()
        }
    }

    pub fn child_path(&self, name: &str) -> StructuralPath {
        let mut path = self.path.clone();
        path.push(name.to_string());
        path
    }

    pub fn is_empty(&self) -> bool {
        self.scalars.is_empty() && self.objects.is_empty() && self.arrays.is_empty()
    }

    /// Field-by-field union of two shapes observed at the same path.
    pub fn merge(mut self, other: NodeObject) -> NodeObject {
        for (name, scalar) in other.scalars {
            let merged = match self.scalars.remove(&name) {
                Some(existing) => {
                    let merged = existing.merge(scalar);
                    if merged.scalar_type != existing.scalar_type {
                        trace!(
                            path = ?self.path,
                            field = %name,
                            from = %existing.scalar_type,
                            to = %merged.scalar_type,
                            "widened scalar"
                        );
                    }
                    merged
                }
                None => scalar,
            };
            self.scalars.insert(name, merged);
        }

        for (name, object) in other.objects {
            let merged = match self.objects.remove(&name) {
                Some(existing) => existing.merge(object),
                None => object,
            };
            self.objects.insert(name, merged);
        }

        for (name, array) in other.arrays {
            let merged = match self.arrays.remove(&name) {
                Some(existing) => existing.merge(array),
                None => array,
            };
            self.arrays.insert(name, merged);
        }

        self.fold_objects_into_arrays();
        self
    }

    /// A property seen as a single object in one sample and as a list in
    /// another is kept as a list, so the two never compete for one table.
    fn fold_objects_into_arrays(&mut self) {
        let shared: Vec<String> = self
            .objects
            .keys()
            .filter(|name| self.arrays.contains_key(*name))
            .cloned()
            .collect();
        for name in shared {
            if let (Some(object), Some(array)) =
                (self.objects.remove(&name), self.arrays.remove(&name))
            {
                self.arrays.insert(name, array.merge(NodeArray::Object(object)));
            }
        }
    }
}
