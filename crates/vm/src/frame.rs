//! Per-call execution state.

use crate::object::{Local, ObjectRef};
use crate::types::{ClassId, MethodType, NamespaceId};
use hashbrown::HashMap;
use std::sync::Arc;

/// Names addressing a callable: namespace, class and mangled method. The
/// loader fills these progressively while discovering the entry point.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallPath {
    pub namespace: Option<String>,
    pub class: Option<String>,
    pub method: Option<String>,
}

impl CallPath {
    pub fn new(namespace: &str, class: &str, method: &str) -> Self {
        Self {
            namespace: Some(namespace.to_string()),
            class: Some(class.to_string()),
            method: Some(method.to_string()),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.namespace.is_some() && self.class.is_some() && self.method.is_some()
    }
}

/// A call-stack record: resolved metadata of the running method, its local
/// table, the `this` reference and the instruction offset.
pub struct Frame {
    /// Unique for the lifetime of the VM; local references name frames by id
    /// so a stale reference resolves to nothing instead of dangling.
    pub id: u64,
    pub namespace: NamespaceId,
    pub class: ClassId,
    pub method: Arc<MethodType>,
    pub locals: HashMap<String, Local>,
    /// ClassObject for instance methods, ClassWrapper otherwise.
    pub this_ref: ObjectRef,
    /// Byte offset into the method body, kept current for diagnostics.
    pub offset: usize,
}

impl Frame {
    pub fn new(
        id: u64,
        namespace: NamespaceId,
        class: ClassId,
        method: Arc<MethodType>,
        this_ref: ObjectRef,
    ) -> Self {
        Self {
            id,
            namespace,
            class,
            method,
            locals: HashMap::new(),
            this_ref,
            offset: 0,
        }
    }
}
