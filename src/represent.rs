//! Portable replacement for reflective, JavaBean-style construction and
//! representation.
//!
//! Host-typed construction (mapping YAML nodes to application types, and
//! back) is inherently host-specific, so instead of a reflective
//! `Constructor`/`Representer`/`PropertyUtils` layer this crate exposes two
//! small traits that a caller implements once per application type.

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::string::String;

use crate::{ComposerError, Document, EmitterError};

/// Builds a host value `T` out of a composed node.
///
/// Implement this once per `(tag, T)` pair and register it in a
/// [`TagRegistry`]; there is no reflective property enumeration.
pub trait Construct<T> {
    /// Build a host value out of the node at `index` in `document`.
    fn construct(&self, document: &Document, index: i32) -> Result<T, ComposerError>;
}

/// Adds a node representing `value` to a document.
///
/// This is the inverse of [`Construct`].
pub trait Represent<T> {
    /// Add `value` to `document` and return the id of the node created for
    /// it.
    fn represent(&self, document: &mut Document, value: &T) -> Result<i32, EmitterError>;
}

type ConstructFn<T> = Box<dyn Fn(&Document, i32) -> Result<T, ComposerError>>;
type RepresentFn<T> = Box<dyn Fn(&mut Document, &T) -> Result<i32, EmitterError>>;

/// Maps tag strings to construct/represent functions for a single host
/// type `T`.
///
/// A registry holds at most one constructor and one representer per tag.
/// It does not call into [`Document::load()`] or [`Document::dump()`]
/// itself; callers consult it once they already hold a composed node (to
/// construct) or a host value (to represent).
pub struct TagRegistry<T> {
    constructors: BTreeMap<String, ConstructFn<T>>,
    representers: BTreeMap<String, RepresentFn<T>>,
}

impl<T> TagRegistry<T> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        TagRegistry {
            constructors: BTreeMap::new(),
            representers: BTreeMap::new(),
        }
    }

    /// Register a constructor for `tag`, replacing any previous one.
    pub fn add_constructor(&mut self, tag: &str, constructor: impl Construct<T> + 'static) {
        self.constructors.insert(
            String::from(tag),
            Box::new(move |document, index| constructor.construct(document, index)),
        );
    }

    /// Register a representer for `tag`, replacing any previous one.
    pub fn add_representer(&mut self, tag: &str, representer: impl Represent<T> + 'static) {
        self.representers.insert(
            String::from(tag),
            Box::new(move |document, value| representer.represent(document, value)),
        );
    }

    /// Construct a host value from the node at `index`, dispatching on the
    /// node's tag.
    ///
    /// # Errors
    ///
    /// Returns [`ComposerError::Problem`] if `index` is out of range or no
    /// constructor is registered for the node's tag.
    pub fn construct(&self, document: &Document, index: i32) -> Result<T, ComposerError> {
        let node = document
            .get_node(index)
            .ok_or(ComposerError::Problem {
                problem: "node index out of range",
                mark: crate::Mark::default(),
            })?;
        let tag = node.tag.as_deref().unwrap_or(crate::STR_TAG);
        match self.constructors.get(tag) {
            Some(constructor) => constructor(document, index),
            None => Err(ComposerError::Problem {
                problem: "no constructor registered for tag",
                mark: node.start_mark,
            }),
        }
    }

    /// Represent `value` under `tag`, adding the resulting node(s) to
    /// `document` and returning the new node's id.
    ///
    /// # Errors
    ///
    /// Returns [`EmitterError::Problem`] if no representer is registered
    /// for `tag`.
    pub fn represent(
        &self,
        document: &mut Document,
        tag: &str,
        value: &T,
    ) -> Result<i32, EmitterError> {
        match self.representers.get(tag) {
            Some(representer) => representer(document, value),
            None => Err(EmitterError::Problem("no representer registered for tag")),
        }
    }
}

impl<T> Default for TagRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
