//! # Scoped Configuration
//!
//! A stack of configuration frames backing the nested DSL.
//!
//! Every scope block pushes a [`ConfigFrame`] and pops it on exit. Routes
//! capture a [`ConfigStack::snapshot`], an owned deep merge of every frame,
//! so later changes to an outer scope never reach routes already declared.
//!
//! ## Merge rules
//!
//! - Scalars (`namespace`, `version`, `vendor`): the inner frame wins
//! - Lists (callbacks, rescuers): inner entries are appended after outer ones
//! - [`Layered`] lists (formats, parses): appended unless the inner frame
//!   resets them
//! - Maps (renderers, parsers, constraints, defaults): key-wise, inner wins
//! - Middleware: appended, dropping entries equal to one already present

use crate::callbacks::Callback;
use crate::format::Format;
use crate::middleware::MiddlewareList;
use crate::parser::Parser;
use crate::render::Renderer;
use crate::rescue::RescueEntry;
use crate::route::Constraint;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Deep-merge of an inner (more specific) value into an outer one
pub trait Merge {
    /// Merge `inner` over `self`
    fn merge(&mut self, inner: &Self);
}

impl Merge for String {
    fn merge(&mut self, inner: &Self) {
        self.clone_from(inner);
    }
}

impl<T: Clone> Merge for Vec<T> {
    fn merge(&mut self, inner: &Self) {
        self.extend(inner.iter().cloned());
    }
}

impl<K: Clone + Eq + Hash, V: Clone> Merge for HashMap<K, V> {
    fn merge(&mut self, inner: &Self) {
        for (key, value) in inner {
            self.insert(key.clone(), value.clone());
        }
    }
}

impl Merge for Map<String, Value> {
    fn merge(&mut self, inner: &Self) {
        for (key, value) in inner {
            self.insert(key.clone(), value.clone());
        }
    }
}

/// A list that either extends or replaces the lists of outer frames
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layered<T> {
    items: Vec<T>,
    reset: bool,
}

impl<T> Default for Layered<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            reset: false,
        }
    }
}

impl<T> Layered<T> {
    /// Items that replace everything declared further out
    #[must_use]
    pub fn reset(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
            reset: true,
        }
    }

    /// Items appended to those declared further out
    #[must_use]
    pub fn append(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
            reset: false,
        }
    }

    /// Resolved items
    #[must_use]
    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Whether these items discard outer ones
    #[must_use]
    pub const fn is_reset(&self) -> bool {
        self.reset
    }

    /// First item
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }
}

impl<T: Clone> Merge for Layered<T> {
    fn merge(&mut self, inner: &Self) {
        if inner.reset {
            self.items.clone_from(&inner.items);
            self.reset = true;
        } else {
            self.items.extend(inner.items.iter().cloned());
        }
    }
}

/// A typed configuration key
///
/// Each key names one optional slot of a [`ConfigFrame`].
pub trait Key {
    /// Value stored under the key
    type Value: Merge + Clone + Default;

    /// Slot in a frame
    fn slot(frame: &ConfigFrame) -> &Option<Self::Value>;

    /// Mutable slot in a frame
    fn slot_mut(frame: &mut ConfigFrame) -> &mut Option<Self::Value>;
}

fn merge_slot<T: Merge + Clone>(outer: &mut Option<T>, inner: &Option<T>) {
    if let Some(inner) = inner {
        match outer {
            Some(outer) => outer.merge(inner),
            None => *outer = Some(inner.clone()),
        }
    }
}

macro_rules! config_keys {
    ($( $(#[doc = $doc:literal])* $key:ident => $field:ident : $ty:ty ),* $(,)?) => {
        /// One layer of configuration
        ///
        /// Unset slots are `None`, so a frame only carries what its scope
        /// declared.
        #[derive(Clone, Default)]
        pub struct ConfigFrame {
            $(
                $(#[doc = $doc])*
                pub $field: Option<$ty>,
            )*
        }

        impl ConfigFrame {
            /// Merge `inner` over this frame
            pub fn merge(&mut self, inner: &Self) {
                $( merge_slot(&mut self.$field, &inner.$field); )*
            }
        }

        impl fmt::Debug for ConfigFrame {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let mut set = f.debug_set();
                $(
                    if self.$field.is_some() {
                        set.entry(&stringify!($field));
                    }
                )*
                set.finish()
            }
        }

        /// Typed keys, one per [`ConfigFrame`] slot
        pub mod keys {
            use super::*;

            $(
                $(#[doc = $doc])*
                #[derive(Debug, Clone, Copy)]
                pub struct $key;

                impl Key for $key {
                    type Value = $ty;

                    fn slot(frame: &ConfigFrame) -> &Option<$ty> {
                        &frame.$field
                    }

                    fn slot_mut(frame: &mut ConfigFrame) -> &mut Option<$ty> {
                        &mut frame.$field
                    }
                }
            )*
        }
    };
}

config_keys! {
    /// Path segment contributed by a scope
    Namespace => namespace: String,
    /// API version of the enclosing `version` block
    Version => version: String,
    /// Vendor token expected in vendor media types
    Vendor => vendor: String,
    /// Response formats, first is the default
    Formats => formats: Layered<Format>,
    /// Custom renderers by format name
    Renderers => renderers: HashMap<String, Arc<dyn Renderer>>,
    /// Accepted request media types
    Parses => parses: Layered<String>,
    /// Body parsers by media type
    Parsers => parsers: HashMap<String, Arc<dyn Parser>>,
    /// Middleware wrapped around matched routes
    Middleware => middleware: MiddlewareList,
    /// Before, around and after filters
    Callbacks => callbacks: Vec<Callback>,
    /// Rescue handlers in declaration order
    Rescuers => rescuers: Vec<RescueEntry>,
    /// Segment constraints by parameter name
    Constraints => constraints: HashMap<String, Constraint>,
    /// Default parameter values
    Defaults => defaults: Map<String, Value>,
}

impl ConfigFrame {
    /// Empty frame
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Frame with one key set
    #[must_use]
    pub fn with<K: Key>(mut self, value: K::Value) -> Self {
        *K::slot_mut(&mut self) = Some(value);
        self
    }

    /// Value of a key, if this frame sets it
    #[must_use]
    pub fn get<K: Key>(&self) -> Option<&K::Value> {
        K::slot(self).as_ref()
    }

    /// Value of a key, or its empty default
    #[must_use]
    pub fn value<K: Key>(&self) -> K::Value {
        K::slot(self).clone().unwrap_or_default()
    }
}

/// Ordered frames, innermost last
///
/// The root frame is never popped.
#[derive(Debug, Clone)]
pub struct ConfigStack {
    frames: Vec<ConfigFrame>,
}

impl Default for ConfigStack {
    fn default() -> Self {
        Self::new(ConfigFrame::default())
    }
}

impl ConfigStack {
    /// Stack with a root frame
    #[must_use]
    pub fn new(root: ConfigFrame) -> Self {
        Self { frames: vec![root] }
    }

    /// Push a frame
    pub fn push(&mut self, frame: ConfigFrame) {
        self.frames.push(frame);
    }

    /// Pop the innermost frame; `None` at the root
    pub fn pop(&mut self) -> Option<ConfigFrame> {
        if self.frames.len() > 1 {
            self.frames.pop()
        } else {
            None
        }
    }

    /// Number of frames, root included
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    fn top_mut(&mut self) -> &mut ConfigFrame {
        if self.frames.is_empty() {
            self.frames.push(ConfigFrame::default());
        }
        let last = self.frames.len() - 1;
        &mut self.frames[last]
    }

    /// Innermost value of a key, or its empty default
    #[must_use]
    pub fn read<K: Key>(&self) -> K::Value {
        self.get::<K>().cloned().unwrap_or_default()
    }

    /// Innermost value of a key
    #[must_use]
    pub fn get<K: Key>(&self) -> Option<&K::Value> {
        self.frames.iter().rev().find_map(|frame| K::slot(frame).as_ref())
    }

    /// Set a key on the top frame
    pub fn write<K: Key>(&mut self, value: K::Value) {
        *K::slot_mut(self.top_mut()) = Some(value);
    }

    /// Update a key on the top frame in place, starting from the empty
    /// default when the top frame does not set it
    pub fn update<K: Key>(&mut self, f: impl FnOnce(&mut K::Value)) {
        f(K::slot_mut(self.top_mut()).get_or_insert_with(Default::default));
    }

    /// Every frame's value for a key, outermost first
    #[must_use]
    pub fn all<K: Key>(&self) -> Vec<&K::Value> {
        self.frames
            .iter()
            .filter_map(|frame| K::slot(frame).as_ref())
            .collect()
    }

    /// Deep merge of the whole stack into one owned frame
    #[must_use]
    pub fn snapshot(&self) -> ConfigFrame {
        self.frames
            .iter()
            .fold(ConfigFrame::default(), |mut merged, frame| {
                merged.merge(frame);
                merged
            })
    }
}
