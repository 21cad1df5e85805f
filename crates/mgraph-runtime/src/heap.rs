//! Instance heap.
//!
//! Instances are append-only and addressed by [`InstanceId`]. Property
//! writes made while a construction is in flight are journaled so that a
//! failed construction can be undone: [`Heap::mark`] opens a checkpoint,
//! [`Heap::release`] keeps everything since it and [`Heap::restore`] drops
//! it. Checkpoints nest; the journal is cleared when the outermost one is
//! released.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;
use mgraph_core::NodeId;
use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;
use crate::value::{InstanceId, Value, Values};

/// Intercepts property reads on an instance. Returning `None` falls back to
/// the stored values.
pub type GetterOverride = Rc<dyn Fn(&Instance, &str) -> Option<Values>>;

/// A constructed instance: its class and property values by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instance {
    pub id: InstanceId,
    pub class: NodeId,
    pub class_path: String,
    values: IndexMap<String, Values>,
}

impl Instance {
    /// Stored values of `property`; empty when unset.
    pub fn get(&self, property: &str) -> &[Value] {
        self.values.get(property).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Whether `property` was given a value, possibly an empty one.
    pub fn is_set(&self, property: &str) -> bool {
        self.values.contains_key(property)
    }

    pub fn values(&self) -> impl Iterator<Item = (&str, &[Value])> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    pub(crate) fn value_map(&self) -> &IndexMap<String, Values> {
        &self.values
    }
}

/// Checkpoint returned by [`Heap::mark`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapMark {
    instances: usize,
    writes: usize,
}

#[derive(Debug, Clone)]
struct JournalEntry {
    instance: InstanceId,
    property: String,
    previous: Option<Values>,
}

#[derive(Default)]
pub struct Heap {
    instances: Vec<Instance>,
    getters: HashMap<InstanceId, GetterOverride>,
    writes: Vec<JournalEntry>,
    open_marks: usize,
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("instances", &self.instances)
            .field("getters", &self.getters.len())
            .field("open_marks", &self.open_marks)
            .finish()
    }
}

impl Heap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn get(&self, id: InstanceId) -> Option<&Instance> {
        self.instances.get(id.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Instance> {
        self.instances.iter()
    }

    pub(crate) fn alloc(
        &mut self,
        class: NodeId,
        class_path: String,
        values: IndexMap<String, Values>,
    ) -> InstanceId {
        let id = InstanceId(self.instances.len() as u32);
        self.instances.push(Instance {
            id,
            class,
            class_path,
            values,
        });
        id
    }

    /// Replaces the values of `property` on `instance`.
    pub(crate) fn set(
        &mut self,
        instance: InstanceId,
        property: &str,
        values: Values,
    ) -> Result<(), RuntimeError> {
        let target = self
            .instances
            .get_mut(instance.0 as usize)
            .ok_or(RuntimeError::UnknownInstance { id: instance })?;
        let previous = target.values.insert(property.to_string(), values);
        if self.open_marks > 0 {
            self.writes.push(JournalEntry {
                instance,
                property: property.to_string(),
                previous,
            });
        }
        Ok(())
    }

    pub(crate) fn set_getter(&mut self, instance: InstanceId, getter: GetterOverride) {
        self.getters.insert(instance, getter);
    }

    pub(crate) fn getter(&self, instance: InstanceId) -> Option<GetterOverride> {
        self.getters.get(&instance).cloned()
    }

    // -----------------------------------------------------------------------
    // Checkpoints
    // -----------------------------------------------------------------------

    pub(crate) fn mark(&mut self) -> HeapMark {
        self.open_marks += 1;
        HeapMark {
            instances: self.instances.len(),
            writes: self.writes.len(),
        }
    }

    pub(crate) fn release(&mut self, _mark: HeapMark) {
        self.close_mark();
    }

    /// Undoes every write and allocation made since `mark`.
    pub(crate) fn restore(&mut self, mark: HeapMark) {
        while self.writes.len() > mark.writes {
            let Some(write) = self.writes.pop() else {
                break;
            };
            if let Some(instance) = self.instances.get_mut(write.instance.0 as usize) {
                match write.previous {
                    Some(previous) => {
                        instance.values.insert(write.property, previous);
                    }
                    None => {
                        instance.values.shift_remove(&write.property);
                    }
                }
            }
        }
        self.instances.truncate(mark.instances);
        self.getters
            .retain(|id, _| (id.0 as usize) < mark.instances);
        self.close_mark();
    }

    fn close_mark(&mut self) {
        self.open_marks = self.open_marks.saturating_sub(1);
        if self.open_marks == 0 {
            self.writes.clear();
        }
    }
}
