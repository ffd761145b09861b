// HANDLE - Typed id tables
//
// Buffers, surfaces and images are addressed by small integers handed out here.
// Id 0 is never issued so callers can use it as "unset".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

macro_rules! define_id {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                Self(raw)
            }
        }
    };
}

define_id!(BufferId);
define_id!(SurfaceId);
define_id!(ImageId);

/// Id-to-object map with monotonically increasing ids.
#[derive(Debug)]
pub struct HandleTable<T> {
    objects: HashMap<u32, T>,
    next_id: u32,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self {
            objects: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn insert(&mut self, object: T) -> u32 {
        let id = self.next_id;
        // Wraps long after any realistic session, skipping 0 and live ids.
        loop {
            self.next_id = self.next_id.wrapping_add(1).max(1);
            if !self.objects.contains_key(&self.next_id) {
                break;
            }
        }
        self.objects.insert(id, object);
        id
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.objects.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut T> {
        self.objects.get_mut(&id)
    }

    pub fn remove(&mut self, id: u32) -> Option<T> {
        self.objects.remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.objects.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.objects.iter().map(|(id, obj)| (*id, obj))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (u32, &mut T)> {
        self.objects.iter_mut().map(|(id, obj)| (*id, obj))
    }
}
