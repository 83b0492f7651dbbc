//! Fixed-capacity map keyed by servo id (1..=17).
//!
//! Batch results, position targets and limits all travel as `ServoMap`s.
//! Ids outside the hand's range are never stored.

use std::fmt;
use std::ops::RangeInclusive;

use serde::ser::{Serialize, SerializeMap, Serializer};

pub const SERVO_COUNT: usize = 17;
pub const SERVO_IDS: RangeInclusive<u8> = 1..=SERVO_COUNT as u8;

/// Zero-based slot for a servo id, if the id belongs to the hand.
#[inline]
pub fn slot(id: u8) -> Option<usize> {
    SERVO_IDS.contains(&id).then(|| usize::from(id) - 1)
}

#[derive(Clone, PartialEq, Eq)]
pub struct ServoMap<T> {
    slots: [Option<T>; SERVO_COUNT],
}

impl<T> Default for ServoMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ServoMap<T> {
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| None),
        }
    }

    /// Store `value` for `id`; returns false (and drops it) for unknown ids.
    pub fn insert(&mut self, id: u8, value: T) -> bool {
        match slot(id) {
            Some(i) => {
                self.slots[i] = Some(value);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: u8) -> Option<&T> {
        slot(id).and_then(|i| self.slots[i].as_ref())
    }

    pub fn get_mut(&mut self, id: u8) -> Option<&mut T> {
        slot(id).and_then(|i| self.slots[i].as_mut())
    }

    pub fn remove(&mut self, id: u8) -> Option<T> {
        slot(id).and_then(|i| self.slots[i].take())
    }

    pub fn contains(&self, id: u8) -> bool {
        self.get(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, &T)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|v| (i as u8 + 1, v)))
    }

    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.iter().map(|(id, _)| id)
    }

    pub fn values(&self) -> impl Iterator<Item = &T> + '_ {
        self.iter().map(|(_, v)| v)
    }

    pub fn map<U>(&self, mut f: impl FnMut(u8, &T) -> U) -> ServoMap<U> {
        self.iter().map(|(id, v)| (id, f(id, v))).collect()
    }
}

impl<T> FromIterator<(u8, T)> for ServoMap<T> {
    fn from_iter<I: IntoIterator<Item = (u8, T)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

impl<T> Extend<(u8, T)> for ServoMap<T> {
    fn extend<I: IntoIterator<Item = (u8, T)>>(&mut self, iter: I) {
        for (id, v) in iter {
            self.insert(id, v);
        }
    }
}

impl<T> IntoIterator for ServoMap<T> {
    type Item = (u8, T);
    type IntoIter = std::iter::FilterMap<
        std::iter::Enumerate<std::array::IntoIter<Option<T>, SERVO_COUNT>>,
        fn((usize, Option<T>)) -> Option<(u8, T)>,
    >;

    fn into_iter(self) -> Self::IntoIter {
        fn keep<T>((i, s): (usize, Option<T>)) -> Option<(u8, T)> {
            s.map(|v| (i as u8 + 1, v))
        }
        self.slots
            .into_iter()
            .enumerate()
            .filter_map(keep as fn((usize, Option<T>)) -> Option<(u8, T)>)
    }
}

impl<T: fmt::Debug> fmt::Debug for ServoMap<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Serialized as a JSON object keyed by the decimal id.
impl<T: Serialize> Serialize for ServoMap<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (id, v) in self.iter() {
            map.serialize_entry(&id, v)?;
        }
        map.end()
    }
}
