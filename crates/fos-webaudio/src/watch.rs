//! Property Watch
//!
//! Intercepted attribute slots. A watched slot routes every write through a
//! handler that sees the stored value and the incoming one and returns what
//! is actually stored. Handlers are plain `fn` pointers kept in a table owned
//! by the object, so they can take the owner by `&mut` while they run.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Write handler: `(owner, key, old, new) -> stored`
pub type WatchHandler<C, K, V, E> = fn(&mut C, K, &V, V) -> Result<V, E>;

struct Slot<C, K, V, E> {
    value: V,
    handler: Option<WatchHandler<C, K, V, E>>,
}

/// Slot table keyed by property name
pub struct PropertyWatch<K, V, C, E> {
    slots: HashMap<K, Slot<C, K, V, E>>,
}

impl<K: Copy + Eq + Hash, V, C, E> PropertyWatch<K, V, C, E> {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
        }
    }

    /// Define a plain field, or reset an existing one without running its handler
    pub fn define(&mut self, key: K, value: V) {
        match self.slots.get_mut(&key) {
            Some(slot) => slot.value = value,
            None => {
                self.slots.insert(key, Slot { value, handler: None });
            }
        }
    }

    /// Intercept writes to `key`. The last handler installed wins.
    ///
    /// Returns false if no such field is defined.
    pub fn watch(&mut self, key: K, handler: WatchHandler<C, K, V, E>) -> bool {
        match self.slots.get_mut(&key) {
            Some(slot) => {
                slot.handler = Some(handler);
                true
            }
            None => false,
        }
    }

    /// Turn `key` back into a plain field holding its current value
    pub fn unwatch(&mut self, key: K) -> bool {
        self.slots
            .get_mut(&key)
            .and_then(|slot| slot.handler.take())
            .is_some()
    }

    pub fn is_watched(&self, key: K) -> bool {
        self.slots.get(&key).is_some_and(|slot| slot.handler.is_some())
    }

    /// Current stored value
    pub fn get(&self, key: K) -> Option<&V> {
        self.slots.get(&key).map(|slot| &slot.value)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn commit(&mut self, key: K, value: V) {
        self.define(key, value);
    }
}

impl<K: Copy + Eq + Hash, V, C, E> Default for PropertyWatch<K, V, C, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: fmt::Debug, V: fmt::Debug, C, E> fmt::Debug for PropertyWatch<K, V, C, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (key, slot) in &self.slots {
            map.entry(key, &(&slot.value, slot.handler.is_some()));
        }
        map.finish()
    }
}

/// An object whose attributes live in a [`PropertyWatch`]
pub trait Observed: Sized {
    type Key: Copy + Eq + Hash;
    type Value: Clone;
    type Error;

    fn watch_table(&mut self) -> &mut PropertyWatch<Self::Key, Self::Value, Self, Self::Error>;

    /// Write an attribute through its handler, if any.
    ///
    /// A rejected write leaves the stored value untouched. Writing an
    /// undefined key defines it as a plain field.
    fn assign(&mut self, key: Self::Key, value: Self::Value) -> Result<(), Self::Error> {
        let table = self.watch_table();
        let (handler, old) = match table.slots.get_mut(&key) {
            Some(slot) => match slot.handler {
                Some(handler) => (handler, slot.value.clone()),
                None => {
                    slot.value = value;
                    return Ok(());
                }
            },
            None => {
                table.define(key, value);
                return Ok(());
            }
        };

        let stored = handler(self, key, &old, value)?;
        self.watch_table().commit(key, stored);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Field {
        Level,
        Label,
    }

    #[derive(Default)]
    struct Dial {
        table: PropertyWatch<Field, i64, Dial, String>,
        seen: Vec<(i64, i64)>,
    }

    impl Observed for Dial {
        type Key = Field;
        type Value = i64;
        type Error = String;

        fn watch_table(&mut self) -> &mut PropertyWatch<Field, i64, Dial, String> {
            &mut self.table
        }
    }

    fn bounded(dial: &mut Dial, _: Field, old: &i64, new: i64) -> Result<i64, String> {
        if !(0..=10).contains(&new) {
            return Err(format!("{new} out of range"));
        }
        dial.seen.push((*old, new));
        Ok(new)
    }

    fn doubled(_: &mut Dial, _: Field, _: &i64, new: i64) -> Result<i64, String> {
        Ok(new * 2)
    }

    fn dial() -> Dial {
        let mut dial = Dial::default();
        dial.table.define(Field::Level, 1);
        dial.table.define(Field::Label, 0);
        dial
    }

    #[test]
    fn test_handler_sees_old_and_new() {
        let mut dial = dial();
        assert!(dial.table.watch(Field::Level, bounded));

        dial.assign(Field::Level, 4).unwrap();
        dial.assign(Field::Level, 7).unwrap();

        assert_eq!(dial.seen, vec![(1, 4), (4, 7)]);
        assert_eq!(dial.table.get(Field::Level), Some(&7));
    }

    #[test]
    fn test_rejected_write_keeps_value() {
        let mut dial = dial();
        dial.table.watch(Field::Level, bounded);
        dial.assign(Field::Level, 3).unwrap();

        assert!(dial.assign(Field::Level, 42).is_err());
        assert_eq!(dial.table.get(Field::Level), Some(&3));
    }

    #[test]
    fn test_handler_result_is_stored() {
        let mut dial = dial();
        dial.table.watch(Field::Label, doubled);
        dial.assign(Field::Label, 5).unwrap();
        assert_eq!(dial.table.get(Field::Label), Some(&10));
    }

    #[test]
    fn test_last_watch_wins() {
        let mut dial = dial();
        dial.table.watch(Field::Level, bounded);
        dial.table.watch(Field::Level, doubled);

        dial.assign(Field::Level, 50).unwrap();
        assert_eq!(dial.table.get(Field::Level), Some(&100));
        assert!(dial.seen.is_empty());
    }

    #[test]
    fn test_unwatch_keeps_value_and_stops_interception() {
        let mut dial = dial();
        dial.table.watch(Field::Level, bounded);
        dial.assign(Field::Level, 6).unwrap();

        assert!(dial.table.unwatch(Field::Level));
        assert!(!dial.table.is_watched(Field::Level));
        assert_eq!(dial.table.get(Field::Level), Some(&6));

        dial.assign(Field::Level, 99).unwrap();
        assert_eq!(dial.table.get(Field::Level), Some(&99));
        assert_eq!(dial.seen, vec![(1, 6)]);
        assert!(!dial.table.unwatch(Field::Level));
    }

    #[test]
    fn test_watch_requires_defined_field() {
        let mut dial = Dial::default();
        assert!(!dial.table.watch(Field::Level, bounded));
        dial.assign(Field::Level, 3).unwrap();
        assert_eq!(dial.table.get(Field::Level), Some(&3));
        assert_eq!(dial.table.len(), 1);
    }
}
