// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Multi-valued key/value lists.
//!
//! A [`KvList`] is a singly linked chain of [`KvPair`] entries. It carries
//! applied configuration, command arguments and stored snapshots. Keys are
//! not unique; lookups return the first match in chain order.

use std::fmt;

use crate::error::{CoreError, Result};

/// Capacity reserved by the first value append.
const INITIAL_VALUE_CAPACITY: usize = 4;

/// One named entry with zero or more values.
pub struct KvPair {
    key: String,
    values: Vec<String>,
    next: Option<Box<KvPair>>,
}

impl KvPair {
    /// Create an entry seeded with `values`. The key must be non-empty.
    pub fn new<I, V>(key: impl Into<String>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let key = key.into();
        if key.is_empty() {
            return Err(CoreError::invalid_argument("key", "must not be empty"));
        }

        let mut pair = Self {
            key,
            values: Vec::new(),
            next: None,
        };
        for value in values {
            pair.append_value(value);
        }
        Ok(pair)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Append a value, growing storage 0 -> 4 -> 8 -> ... when full.
    pub fn append_value(&mut self, value: impl Into<String>) {
        let used = self.values.len();
        let allocated = self.values.capacity();
        if used == allocated {
            let target = if allocated == 0 {
                INITIAL_VALUE_CAPACITY
            } else {
                allocated * 2
            };
            self.values.reserve_exact(target - used);
        }
        self.values.push(value.into());
    }

    pub fn used_values(&self) -> usize {
        self.values.len()
    }

    pub fn allocated_values(&self) -> usize {
        self.values.capacity()
    }

    fn detached_clone(&self) -> KvPair {
        let mut values = Vec::with_capacity(self.values.capacity());
        values.extend(self.values.iter().cloned());
        KvPair {
            key: self.key.clone(),
            values,
            next: None,
        }
    }
}

impl fmt::Debug for KvPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvPair")
            .field("key", &self.key)
            .field("values", &self.values)
            .finish()
    }
}

/// An owned chain of [`KvPair`] entries.
#[derive(Default)]
pub struct KvList {
    head: Option<Box<KvPair>>,
}

impl KvList {
    pub fn new() -> Self {
        Self { head: None }
    }

    /// A one-entry list.
    pub fn make<I, V>(key: impl Into<String>, values: I) -> Result<Self>
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut list = Self::new();
        list.push_front(KvPair::new(key, values)?);
        Ok(list)
    }

    /// Link `pair` in as the new head.
    pub fn push_front(&mut self, mut pair: KvPair) {
        pair.next = self.head.take();
        self.head = Some(Box::new(pair));
    }

    /// Unlink and return the head entry.
    pub fn pop_front(&mut self) -> Option<KvPair> {
        self.head.take().map(|mut node| {
            self.head = node.next.take();
            *node
        })
    }

    pub fn front(&self) -> Option<&KvPair> {
        self.head.as_deref()
    }

    pub fn front_mut(&mut self) -> Option<&mut KvPair> {
        self.head.as_deref_mut()
    }

    /// First entry with `key`.
    pub fn find(&self, key: &str) -> Option<&KvPair> {
        self.iter().find(|pair| pair.key == key)
    }

    pub fn find_mut(&mut self, key: &str) -> Option<&mut KvPair> {
        let mut cursor = self.head.as_deref_mut();
        while let Some(node) = cursor {
            if node.key == key {
                return Some(node);
            }
            cursor = node.next.as_deref_mut();
        }
        None
    }

    /// First value of the first entry with `key`.
    pub fn simple_value(&self, key: &str) -> Option<&str> {
        self.find(key)
            .and_then(|pair| pair.values.first())
            .map(String::as_str)
    }

    /// Visit entries in order until `visitor` returns false.
    ///
    /// Returns true iff every visit returned true.
    pub fn walk<F>(&self, mut visitor: F) -> bool
    where
        F: FnMut(&str, &[String]) -> bool,
    {
        self.iter().all(|pair| visitor(&pair.key, &pair.values))
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            next: self.head.as_deref(),
        }
    }

    pub fn len(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
}

/// Deep copy: every entry, key and value is freshly allocated.
impl Clone for KvList {
    fn clone(&self) -> Self {
        let copies: Vec<KvPair> = self.iter().map(KvPair::detached_clone).collect();
        let mut list = KvList::new();
        for pair in copies.into_iter().rev() {
            list.push_front(pair);
        }
        list
    }
}

// Unlink iteratively so long chains don't recurse through Box drops.
impl Drop for KvList {
    fn drop(&mut self) {
        let mut cursor = self.head.take();
        while let Some(mut node) = cursor {
            cursor = node.next.take();
        }
    }
}

impl PartialEq for KvList {
    fn eq(&self, other: &Self) -> bool {
        let mut left = self.iter();
        let mut right = other.iter();
        loop {
            match (left.next(), right.next()) {
                (None, None) => return true,
                (Some(a), Some(b)) if a.key == b.key && a.values == b.values => {}
                _ => return false,
            }
        }
    }
}

impl Eq for KvList {}

impl fmt::Debug for KvList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

/// Iterator over the entries of a [`KvList`].
pub struct Iter<'a> {
    next: Option<&'a KvPair>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a KvPair;

    fn next(&mut self) -> Option<Self::Item> {
        self.next.map(|node| {
            self.next = node.next.as_deref();
            node
        })
    }
}

impl<'a> IntoIterator for &'a KvList {
    type Item = &'a KvPair;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> KvList {
        let mut list = KvList::new();
        list.push_front(KvPair::new("servers", ["a:11211", "b:11211"]).unwrap());
        list.push_front(KvPair::new("empty", Vec::<String>::new()).unwrap());
        list.push_front(KvPair::new("mode", ["fast"]).unwrap());
        list
    }

    #[test]
    fn test_make_then_find_preserves_values() {
        let list = KvList::make("servers", ["a", "b", "c"]).unwrap();
        let pair = list.find("servers").unwrap();
        assert_eq!(pair.values(), &["a", "b", "c"]);
    }

    #[test]
    fn test_make_rejects_empty_key() {
        let err = KvList::make("", ["x"]).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_append_value_growth() {
        let mut pair = KvPair::new("k", Vec::<String>::new()).unwrap();
        assert_eq!(pair.used_values(), 0);

        pair.append_value("v0");
        assert!(pair.allocated_values() >= 4);

        for n in 1..=20 {
            pair.append_value(format!("v{}", n));
            assert_eq!(pair.used_values(), n + 1);
            assert!(pair.allocated_values() >= pair.used_values());
        }
        assert_eq!(pair.values()[20], "v20");
    }

    #[test]
    fn test_find_returns_first_match() {
        let mut list = KvList::make("k", ["older"]).unwrap();
        list.push_front(KvPair::new("k", ["newer"]).unwrap());
        assert_eq!(list.simple_value("k"), Some("newer"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_zero_values_is_not_absent() {
        let list = sample();
        let pair = list.find("empty").unwrap();
        assert!(pair.values().is_empty());
        assert_eq!(list.simple_value("empty"), None);
        assert!(list.find("missing").is_none());
    }

    #[test]
    fn test_find_mut_appends_in_place() {
        let mut list = sample();
        list.find_mut("servers").unwrap().append_value("c:11211");
        assert_eq!(list.find("servers").unwrap().used_values(), 3);
    }

    #[test]
    fn test_walk_visits_in_order() {
        let list = sample();
        let mut seen = Vec::new();
        assert!(list.walk(|k, _| {
            seen.push(k.to_string());
            true
        }));
        assert_eq!(seen, vec!["mode", "empty", "servers"]);
    }

    #[test]
    fn test_walk_short_circuits() {
        let list = sample();
        let mut visits = 0;
        let completed = list.walk(|k, _| {
            visits += 1;
            k != "empty"
        });
        assert!(!completed);
        assert_eq!(visits, 2);
    }

    #[test]
    fn test_clone_is_deep() {
        let list = sample();
        let copy = list.clone();
        assert_eq!(copy, list);

        for (a, b) in list.iter().zip(copy.iter()) {
            assert!(!std::ptr::eq(a, b));
            assert_ne!(a.key().as_ptr(), b.key().as_ptr());
            for (va, vb) in a.values().iter().zip(b.values()) {
                assert_eq!(va, vb);
                assert_ne!(va.as_ptr(), vb.as_ptr());
            }
        }
    }

    #[test]
    fn test_clone_is_independent() {
        let list = sample();
        let mut copy = list.clone();
        copy.find_mut("mode").unwrap().append_value("safe");
        assert_ne!(copy, list);
        assert_eq!(list.find("mode").unwrap().values(), &["fast"]);
    }

    #[test]
    fn test_pop_front_detaches_entry() {
        let mut list = sample();
        let head = list.pop_front().unwrap();
        assert_eq!(head.key(), "mode");
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_drop_long_chain() {
        let mut list = KvList::new();
        for n in 0..200_000 {
            list.push_front(KvPair::new(format!("k{}", n), ["v"]).unwrap());
        }
        drop(list);
    }
}
