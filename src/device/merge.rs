// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Recursive merge of partial update documents.
//!
//! The relay pushes sparse documents: only the keys that changed are
//! present. Merging rules:
//!
//! - objects merge key-wise, recursing into keys present on both sides
//! - scalars and mismatched types overwrite
//! - arrays are replaced, except outlet lists (every element an object with
//!   an `outlet` key) which merge entry by entry on the outlet number, so a
//!   push naming one outlet leaves the others untouched

use serde_json::Value;

/// Merges `update` into `target` in place.
///
/// # Examples
///
/// ```
/// use coolkit_client::device::merge;
/// use serde_json::json;
///
/// let mut doc = json!({"params": {"online": false, "fwVersion": "3.0"}});
/// merge(&mut doc, json!({"params": {"online": true}}));
/// assert_eq!(doc, json!({"params": {"online": true, "fwVersion": "3.0"}}));
/// ```
pub fn merge(target: &mut Value, update: Value) {
    match (target, update) {
        (Value::Object(target), Value::Object(update)) => {
            for (key, value) in update {
                match target.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(target), Value::Array(update))
            if is_outlet_list(target.as_slice()) && is_outlet_list(&update) =>
        {
            merge_outlets(target, update);
        }
        (target, update) => *target = update,
    }
}

/// Reads the outlet number of a `switches` entry.
///
/// Firmware sends it as a number; some gateways send a numeric string.
pub(crate) fn outlet_of(entry: &Value) -> Option<u64> {
    match entry.get("outlet")? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn is_outlet_list(items: &[Value]) -> bool {
    !items.is_empty() && items.iter().all(|item| outlet_of(item).is_some())
}

fn merge_outlets(target: &mut Vec<Value>, update: Vec<Value>) {
    for entry in update {
        let outlet = outlet_of(&entry);
        match target.iter_mut().find(|existing| outlet_of(existing) == outlet) {
            Some(existing) => merge(existing, entry),
            None => target.push(entry),
        }
    }
}
