// ── Recursive JSON merge ──
//
// Accumulates partial adapter responses. Objects merge key by key; any
// other pairing takes the incoming value.

use serde_json::Value;

/// Merge `incoming` into `base` in place.
///
/// Where both sides hold an object at the same key the merge recurses;
/// otherwise `incoming` wins. Merging `{}` is the identity, and merging the
/// same value twice leaves `base` unchanged after the first pass.
pub fn merge(base: &mut Value, incoming: &Value) {
    match (base, incoming) {
        (Value::Object(current), Value::Object(update)) => {
            for (key, value) in update {
                let nested = value.is_object() && current.get(key).is_some_and(Value::is_object);
                match current.get_mut(key) {
                    Some(existing) if nested => merge(existing, value),
                    _ => {
                        current.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (slot, value) => *slot = value.clone(),
    }
}

/// Owned variant of [`merge`].
pub fn merged(mut base: Value, incoming: &Value) -> Value {
    merge(&mut base, incoming);
    base
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_object_is_identity() {
        let base = json!({ "r": { "indoorUnit": { "status": { "mode": "heat" } } } });
        assert_eq!(merged(base.clone(), &json!({})), base);
        assert_eq!(merged(json!({}), &base), base);
    }

    #[test]
    fn conflicting_scalars_take_incoming() {
        let a = json!({ "mode": "heat", "spHeat": 20 });
        let b = json!({ "mode": "cool" });

        assert_eq!(merged(a.clone(), &b), json!({ "mode": "cool", "spHeat": 20 }));
        // Not commutative.
        assert_eq!(merged(b, &a), json!({ "mode": "heat", "spHeat": 20 }));
    }

    #[test]
    fn nested_objects_merge_recursively() {
        let mut acc = json!({ "r": {} });
        merge(
            &mut acc,
            &json!({ "r": { "indoorUnit": { "status": { "mode": "heat" } } } }),
        );
        merge(
            &mut acc,
            &json!({ "r": { "indoorUnit": { "status": { "roomTemp": 21.5 } } } }),
        );

        assert_eq!(
            acc,
            json!({ "r": { "indoorUnit": { "status": { "mode": "heat", "roomTemp": 21.5 } } } })
        );
    }

    #[test]
    fn object_replaced_by_scalar_and_back() {
        let mut acc = json!({ "a": { "b": 1 } });
        merge(&mut acc, &json!({ "a": 5 }));
        assert_eq!(acc, json!({ "a": 5 }));
        merge(&mut acc, &json!({ "a": { "c": 2 } }));
        assert_eq!(acc, json!({ "a": { "c": 2 } }));
    }

    #[test]
    fn idempotent() {
        let update = json!({ "r": { "sensors": { "0": { "uuid": "x", "humidity": 40 } } } });
        let once = merged(json!({ "r": {} }), &update);
        assert_eq!(merged(once.clone(), &update), once);
    }
}
