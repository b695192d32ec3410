#![cfg(test)]

// HandleTable checked against a std HashMap model. Lives inside the crate
// because the table is crate-private.

use crate::handle_table::tests::hash_of;
use crate::handle_table::{Handle, HandleTable, Occupied};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};

// Keys are drawn from a small pool by index so shrinking converges on short
// pools and early keys.
#[derive(Clone, Debug)]
enum TableOp {
    Insert { key: usize, value: u16 },
    Remove { key: usize },
    RemoveRetired { pick: usize },
    Find { key: usize },
    Scan,
}

fn table_ops() -> impl Strategy<Value = (Vec<String>, Vec<TableOp>)> {
    proptest::collection::vec("[a-d]{0,4}", 1..=6).prop_flat_map(|pool| {
        let key = 0..pool.len();
        let op = prop_oneof![
            3 => (key.clone(), any::<u16>()).prop_map(|(key, value)| TableOp::Insert { key, value }),
            2 => key.clone().prop_map(|key| TableOp::Remove { key }),
            1 => any::<usize>().prop_map(|pick| TableOp::RemoveRetired { pick }),
            2 => key.prop_map(|key| TableOp::Find { key }),
            1 => Just(TableOp::Scan),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

fn check_against_model(
    pool: &[String],
    ops: Vec<TableOp>,
    hash: fn(&str) -> u64,
) -> Result<(), TestCaseError> {
    let mut table: HandleTable<String, u16> = HandleTable::with_capacity(0);
    let mut expected: HashMap<String, (Handle, u16)> = HashMap::new();
    let mut retired: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            TableOp::Insert { key, value } => {
                let name = &pool[key];
                let current = expected.get(name).map(|&(handle, _)| handle);
                let mut built = false;
                let res = table.insert_with(hash(name), name.clone(), || {
                    built = true;
                    value
                });
                match (res, current) {
                    (Ok(handle), None) => {
                        prop_assert!(built);
                        expected.insert(name.clone(), (handle, value));
                    }
                    (Err(Occupied { handle, key }), Some(current)) => {
                        prop_assert!(!built, "value built for an occupied key");
                        prop_assert_eq!(handle, current);
                        prop_assert_eq!(&key, name);
                    }
                    (Ok(_), Some(_)) => prop_assert!(false, "duplicate {:?} accepted", name),
                    (Err(_), None) => prop_assert!(false, "absent {:?} reported occupied", name),
                }
            }
            TableOp::Remove { key } => {
                let name = &pool[key];
                match expected.remove(name) {
                    Some((handle, value)) => {
                        prop_assert_eq!(table.remove(handle), Some((name.clone(), value)));
                        retired.push(handle);
                    }
                    None => prop_assert_eq!(table.find(hash(name), name.as_str()), None),
                }
            }
            TableOp::RemoveRetired { pick } => {
                if let Some(&handle) = retired.get(pick % retired.len().max(1)) {
                    prop_assert_eq!(table.remove(handle), None);
                }
            }
            TableOp::Find { key } => {
                let name = &pool[key];
                let want = expected.get(name).map(|&(handle, _)| handle);
                prop_assert_eq!(table.find(hash(name), name.as_str()), want);
            }
            TableOp::Scan => {
                let seen: BTreeMap<String, u16> =
                    table.iter().map(|(_, k, v)| (k.clone(), *v)).collect();
                let want: BTreeMap<String, u16> =
                    expected.iter().map(|(k, &(_, v))| (k.clone(), v)).collect();
                prop_assert_eq!(seen, want);
            }
        }

        prop_assert!(retired.iter().all(|&h| table.value(h).is_none()));
        prop_assert_eq!(table.len(), expected.len());
        prop_assert_eq!(table.is_empty(), expected.is_empty());
    }
    Ok(())
}

// Checked after every step:
// - an occupied insert reports the live handle, hands the key back and never
//   builds a value;
// - `find` returns the handle issued at insertion, and only while live;
// - `remove` returns the owned pair, and retired handles never resolve or
//   remove anything;
// - `iter`, `len` and `is_empty` agree with the model.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, ..ProptestConfig::default() })]
    #[test]
    fn table_matches_model((pool, ops) in table_ops()) {
        check_against_model(&pool, ops, |k| hash_of(k))?;
    }

    // Every key lands on the same hash, so only `K: Eq` separates them.
    #[test]
    fn table_matches_model_when_all_hashes_collide((pool, ops) in table_ops()) {
        check_against_model(&pool, ops, |_| 0)?;
    }
}
