//! Property-Based Tests for the Cache Table
//!
//! Uses proptest to check the table against a plain HashMap model under
//! random operation sequences. All entries use a zero lifespan here so the
//! scheduler never interferes with the model; scheduler behavior is covered
//! by the timed tests in `table.rs` and the integration tests.

use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::CacheError;
use crate::table::CacheTable;

// == Strategies ==
/// Small key space so sequences revisit keys often.
fn key_strategy() -> impl Strategy<Value = String> {
    "[a-e][0-9]"
}

fn value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9]{1,16}"
}

/// One cache operation in a generated sequence.
#[derive(Debug, Clone)]
enum CacheOp {
    Add { key: String, value: String },
    NotFoundAdd { key: String, value: String },
    Delete { key: String },
    Value { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (key_strategy(), value_strategy()).prop_map(|(key, value)| CacheOp::Add { key, value }),
        (key_strategy(), value_strategy())
            .prop_map(|(key, value)| CacheOp::NotFoundAdd { key, value }),
        key_strategy().prop_map(|key| CacheOp::Delete { key }),
        key_strategy().prop_map(|key| CacheOp::Value { key }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // For any operation sequence, the table holds exactly the entries a
    // HashMap model would hold, and lookups agree with the model.
    #[test]
    fn prop_table_matches_hashmap_model(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        runtime().block_on(async {
            let table: std::sync::Arc<CacheTable<String, String>> = CacheTable::new("model");
            let mut model: HashMap<String, String> = HashMap::new();

            for op in ops {
                match op {
                    CacheOp::Add { key, value } => {
                        table.add(key.clone(), Duration::ZERO, value.clone()).await;
                        model.insert(key, value);
                    }
                    CacheOp::NotFoundAdd { key, value } => {
                        let inserted = table
                            .not_found_add(key.clone(), Duration::ZERO, value.clone())
                            .await;
                        prop_assert_eq!(inserted, !model.contains_key(&key));
                        model.entry(key).or_insert(value);
                    }
                    CacheOp::Delete { key } => {
                        let removed = table.delete(&key).await;
                        match model.remove(&key) {
                            Some(value) => {
                                let entry = removed.unwrap();
                                prop_assert_eq!(entry.value(), &value);
                            }
                            None => prop_assert_eq!(removed.unwrap_err(), CacheError::KeyNotFound),
                        }
                    }
                    CacheOp::Value { key } => {
                        match table.value(&key).await {
                            Ok(entry) => prop_assert_eq!(Some(entry.value()), model.get(&key)),
                            Err(err) => {
                                prop_assert_eq!(err, CacheError::KeyNotFound);
                                prop_assert!(!model.contains_key(&key));
                            }
                        }
                    }
                }
            }

            prop_assert_eq!(table.count().await, model.len());
            for key in model.keys() {
                prop_assert!(table.exists(key).await);
            }
            Ok(())
        })?;
    }

    // most_accessed returns at most n entries, ordered by non-increasing
    // access count. Tie order is deliberately unasserted.
    #[test]
    fn prop_most_accessed_ordering(
        accesses in prop::collection::vec(0usize..8, 1..10),
        n in 0usize..12,
    ) {
        runtime().block_on(async {
            let table: std::sync::Arc<CacheTable<String, String>> = CacheTable::new("ranking");

            for (i, hits) in accesses.iter().enumerate() {
                let key = format!("k{i}");
                table.add(key.clone(), Duration::ZERO, "v".to_string()).await;
                for _ in 0..*hits {
                    table.value(&key).await.unwrap();
                }
            }

            let top = table.most_accessed(n).await;
            prop_assert!(top.len() <= n);
            prop_assert!(top.len() <= accesses.len());
            if n >= accesses.len() {
                prop_assert_eq!(top.len(), accesses.len());
            }

            let mut counts = Vec::with_capacity(top.len());
            for entry in &top {
                counts.push(entry.access_count().await);
            }
            prop_assert!(counts.windows(2).all(|w| w[0] >= w[1]));
            Ok(())
        })?;
    }
}
