use std::collections::BTreeMap;

use orm_behaviors::{
    Behaviors, DocumentStore, FieldValue, Managed, Session, SortableConfig, SortableListener,
    SortableOptions,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, Managed)]
#[managed(collection = "items")]
struct Item {
    id: i64,
    name: String,
    category: String,
    position: i64,
}

fn item(id: i64, name: &str, category: &str, position: i64) -> Item {
    Item {
        id,
        name: name.to_string(),
        category: category.to_string(),
        position,
    }
}

fn sortable() -> Result<Behaviors<Item>, orm_behaviors::BehaviorError> {
    let config = SortableOptions::default()
        .group_column("category")
        .apply(SortableConfig::new());
    Ok(Behaviors::new().with_sortable(SortableListener::new(config)?))
}

/// Stored names of one category in position order, with their positions.
fn stored_order(
    store: &DocumentStore,
    category: &str,
) -> Result<Vec<(i64, String)>, Box<dyn std::error::Error>> {
    let mut order = Vec::new();
    for row in store.rows("items")? {
        let stored: Item = serde_json::from_value(serde_json::Value::Object(row))?;
        if stored.category == category {
            order.push((stored.position, stored.name));
        }
    }
    order.sort();
    Ok(order)
}

fn expected(names: &[&str]) -> Vec<(i64, String)> {
    names
        .iter()
        .enumerate()
        .map(|(position, name)| (position as i64, name.to_string()))
        .collect()
}

async fn seed(
    store: &DocumentStore,
    session: &mut Session<Item>,
    behaviors: &Behaviors<Item>,
    category: &str,
    names: &[(i64, &str)],
) -> Result<(), Box<dyn std::error::Error>> {
    for (id, name) in names {
        session.persist(item(*id, name, category, -1))?;
    }
    session.flush(store, behaviors).await?;
    Ok(())
}

#[tokio::test]
async fn negative_position_appends_to_the_group() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = sortable()?;
    let mut session = Session::new();
    seed(&store, &mut session, &behaviors, "g", &[(1, "A"), (2, "B")]).await?;
    assert_eq!(stored_order(&store, "g")?, expected(&["A", "B"]));

    session.persist(item(3, "C", "g", -1))?;
    session.flush(&store, &behaviors).await?;

    assert_eq!(stored_order(&store, "g")?, expected(&["A", "B", "C"]));
    Ok(())
}

#[tokio::test]
async fn moving_to_the_end_shifts_the_middle_down() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = sortable()?;
    let mut session = Session::new();
    seed(
        &store,
        &mut session,
        &behaviors,
        "g",
        &[(1, "A"), (2, "B"), (3, "C"), (4, "D")],
    )
    .await?;

    session.get_mut(&FieldValue::Int(2)).ok_or("B is managed")?.position = 3;
    session.flush(&store, &behaviors).await?;

    assert_eq!(stored_order(&store, "g")?, expected(&["A", "C", "D", "B"]));
    let loaded = session.get(&FieldValue::Int(4)).ok_or("D is managed")?;
    assert_eq!(loaded.position, 2);
    Ok(())
}

#[tokio::test]
async fn moving_up_and_past_the_end() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = sortable()?;
    let mut session = Session::new();
    seed(&store, &mut session, &behaviors, "g", &[(1, "A"), (2, "B"), (3, "C")]).await?;

    session.get_mut(&FieldValue::Int(3)).ok_or("C is managed")?.position = 0;
    session.flush(&store, &behaviors).await?;
    assert_eq!(stored_order(&store, "g")?, expected(&["C", "A", "B"]));

    session.get_mut(&FieldValue::Int(3)).ok_or("C is managed")?.position = 42;
    session.flush(&store, &behaviors).await?;
    assert_eq!(stored_order(&store, "g")?, expected(&["A", "B", "C"]));
    Ok(())
}

#[tokio::test]
async fn inserting_at_a_position_pushes_the_rest_down() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = sortable()?;
    let mut session = Session::new();
    seed(&store, &mut session, &behaviors, "g", &[(1, "A"), (2, "B")]).await?;

    session.persist(item(3, "first", "g", 0))?;
    session.persist(item(4, "middle", "g", 2))?;
    session.flush(&store, &behaviors).await?;

    assert_eq!(
        stored_order(&store, "g")?,
        expected(&["first", "A", "middle", "B"])
    );
    Ok(())
}

#[tokio::test]
async fn deleting_closes_the_gap() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = sortable()?;
    let mut session = Session::new();
    seed(&store, &mut session, &behaviors, "g", &[(1, "A"), (2, "B"), (3, "C")]).await?;

    session.remove(&FieldValue::Int(1));
    session.flush(&store, &behaviors).await?;

    assert_eq!(stored_order(&store, "g")?, expected(&["B", "C"]));
    let loaded = session.get(&FieldValue::Int(3)).ok_or("C is managed")?;
    assert_eq!(loaded.position, 1);
    Ok(())
}

#[tokio::test]
async fn changing_group_leaves_both_groups_contiguous() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = sortable()?;
    let mut session = Session::new();
    seed(&store, &mut session, &behaviors, "x", &[(1, "A"), (2, "B"), (3, "C")]).await?;
    seed(&store, &mut session, &behaviors, "y", &[(4, "D")]).await?;

    session.get_mut(&FieldValue::Int(2)).ok_or("B is managed")?.category = "y".to_string();
    session.flush(&store, &behaviors).await?;

    assert_eq!(stored_order(&store, "x")?, expected(&["A", "C"]));
    assert_eq!(stored_order(&store, "y")?, expected(&["D", "B"]));
    Ok(())
}

#[tokio::test]
async fn delete_and_move_in_one_flush() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = sortable()?;
    let mut session = Session::new();
    seed(
        &store,
        &mut session,
        &behaviors,
        "g",
        &[(1, "A"), (2, "B"), (3, "C"), (4, "D")],
    )
    .await?;

    session.remove(&FieldValue::Int(1));
    session.get_mut(&FieldValue::Int(4)).ok_or("D is managed")?.position = 0;
    session.persist(item(5, "E", "g", -1))?;
    session.flush(&store, &behaviors).await?;

    assert_eq!(stored_order(&store, "g")?, expected(&["D", "B", "C", "E"]));
    Ok(())
}

#[tokio::test]
async fn rows_left_in_the_store_are_shifted_too() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = sortable()?;
    seed(
        &store,
        &mut Session::new(),
        &behaviors,
        "g",
        &[(1, "A"), (2, "B"), (3, "C"), (4, "D"), (5, "E")],
    )
    .await?;

    let mut session: Session<Item> = Session::new();
    session.find(&store, &FieldValue::Int(1)).await?.ok_or("A is stored")?;
    session.find(&store, &FieldValue::Int(2)).await?.ok_or("B is stored")?;
    session.get_mut(&FieldValue::Int(2)).ok_or("B is managed")?.position = 4;
    session.remove(&FieldValue::Int(1));
    session.persist(item(6, "F", "g", 1))?;
    session.flush(&store, &behaviors).await?;

    assert_eq!(
        stored_order(&store, "g")?,
        expected(&["C", "F", "D", "E", "B"])
    );
    assert!(!session.contains(&FieldValue::Int(3)));
    Ok(())
}

#[tokio::test]
async fn changing_group_to_a_position_shifts_unloaded_rows(
) -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = sortable()?;
    let mut seeding = Session::new();
    seed(&store, &mut seeding, &behaviors, "x", &[(1, "A"), (2, "B"), (3, "C")]).await?;
    seed(&store, &mut seeding, &behaviors, "y", &[(4, "D"), (5, "E")]).await?;

    let mut session: Session<Item> = Session::new();
    session.find(&store, &FieldValue::Int(2)).await?.ok_or("B is stored")?;
    let moved = session.get_mut(&FieldValue::Int(2)).ok_or("B is managed")?;
    moved.category = "y".to_string();
    moved.position = 1;
    session.flush(&store, &behaviors).await?;

    assert_eq!(stored_order(&store, "x")?, expected(&["A", "C"]));
    assert_eq!(stored_order(&store, "y")?, expected(&["D", "B", "E"]));
    Ok(())
}

#[derive(Clone, Debug)]
enum Op {
    Insert { category: bool, position: i64 },
    Move { pick: usize, position: i64 },
    Regroup { pick: usize },
    Delete { pick: usize },
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (any::<bool>(), -3i64..6).prop_map(|(category, position)| Op::Insert { category, position }),
        (0usize..32, -3i64..6).prop_map(|(pick, position)| Op::Move { pick, position }),
        (0usize..32).prop_map(|pick| Op::Regroup { pick }),
        (0usize..32).prop_map(|pick| Op::Delete { pick }),
    ]
}

fn group_name(flag: bool) -> &'static str {
    if flag {
        "a"
    } else {
        "b"
    }
}

async fn replay(batches: Vec<Vec<Op>>) -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = sortable()?;
    let mut session = Session::new();
    let mut live: Vec<i64> = Vec::new();
    let mut next_id = 1;

    for batch in batches {
        for op in batch {
            match op {
                Op::Insert { category, position } => {
                    session.persist(item(next_id, "n", group_name(category), position))?;
                    live.push(next_id);
                    next_id += 1;
                }
                Op::Move { pick, position } if !live.is_empty() => {
                    let id = FieldValue::Int(live[pick % live.len()]);
                    if let Some(stored) = session.get_mut(&id) {
                        stored.position = position;
                    }
                }
                Op::Regroup { pick } if !live.is_empty() => {
                    let id = FieldValue::Int(live[pick % live.len()]);
                    if let Some(stored) = session.get_mut(&id) {
                        stored.category = if stored.category == "a" { "b" } else { "a" }.to_string();
                    }
                }
                Op::Delete { pick } if !live.is_empty() => {
                    let id = live.remove(pick % live.len());
                    session.remove(&FieldValue::Int(id));
                }
                _ => {}
            }
        }
        session.flush(&store, &behaviors).await?;

        let mut by_group: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for row in store.rows("items")? {
            let stored: Item = serde_json::from_value(serde_json::Value::Object(row))?;
            let managed = session
                .get(&stored.identifier())
                .ok_or("every stored item stays managed")?;
            assert_eq!(managed.position, stored.position, "loaded position is stale");
            by_group.entry(stored.category).or_default().push(stored.position);
        }
        for (group, mut positions) in by_group {
            positions.sort_unstable();
            let contiguous: Vec<i64> = (0..positions.len() as i64).collect();
            assert_eq!(positions, contiguous, "group {group} has gaps or duplicates");
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn positions_stay_contiguous_across_flushes(
        batches in prop::collection::vec(prop::collection::vec(op(), 1..5), 1..8)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        runtime
            .block_on(replay(batches))
            .map_err(|err| TestCaseError::fail(err.to_string()))?;
    }
}
