use orm_behaviors::{
    BehaviorError, Behaviors, ClosureTreeRepository, DocumentStore, FieldValue, Managed, Session,
    TreeConfig, TreeListener,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, Managed)]
#[managed(collection = "nodes")]
struct Node {
    id: i64,
    name: String,
    parent_id: Option<i64>,
    lvl: i64,
}

fn node(id: i64, name: &str, parent_id: Option<i64>) -> Node {
    Node {
        id,
        name: name.to_string(),
        parent_id,
        lvl: 0,
    }
}

fn closure_behaviors() -> Result<Behaviors<Node>, BehaviorError> {
    Ok(Behaviors::new().with_tree(TreeListener::new(TreeConfig::closure())?))
}

/// Sorted `(ancestor, descendant, generations)` rows of the hierarchy table.
fn links(store: &DocumentStore, table: &str) -> Result<Vec<(i64, i64, i64)>, Box<dyn std::error::Error>> {
    let mut links = Vec::new();
    for row in store.rows(table)? {
        let value = |field: &str| row.get(field).and_then(serde_json::Value::as_i64).unwrap_or(-1);
        links.push((value("ancestor_id"), value("descendant_id"), value("generations")));
    }
    links.sort_unstable();
    Ok(links)
}

fn names(nodes: &[Node]) -> Vec<&str> {
    nodes.iter().map(|node| node.name.as_str()).collect()
}

fn stored_level(store: &DocumentStore, id: i64) -> Result<i64, Box<dyn std::error::Error>> {
    for row in store.rows("nodes")? {
        let stored: Node = serde_json::from_value(serde_json::Value::Object(row))?;
        if stored.id == id {
            return Ok(stored.lvl);
        }
    }
    Err(format!("node {id} is not stored").into())
}

/// root(1) -> child(2) -> leaf(3), root(1) -> other(4)
async fn build_tree(
    store: &DocumentStore,
    session: &mut Session<Node>,
    behaviors: &Behaviors<Node>,
) -> Result<(), Box<dyn std::error::Error>> {
    session.persist(node(3, "leaf", Some(2)))?;
    session.persist(node(2, "child", Some(1)))?;
    session.persist(node(1, "root", None))?;
    session.persist(node(4, "other", Some(1)))?;
    session.flush(store, behaviors).await?;
    Ok(())
}

#[tokio::test]
async fn inserts_link_every_ancestor() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = closure_behaviors()?;
    let repo = ClosureTreeRepository::new(behaviors.tree().ok_or("tree listener")?)?;
    let mut session = Session::new();
    build_tree(&store, &mut session, &behaviors).await?;

    assert_eq!(repo.hierarchy_table(), "nodes_hierarchies");
    assert_eq!(
        links(&store, repo.hierarchy_table())?,
        vec![
            (1, 1, 0),
            (1, 2, 1),
            (1, 3, 2),
            (1, 4, 1),
            (2, 2, 0),
            (2, 3, 1),
            (3, 3, 0),
            (4, 4, 0),
        ]
    );
    assert_eq!(stored_level(&store, 3)?, 2);

    let root = session.get(&FieldValue::Int(1)).ok_or("root is managed")?.clone();
    let leaf = session.get(&FieldValue::Int(3)).ok_or("leaf is managed")?.clone();
    assert_eq!(names(&repo.descendants(&store, &root).await?), ["child", "other", "leaf"]);
    assert_eq!(names(&repo.self_and_descendants(&store, &root).await?), ["root", "child", "other", "leaf"]);
    assert_eq!(names(&repo.ancestors(&store, &leaf).await?), ["child", "root"]);
    assert_eq!(names(&repo.children(&store, &root).await?), ["child", "other"]);
    assert_eq!(repo.child_count(&store, &root).await?, 2);
    assert_eq!(names(&repo.roots(&store).await?), ["root"]);
    let parent = repo.parent(&store, &leaf).await?.ok_or("leaf has a parent")?;
    assert_eq!(parent.name, "child");
    assert!(repo.parent(&store, &root).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn moving_a_subtree_relinks_it() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = closure_behaviors()?;
    let repo = ClosureTreeRepository::new(behaviors.tree().ok_or("tree listener")?)?;
    let mut session = Session::new();
    build_tree(&store, &mut session, &behaviors).await?;

    session.get_mut(&FieldValue::Int(2)).ok_or("child is managed")?.parent_id = Some(4);
    session.flush(&store, &behaviors).await?;

    assert_eq!(
        links(&store, repo.hierarchy_table())?,
        vec![
            (1, 1, 0),
            (1, 2, 2),
            (1, 3, 3),
            (1, 4, 1),
            (2, 2, 0),
            (2, 3, 1),
            (3, 3, 0),
            (4, 2, 1),
            (4, 3, 2),
            (4, 4, 0),
        ]
    );
    assert_eq!(stored_level(&store, 2)?, 2);
    assert_eq!(stored_level(&store, 3)?, 3);
    let leaf = session.get(&FieldValue::Int(3)).ok_or("leaf is managed")?;
    assert_eq!(leaf.lvl, 3);
    Ok(())
}

#[tokio::test]
async fn detaching_a_node_makes_it_a_root() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = closure_behaviors()?;
    let repo = ClosureTreeRepository::new(behaviors.tree().ok_or("tree listener")?)?;
    let mut session = Session::new();
    build_tree(&store, &mut session, &behaviors).await?;

    session.get_mut(&FieldValue::Int(2)).ok_or("child is managed")?.parent_id = None;
    session.flush(&store, &behaviors).await?;

    assert_eq!(
        links(&store, repo.hierarchy_table())?,
        vec![(1, 1, 0), (1, 4, 1), (2, 2, 0), (2, 3, 1), (3, 3, 0), (4, 4, 0)]
    );
    assert_eq!(stored_level(&store, 2)?, 0);
    assert_eq!(stored_level(&store, 3)?, 1);
    assert_eq!(names(&repo.roots(&store).await?), ["root", "child"]);
    Ok(())
}

#[tokio::test]
async fn moving_under_a_node_of_the_same_flush() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = closure_behaviors()?;
    let repo = ClosureTreeRepository::new(behaviors.tree().ok_or("tree listener")?)?;
    let mut session = Session::new();
    build_tree(&store, &mut session, &behaviors).await?;

    session.persist(node(5, "fresh", Some(4)))?;
    session.get_mut(&FieldValue::Int(3)).ok_or("leaf is managed")?.parent_id = Some(5);
    session.flush(&store, &behaviors).await?;

    let leaf = session.get(&FieldValue::Int(3)).ok_or("leaf is managed")?.clone();
    assert_eq!(names(&repo.ancestors(&store, &leaf).await?), ["fresh", "other", "root"]);
    assert_eq!(stored_level(&store, 5)?, 2);
    assert_eq!(stored_level(&store, 3)?, 3);
    Ok(())
}

#[tokio::test]
async fn moving_under_a_descendant_fails() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = closure_behaviors()?;
    let mut session = Session::new();
    build_tree(&store, &mut session, &behaviors).await?;
    let before = links(&store, "nodes_hierarchies")?;

    session.get_mut(&FieldValue::Int(1)).ok_or("root is managed")?.parent_id = Some(3);
    let result = session.flush(&store, &behaviors).await;

    assert!(matches!(result, Err(BehaviorError::UnexpectedValue(_))));
    assert_eq!(links(&store, "nodes_hierarchies")?, before);
    Ok(())
}

#[tokio::test]
async fn deleting_removes_the_subtree_and_its_links() -> Result<(), Box<dyn std::error::Error>> {
    let store = DocumentStore::new();
    let behaviors = closure_behaviors()?;
    let mut session = Session::new();
    build_tree(&store, &mut session, &behaviors).await?;

    session.remove(&FieldValue::Int(2));
    session.flush(&store, &behaviors).await?;

    assert_eq!(
        links(&store, "nodes_hierarchies")?,
        vec![(1, 1, 0), (1, 4, 1), (4, 4, 0)]
    );
    let mut remaining: Vec<i64> = store
        .rows("nodes")?
        .iter()
        .filter_map(|row| row.get("id").and_then(serde_json::Value::as_i64))
        .collect();
    remaining.sort_unstable();
    assert_eq!(remaining, vec![1, 4]);
    assert!(!session.contains(&FieldValue::Int(3)));
    Ok(())
}
