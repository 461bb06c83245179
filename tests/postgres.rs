use orm_behaviors::{
    Behaviors, ClosureTreeRepository, FieldValue, Managed, RelationalStore, Session,
    SortableConfig, SortableListener, SortableOptions, TreeConfig, TreeListener, TreeOptions,
};
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, DbBackend, Statement};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, Managed)]
#[managed(collection = "nodes")]
struct Node {
    id: i64,
    parent_id: Option<i64>,
    name: String,
    lvl: i64,
    position: i64,
}

fn node(id: i64, name: &str, parent_id: Option<i64>) -> Node {
    Node {
        id,
        parent_id,
        name: name.to_string(),
        lvl: 0,
        position: -1,
    }
}

fn behaviors() -> Result<Behaviors<Node>, orm_behaviors::BehaviorError> {
    let tree = TreeOptions::default()
        .hierarchy_table("node_hierarchies")
        .apply(TreeConfig::closure());
    let sortable = SortableOptions::default()
        .group_column("parent_id")
        .apply(SortableConfig::new());
    Ok(Behaviors::new()
        .with_tree(TreeListener::new(tree)?)
        .with_sortable(SortableListener::new(sortable)?))
}

#[tokio::test]
async fn closure_tree_and_positions_round_trip_through_postgres(
) -> Result<(), Box<dyn std::error::Error>> {
    let Some(db) = setup_database().await? else {
        return Ok(());
    };
    truncate_tables(&db).await?;
    let store = RelationalStore::new(db);
    let behaviors = behaviors()?;
    let repo = ClosureTreeRepository::new(behaviors.tree().ok_or("tree listener")?)?;

    let mut session = Session::new();
    session.persist(node(1, "root", None))?;
    session.persist(node(2, "child", Some(1)))?;
    session.persist(node(3, "sibling", Some(1)))?;
    session.persist(node(4, "leaf", Some(2)))?;
    session.flush(&store, &behaviors).await?;

    let root = session.get(&FieldValue::Int(1)).ok_or("root is managed")?.clone();
    let names: Vec<String> = repo
        .descendants(&store, &root)
        .await?
        .into_iter()
        .map(|node| node.name)
        .collect();
    assert_eq!(names, vec!["child", "sibling", "leaf"]);

    session.get_mut(&FieldValue::Int(4)).ok_or("leaf is managed")?.parent_id = Some(3);
    session.flush(&store, &behaviors).await?;

    let leaf = session.get(&FieldValue::Int(4)).ok_or("leaf is managed")?.clone();
    let ancestors: Vec<String> = repo
        .ancestors(&store, &leaf)
        .await?
        .into_iter()
        .map(|node| node.name)
        .collect();
    assert_eq!(ancestors, vec!["sibling", "root"]);
    assert_eq!(leaf.lvl, 2);

    let mut fresh = Session::new();
    let sibling: Node = fresh
        .find(&store, &FieldValue::Int(3))
        .await?
        .ok_or("sibling is stored")?;
    assert_eq!(sibling.position, 1);

    Ok(())
}

/// `None` when no test database is configured.
async fn setup_database() -> Result<Option<DatabaseConnection>, sea_orm::DbErr> {
    let Ok(url) = std::env::var("ORM_BEHAVIORS_TEST_DATABASE_URL") else {
        return Ok(None);
    };
    Database::connect(url).await.map(Some)
}

async fn truncate_tables(db: &DatabaseConnection) -> Result<(), sea_orm::DbErr> {
    db.execute(Statement::from_string(
        DbBackend::Postgres,
        r#"
        CREATE TABLE IF NOT EXISTS nodes (
            id BIGINT PRIMARY KEY,
            parent_id BIGINT,
            name TEXT NOT NULL,
            lvl BIGINT NOT NULL,
            position BIGINT NOT NULL
        );
        "#,
    ))
    .await?;

    db.execute(Statement::from_string(
        DbBackend::Postgres,
        r#"
        CREATE TABLE IF NOT EXISTS node_hierarchies (
            ancestor_id BIGINT NOT NULL,
            descendant_id BIGINT NOT NULL,
            generations BIGINT NOT NULL,
            PRIMARY KEY (ancestor_id, descendant_id)
        );
        "#,
    ))
    .await?;

    db.execute(Statement::from_string(
        DbBackend::Postgres,
        "TRUNCATE TABLE node_hierarchies, nodes;",
    ))
    .await?;

    Ok(())
}
