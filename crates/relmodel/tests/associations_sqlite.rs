use relmodel::prelude::*;
use relmodel::{MATCHING_DATA, OrmErrorKind};
use relmodel_sqlite::SqliteConnection;

fn registry() -> Arc<TableRegistry> {
    let conn = SqliteConnection::open_memory().expect("open sqlite memory db");
    let registry = TableRegistry::new(Datasource::new(Arc::new(conn), Dialect::Sqlite));

    registry
        .add_with(
            TableConfig::new("Users").schema(
                TableSchema::new()
                    .id()
                    .column(ColumnSchema::new("name", SqlType::Text))
                    .column(ColumnSchema::new("email", SqlType::Text).nullable()),
            ),
            |t| {
                t.has_one("Profiles");
                t.has_many("Posts").set_dependent(true);
                Ok(())
            },
        )
        .expect("register Users");
    registry
        .add_with(
            TableConfig::new("Posts").schema(
                TableSchema::new()
                    .id()
                    .column(ColumnSchema::new("user_id", SqlType::Integer).nullable())
                    .column(ColumnSchema::new("title", SqlType::Text)),
            ),
            |t| {
                t.belongs_to("Users");
                t.belongs_to_many("Tags");
                t.has_many("Comments").set_dependent(true);
                Ok(())
            },
        )
        .expect("register Posts");
    registry
        .add(
            TableConfig::new("Tags").schema(
                TableSchema::new()
                    .id()
                    .column(ColumnSchema::new("tag", SqlType::Text)),
            ),
        )
        .expect("register Tags");
    registry
        .add(
            TableConfig::new("PostsTags").schema(
                TableSchema::new()
                    .column(ColumnSchema::new("post_id", SqlType::Integer).primary_key())
                    .column(ColumnSchema::new("tag_id", SqlType::Integer).primary_key()),
            ),
        )
        .expect("register PostsTags");
    registry
        .add(
            TableConfig::new("Profiles").schema(
                TableSchema::new()
                    .id()
                    .column(ColumnSchema::new("user_id", SqlType::Integer).nullable())
                    .column(ColumnSchema::new("bio", SqlType::Text).nullable()),
            ),
        )
        .expect("register Profiles");
    registry
        .add_with(
            TableConfig::new("Comments").schema(
                TableSchema::new()
                    .id()
                    .column(ColumnSchema::new("post_id", SqlType::Integer))
                    .column(ColumnSchema::new("user_id", SqlType::Integer).nullable())
                    .column(ColumnSchema::new("body", SqlType::Text)),
            ),
            |t| {
                t.belongs_to("Posts");
                t.belongs_to("Users");
                Ok(())
            },
        )
        .expect("register Comments");

    registry.create_tables().expect("create tables");
    registry
}

fn tag(name: &str) -> Entity {
    Entity::from_values([("tag", name)])
}

fn text(entity: &Entity, field: &str) -> String {
    entity
        .value(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn id(entity: &Entity) -> i64 {
    entity
        .value("id")
        .and_then(Value::as_i64)
        .expect("entity has an id")
}

/// bob (no posts), ada (profile, "Rust tips" [rust, orm] with a comment by
/// bob, "Cooking" [food]) and cy ("Rust again" [rust]).
fn seed(registry: &Arc<TableRegistry>) {
    let users = registry.get("Users").unwrap();
    let options = SaveOptions::default();

    let mut bob = Entity::from_values([("name", "bob")]);
    assert!(users.save(&mut bob, &options).unwrap());

    let mut rust_tips = Entity::from_values([("title", "Rust tips")]);
    rust_tips.set_many("tags", vec![tag("rust"), tag("orm")]);
    rust_tips.set_many(
        "comments",
        vec![Entity::from_values([
            ("body", Value::from("Nice")),
            ("user_id", Value::BigInt(id(&bob))),
        ])],
    );
    let mut cooking = Entity::from_values([("title", "Cooking")]);
    cooking.set_many("tags", vec![tag("food")]);

    let mut ada = Entity::from_values([("name", "ada"), ("email", "ada@example.com")]);
    ada.set_one("profile", Entity::from_values([("bio", "Rustacean")]));
    ada.set_many("posts", vec![rust_tips, cooking]);
    assert!(users.save(&mut ada, &options).unwrap());

    let rust = ada.many("posts").unwrap()[0].many("tags").unwrap()[0].clone();
    let mut again = Entity::from_values([("title", "Rust again")]);
    again.set_many("tags", vec![rust]);
    let mut cy = Entity::from_values([("name", "cy")]);
    cy.set_many("posts", vec![again]);
    assert!(users.save(&mut cy, &options).unwrap());
}

#[test]
fn sqlite_saved_graph_loads_back_through_contain() {
    let registry = registry();
    seed(&registry);
    let users = registry.get("Users").unwrap();

    let found = users
        .find()
        .contain(["Profiles", "Posts.Tags"])
        .where_(Expr::col("name").eq("ada"))
        .all()
        .unwrap();
    assert_eq!(found.len(), 1);
    let ada = &found[0];
    assert!(!ada.is_new());
    assert!(!ada.is_any_dirty());
    assert_eq!(text(ada.one("profile").unwrap(), "bio"), "Rustacean");

    let posts = ada.many("posts").unwrap();
    let mut titles: Vec<String> = posts.iter().map(|p| text(p, "title")).collect();
    titles.sort();
    assert_eq!(titles, vec!["Cooking", "Rust tips"]);

    let rust_tips = posts.iter().find(|p| text(p, "title") == "Rust tips").unwrap();
    let mut tags: Vec<String> = rust_tips
        .many("tags")
        .unwrap()
        .iter()
        .map(|t| text(t, "tag"))
        .collect();
    tags.sort();
    assert_eq!(tags, vec!["orm", "rust"]);

    let join_data = rust_tips.many("tags").unwrap()[0].one("_joinData").unwrap();
    assert_eq!(join_data.value("post_id").and_then(Value::as_i64), Some(id(rust_tips)));
}

#[test]
fn sqlite_missing_has_one_is_null_and_empty_has_many_is_empty() {
    let registry = registry();
    seed(&registry);
    let users = registry.get("Users").unwrap();

    let bob = users
        .find()
        .contain(["Profiles", "Posts"])
        .where_(Expr::col("name").eq("bob"))
        .first()
        .unwrap()
        .unwrap();
    assert_eq!(bob.value("profile"), Some(&Value::Null));
    assert!(bob.many("posts").unwrap().is_empty());
}

#[test]
fn sqlite_belongs_to_is_joined() {
    let registry = registry();
    seed(&registry);
    let posts = registry.get("Posts").unwrap();

    let mut query = posts.find().contain("Users").order_asc("title");
    let (sql, _) = query.sql().unwrap();
    assert!(sql.contains("LEFT JOIN \"users\" AS \"Users\" ON \"Posts\".\"user_id\" = \"Users\".\"id\""));

    let found = query.all().unwrap();
    let authors: Vec<String> = found
        .iter()
        .map(|p| text(p.one("user").unwrap(), "name"))
        .collect();
    assert_eq!(authors, vec!["ada", "cy", "ada"]);
}

#[test]
fn sqlite_matching_exposes_matched_rows() {
    let registry = registry();
    seed(&registry);
    let posts = registry.get("Posts").unwrap();

    let found = posts
        .find()
        .matching("Tags", Expr::col("tag").eq("rust"))
        .order_asc("title")
        .all()
        .unwrap();
    let titles: Vec<String> = found.iter().map(|p| text(p, "title")).collect();
    assert_eq!(titles, vec!["Rust again", "Rust tips"]);
    for post in &found {
        assert_eq!(text(post.matching("Tags").unwrap(), "tag"), "rust");
        let link = post.matching("PostsTags").unwrap();
        assert_eq!(link.value("post_id").and_then(Value::as_i64), Some(id(post)));
    }

    let users = registry.get("Users").unwrap();
    let mut deep = users
        .find()
        .matching("Posts.Tags", Expr::col("tag").eq("food"))
        .order_asc("name");
    let parsed = deep.all_parsed().unwrap();
    assert_eq!(parsed.len(), 1);
    assert_eq!(parsed[0]["name"], "ada");
    assert_eq!(parsed[0][MATCHING_DATA]["Tags"]["tag"], "food");
}

#[test]
fn sqlite_not_matching_keeps_rows_without_related_rows() {
    let registry = registry();
    seed(&registry);
    let users = registry.get("Users").unwrap();
    let posts = registry.get("Posts").unwrap();

    let lonely = users.find().not_matching("Posts", None).all().unwrap();
    assert_eq!(lonely.len(), 1);
    assert_eq!(text(&lonely[0], "name"), "bob");

    let no_food: Vec<String> = users
        .find()
        .not_matching("Posts.Tags", Expr::col("tag").eq("food"))
        .order_asc("name")
        .all()
        .unwrap()
        .iter()
        .map(|u| text(u, "name"))
        .collect();
    assert_eq!(no_food, vec!["bob", "cy"]);

    let not_rust: Vec<String> = posts
        .find()
        .not_matching("Tags", Expr::col("tag").eq("rust"))
        .all()
        .unwrap()
        .iter()
        .map(|p| text(p, "title"))
        .collect();
    assert_eq!(not_rust, vec!["Cooking"]);

    assert_eq!(users.find().not_matching("Posts", None).count().unwrap(), 1);
    assert_eq!(users.find().count().unwrap(), 3);
}

#[test]
fn sqlite_subquery_strategy_loads_the_same_rows_as_select() {
    let registry = registry();
    seed(&registry);
    let users = registry.get("Users").unwrap();

    let load = |strategy: Strategy| -> Vec<(String, usize)> {
        users
            .find()
            .where_(Expr::col("name").like("%y"))
            .order_asc("name")
            .limit(5)
            .contain(("Posts", ContainNode::new().strategy(strategy)))
            .all()
            .unwrap()
            .iter()
            .map(|u| (text(u, "name"), u.many("posts").unwrap().len()))
            .collect()
    };
    let by_select = load(Strategy::Select);
    assert_eq!(by_select, vec![("cy".to_string(), 1)]);
    assert_eq!(load(Strategy::Subquery), by_select);
}

#[test]
fn sqlite_contain_node_fields_and_conditions() {
    let registry = registry();
    seed(&registry);
    let users = registry.get("Users").unwrap();

    let ada = users
        .find()
        .where_(Expr::col("name").eq("ada"))
        .contain((
            "Posts",
            ContainNode::new()
                .fields(["title"])
                .conditions(Expr::col("title").like("Rust%")),
        ))
        .first()
        .unwrap()
        .unwrap();
    let posts = ada.many("posts").unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(text(&posts[0], "title"), "Rust tips");
    assert!(posts[0].value("id").is_none());
}

#[test]
fn sqlite_shared_alias_is_downgraded_or_rejected() {
    let registry = registry();
    seed(&registry);
    let comments = registry.get("Comments").unwrap();

    let found = comments
        .find()
        .contain(["Users", "Posts.Users"])
        .all()
        .unwrap();
    assert_eq!(found.len(), 1);
    let comment = &found[0];
    assert_eq!(text(comment.one("user").unwrap(), "name"), "bob");
    let post = comment.one("post").unwrap();
    assert_eq!(text(post, "title"), "Rust tips");
    assert_eq!(text(post.one("user").unwrap(), "name"), "ada");

    let err = comments
        .find()
        .inner_join_with("Users", None)
        .inner_join_with("Posts.Users", None)
        .sql()
        .unwrap_err();
    assert_eq!(err.orm_kind(), Some(OrmErrorKind::JoinAliasNotUnique));
}

#[test]
fn sqlite_unbuffered_results_hydrate_on_demand() {
    let registry = registry();
    seed(&registry);
    let users = registry.get("Users").unwrap();

    let mut results = users
        .find()
        .order_asc("name")
        .disable_buffered_results()
        .iter()
        .unwrap();
    assert_eq!(results.len(), 3);
    assert_eq!(text(results.get(2).unwrap(), "name"), "cy");
    let names: Vec<String> = results.map(|u| text(&u, "name")).collect();
    assert_eq!(names, vec!["ada", "bob", "cy"]);
}

#[test]
fn sqlite_computed_columns_keep_their_names() {
    let registry = registry();
    seed(&registry);
    let users = registry.get("Users").unwrap();

    let ada = users
        .find()
        .enable_auto_fields(true)
        .select_expr("stats__total", Expr::raw("42"))
        .where_(Expr::col("name").eq("ada"))
        .first()
        .unwrap()
        .unwrap();
    assert_eq!(text(&ada, "name"), "ada");
    assert_eq!(ada.value("stats__total").and_then(Value::as_i64), Some(42));
}
