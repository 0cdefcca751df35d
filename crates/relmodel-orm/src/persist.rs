//! Saving and deleting entity graphs.
//!
//! A save runs, for each table it touches:
//!
//! 1. `before_save` listeners, then the table's rules
//! 2. belongsTo parents, whose keys the rows need
//! 3. the rows themselves (INSERT for new entities, UPDATE of dirty columns
//!    otherwise)
//! 4. hasOne, hasMany and belongsToMany children
//! 5. `after_save` listeners
//!
//! A delete checks rules and `before_delete` listeners, cascades through
//! the owning associations, deletes the row and runs `after_delete`.
//!
//! Atomic operations run in one transaction; a `false` from any step rolls
//! it back.

use crate::datasource::ConnectionRole;
use crate::rules::{RuleContext, RuleMode};
use crate::table::Table;
use relmodel_core::{Entity, Error, OrmErrorKind, Result, SqlType, Value};
use relmodel_query::{DeleteBuilder, Expr, InsertBuilder, UpdateBuilder};

/// Which associations a save follows.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Associated {
    /// Every association with a dirty property
    #[default]
    All,
    /// None; only the entities' own rows are written
    None,
    /// The listed association paths, e.g. `["Posts", "Posts.Tags"]`
    Only(Vec<String>),
}

impl Associated {
    pub fn only<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Associated::Only(paths.into_iter().map(Into::into).collect())
    }

    /// Whether the association `name` is saved.
    pub fn includes(&self, name: &str) -> bool {
        match self {
            Associated::All => true,
            Associated::None => false,
            Associated::Only(paths) => paths
                .iter()
                .any(|p| p.split('.').next() == Some(name)),
        }
    }

    /// The selection applied to the associations of `name`'s target.
    pub fn nested(&self, name: &str) -> Associated {
        match self {
            Associated::All => Associated::All,
            Associated::None => Associated::None,
            Associated::Only(paths) => {
                let prefix = format!("{name}.");
                let nested: Vec<String> = paths
                    .iter()
                    .filter_map(|p| p.strip_prefix(&prefix))
                    .map(str::to_string)
                    .collect();
                if nested.is_empty() {
                    Associated::None
                } else {
                    Associated::Only(nested)
                }
            }
        }
    }
}

/// Options for [`Table::save`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
    /// Run in a transaction
    pub atomic: bool,
    /// Check the table's rules
    pub check_rules: bool,
    pub associated: Associated,
}

impl Default for SaveOptions {
    fn default() -> Self {
        Self {
            atomic: true,
            check_rules: true,
            associated: Associated::All,
        }
    }
}

impl SaveOptions {
    /// Options for saving the rows of association `name`, inside the save
    /// that reached them.
    pub fn for_association(&self, name: &str) -> SaveOptions {
        SaveOptions {
            atomic: false,
            check_rules: self.check_rules,
            associated: self.associated.nested(name),
        }
    }
}

/// Options for [`Table::delete`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Run in a transaction
    pub atomic: bool,
    /// Check the table's delete rules
    pub check_rules: bool,
    /// Run listeners; cascaded deletes follow the association's
    /// `cascade_callbacks`
    pub(crate) callbacks: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            atomic: true,
            check_rules: true,
            callbacks: true,
        }
    }
}

impl DeleteOptions {
    #[must_use]
    pub fn atomic(mut self, atomic: bool) -> Self {
        self.atomic = atomic;
        self
    }

    #[must_use]
    pub fn check_rules(mut self, check: bool) -> Self {
        self.check_rules = check;
        self
    }

    /// Whether listeners run for this delete.
    pub fn runs_callbacks(&self) -> bool {
        self.callbacks
    }
}

impl Table {
    // ==================== Saving ====================

    /// Save one entity and its dirty associations.
    ///
    /// Returns `Ok(false)` when a listener or rule rejected the entity (rule
    /// failures are recorded as entity errors). On an atomic failure the
    /// entity is restored to its state before the call, errors aside.
    pub fn save(&self, entity: &mut Entity, options: &SaveOptions) -> Result<bool> {
        self.save_many(std::slice::from_mut(entity), options)
    }

    /// Save several entities of this table at once.
    #[tracing::instrument(level = "debug", skip(self, entities, options), fields(table = %self.alias(), count = entities.len()))]
    pub fn save_many(&self, entities: &mut [Entity], options: &SaveOptions) -> Result<bool> {
        if entities.is_empty() {
            return Ok(true);
        }
        if !options.atomic {
            return self.process_save(entities, options);
        }

        let registry = self.registry()?;
        let snapshot = entities.to_vec();
        let result = registry
            .datasource()
            .transactional(|| self.process_save(entities, options));
        if !matches!(result, Ok(true)) {
            tracing::debug!("Save rolled back, restoring entities");
            for (entity, original) in entities.iter_mut().zip(snapshot) {
                let errors = entity.all_errors().clone();
                *entity = original;
                for (field, messages) in errors {
                    for message in messages {
                        entity.set_error(field.clone(), message);
                    }
                }
            }
        }
        result
    }

    fn process_save(&self, entities: &mut [Entity], options: &SaveOptions) -> Result<bool> {
        for entity in entities.iter_mut() {
            for listener in self.listeners() {
                if !listener.before_save(entity, options) {
                    tracing::debug!("Save stopped by before_save listener");
                    return Ok(false);
                }
            }
        }

        if options.check_rules && !self.rules().is_empty() {
            let mut passed = true;
            for entity in entities.iter_mut() {
                entity.clear_errors();
                let ctx = RuleContext {
                    table: self,
                    is_new: entity.is_new(),
                };
                let mode = if entity.is_new() {
                    RuleMode::Create
                } else {
                    RuleMode::Update
                };
                passed &= self.rules().check(entity, &ctx, mode)?;
            }
            if !passed {
                return Ok(false);
            }
        }

        for assoc in self
            .associations()
            .iter()
            .filter(|a| !a.is_owning_side() && options.associated.includes(a.name()))
        {
            if !assoc.save_related(entities, options)? {
                return Ok(false);
            }
        }

        for entity in entities.iter_mut() {
            self.write_row(entity)?;
        }

        for assoc in self
            .associations()
            .iter()
            .filter(|a| a.is_owning_side() && options.associated.includes(a.name()))
        {
            if !assoc.save_related(entities, options)? {
                return Ok(false);
            }
        }

        for entity in entities.iter_mut() {
            for listener in self.listeners() {
                listener.after_save(entity, options);
            }
            entity.clean();
            entity.set_new(false);
            entity.set_source(self.alias());
        }
        Ok(true)
    }

    /// INSERT a new entity or UPDATE the dirty columns of a persisted one.
    fn write_row(&self, entity: &mut Entity) -> Result<()> {
        let registry = self.registry()?;
        let datasource = registry.datasource();
        let conn = datasource.connection(ConnectionRole::Write);
        let dialect = datasource.dialect();

        if entity.is_new() {
            let values: Vec<(String, Value)> = self
                .schema()
                .columns()
                .iter()
                .filter_map(|col| {
                    let value = entity.value(&col.name)?;
                    if value.is_null() && col.auto_increment {
                        return None;
                    }
                    Some((col.name.clone(), value.clone()))
                })
                .collect();
            let id = InsertBuilder::new(self.table())
                .values(values)
                .execute(conn, dialect)?;

            if let [pk] = self.primary_key() {
                let generated = self
                    .schema()
                    .get(pk)
                    .is_some_and(|c| matches!(c.sql_type, SqlType::Integer | SqlType::BigInt));
                if generated && entity.value(pk).is_none_or(Value::is_null) {
                    entity.set(pk.clone(), Value::BigInt(id));
                }
            }
            tracing::trace!(table = %self.table(), id, "Row inserted");
            return Ok(());
        }

        let changes: Vec<(String, Value)> = self
            .schema()
            .columns()
            .iter()
            .filter(|col| entity.is_dirty(&col.name))
            .filter_map(|col| Some((col.name.clone(), entity.value(&col.name)?.clone())))
            .collect();
        if changes.is_empty() {
            tracing::trace!(table = %self.table(), "No dirty columns, skipping update");
            return Ok(());
        }
        let filter = self.key_condition(entity)?;
        let affected = UpdateBuilder::new(self.table())
            .set_all(changes)
            .filter(filter)
            .execute(conn, dialect)?;
        tracing::trace!(table = %self.table(), affected, "Row updated");
        Ok(())
    }

    /// `pk = value` over the entity's primary key, unqualified.
    fn key_condition(&self, entity: &Entity) -> Result<Expr> {
        let key = entity.extract(self.primary_key());
        if key.iter().any(Value::is_null) {
            return Err(Error::orm(
                OrmErrorKind::MissingPrimaryKey,
                format!("{} entity has no primary key value", self.alias()),
            ));
        }
        Expr::all(
            self.primary_key()
                .iter()
                .zip(key)
                .map(|(col, value)| Expr::col(col).eq(value)),
        )
        .ok_or_else(|| {
            Error::orm(
                OrmErrorKind::MissingPrimaryKey,
                format!("table {} has no primary key", self.alias()),
            )
        })
    }

    // ==================== Deleting ====================

    /// Delete one entity, cascading through its owning associations.
    ///
    /// Returns `Ok(false)` when a rule or listener stopped the delete or no
    /// row was deleted.
    pub fn delete(&self, entity: &mut Entity, options: &DeleteOptions) -> Result<bool> {
        if !options.atomic {
            return self.process_delete(entity, options);
        }
        let registry = self.registry()?;
        registry
            .datasource()
            .transactional(|| self.process_delete(entity, options))
    }

    /// Delete several entities, in one transaction when atomic.
    pub fn delete_many(&self, entities: &mut [Entity], options: &DeleteOptions) -> Result<bool> {
        let run = |entities: &mut [Entity]| -> Result<bool> {
            for entity in entities.iter_mut() {
                if !self.process_delete(entity, options)? {
                    return Ok(false);
                }
            }
            Ok(true)
        };
        if !options.atomic {
            return run(entities);
        }
        let registry = self.registry()?;
        registry.datasource().transactional(|| run(entities))
    }

    #[tracing::instrument(level = "debug", skip(self, entity, options), fields(table = %self.alias()))]
    fn process_delete(&self, entity: &mut Entity, options: &DeleteOptions) -> Result<bool> {
        let filter = self.key_condition(entity)?;

        if options.check_rules && !self.rules().is_empty() {
            let ctx = RuleContext {
                table: self,
                is_new: false,
            };
            if !self.rules().check(entity, &ctx, RuleMode::Delete)? {
                return Ok(false);
            }
        }
        if options.callbacks {
            for listener in self.listeners() {
                if !listener.before_delete(entity, options) {
                    tracing::debug!("Delete stopped by before_delete listener");
                    return Ok(false);
                }
            }
        }

        for assoc in self.associations().iter().filter(|a| a.is_owning_side()) {
            if !assoc.cascade_delete(entity, options)? {
                return Ok(false);
            }
        }

        let registry = self.registry()?;
        let datasource = registry.datasource();
        let affected = DeleteBuilder::new(self.table())
            .filter(filter)
            .execute(datasource.connection(ConnectionRole::Write), datasource.dialect())?;
        if affected == 0 {
            tracing::debug!("No row deleted");
            return Ok(false);
        }

        if options.callbacks {
            for listener in self.listeners() {
                listener.after_delete(entity, options);
            }
        }
        Ok(true)
    }

    // ==================== Bulk ====================

    /// DELETE every row matching `conditions`. No rules, listeners or
    /// cascades run. Columns are unqualified.
    pub fn delete_all(&self, conditions: Expr) -> Result<u64> {
        let registry = self.registry()?;
        let datasource = registry.datasource();
        DeleteBuilder::new(self.table())
            .filter(conditions)
            .execute(datasource.connection(ConnectionRole::Write), datasource.dialect())
    }

    /// UPDATE every row matching `conditions`. No rules or listeners run.
    pub fn update_all<I, S, V>(&self, values: I, conditions: Expr) -> Result<u64>
    where
        I: IntoIterator<Item = (S, V)>,
        S: Into<String>,
        V: Into<Value>,
    {
        let registry = self.registry()?;
        let datasource = registry.datasource();
        let update = UpdateBuilder::new(self.table())
            .set_all(values.into_iter().map(|(k, v)| (k.into(), v.into())))
            .filter(conditions);
        if update.is_empty() {
            return Ok(0);
        }
        update.execute(datasource.connection(ConnectionRole::Write), datasource.dialect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::TableListener;
    use crate::rules::Rule;
    use crate::testing::{self, row};

    #[test]
    fn test_associated_paths() {
        let only = Associated::only(["Posts", "Posts.Tags", "Profiles"]);
        assert!(only.includes("Posts"));
        assert!(only.includes("Profiles"));
        assert!(!only.includes("Tags"));
        assert_eq!(only.nested("Posts"), Associated::only(["Tags"]));
        assert_eq!(only.nested("Profiles"), Associated::None);
        assert_eq!(Associated::All.nested("Posts"), Associated::All);
    }

    #[test]
    fn test_insert_assigns_generated_key() {
        let (registry, state) = testing::blog_registry();
        state.lock().unwrap().next_id = 41;
        let users = registry.get("Users").unwrap();
        let mut user = users.new_entity();
        user.set("name", "ada");

        assert!(users.save(&mut user, &SaveOptions::default()).unwrap());
        assert_eq!(user.value("id"), Some(&Value::BigInt(42)));
        assert!(!user.is_new());
        assert!(!user.is_dirty("name"));

        let state = state.lock().unwrap();
        assert_eq!(state.executed[0].0, "INSERT INTO \"users\" (\"name\") VALUES (?1)");
        assert_eq!((state.begins, state.commits), (1, 1));
    }

    #[test]
    fn test_update_writes_dirty_columns_only() {
        let (registry, state) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let mut user = Entity::from_values([
            ("id", Value::BigInt(3)),
            ("name", Value::Text("ada".into())),
            ("email", Value::Null),
        ]);
        user.clean();
        user.set_new(false);
        user.set("email", "ada@example.com");

        assert!(users.save(&mut user, &SaveOptions::default()).unwrap());
        let state = state.lock().unwrap();
        assert_eq!(
            state.executed[0].0,
            "UPDATE \"users\" SET \"email\" = ?1 WHERE \"id\" = ?2"
        );
    }

    #[test]
    fn test_clean_entity_is_not_written() {
        let (registry, state) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let mut user = Entity::from_values([("id", 3_i64)]);
        user.clean();
        user.set_new(false);
        assert!(users
            .save(&mut user, &SaveOptions { atomic: false, ..SaveOptions::default() })
            .unwrap());
        assert!(state.lock().unwrap().executed.is_empty());
    }

    #[test]
    fn test_belongs_to_saved_first() {
        let (registry, state) = testing::blog_registry();
        state.lock().unwrap().next_id = 6;
        let posts = registry.get("Posts").unwrap();
        let mut post = Entity::from_values([("title", "hello")]);
        post.set_one("user", Entity::from_values([("name", "ada")]));

        assert!(posts.save(&mut post, &SaveOptions::default()).unwrap());
        assert_eq!(post.value("user_id"), Some(&Value::BigInt(7)));
        assert_eq!(post.value("id"), Some(&Value::BigInt(8)));
        assert!(!post.one("user").unwrap().is_new());

        let state = state.lock().unwrap();
        assert!(state.executed[0].0.starts_with("INSERT INTO \"users\""));
        assert_eq!(
            state.executed[1].0,
            "INSERT INTO \"posts\" (\"user_id\", \"title\") VALUES (?1, ?2)"
        );
    }

    #[test]
    fn test_has_many_children_get_foreign_key() {
        let (registry, state) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let mut user = Entity::from_values([("name", "ada")]);
        user.set_many(
            "posts",
            vec![
                Entity::from_values([("title", "a")]),
                Entity::from_values([("title", "b")]),
            ],
        );

        assert!(users.save(&mut user, &SaveOptions::default()).unwrap());
        let posts = user.many("posts").unwrap();
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|p| p.value("user_id") == Some(&Value::BigInt(1))));
        assert!(!user.is_dirty("posts"));
        assert_eq!(state.lock().unwrap().executed.len(), 3);
    }

    #[test]
    fn test_associated_none_skips_children() {
        let (registry, state) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let mut user = Entity::from_values([("name", "ada")]);
        user.set_many("posts", vec![Entity::from_values([("title", "a")])]);
        let options = SaveOptions {
            associated: Associated::None,
            ..SaveOptions::default()
        };
        assert!(users.save(&mut user, &options).unwrap());
        assert_eq!(state.lock().unwrap().executed.len(), 1);
        assert!(user.many("posts").unwrap()[0].is_new());
    }

    #[test]
    fn test_failed_rule_rolls_back_and_keeps_errors() {
        let (registry, state) = testing::empty_registry();
        let tags = registry
            .add_with(
                crate::table::TableConfig::new("Tags").schema(
                    relmodel_core::TableSchema::new()
                        .id()
                        .column(relmodel_core::ColumnSchema::new("tag", SqlType::Text)),
                ),
                |t| {
                    t.rules_mut().add(Rule::new("not_empty", "tag", "required", |e, _| {
                        Ok(e.value("tag").and_then(Value::as_str).is_some_and(|s| !s.is_empty()))
                    }));
                    Ok(())
                },
            )
            .unwrap();
        let mut tag = Entity::from_values([("tag", "")]);
        assert!(!tags.save(&mut tag, &SaveOptions::default()).unwrap());
        assert_eq!(tag.errors("tag"), ["required".to_string()]);
        assert!(tag.is_new());
        let state = state.lock().unwrap();
        assert!(state.executed.is_empty());
        assert_eq!((state.begins, state.rollbacks), (1, 1));
    }

    #[test]
    fn test_listener_can_stop_save() {
        struct Deny;
        impl TableListener for Deny {
            fn before_save(&self, entity: &mut Entity, _options: &SaveOptions) -> bool {
                entity.value("name").and_then(Value::as_str) != Some("root")
            }
        }
        let (registry, _) = testing::empty_registry();
        let people = registry
            .add_with(
                crate::table::TableConfig::new("People").schema(
                    relmodel_core::TableSchema::new()
                        .id()
                        .column(relmodel_core::ColumnSchema::new("name", SqlType::Text)),
                ),
                |t| {
                    t.add_listener(Deny);
                    Ok(())
                },
            )
            .unwrap();
        let mut root = Entity::from_values([("name", "root")]);
        assert!(!people.save(&mut root, &SaveOptions::default()).unwrap());
        let mut ada = Entity::from_values([("name", "ada")]);
        assert!(people.save(&mut ada, &SaveOptions::default()).unwrap());
    }

    #[test]
    fn test_delete_cascades_dependent_has_many() {
        let (registry, state) = testing::blog_registry();
        {
            let mut state = state.lock().unwrap();
            // Users hasOne Profiles (nullable fk): no profile rows
            state.responses.push_back(Vec::new());
            // Users hasMany Posts (dependent): one post
            state.responses.push_back(vec![row(&[
                ("Posts__id", Value::Int(10)),
                ("Posts__user_id", Value::Int(1)),
                ("Posts__title", Value::Text("a".into())),
            ])]);
            // Posts belongsToMany Tags: junction rows
            state.responses.push_back(Vec::new());
            // Posts hasMany Comments
            state.responses.push_back(Vec::new());
        }
        let users = registry.get("Users").unwrap();
        let mut user = Entity::from_values([("id", 1_i64)]);
        user.set_new(false);
        assert!(users.delete(&mut user, &DeleteOptions::default()).unwrap());

        let state = state.lock().unwrap();
        let deletes: Vec<&str> = state
            .executed
            .iter()
            .map(|(sql, _)| sql.as_str())
            .filter(|sql| sql.starts_with("DELETE"))
            .collect();
        assert_eq!(
            deletes,
            vec![
                "DELETE FROM \"posts\" WHERE \"id\" = ?1",
                "DELETE FROM \"users\" WHERE \"id\" = ?1",
            ]
        );
        assert_eq!((state.begins, state.commits), (1, 1));
    }

    #[test]
    fn test_delete_requires_primary_key() {
        let (registry, _) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let mut user = Entity::from_values([("name", "ada")]);
        let err = users.delete(&mut user, &DeleteOptions::default()).unwrap_err();
        assert_eq!(err.orm_kind(), Some(OrmErrorKind::MissingPrimaryKey));
    }

    #[test]
    fn test_bulk_helpers() {
        let (registry, state) = testing::blog_registry();
        let posts = registry.get("Posts").unwrap();
        posts
            .update_all([("title", "x")], Expr::col("user_id").eq(1))
            .unwrap();
        posts.delete_all(Expr::col("user_id").is_null()).unwrap();
        let state = state.lock().unwrap();
        assert_eq!(
            state.executed[0].0,
            "UPDATE \"posts\" SET \"title\" = ?1 WHERE \"user_id\" = ?2"
        );
        assert_eq!(
            state.executed[1].0,
            "DELETE FROM \"posts\" WHERE \"user_id\" IS NULL"
        );
    }
}
