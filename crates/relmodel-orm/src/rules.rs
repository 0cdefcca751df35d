//! Application rules checked before saves and deletes.
//!
//! Rules complement database constraints: they run against the entity about
//! to be written, may query the database, and report failures as field
//! errors on the entity instead of aborting with an error.

use crate::table::Table;
use relmodel_core::{Entity, Result, Value};
use relmodel_query::Expr;
use std::fmt;
use std::sync::Arc;

/// What a rule can see besides the entity.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    /// The table the entity is saved into
    pub table: &'a Table,
    /// Whether the entity is about to be inserted
    pub is_new: bool,
}

/// The check behind a rule. `Ok(false)` records the rule's message.
pub type RuleFn = Arc<dyn Fn(&Entity, &RuleContext<'_>) -> Result<bool> + Send + Sync>;

/// When a rule applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    /// Inserts and updates
    Save,
    /// Inserts only
    Create,
    /// Updates only
    Update,
    /// Deletes only
    Delete,
}

/// Which operation is being checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleMode {
    Create,
    Update,
    Delete,
}

impl RuleScope {
    fn applies_to(self, mode: RuleMode) -> bool {
        matches!(
            (self, mode),
            (RuleScope::Save, RuleMode::Create | RuleMode::Update)
                | (RuleScope::Create, RuleMode::Create)
                | (RuleScope::Update, RuleMode::Update)
                | (RuleScope::Delete, RuleMode::Delete)
        )
    }
}

/// A named check with the field and message used when it fails.
#[derive(Clone)]
pub struct Rule {
    name: String,
    field: String,
    message: String,
    check: RuleFn,
}

impl Rule {
    /// Create a rule from a closure.
    pub fn new<F>(
        name: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
        check: F,
    ) -> Self
    where
        F: Fn(&Entity, &RuleContext<'_>) -> Result<bool> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            field: field.into(),
            message: message.into(),
            check: Arc::new(check),
        }
    }

    /// The referenced row must exist in the target of `association`.
    ///
    /// Entities with a NULL in any of `fields` pass; nullability is the
    /// schema's concern.
    pub fn exists_in<I, S>(fields: I, association: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        let association = association.into();
        let field = fields.first().cloned().unwrap_or_default();
        let name = format!("exists_in_{}", association);
        Self::new(name, field, "This value does not exist", move |entity, ctx| {
            let values = entity.extract(&fields);
            if values.iter().any(Value::is_null) {
                return Ok(true);
            }
            let assoc = ctx.table.association(&association)?;
            let target = assoc.target()?;
            let columns = match assoc.kind() {
                crate::association::AssociationKind::BelongsTo => assoc.binding_key()?.to_vec(),
                _ => target.primary_key().to_vec(),
            };
            let condition = Expr::all(
                columns
                    .iter()
                    .zip(values)
                    .map(|(col, value)| Expr::qualified(target.alias(), col).eq(value)),
            );
            match condition {
                Some(condition) => target.exists(condition),
                None => Ok(true),
            }
        })
    }

    /// No other row may carry the same values in `fields`.
    ///
    /// The entity's own row is excluded on update. NULLs never collide.
    pub fn is_unique<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        let field = fields.first().cloned().unwrap_or_default();
        let name = format!("is_unique_{}", fields.join("_"));
        Self::new(name, field, "This value is already in use", move |entity, ctx| {
            let values = entity.extract(&fields);
            if values.iter().any(Value::is_null) {
                return Ok(true);
            }
            let alias = ctx.table.alias();
            let mut condition = fields
                .iter()
                .zip(values)
                .map(|(col, value)| Expr::qualified(alias, col).eq(value))
                .collect::<Vec<_>>();
            if !ctx.is_new {
                let pk = ctx.table.primary_key();
                let own = entity.extract(pk);
                if !own.iter().any(Value::is_null) {
                    if let Some(same_row) = Expr::all(
                        pk.iter()
                            .zip(own)
                            .map(|(col, value)| Expr::qualified(alias, col).eq(value)),
                    ) {
                        condition.push(same_row.not());
                    }
                }
            }
            match Expr::all(condition) {
                Some(condition) => {
                    let table = ctx.table.registry()?.get(alias)?;
                    Ok(!table.exists(condition)?)
                }
                None => Ok(true),
            }
        })
    }

    /// Override the failure message.
    #[must_use]
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Override the field the failure is reported on.
    #[must_use]
    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("field", &self.field)
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// The rules of one table.
#[derive(Debug, Clone, Default)]
pub struct RulesChecker {
    rules: Vec<(RuleScope, Rule)>,
}

impl RulesChecker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule checked on every save.
    pub fn add(&mut self, rule: Rule) -> &mut Self {
        self.rules.push((RuleScope::Save, rule));
        self
    }

    /// Add a rule checked on inserts.
    pub fn add_create(&mut self, rule: Rule) -> &mut Self {
        self.rules.push((RuleScope::Create, rule));
        self
    }

    /// Add a rule checked on updates.
    pub fn add_update(&mut self, rule: Rule) -> &mut Self {
        self.rules.push((RuleScope::Update, rule));
        self
    }

    /// Add a rule checked on deletes.
    pub fn add_delete(&mut self, rule: Rule) -> &mut Self {
        self.rules.push((RuleScope::Delete, rule));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Run every rule that applies to `mode`.
    ///
    /// All applicable rules run even after one fails; each failure adds its
    /// message to the entity's errors.
    pub fn check(&self, entity: &mut Entity, ctx: &RuleContext<'_>, mode: RuleMode) -> Result<bool> {
        let mut passed = true;
        for (scope, rule) in &self.rules {
            if !scope.applies_to(mode) {
                continue;
            }
            if !(rule.check)(entity, ctx)? {
                tracing::debug!(rule = %rule.name, field = %rule.field, "Rule failed");
                entity.set_error(rule.field.clone(), rule.message.clone());
                passed = false;
            }
        }
        Ok(passed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use relmodel_core::Row;

    #[test]
    fn test_scopes() {
        assert!(RuleScope::Save.applies_to(RuleMode::Create));
        assert!(RuleScope::Save.applies_to(RuleMode::Update));
        assert!(!RuleScope::Save.applies_to(RuleMode::Delete));
        assert!(!RuleScope::Create.applies_to(RuleMode::Update));
        assert!(RuleScope::Delete.applies_to(RuleMode::Delete));
    }

    #[test]
    fn test_all_rules_run_and_errors_accumulate() {
        let (registry, _) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let mut checker = RulesChecker::new();
        checker
            .add(Rule::new("never", "name", "bad name", |_, _| Ok(false)))
            .add(Rule::new("also_never", "email", "bad email", |_, _| Ok(false)))
            .add_update(Rule::new("update_only", "id", "not reached", |_, _| Ok(false)));

        let mut entity = Entity::from_values([("name", "ada")]);
        let ctx = RuleContext {
            table: &users,
            is_new: true,
        };
        assert!(!checker.check(&mut entity, &ctx, RuleMode::Create).unwrap());
        assert_eq!(entity.errors("name"), ["bad name".to_string()]);
        assert_eq!(entity.errors("email"), ["bad email".to_string()]);
        assert!(entity.errors("id").is_empty());
    }

    #[test]
    fn test_exists_in_passes_on_null() {
        let (registry, state) = testing::blog_registry();
        let posts = registry.get("Posts").unwrap();
        let rule = Rule::exists_in(["user_id"], "Users");
        let mut checker = RulesChecker::new();
        checker.add(rule);
        let mut entity = Entity::from_values([("title", "t")]);
        let ctx = RuleContext {
            table: &posts,
            is_new: true,
        };
        assert!(checker.check(&mut entity, &ctx, RuleMode::Create).unwrap());
        assert!(state.lock().unwrap().queries.is_empty());
    }

    #[test]
    fn test_exists_in_queries_target() {
        let (registry, state) = testing::blog_registry();
        let posts = registry.get("Posts").unwrap();
        let mut checker = RulesChecker::new();
        checker.add(Rule::exists_in(["user_id"], "Users"));
        state.lock().unwrap().responses.push_back(Vec::new());

        let mut entity = Entity::new();
        entity.set("title", "t").set("user_id", 7_i64);
        let ctx = RuleContext {
            table: &posts,
            is_new: true,
        };
        assert!(!checker.check(&mut entity, &ctx, RuleMode::Create).unwrap());
        assert_eq!(entity.errors("user_id"), ["This value does not exist".to_string()]);

        let s = state.lock().unwrap();
        let (sql, params) = &s.queries[0];
        assert!(sql.contains("FROM \"users\" AS \"Users\""));
        assert!(sql.contains("\"Users\".\"id\" = ?1"));
        assert_eq!(params, &vec![Value::BigInt(7)]);
    }

    #[test]
    fn test_is_unique_excludes_own_row() {
        let (registry, state) = testing::blog_registry();
        let users = registry.get("Users").unwrap();
        let mut checker = RulesChecker::new();
        checker.add(Rule::is_unique(["email"]));
        state
            .lock()
            .unwrap()
            .responses
            .push_back(vec![Row::new(vec!["Users__id".into()], vec![Value::Int(3)])]);

        let mut entity = Entity::from_values([("id", Value::BigInt(1)), ("email", "a@b.c".into())]);
        entity.set_new(false);
        let ctx = RuleContext {
            table: &users,
            is_new: false,
        };
        assert!(!checker.check(&mut entity, &ctx, RuleMode::Update).unwrap());
        let s = state.lock().unwrap();
        assert!(s.queries[0].0.contains("NOT (\"Users\".\"id\" = ?2)"));
    }
}
