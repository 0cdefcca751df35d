//! Turning result rows into entity graphs.
//!
//! Every selected column is named `Alias__column`. The [`Hydrator`] groups a
//! row's columns by alias, casts them with the query's type map and nests
//! them following the joined part of the contain tree. Columns without an
//! alias prefix, or whose prefix names no selected table, become plain
//! properties of the root entity under their full name.

use relmodel_core::{Entity, MATCHING_DATA, Property, Row, TypeMap, Value};
use serde_json::Map;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// One joined association in the hydration tree.
#[derive(Debug, Clone)]
pub(crate) struct HydrationNode {
    /// SQL alias of the joined rows
    pub alias: String,
    /// Registry alias of the target table
    pub source: String,
    /// Property on the parent entity
    pub property: String,
    pub children: Vec<HydrationNode>,
}

/// Builds entities from the rows of one compiled query.
#[derive(Debug, Clone)]
pub(crate) struct Hydrator {
    root_alias: String,
    root_source: String,
    nodes: Arc<Vec<HydrationNode>>,
    /// (SQL alias, registry alias) of every table exposed as matching data
    matching: Arc<Vec<(String, String)>>,
    types: Arc<TypeMap>,
}

/// A row split into a tree of column groups.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ParsedNode {
    pub source: String,
    pub fields: BTreeMap<String, Value>,
    /// Joined associations; `None` when the join matched nothing
    pub children: Vec<(String, Option<ParsedNode>)>,
    pub matching: Vec<(String, ParsedNode)>,
}

impl Hydrator {
    pub(crate) fn new(
        root_alias: impl Into<String>,
        root_source: impl Into<String>,
        nodes: Vec<HydrationNode>,
        matching: Vec<(String, String)>,
        types: TypeMap,
    ) -> Self {
        Self {
            root_alias: root_alias.into(),
            root_source: root_source.into(),
            nodes: Arc::new(nodes),
            matching: Arc::new(matching),
            types: Arc::new(types),
        }
    }

    /// Split a row by alias and nest the groups.
    pub(crate) fn parse_row(&self, row: &Row) -> ParsedNode {
        let mut groups: HashMap<&str, BTreeMap<String, Value>> = HashMap::new();
        let mut plain = BTreeMap::new();
        for (name, value) in row.iter() {
            let value = self.types.cast(name, value.clone());
            match name.split_once("__") {
                Some((alias, column)) if !alias.is_empty() && !column.is_empty() => {
                    groups
                        .entry(alias)
                        .or_default()
                        .insert(column.to_string(), value);
                }
                _ => {
                    plain.insert(name.to_string(), value);
                }
            }
        }

        let mut fields = groups.remove(self.root_alias.as_str()).unwrap_or_default();
        fields.extend(plain);
        let children = self
            .nodes
            .iter()
            .map(|node| (node.property.clone(), parse_node(node, &mut groups)))
            .collect();
        let matching = self
            .matching
            .iter()
            .filter_map(|(alias, source)| {
                let fields = groups.remove(alias.as_str())?;
                if fields.values().all(Value::is_null) {
                    return None;
                }
                Some((
                    alias.clone(),
                    ParsedNode {
                        source: source.clone(),
                        fields,
                        children: Vec::new(),
                        matching: Vec::new(),
                    },
                ))
            })
            .collect();

        // Prefixes that name no selected table stay literal columns.
        for (alias, columns) in groups {
            for (column, value) in columns {
                fields.insert(format!("{alias}__{column}"), value);
            }
        }

        ParsedNode {
            source: self.root_source.clone(),
            fields,
            children,
            matching,
        }
    }

    /// Build the entity graph of one row.
    pub(crate) fn hydrate(&self, row: &Row) -> Entity {
        self.parse_row(row).into_entity()
    }
}

/// A joined node whose columns are all NULL matched no row.
fn parse_node(
    node: &HydrationNode,
    groups: &mut HashMap<&str, BTreeMap<String, Value>>,
) -> Option<ParsedNode> {
    let Some(fields) = groups
        .remove(node.alias.as_str())
        .filter(|fields| !fields.values().all(Value::is_null))
    else {
        discard_children(node, groups);
        return None;
    };
    let children = node
        .children
        .iter()
        .map(|child| (child.property.clone(), parse_node(child, groups)))
        .collect();
    Some(ParsedNode {
        source: node.source.clone(),
        fields,
        children,
        matching: Vec::new(),
    })
}

/// Drop the columns of everything nested under a join that matched nothing.
fn discard_children(node: &HydrationNode, groups: &mut HashMap<&str, BTreeMap<String, Value>>) {
    for child in &node.children {
        groups.remove(child.alias.as_str());
        discard_children(child, groups);
    }
}

impl ParsedNode {
    pub(crate) fn into_entity(self) -> Entity {
        let mut fields: BTreeMap<String, Property> = self
            .fields
            .into_iter()
            .map(|(k, v)| (k, Property::Value(v)))
            .collect();
        for (property, child) in self.children {
            let value = match child {
                Some(child) => Property::One(Box::new(child.into_entity())),
                None => Property::Value(Value::Null),
            };
            fields.insert(property, value);
        }
        let mut entity = Entity::hydrate(self.source, fields);
        for (alias, matched) in self.matching {
            entity.set_matching(alias, matched.into_entity());
        }
        entity
    }

    pub(crate) fn to_json(&self) -> serde_json::Value {
        let mut map = Map::new();
        for (k, v) in &self.fields {
            map.insert(k.clone(), v.to_json());
        }
        for (property, child) in &self.children {
            let value = child
                .as_ref()
                .map_or(serde_json::Value::Null, ParsedNode::to_json);
            map.insert(property.clone(), value);
        }
        if !self.matching.is_empty() {
            let matching: Map<String, serde_json::Value> = self
                .matching
                .iter()
                .map(|(alias, node)| (alias.clone(), node.to_json()))
                .collect();
            map.insert(MATCHING_DATA.to_string(), serde_json::Value::Object(matching));
        }
        serde_json::Value::Object(map)
    }
}

/// Results of an executed query.
///
/// Buffered results are hydrated up front. Unbuffered results keep the raw
/// rows and hydrate each one on first access; the entity is cached by row
/// index so repeated access returns the same data.
#[derive(Debug)]
pub struct ResultIter {
    rows: Vec<Row>,
    cache: Vec<Option<Entity>>,
    hydrator: Option<Hydrator>,
    position: usize,
}

impl ResultIter {
    pub(crate) fn buffered(entities: Vec<Entity>) -> Self {
        Self {
            rows: Vec::new(),
            cache: entities.into_iter().map(Some).collect(),
            hydrator: None,
            position: 0,
        }
    }

    pub(crate) fn lazy(rows: Vec<Row>, hydrator: Hydrator) -> Self {
        Self {
            cache: vec![None; rows.len()],
            rows,
            hydrator: Some(hydrator),
            position: 0,
        }
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// The result at `index`, hydrating it if needed.
    pub fn get(&mut self, index: usize) -> Option<&Entity> {
        if self.cache.get(index)?.is_none() {
            if let (Some(hydrator), Some(row)) = (&self.hydrator, self.rows.get(index)) {
                tracing::trace!(index, "Hydrating row");
                self.cache[index] = Some(hydrator.hydrate(row));
            }
        }
        self.cache[index].as_ref()
    }

    pub fn first(&mut self) -> Option<&Entity> {
        self.get(0)
    }

    /// Hydrate whatever is left and return every result.
    pub fn into_vec(mut self) -> Vec<Entity> {
        (0..self.len()).filter_map(|i| self.get(i).cloned()).collect()
    }
}

impl Iterator for ResultIter {
    type Item = Entity;

    fn next(&mut self) -> Option<Entity> {
        let entity = self.get(self.position).cloned();
        if entity.is_some() {
            self.position += 1;
        }
        entity
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.cache.len().saturating_sub(self.position);
        (left, Some(left))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::row;
    use relmodel_core::SqlType;

    fn post_hydrator() -> Hydrator {
        let mut types = TypeMap::new();
        types.insert("Posts__id", SqlType::Integer);
        types.insert("Users__id", SqlType::Integer);
        types.insert("Posts__published", SqlType::Boolean);
        Hydrator::new(
            "Posts",
            "Posts",
            vec![HydrationNode {
                alias: "Users".into(),
                source: "Users".into(),
                property: "user".into(),
                children: vec![HydrationNode {
                    alias: "Profiles".into(),
                    source: "Profiles".into(),
                    property: "profile".into(),
                    children: Vec::new(),
                }],
            }],
            vec![("Tags".into(), "Tags".into())],
            types,
        )
    }

    #[test]
    fn test_hydrate_nests_joined_rows() {
        let hydrator = post_hydrator();
        let entity = hydrator.hydrate(&row(&[
            ("Posts__id", Value::Int(1)),
            ("Posts__published", Value::Int(1)),
            ("Users__id", Value::Int(7)),
            ("Users__name", Value::Text("ada".into())),
            ("Profiles__id", Value::Null),
            ("Tags__id", Value::Int(3)),
            ("Tags__tag", Value::Text("rust".into())),
            ("total", Value::Int(2)),
        ]));

        assert!(!entity.is_new());
        assert_eq!(entity.source(), Some("Posts"));
        assert_eq!(entity.value("id"), Some(&Value::BigInt(1)));
        assert_eq!(entity.value("published"), Some(&Value::Bool(true)));
        assert_eq!(entity.value("total"), Some(&Value::Int(2)));

        let user = entity.one("user").unwrap();
        assert_eq!(user.source(), Some("Users"));
        assert_eq!(user.value("id"), Some(&Value::BigInt(7)));
        assert_eq!(user.value("profile"), Some(&Value::Null));
        assert!(!user.is_any_dirty());

        let tag = entity.matching("Tags").unwrap();
        assert_eq!(tag.value("tag"), Some(&Value::Text("rust".into())));
    }

    #[test]
    fn test_all_null_join_becomes_null() {
        let hydrator = post_hydrator();
        let entity = hydrator.hydrate(&row(&[
            ("Posts__id", Value::Int(1)),
            ("Users__id", Value::Null),
            ("Users__name", Value::Null),
            ("Profiles__id", Value::Int(4)),
        ]));
        assert_eq!(entity.value("user"), Some(&Value::Null));
        assert!(entity.matching_data().is_empty());
        assert!(entity.value("Profiles__id").is_none());
    }

    #[test]
    fn test_unknown_prefix_stays_a_literal_column() {
        let hydrator = post_hydrator();
        let entity = hydrator.hydrate(&row(&[
            ("Posts__id", Value::Int(1)),
            ("stats__total", Value::BigInt(42)),
            ("Authors__name", Value::Text("ada".into())),
            ("Users__id", Value::Int(7)),
        ]));
        assert_eq!(entity.value("id"), Some(&Value::BigInt(1)));
        assert_eq!(entity.value("stats__total"), Some(&Value::BigInt(42)));
        assert_eq!(entity.value("Authors__name"), Some(&Value::Text("ada".into())));
        assert!(entity.value("total").is_none());
        assert_eq!(entity.one("user").unwrap().value("id"), Some(&Value::BigInt(7)));
    }

    #[test]
    fn test_parsed_json() {
        let hydrator = post_hydrator();
        let parsed = hydrator.parse_row(&row(&[
            ("Posts__id", Value::Int(1)),
            ("Users__id", Value::Int(7)),
            ("Tags__tag", Value::Text("rust".into())),
        ]));
        let json = parsed.to_json();
        assert_eq!(json["id"], 1);
        assert_eq!(json["user"]["id"], 7);
        assert!(json["user"]["profile"].is_null());
        assert_eq!(json["_matchingData"]["Tags"]["tag"], "rust");
    }

    #[test]
    fn test_lazy_results_cache_by_index() {
        let hydrator = post_hydrator();
        let rows = vec![
            row(&[("Posts__id", Value::Int(1))]),
            row(&[("Posts__id", Value::Int(2))]),
        ];
        let mut results = ResultIter::lazy(rows, hydrator);
        assert_eq!(results.len(), 2);
        results.get(1).unwrap();
        assert!(results.cache[0].is_none());
        assert!(results.cache[1].is_some());

        let ids: Vec<_> = results
            .map(|e| e.value("id").cloned().unwrap_or(Value::Null))
            .collect();
        assert_eq!(ids, vec![Value::BigInt(1), Value::BigInt(2)]);
    }

    #[test]
    fn test_buffered_results() {
        let mut results = ResultIter::buffered(vec![Entity::new()]);
        assert!(results.first().is_some());
        assert!(results.get(1).is_none());
        assert_eq!(results.into_vec().len(), 1);
    }
}
