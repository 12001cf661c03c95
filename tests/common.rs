//! A minimal plan-node fixture used by the integration tests below.
//!
//! Mirrors the shape of `optd-core`'s own `MemoTestRelTyp` test fixture: a
//! handful of free-function constructors (`scan`, `join`, `project`, ...)
//! building a cheaply cloneable node type, used nowhere outside tests.

#![allow(dead_code)]

use std::collections::BTreeSet;
use std::sync::Arc;

use planmemo::{ColumnId, GroupReference, PlanNode};

#[derive(Debug, PartialEq, Eq, Hash)]
struct Inner {
    label: &'static str,
    table: Option<&'static str>,
    children: Vec<TestNode>,
    columns: BTreeSet<ColumnId>,
    group_ref: Option<GroupReference>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TestNode(Arc<Inner>);

impl PlanNode for TestNode {
    fn children(&self) -> Vec<Self> {
        self.0.children.clone()
    }

    fn replace_children(&self, new_children: Vec<Self>) -> Self {
        TestNode(Arc::new(Inner {
            label: self.0.label,
            table: self.0.table,
            children: new_children,
            columns: self.0.columns.clone(),
            group_ref: self.0.group_ref.clone(),
        }))
    }

    fn output_columns(&self) -> BTreeSet<ColumnId> {
        if let Some(group_ref) = &self.0.group_ref {
            group_ref.output_columns.clone()
        } else {
            self.0.columns.clone()
        }
    }

    fn as_group_reference(&self) -> Option<&GroupReference> {
        self.0.group_ref.as_ref()
    }

    fn from_group_reference(group_ref: GroupReference) -> Self {
        TestNode(Arc::new(Inner {
            label: "group_ref",
            table: None,
            children: vec![],
            columns: group_ref.output_columns.clone(),
            group_ref: Some(group_ref),
        }))
    }
}

pub fn scan(table: &'static str, columns: impl IntoIterator<Item = ColumnId>) -> TestNode {
    TestNode(Arc::new(Inner {
        label: "scan",
        table: Some(table),
        children: vec![],
        columns: columns.into_iter().collect(),
        group_ref: None,
    }))
}

pub fn filter(input: TestNode) -> TestNode {
    let columns = input.output_columns();
    TestNode(Arc::new(Inner {
        label: "filter",
        table: None,
        children: vec![input],
        columns,
        group_ref: None,
    }))
}

pub fn project(input: TestNode, columns: impl IntoIterator<Item = ColumnId>) -> TestNode {
    TestNode(Arc::new(Inner {
        label: "project",
        table: None,
        children: vec![input],
        columns: columns.into_iter().collect(),
        group_ref: None,
    }))
}

pub fn join(left: TestNode, right: TestNode) -> TestNode {
    let columns = left
        .output_columns()
        .into_iter()
        .chain(right.output_columns())
        .collect();
    TestNode(Arc::new(Inner {
        label: "join",
        table: None,
        children: vec![left, right],
        columns,
        group_ref: None,
    }))
}

/// A join built from two references to the same child, used to exercise
/// the duplicate-back-edge boundary behavior.
pub fn self_join(input: TestNode) -> TestNode {
    let columns = input.output_columns();
    TestNode(Arc::new(Inner {
        label: "join",
        table: None,
        children: vec![input.clone(), input],
        columns,
        group_ref: None,
    }))
}
