//! Year → Provider → Document browse tree.
//!
//! The tree is rebuilt from the owner's documents on every request; nothing
//! is cached. Years sort newest first with documents lacking a year in a
//! trailing "Unknown Year" bucket. Providers sort lexically within a year
//! with a trailing "Unknown Provider" bucket. Documents keep the order they
//! were handed in.

use std::cmp::Reverse;
use std::collections::BTreeMap;

use serde::Serialize;
use uuid::Uuid;

use crate::models::Document;

pub const UNKNOWN_YEAR: &str = "Unknown Year";
pub const UNKNOWN_PROVIDER: &str = "Unknown Provider";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Year,
    Provider,
    Document,
}

/// One node of the browse forest. Branch ids are synthetic and derived from
/// their grouping keys; only leaves carry a `document_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeNode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<Uuid>,
}

// Variant order is the sort order: known years (descending) before unknown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum YearKey {
    Known(Reverse<i32>),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ProviderKey {
    Named(String),
    Unknown,
}

/// Groups documents into the browse forest.
///
/// Callers pass the owner's non-archived documents; archived ones are
/// skipped here as well.
pub fn build_tree(documents: &[Document]) -> Vec<TreeNode> {
    let mut groups: BTreeMap<YearKey, BTreeMap<ProviderKey, Vec<&Document>>> = BTreeMap::new();

    for doc in documents.iter().filter(|d| !d.archived) {
        let year = match doc.year {
            Some(y) => YearKey::Known(Reverse(y)),
            None => YearKey::Unknown,
        };
        let provider = match doc.provider.as_deref().map(str::trim) {
            Some(p) if !p.is_empty() => ProviderKey::Named(p.to_string()),
            _ => ProviderKey::Unknown,
        };
        groups
            .entry(year)
            .or_default()
            .entry(provider)
            .or_default()
            .push(doc);
    }

    groups
        .into_iter()
        .map(|(year, providers)| {
            let (year_id, year_name) = match year {
                YearKey::Known(Reverse(y)) => (y.to_string(), y.to_string()),
                YearKey::Unknown => ("unknown".to_string(), UNKNOWN_YEAR.to_string()),
            };

            let children = providers
                .into_iter()
                .map(|(provider, docs)| {
                    let (provider_id, provider_name) = match provider {
                        ProviderKey::Named(name) => (name.clone(), name),
                        ProviderKey::Unknown => {
                            ("unknown".to_string(), UNKNOWN_PROVIDER.to_string())
                        }
                    };
                    TreeNode {
                        id: format!("provider:{}:{}", year_id, provider_id),
                        name: provider_name,
                        kind: NodeKind::Provider,
                        children: docs.into_iter().map(leaf).collect(),
                        document_id: None,
                    }
                })
                .collect();

            TreeNode {
                id: format!("year:{}", year_id),
                name: year_name,
                kind: NodeKind::Year,
                children,
                document_id: None,
            }
        })
        .collect()
}

fn leaf(doc: &Document) -> TreeNode {
    TreeNode {
        id: format!("document:{}", doc.id),
        name: doc.display_title().to_string(),
        kind: NodeKind::Document,
        children: Vec::new(),
        document_id: Some(doc.id),
    }
}
