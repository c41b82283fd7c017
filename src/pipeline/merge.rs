//! Multi-document merge.
//!
//! Each source is loaded on its own, its objects renumbered past everything
//! already taken, and its pages appended in native order. The sources' page
//! trees and catalogs are dropped; one fresh page tree holds every page.
//! Attributes a page inherits from its ancestors in the source tree are
//! copied onto the page itself, since those ancestors do not survive.

use crate::error::StageError;
use bytes::Bytes;
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};
use std::collections::BTreeMap;
use tracing::debug;

/// Page attributes a page may inherit from the page tree.
const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// Object types that belong to a source's document structure, not its pages.
const STRUCTURAL: [&[u8]; 6] = [b"Catalog", b"Pages", b"Page", b"Outlines", b"Outline", b"XRef"];

/// Guards against cyclic `Parent` chains in malformed inputs.
const MAX_TREE_DEPTH: usize = 64;

/// Name used in errors that concern the merge as a whole.
const MERGE_LABEL: &str = "bundle";

/// One named PDF to merge.
#[derive(Debug, Clone)]
pub struct MergeSource {
    pub name: String,
    pub bytes: Bytes,
}

impl MergeSource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// The combined document.
#[derive(Debug, Clone)]
pub struct MergedDocument {
    pub bytes: Bytes,
    pub page_count: usize,
}

/// Merge `sources` in order. Any unreadable source fails the whole merge.
pub fn merge_documents(sources: &[MergeSource]) -> Result<MergedDocument, StageError> {
    if sources.is_empty() {
        return Err(StageError::merge(MERGE_LABEL, "no documents to merge"));
    }

    let mut max_id = 1;
    let mut pages: Vec<(ObjectId, Dictionary)> = Vec::new();
    let mut objects: BTreeMap<ObjectId, Object> = BTreeMap::new();

    for source in sources {
        let mut doc = Document::load_mem(&source.bytes).map_err(|e| StageError::merge(&source.name, e))?;
        doc.renumber_objects_with(max_id);
        max_id = doc.max_id + 1;

        let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        for id in &page_ids {
            let mut page = doc
                .get_dictionary(*id)
                .map_err(|e| StageError::merge(&source.name, e))?
                .clone();
            materialize_inherited(&doc, &mut page);
            pages.push((*id, page));
        }
        debug!("Merge: '{}' contributes {} pages", source.name, page_ids.len());

        objects.extend(
            doc.objects
                .into_iter()
                .filter(|(_, obj)| !is_structural(obj)),
        );
    }

    let mut out = Document::with_version("1.7");
    out.objects = objects;
    out.max_id = max_id;

    let pages_id = out.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());
    for (id, mut page) in pages {
        page.set("Parent", pages_id);
        out.objects.insert(id, Object::Dictionary(page));
        kids.push(id.into());
    }

    let page_count = kids.len();
    out.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = out.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    out.trailer.set("Root", catalog_id);

    let mut buffer = Vec::new();
    out.save_to(&mut buffer)
        .map_err(|e| StageError::merge(MERGE_LABEL, format!("failed to serialize merged document: {e}")))?;

    Ok(MergedDocument {
        bytes: Bytes::from(buffer),
        page_count,
    })
}

fn is_structural(obj: &Object) -> bool {
    let type_name = obj
        .as_dict()
        .ok()
        .and_then(|d| d.get(b"Type").ok())
        .and_then(|t| t.as_name().ok());
    type_name.is_some_and(|t| STRUCTURAL.iter().any(|s| *s == t))
}

/// Copy inheritable attributes the page lacks from its nearest ancestor.
fn materialize_inherited(doc: &Document, page: &mut Dictionary) {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;

    while let Some(id) = parent {
        depth += 1;
        if depth > MAX_TREE_DEPTH {
            break;
        }
        let Ok(node) = doc.get_dictionary(id) else {
            break;
        };
        for key in INHERITABLE {
            if !page.has(key) {
                if let Ok(value) = node.get(key) {
                    page.set(key, value.clone());
                }
            }
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lopdf::Stream;

    /// A PDF whose pages carry their width as MediaBox and a marker in their
    /// content. MediaBox is set on the tree node when `inherit` is true.
    fn pdf(widths: &[i64], inherit: bool) -> Vec<u8> {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let mut kids = Vec::new();
        for w in widths {
            let content = doc.add_object(Stream::new(dictionary! {}, format!("% page {w}").into_bytes()));
            let mut page = dictionary! {
                "Type" => "Page",
                "Parent" => pages_id,
                "Contents" => content,
            };
            if !inherit {
                page.set("MediaBox", vec![Object::Integer(0), Object::Integer(0), Object::Integer(*w), Object::Integer(100)]);
            }
            kids.push(doc.add_object(page).into());
        }
        let mut tree = dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => widths.len() as i64,
        };
        if inherit {
            tree.set("MediaBox", vec![Object::Integer(0), Object::Integer(0), Object::Integer(widths[0]), Object::Integer(100)]);
            tree.set("Rotate", Object::Integer(90));
        }
        doc.objects.insert(pages_id, Object::Dictionary(tree));
        let catalog = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
        doc.trailer.set("Root", catalog);
        let mut buf = Vec::new();
        doc.save_to(&mut buf).unwrap();
        buf
    }

    fn page_widths(bytes: &[u8]) -> Vec<i64> {
        let doc = Document::load_mem(bytes).unwrap();
        doc.get_pages()
            .values()
            .map(|id| {
                let page = doc.get_dictionary(*id).unwrap();
                page.get(b"MediaBox").unwrap().as_array().unwrap()[2].as_i64().unwrap()
            })
            .collect()
    }

    #[test]
    fn pages_appended_in_list_order() {
        let merged = merge_documents(&[
            MergeSource::new("a.pdf", pdf(&[1, 2], false)),
            MergeSource::new("b.pdf", pdf(&[3, 4, 5], false)),
        ])
        .unwrap();
        assert_eq!(merged.page_count, 5);
        assert_eq!(page_widths(&merged.bytes), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn reversed_selection_reverses_documents() {
        let merged = merge_documents(&[
            MergeSource::new("b.pdf", pdf(&[3], false)),
            MergeSource::new("a.pdf", pdf(&[1, 2], false)),
        ])
        .unwrap();
        assert_eq!(page_widths(&merged.bytes), [3, 1, 2]);
    }

    #[test]
    fn inherited_attributes_survive() {
        let merged = merge_documents(&[MergeSource::new("inh.pdf", pdf(&[7, 7], true))]).unwrap();
        assert_eq!(page_widths(&merged.bytes), [7, 7]);
        let doc = Document::load_mem(&merged.bytes).unwrap();
        for id in doc.get_pages().values() {
            let page = doc.get_dictionary(*id).unwrap();
            assert_eq!(page.get(b"Rotate").unwrap().as_i64().unwrap(), 90);
        }
    }

    #[test]
    fn corrupt_source_names_offender() {
        let err = merge_documents(&[
            MergeSource::new("good.pdf", pdf(&[1], false)),
            MergeSource::new("broken.pdf", &b"%PDF-1.4 garbage"[..]),
        ])
        .unwrap_err();
        assert!(matches!(err, StageError::Merge { .. }));
        assert_eq!(err.file(), "broken.pdf");
    }

    #[test]
    fn empty_list_is_merge_error() {
        let err = merge_documents(&[]).unwrap_err();
        assert!(matches!(err, StageError::Merge { .. }));
    }

    #[test]
    fn sources_are_not_mutated() {
        let original = Bytes::from(pdf(&[1], false));
        let source = MergeSource::new("a.pdf", original.clone());
        merge_documents(std::slice::from_ref(&source)).unwrap();
        assert_eq!(source.bytes, original);
    }
}
