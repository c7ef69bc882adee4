//! Index record construction.
//!
//! A record's key is `<doc_id>-<chunk_id>`. Re-ingesting an unchanged
//! document therefore produces the same keys, and the store's upload action
//! overwrites the previous entries instead of duplicating them.

use crate::models::{AccessEntry, Chunk, IndexRecord, SourceDocument};

/// The index key for chunk `chunk_id` of document `doc_id`.
pub fn record_id(doc_id: &str, chunk_id: usize) -> String {
    format!("{}-{}", doc_id, chunk_id)
}

/// Combine a document, one of its chunks, and the chunk's embedding.
///
/// Pure: no I/O, and identical inputs always produce an identical record.
pub fn build(doc: &SourceDocument, chunk: &Chunk, vector: Vec<f32>) -> IndexRecord {
    IndexRecord {
        id: record_id(&doc.id, chunk.chunk_id),
        doc_id: doc.id.clone(),
        chunk_id: chunk.chunk_id,
        name: doc.name.clone(),
        created_datetime: doc.created_datetime,
        created_by: doc.created_by.clone(),
        size: doc.size,
        last_modified_datetime: doc.last_modified_datetime,
        last_modified_by: doc.last_modified_by.clone(),
        source: doc.source.clone(),
        content: chunk.text.clone(),
        content_vector: vector,
        read_access_entity: doc
            .read_access_entity
            .iter()
            .map(|principal| AccessEntry {
                list_item: principal.clone(),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeSet;

    fn doc() -> SourceDocument {
        SourceDocument {
            id: "D1".to_string(),
            content: "irrelevant".to_string(),
            name: "handbook.docx".to_string(),
            created_datetime: Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap(),
            created_by: "alice@example.com".to_string(),
            last_modified_datetime: Utc.with_ymd_and_hms(2024, 2, 3, 4, 5, 6).unwrap(),
            last_modified_by: "bob@example.com".to_string(),
            size: 4096,
            source: "/docs".to_string(),
            read_access_entity: BTreeSet::from(["group-a".to_string(), "user-b".to_string()]),
        }
    }

    #[test]
    fn test_record_id_format() {
        assert_eq!(record_id("D1", 0), "D1-0");
        assert_eq!(record_id("01ABC-XYZ", 12), "01ABC-XYZ-12");
    }

    #[test]
    fn test_build_copies_metadata() {
        let d = doc();
        let chunk = Chunk {
            chunk_id: 2,
            text: "third passage".to_string(),
        };
        let record = build(&d, &chunk, vec![0.1, 0.2]);

        assert_eq!(record.id, "D1-2");
        assert_eq!(record.doc_id, "D1");
        assert_eq!(record.chunk_id, 2);
        assert_eq!(record.content, "third passage");
        assert_eq!(record.content_vector, vec![0.1, 0.2]);
        assert_eq!(record.name, d.name);
        assert_eq!(record.created_datetime, d.created_datetime);
        assert_eq!(record.created_by, d.created_by);
        assert_eq!(record.last_modified_datetime, d.last_modified_datetime);
        assert_eq!(record.last_modified_by, d.last_modified_by);
        assert_eq!(record.size, 4096);
        assert_eq!(record.source, "/docs");
        assert_eq!(
            record.read_access_entity,
            vec![
                AccessEntry {
                    list_item: "group-a".to_string()
                },
                AccessEntry {
                    list_item: "user-b".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_build_is_byte_identical_on_rerun() {
        let d = doc();
        let chunk = Chunk {
            chunk_id: 0,
            text: "passage".to_string(),
        };
        let a = serde_json::to_vec(&build(&d, &chunk, vec![1.0; 4])).unwrap();
        let b = serde_json::to_vec(&build(&d, &chunk, vec![1.0; 4])).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_wire_shape() {
        let chunk = Chunk {
            chunk_id: 0,
            text: "passage".to_string(),
        };
        let json = serde_json::to_value(build(&doc(), &chunk, vec![0.5])).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            vec![
                "chunk_id",
                "content",
                "contentVector",
                "created_by",
                "created_datetime",
                "doc_id",
                "id",
                "last_modified_by",
                "last_modified_datetime",
                "name",
                "read_access_entity",
                "size",
                "source",
            ]
        );
        assert_eq!(json["read_access_entity"][0]["list_item"], "group-a");
    }
}
