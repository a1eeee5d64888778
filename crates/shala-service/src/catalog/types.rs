use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::ResourcePath;

/// A school standard (grade), e.g. "Class 10".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Standard {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub display_order: i64,
    #[serde(default)]
    pub subjects: Vec<Subject>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub standard_id: String,
    #[serde(default)]
    pub chapters: Vec<Chapter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chapter {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub display_order: i64,
    pub subject_id: String,
}

/// What a chapter resource is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Textbook,
    Solution,
    /// Anything else, including kinds this client does not know about.
    #[serde(other)]
    Other,
}

/// How a chapter resource is delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Pdf,
    Video,
    Link,
    #[serde(other)]
    Unknown,
}

/// A single piece of learning material attached to a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChapterResource {
    pub id: String,
    pub chapter_id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub resource_type: ResourceType,
    pub content_type: ContentType,
    pub url: String,
    #[serde(default)]
    pub file_id: Option<String>,
    #[serde(default)]
    pub display_order: i64,
}

impl ChapterResource {
    /// The cache key of this resource, if it is a PDF.
    pub fn pdf_path(&self) -> Option<ResourcePath> {
        if self.content_type != ContentType::Pdf {
            return None;
        }
        ResourcePath::new(&self.url).ok()
    }
}

/// Chapter resources keyed by their resource type name, e.g. `textbook`.
pub type GroupedResources = BTreeMap<String, Vec<ChapterResource>>;

/// Collects the PDF paths of all grouped resources, in display order within each group.
pub fn pdf_paths(resources: &GroupedResources) -> Vec<ResourcePath> {
    resources
        .values()
        .flat_map(|group| {
            let mut group: Vec<_> = group.iter().collect();
            group.sort_by_key(|resource| resource.display_order);
            group
        })
        .filter_map(ChapterResource::pdf_path)
        .collect()
}

/// The response of a PDF upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    /// The path the file is served from, usable as a resource path.
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn resource(id: &str, content_type: &str, url: &str, order: i64) -> serde_json::Value {
        json!({
            "id": id,
            "chapterId": "ch-1",
            "title": format!("Resource {id}"),
            "resourceType": "textbook",
            "contentType": content_type,
            "url": url,
            "displayOrder": order,
        })
    }

    #[test]
    fn test_parse_standard() {
        let standard: Standard = serde_json::from_value(json!({
            "id": "std-10",
            "name": "Class 10",
            "displayOrder": 10,
            "subjects": [{
                "id": "sub-1",
                "name": "Science",
                "standardId": "std-10",
                "chapters": [{
                    "id": "ch-1",
                    "name": "Light",
                    "description": "Reflection and refraction",
                    "displayOrder": 1,
                    "subjectId": "sub-1",
                    "createdAt": "2024-01-01T00:00:00Z"
                }]
            }]
        }))
        .unwrap();

        assert_eq!(standard.description, None);
        assert_eq!(standard.subjects[0].chapters[0].name, "Light");
    }

    #[test]
    fn test_unknown_enum_values() {
        let mut value = resource("r1", "audio", "/uploads/a.mp3", 0);
        value["resourceType"] = json!("worksheet");
        let resource: ChapterResource = serde_json::from_value(value).unwrap();

        assert_eq!(resource.content_type, ContentType::Unknown);
        assert_eq!(resource.resource_type, ResourceType::Other);
        assert_eq!(resource.pdf_path(), None);
    }

    #[test]
    fn test_pdf_paths() {
        let grouped: GroupedResources = serde_json::from_value(json!({
            "solution": [resource("s1", "pdf", "/uploads/pdfs/solutions.pdf", 0)],
            "textbook": [
                resource("t2", "pdf", "/uploads/pdfs/part-2.pdf", 2),
                resource("t1", "pdf", "/uploads/pdfs/part-1.pdf", 1),
                resource("v1", "video", "https://www.youtube.com/watch?v=abc", 3),
            ],
        }))
        .unwrap();

        let paths: Vec<_> = pdf_paths(&grouped)
            .iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(
            paths,
            [
                "/uploads/pdfs/solutions.pdf",
                "/uploads/pdfs/part-1.pdf",
                "/uploads/pdfs/part-2.pdf",
            ]
        );
    }
}
